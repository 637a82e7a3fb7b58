use byteorder::{ByteOrder, LE};
use tracing::debug;
use liblzma::stream::{Action, Filters, LzmaOptions, Status, Stream};

use super::super::error::{Result, slice};

/// `lc = 3, lp = 0, pb = 2`, the only property byte the installer compiler emits.
const PROPERTIES_BYTE: u8 = 0x5D;
const PROPERTIES_LEN: usize = 5;

/// liblzma rejects dictionaries smaller than this.
const MIN_DICTIONARY_SIZE: u32 = 1 << 12;

const OUTPUT_CHUNK: usize = 1 << 16;

/// Whether `data` starts with the 5-byte LZMA properties header the installer writes. The
/// dictionary size is a multiple of 64 KiB and the range coder's first byte is always zero.
pub fn is_properties(data: &[u8]) -> bool {
    matches!(data, [PROPERTIES_BYTE, 0, 0, _, _, 0, next, ..] if next & 0x80 == 0)
}

/// Decodes a headerless LZMA1 stream: an optional one-byte filter marker, the properties header,
/// then compressed data running until the end marker or the end of `source`.
pub fn decompress(source: &[u8]) -> Result<(Vec<u8>, usize)> {
    let (x86_filter, properties_offset) = match source {
        [marker @ (0 | 1), rest @ ..] if is_properties(rest) => (*marker == 1, 1),
        _ => (false, 0),
    };

    let properties = slice(source, properties_offset, PROPERTIES_LEN, "LZMA properties")?;
    let mut byte = u32::from(properties[0]);
    let literal_context_bits = byte % 9;
    byte /= 9;
    let literal_position_bits = byte % 5;
    let position_bits = byte / 5;
    let dictionary_size = LE::read_u32(&properties[1..]).max(MIN_DICTIONARY_SIZE);

    debug!(dictionary_size, x86_filter, "Decoding LZMA stream");

    let mut options = LzmaOptions::new_preset(6)?;
    options
        .literal_context_bits(literal_context_bits)
        .literal_position_bits(literal_position_bits)
        .position_bits(position_bits)
        .dict_size(dictionary_size);

    let mut filters = Filters::new();
    if x86_filter {
        filters.x86();
    }
    filters.lzma1(&options);

    let mut stream = Stream::new_raw_decoder(&filters)?;
    let input = &source[properties_offset + PROPERTIES_LEN..];
    let mut output = Vec::with_capacity(input.len().saturating_mul(2).max(OUTPUT_CHUNK));

    loop {
        if output.len() == output.capacity() {
            output.reserve(OUTPUT_CHUNK);
        }

        let (consumed, produced) = (stream.total_in(), stream.total_out());
        let status = stream.process_vec(&input[consumed as usize..], &mut output, Action::Run)?;

        if matches!(status, Status::StreamEnd)
            || (stream.total_in() == consumed && stream.total_out() == produced)
        {
            break;
        }
    }

    Ok((
        output,
        properties_offset + PROPERTIES_LEN + stream.total_in() as usize,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::tests::lzma_stream;
    use super::{decompress, is_properties};

    #[test]
    fn recognises_properties_header() {
        assert!(is_properties(&[0x5D, 0, 0, 0x80, 0, 0, 0x00]));
        assert!(is_properties(&[0x5D, 0, 0, 0x00, 0x01, 0, 0x7F, 0xFF]));
    }

    #[test]
    fn rejects_other_property_bytes() {
        assert!(!is_properties(&[0x5E, 0, 0, 0x80, 0, 0, 0x00]));
        assert!(!is_properties(&[0x5D, 0, 0, 0x80, 0, 0, 0x80]));
        assert!(!is_properties(&[0x5D, 0, 0, 0x80, 0, 0]));
    }

    #[test]
    fn decodes_raw_stream_up_to_its_end_marker() {
        let data = b"SetOutPath $INSTDIR\r\n".repeat(64);
        let mut encoded = lzma_stream(&data, false);
        let stream_len = encoded.len();
        encoded.extend_from_slice(b"payload that follows");

        let (output, consumed) = decompress(&encoded).unwrap();
        assert_eq!(output, data);
        assert_eq!(consumed, stream_len);
    }

    #[test]
    fn reverses_x86_filter_behind_marker() {
        // call rel32, nop, jmp rel32, ret
        let data = [
            0xE8, 0x10, 0x20, 0x00, 0x00, 0x90, 0xE9, 0x00, 0x01, 0x00, 0x00, 0xC3,
        ]
        .repeat(200);
        let encoded = lzma_stream(&data, true);
        assert_eq!(encoded[0], 1);

        let (output, consumed) = decompress(&encoded).unwrap();
        assert_eq!(output, data);
        assert_eq!(consumed, encoded.len());
    }
}
