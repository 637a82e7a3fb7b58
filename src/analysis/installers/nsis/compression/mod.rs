mod bzip2;
mod inflate;
mod lzma;

use std::{fmt, io::Read, str::FromStr};

use byteorder::{ByteOrder, LE};
use flate2::read::DeflateDecoder;
use tracing::{debug, warn};

use super::error::{NsisError, Result, slice};

/// Set on a size word when the data that follows it is compressed.
const COMPRESSED_FLAG: u32 = 1 << 31;

/// Marks a non-solid header: the fourth byte of the leading size word.
const NON_SOLID_MARKER: u8 = 0x80;

const HEADER_PROBE_LEN: usize = 12;
const BLOCK_PROBE_LEN: usize = 4;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Compression {
    #[default]
    None,
    Deflate,
    Lzma,
    BZip2,
}

impl Compression {
    /// The name the installer compiler uses for this method in `SetCompressor`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Deflate => "zlib",
            Self::Lzma => "lzma",
            Self::BZip2 => "bzip2",
        }
    }

    /// Guesses the algorithm of a compressed stream from its leading bytes. Streams that are
    /// neither LZMA nor BZip2 are assumed to be raw deflate.
    pub fn detect(data: &[u8]) -> Self {
        if is_lzma(data) {
            Self::Lzma
        } else if is_bzip2(data) {
            Self::BZip2
        } else {
            Self::Deflate
        }
    }

    /// Decompresses `source`, returning the decompressed bytes and how many bytes of `source`
    /// were consumed.
    ///
    /// LZMA streams are open-ended and stop at their end marker or at the end of `source`.
    pub fn decompress(self, source: &[u8]) -> Result<(Vec<u8>, usize)> {
        match self {
            Self::None => Ok((source.to_vec(), source.len())),
            Self::Deflate => inflate_with_fallback(source),
            Self::Lzma => lzma::decompress(source),
            Self::BZip2 => bzip2::decompress(source),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = NsisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "zlib" | "deflate" => Ok(Self::Deflate),
            "lzma" => Ok(Self::Lzma),
            "bzip2" => Ok(Self::BZip2),
            _ => Err(NsisError::UnknownCompression(s.to_owned())),
        }
    }
}

/// A unit of data read from a size-prefixed region of an installer.
#[derive(Debug)]
pub struct Unit {
    pub data: Vec<u8>,
    pub compression: Compression,
    /// Whether the whole archive is one compression stream shared by the header and payload.
    pub solid: bool,
    /// Stream offset immediately following the unit's stored bytes.
    pub end: usize,
}

/// Reads the installer header that starts at `offset` in `stream`.
///
/// Unless `forced` names an algorithm, the compression method and solid mode are detected from the
/// first 12 bytes. A solid archive has no size word in front of its stream, so the detection
/// window starts at `offset`; a non-solid header carries a size word whose top byte is `0x80` and
/// detection is re-run on the 4-byte-shifted window.
pub fn read_header(stream: &[u8], offset: usize, forced: Option<Compression>) -> Result<Unit> {
    read_unit(stream, offset, true, forced)
}

/// Reads one size-prefixed payload entry at `offset` in `stream` using a known algorithm.
pub fn read_block(stream: &[u8], offset: usize, compression: Compression) -> Result<Unit> {
    read_unit(stream, offset, false, Some(compression))
}

fn read_unit(
    stream: &[u8],
    offset: usize,
    is_header: bool,
    forced: Option<Compression>,
) -> Result<Unit> {
    let size_word = LE::read_u32(slice(stream, offset, size_of::<u32>(), "size word")?);

    if size_word & COMPRESSED_FLAG == 0 {
        let start = offset + size_of::<u32>();
        let data = slice(stream, start, size_word as usize, "stored data")?;
        return Ok(Unit {
            data: data.to_vec(),
            compression: Compression::None,
            solid: false,
            end: start + data.len(),
        });
    }

    let probe_len = if is_header {
        HEADER_PROBE_LEN
    } else {
        BLOCK_PROBE_LEN
    };
    let probe = &stream[offset..stream.len().min(offset + probe_len)];

    let (compression, solid) = match forced {
        Some(compression) if is_header => (compression, is_solid_header(probe, compression)),
        Some(compression) => (compression, true),
        None if is_header => detect_header(probe),
        None => (Compression::detect(&probe[size_of::<u32>()..]), true),
    };
    debug!(%compression, solid, offset, "Detected compression");

    let (start, size) = if solid && is_header {
        (offset, None)
    } else {
        (
            offset + size_of::<u32>(),
            Some((size_word & !COMPRESSED_FLAG) as usize),
        )
    };

    let source = match size {
        Some(size) if compression != Compression::Lzma => {
            slice(stream, start, size, "compressed data")?
        }
        _ => stream.get(start..).unwrap_or_default(),
    };

    let (data, consumed) = compression.decompress(source)?;
    let consumed = match size {
        Some(size) if compression != Compression::Lzma => size,
        _ => consumed,
    };

    Ok(Unit {
        data,
        compression,
        solid,
        end: start + consumed,
    })
}

fn detect_header(probe: &[u8]) -> (Compression, bool) {
    if is_lzma(probe) {
        (Compression::Lzma, true)
    } else if probe.get(3) == Some(&NON_SOLID_MARKER) {
        (Compression::detect(probe.get(4..).unwrap_or_default()), false)
    } else if is_bzip2(probe) {
        (Compression::BZip2, true)
    } else {
        (Compression::Deflate, true)
    }
}

/// Solid mode for a header whose algorithm is already known. A solid LZMA stream can carry `0x80`
/// in its fourth byte as part of the dictionary size, so it is recognised by its properties first.
fn is_solid_header(probe: &[u8], compression: Compression) -> bool {
    (compression == Compression::Lzma && is_lzma(probe))
        || probe.get(3) != Some(&NON_SOLID_MARKER)
}

/// Checks for an LZMA properties header, optionally behind the one-byte filter marker.
fn is_lzma(data: &[u8]) -> bool {
    lzma::is_properties(data)
        || (data.first().is_some_and(|&marker| marker <= 1) && lzma::is_properties(&data[1..]))
}

/// The toolchain's bzip2 streams begin with the `0x31` block marker followed by the high byte of
/// the 24-bit BWT origin pointer, which never exceeds `0x0D` for 900k blocks.
fn is_bzip2(data: &[u8]) -> bool {
    matches!(data, [0x31, origin, ..] if *origin < 0x0E)
}

fn inflate_with_fallback(source: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut decoder = DeflateDecoder::new(source);
    let mut data = Vec::new();
    match decoder.read_to_end(&mut data) {
        Ok(_) => Ok((data, decoder.total_in() as usize)),
        Err(error) => {
            warn!(%error, "Deflate decoder failed, retrying with the installer's inflate");
            inflate::inflate(source)
        }
    }
}
