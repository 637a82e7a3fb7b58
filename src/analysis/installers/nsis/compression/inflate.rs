//! Raw deflate decoder matching the installer's bundled inflater.
//!
//! The bundled inflater stops quietly when its input runs out instead of reporting a truncated
//! stream, which solid archives rely on. Whatever was decoded up to that point is returned.

use super::super::error::{NsisError, Result};
use super::Compression;

const MAX_BITS: usize = 15;
const END_OF_BLOCK: u16 = 256;

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DISTANCE_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Order in which code length code lengths are stored in a dynamic block header.
const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Input ran out before the stream's final block ended.
struct EndOfInput;

struct BitReader<'data> {
    data: &'data [u8],
    position: usize,
    buffer: u32,
    count: u32,
}

impl<'data> BitReader<'data> {
    const fn new(data: &'data [u8]) -> Self {
        Self {
            data,
            position: 0,
            buffer: 0,
            count: 0,
        }
    }

    fn bits(&mut self, count: u32) -> Result<u32, EndOfInput> {
        while self.count < count {
            let byte = *self.data.get(self.position).ok_or(EndOfInput)?;
            self.position += 1;
            self.buffer |= u32::from(byte) << self.count;
            self.count += 8;
        }
        let value = self.buffer & ((1 << count) - 1);
        self.buffer >>= count;
        self.count -= count;
        Ok(value)
    }

    fn align_to_byte(&mut self) {
        self.buffer = 0;
        self.count = 0;
    }

    /// Bytes consumed so far, counting a partially used byte as consumed.
    const fn consumed(&self) -> usize {
        self.position
    }
}

/// Canonical Huffman decoding table in the `counts`/`symbols` form used by zlib's `puff`.
struct Huffman {
    counts: [u16; MAX_BITS + 1],
    symbols: Vec<u16>,
}

impl Huffman {
    fn new(lengths: &[u8]) -> Result<Self> {
        let mut counts = [0u16; MAX_BITS + 1];
        for &length in lengths {
            counts[usize::from(length)] += 1;
        }

        let mut left: i32 = 1;
        for &count in &counts[1..] {
            left = (left << 1) - i32::from(count);
            if left < 0 {
                return Err(invalid("over-subscribed Huffman code"));
            }
        }

        let mut offsets = [0u16; MAX_BITS + 2];
        for length in 1..=MAX_BITS {
            offsets[length + 1] = offsets[length] + counts[length];
        }

        let mut symbols = vec![0; lengths.len()];
        for (symbol, &length) in lengths.iter().enumerate() {
            if length != 0 {
                let slot = &mut offsets[usize::from(length)];
                symbols[usize::from(*slot)] = symbol as u16;
                *slot += 1;
            }
        }

        Ok(Self { counts, symbols })
    }

    fn decode(&self, reader: &mut BitReader) -> Result<Option<u16>, EndOfInput> {
        let (mut code, mut first, mut index) = (0i32, 0i32, 0i32);
        for &count in &self.counts[1..] {
            code |= reader.bits(1)? as i32;
            let count = i32::from(count);
            if code - count < first {
                return Ok(self.symbols.get((index + code - first) as usize).copied());
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        Ok(None)
    }
}

fn invalid(reason: &str) -> NsisError {
    NsisError::decompression(Compression::Deflate, reason)
}

/// Decodes a raw deflate stream, returning the output and the number of input bytes consumed.
pub fn inflate(source: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut reader = BitReader::new(source);
    let mut output = Vec::with_capacity(source.len().saturating_mul(4));

    loop {
        match inflate_block(&mut reader, &mut output) {
            Ok(true) => break,
            Ok(false) => {}
            Err(Step::EndOfInput) => break,
            Err(Step::Invalid(error)) => return Err(error),
        }
    }

    Ok((output, reader.consumed()))
}

enum Step {
    EndOfInput,
    Invalid(NsisError),
}

impl From<EndOfInput> for Step {
    fn from(_: EndOfInput) -> Self {
        Self::EndOfInput
    }
}

impl From<NsisError> for Step {
    fn from(error: NsisError) -> Self {
        Self::Invalid(error)
    }
}

/// Decodes one block, returning whether it was the final block.
fn inflate_block(reader: &mut BitReader, output: &mut Vec<u8>) -> Result<bool, Step> {
    let last = reader.bits(1)? == 1;
    match reader.bits(2)? {
        0 => stored(reader, output)?,
        1 => {
            let (literals, distances) = fixed_tables()?;
            codes(reader, output, &literals, &distances)?;
        }
        2 => {
            let (literals, distances) = dynamic_tables(reader)?;
            codes(reader, output, &literals, &distances)?;
        }
        _ => return Err(invalid("reserved block type").into()),
    }
    Ok(last)
}

fn stored(reader: &mut BitReader, output: &mut Vec<u8>) -> Result<(), Step> {
    reader.align_to_byte();
    let length = reader.bits(16)?;
    let complement = reader.bits(16)?;
    if length != !complement & 0xFFFF {
        return Err(invalid("stored block length mismatch").into());
    }
    for _ in 0..length {
        output.push(reader.bits(8)? as u8);
    }
    Ok(())
}

fn fixed_tables() -> Result<(Huffman, Huffman)> {
    let mut lengths = [0u8; 288];
    lengths[..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..].fill(8);
    Ok((Huffman::new(&lengths)?, Huffman::new(&[5; 30])?))
}

fn dynamic_tables(reader: &mut BitReader) -> Result<(Huffman, Huffman), Step> {
    let literal_count = reader.bits(5)? as usize + 257;
    let distance_count = reader.bits(5)? as usize + 1;
    let code_length_count = reader.bits(4)? as usize + 4;
    if literal_count > 286 || distance_count > 30 {
        return Err(invalid("too many length or distance codes").into());
    }

    let mut code_lengths = [0u8; 19];
    for &index in &CODE_LENGTH_ORDER[..code_length_count] {
        code_lengths[index] = reader.bits(3)? as u8;
    }
    let code_length_table = Huffman::new(&code_lengths)?;

    let mut lengths = vec![0u8; literal_count + distance_count];
    let mut index = 0;
    while index < lengths.len() {
        let symbol = code_length_table
            .decode(reader)?
            .ok_or_else(|| invalid("invalid code length code"))?;
        let (value, repeat) = match symbol {
            0..=15 => {
                lengths[index] = symbol as u8;
                index += 1;
                continue;
            }
            16 => {
                let previous = index
                    .checked_sub(1)
                    .map(|previous| lengths[previous])
                    .ok_or_else(|| invalid("repeat with no previous length"))?;
                (previous, 3 + reader.bits(2)? as usize)
            }
            17 => (0, 3 + reader.bits(3)? as usize),
            _ => (0, 11 + reader.bits(7)? as usize),
        };
        if index + repeat > lengths.len() {
            return Err(invalid("code lengths overflow the table").into());
        }
        lengths[index..index + repeat].fill(value);
        index += repeat;
    }

    if lengths[usize::from(END_OF_BLOCK)] == 0 {
        return Err(invalid("missing end-of-block code").into());
    }

    Ok((
        Huffman::new(&lengths[..literal_count])?,
        Huffman::new(&lengths[literal_count..])?,
    ))
}

fn codes(
    reader: &mut BitReader,
    output: &mut Vec<u8>,
    literals: &Huffman,
    distances: &Huffman,
) -> Result<(), Step> {
    loop {
        let symbol = literals
            .decode(reader)?
            .ok_or_else(|| invalid("invalid literal/length code"))?;

        match symbol {
            0..END_OF_BLOCK => output.push(symbol as u8),
            END_OF_BLOCK => return Ok(()),
            _ => {
                let index = usize::from(symbol - 257);
                if index >= LENGTH_BASE.len() {
                    return Err(invalid("invalid length symbol").into());
                }
                let length = usize::from(LENGTH_BASE[index])
                    + reader.bits(u32::from(LENGTH_EXTRA[index]))? as usize;

                let index = usize::from(
                    distances
                        .decode(reader)?
                        .ok_or_else(|| invalid("invalid distance code"))?,
                );
                if index >= DISTANCE_BASE.len() {
                    return Err(invalid("invalid distance symbol").into());
                }
                let distance = usize::from(DISTANCE_BASE[index])
                    + reader.bits(u32::from(DISTANCE_EXTRA[index]))? as usize;

                let start = output
                    .len()
                    .checked_sub(distance)
                    .ok_or_else(|| invalid("distance reaches before start of output"))?;
                for offset in 0..length {
                    output.push(output[start + offset]);
                }
            }
        }
    }
}
