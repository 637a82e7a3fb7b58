//! Decoder for the installer compiler's bzip2 dialect.
//!
//! The dialect drops the `BZh` stream header, replaces the 48-bit block magic with a single
//! `0x31` byte, ends the stream with a single `0x17` byte, and carries neither CRCs nor the
//! randomisation bit. Blocks are always coded with 900k block size.

use super::super::error::{NsisError, Result};
use super::Compression;

const BLOCK_MARKER: u32 = 0x31;
const END_MARKER: u32 = 0x17;

const MAX_BLOCK_SIZE: usize = 900_000;
const MAX_ORIGIN_POINTER: u32 = 10 + MAX_BLOCK_SIZE as u32;
const MAX_GROUPS: usize = 6;
const MIN_GROUPS: usize = 2;
const MAX_CODE_LENGTH: usize = 20;
const GROUP_SIZE: usize = 50;

const RUN_A: u16 = 0;
const RUN_B: u16 = 1;

fn invalid(reason: &str) -> NsisError {
    NsisError::decompression(Compression::BZip2, reason)
}

struct BitReader<'data> {
    data: &'data [u8],
    position: usize,
    buffer: u64,
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

    /// Reads `count` bits, most significant first.
    fn bits(&mut self, count: u32) -> Result<u32> {
        while self.count < count {
            let byte = *self
                .data
                .get(self.position)
                .ok_or_else(|| invalid("unexpected end of stream"))?;
            self.position += 1;
            self.buffer = (self.buffer << 8) | u64::from(byte);
            self.count += 8;
        }
        self.count -= count;
        Ok(((self.buffer >> self.count) & ((1 << count) - 1)) as u32)
    }

    fn bit(&mut self) -> Result<bool> {
        self.bits(1).map(|bit| bit == 1)
    }
}

/// Huffman decoding limits for one coding group, as built by `BZ2_hbCreateDecodeTables`.
struct Group {
    limit: [i32; MAX_CODE_LENGTH + 2],
    base: [i32; MAX_CODE_LENGTH + 2],
    permute: Vec<u16>,
    min_length: u32,
}

impl Group {
    fn new(lengths: &[u8]) -> Self {
        let min_length = lengths.iter().copied().min().unwrap_or(1);
        let max_length = lengths.iter().copied().max().unwrap_or(1);

        let mut permute = Vec::with_capacity(lengths.len());
        for length in min_length..=max_length {
            for (symbol, _) in lengths
                .iter()
                .enumerate()
                .filter(|(_, symbol_length)| **symbol_length == length)
            {
                permute.push(symbol as u16);
            }
        }

        let mut base = [0i32; MAX_CODE_LENGTH + 2];
        for &length in lengths {
            base[usize::from(length) + 1] += 1;
        }
        for index in 1..base.len() {
            base[index] += base[index - 1];
        }

        let mut limit = [0i32; MAX_CODE_LENGTH + 2];
        let mut code = 0;
        for length in usize::from(min_length)..=usize::from(max_length) {
            code += base[length + 1] - base[length];
            limit[length] = code - 1;
            code <<= 1;
        }
        for length in usize::from(min_length) + 1..=usize::from(max_length) {
            base[length] = ((limit[length - 1] + 1) << 1) - base[length];
        }

        Self {
            limit,
            base,
            permute,
            min_length: u32::from(min_length),
        }
    }

    fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        let mut length = self.min_length as usize;
        let mut code = reader.bits(self.min_length)? as i32;
        loop {
            if length > MAX_CODE_LENGTH {
                return Err(invalid("Huffman code too long"));
            }
            if code <= self.limit[length] {
                break;
            }
            length += 1;
            code = (code << 1) | reader.bits(1)? as i32;
        }
        usize::try_from(code - self.base[length])
            .ok()
            .and_then(|index| self.permute.get(index).copied())
            .ok_or_else(|| invalid("invalid Huffman code"))
    }
}

/// Decodes a complete stream, returning the output and the number of bytes consumed.
pub fn decompress(source: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut reader = BitReader::new(source);
    let mut output = Vec::new();

    loop {
        match reader.bits(8)? {
            END_MARKER => break,
            BLOCK_MARKER => decode_block(&mut reader, &mut output)?,
            _ => return Err(invalid("missing block marker")),
        }
    }

    Ok((output, reader.position))
}

fn decode_block(reader: &mut BitReader, output: &mut Vec<u8>) -> Result<()> {
    let origin = reader.bits(24)?;
    if origin > MAX_ORIGIN_POINTER {
        return Err(invalid("origin pointer out of range"));
    }

    let symbols = read_symbol_map(reader)?;
    let alpha_size = symbols.len() + 2;

    let group_count = reader.bits(3)? as usize;
    if !(MIN_GROUPS..=MAX_GROUPS).contains(&group_count) {
        return Err(invalid("invalid number of Huffman groups"));
    }
    let selectors = read_selectors(reader, group_count)?;

    let groups = (0..group_count)
        .map(|_| read_code_lengths(reader, alpha_size).map(|lengths| Group::new(&lengths)))
        .collect::<Result<Vec<_>>>()?;

    let block = read_block_symbols(reader, &symbols, &selectors, &groups, alpha_size)?;
    if block.is_empty() {
        return Ok(());
    }
    if origin as usize >= block.len() {
        return Err(invalid("origin pointer outside block"));
    }

    undo_run_length(&inverse_bwt(&block, origin as usize), output);
    Ok(())
}

/// Reads the two-level bitmap of bytes used in the block.
fn read_symbol_map(reader: &mut BitReader) -> Result<Vec<u8>> {
    let ranges = reader.bits(16)?;
    let mut symbols = Vec::new();
    for range in 0..16u32 {
        if ranges & (0x8000 >> range) != 0 {
            let used = reader.bits(16)?;
            for offset in 0..16u32 {
                if used & (0x8000 >> offset) != 0 {
                    symbols.push((range * 16 + offset) as u8);
                }
            }
        }
    }
    if symbols.is_empty() {
        return Err(invalid("block uses no symbols"));
    }
    Ok(symbols)
}

fn read_selectors(reader: &mut BitReader, group_count: usize) -> Result<Vec<u8>> {
    let selector_count = reader.bits(15)? as usize;
    if selector_count == 0 {
        return Err(invalid("block has no selectors"));
    }

    let mut order = (0..group_count as u8).collect::<Vec<_>>();
    let mut selectors = Vec::with_capacity(selector_count);
    for _ in 0..selector_count {
        let mut index = 0;
        while reader.bit()? {
            index += 1;
            if index >= group_count {
                return Err(invalid("selector out of range"));
            }
        }
        let group = order.remove(index);
        order.insert(0, group);
        selectors.push(group);
    }
    Ok(selectors)
}

fn read_code_lengths(reader: &mut BitReader, alpha_size: usize) -> Result<Vec<u8>> {
    let mut current = reader.bits(5)? as i32;
    let mut lengths = Vec::with_capacity(alpha_size);
    for _ in 0..alpha_size {
        loop {
            if !(1..=MAX_CODE_LENGTH as i32).contains(&current) {
                return Err(invalid("code length out of range"));
            }
            if !reader.bit()? {
                break;
            }
            if reader.bit()? {
                current -= 1;
            } else {
                current += 1;
            }
        }
        lengths.push(current as u8);
    }
    Ok(lengths)
}

/// Decodes the move-to-front and zero-run coded symbols into the BWT-transformed block.
fn read_block_symbols(
    reader: &mut BitReader,
    symbols: &[u8],
    selectors: &[u8],
    groups: &[Group],
    alpha_size: usize,
) -> Result<Vec<u8>> {
    let end_of_block = (alpha_size - 1) as u16;
    let mut order = (0..=u8::MAX).collect::<Vec<_>>();
    let mut block = Vec::new();

    let mut selector_index = 0;
    let mut group_remaining = 0;
    let mut group = &groups[0];
    let mut next_symbol = |reader: &mut BitReader| -> Result<u16> {
        if group_remaining == 0 {
            let selector = *selectors
                .get(selector_index)
                .ok_or_else(|| invalid("ran out of selectors"))?;
            group = groups
                .get(usize::from(selector))
                .ok_or_else(|| invalid("selector names a missing group"))?;
            selector_index += 1;
            group_remaining = GROUP_SIZE;
        }
        group_remaining -= 1;
        group.decode(reader)
    };

    let mut symbol = next_symbol(reader)?;
    loop {
        if symbol == end_of_block {
            break;
        }

        if symbol == RUN_A || symbol == RUN_B {
            let mut run = 0usize;
            let mut weight = 1usize;
            while symbol == RUN_A || symbol == RUN_B {
                run += weight << usize::from(symbol == RUN_B);
                weight <<= 1;
                if weight > MAX_BLOCK_SIZE * 2 {
                    return Err(invalid("run too long"));
                }
                symbol = next_symbol(reader)?;
            }
            let byte = symbols[usize::from(order[0])];
            if block.len() + run > MAX_BLOCK_SIZE {
                return Err(invalid("block too large"));
            }
            block.resize(block.len() + run, byte);
            continue;
        }

        let position = usize::from(symbol - 1);
        if position >= symbols.len() {
            return Err(invalid("move-to-front index out of range"));
        }
        let index = order.remove(position);
        order.insert(0, index);
        if block.len() >= MAX_BLOCK_SIZE {
            return Err(invalid("block too large"));
        }
        block.push(symbols[usize::from(index)]);
        symbol = next_symbol(reader)?;
    }

    Ok(block)
}

fn inverse_bwt(block: &[u8], origin: usize) -> Vec<u8> {
    let mut cumulative = [0usize; 256];
    for &byte in block {
        cumulative[usize::from(byte)] += 1;
    }
    let mut total = 0;
    for count in &mut cumulative {
        let current = *count;
        *count = total;
        total += current;
    }

    let mut links = vec![0u32; block.len()];
    for (index, &byte) in block.iter().enumerate() {
        let slot = &mut cumulative[usize::from(byte)];
        links[*slot] = index as u32;
        *slot += 1;
    }

    let mut output = Vec::with_capacity(block.len());
    let mut position = links[origin] as usize;
    for _ in 0..block.len() {
        output.push(block[position]);
        position = links[position] as usize;
    }
    output
}

/// Expands the initial run-length stage: four equal bytes are followed by a repeat count.
fn undo_run_length(data: &[u8], output: &mut Vec<u8>) {
    let mut run = 0;
    let mut previous = None;
    let mut bytes = data.iter().copied();
    while let Some(byte) = bytes.next() {
        output.push(byte);
        if previous == Some(byte) {
            run += 1;
        } else {
            run = 1;
            previous = Some(byte);
        }
        if run == 4 {
            if let Some(repeat) = bytes.next() {
                output.extend(std::iter::repeat_n(byte, usize::from(repeat)));
            }
            run = 0;
            previous = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::bzip2_stream;
    use super::{decompress, inverse_bwt, undo_run_length};
    use crate::analysis::installers::nsis::Compression;

    #[test]
    fn expands_runs_after_four_equal_bytes() {
        let mut output = Vec::new();
        undo_run_length(&[b'a', b'a', b'a', b'a', 3, b'b', b'a'], &mut output);
        assert_eq!(output, b"aaaaaaaba");
    }

    #[test]
    fn inverts_burrows_wheeler_transform() {
        // BWT of "banana" with rotations sorted: origin row 3.
        assert_eq!(inverse_bwt(b"nnbaaa", 3), b"banana");
    }

    #[test]
    fn empty_stream_is_just_the_end_marker() {
        let (output, consumed) = decompress(&[0x17, 0xAA]).unwrap();
        assert!(output.is_empty());
        assert_eq!(consumed, 1);
    }

    #[test]
    fn rejects_missing_block_marker() {
        assert!(decompress(&[0x42, 0x5A, 0x68]).is_err());
    }

    #[test]
    fn decodes_a_compiled_block() {
        let data = [
            b"File /r \"$INSTDIR\\bin\"\r\n".repeat(50),
            vec![0; 1000],
            (0..=u8::MAX).collect(),
        ]
        .concat();
        let stream = bzip2_stream(&data);
        assert_eq!(Compression::detect(&stream), Compression::BZip2);

        let (output, consumed) = decompress(&stream).unwrap();
        assert_eq!(output, data);
        assert_eq!(consumed, stream.len());
    }
}
