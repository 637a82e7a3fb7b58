use byteorder::{ByteOrder, LE};

use super::error::{NsisError, Result, slice};
use super::strings::{NsisString, StringTable};

/// Bytes in front of the string pointers of each language table.
const LANGUAGE_TABLE_PREFIX: usize = 10;

/// The language tables block: one fixed-size table of string pointers per installer language.
#[derive(Copy, Clone, Debug)]
pub struct LanguageTables<'data> {
    block: &'data [u8],
    entry_size: usize,
    count: usize,
}

impl<'data> LanguageTables<'data> {
    pub const fn new(block: &'data [u8], entry_size: u32, count: u32) -> Self {
        Self {
            block,
            entry_size: entry_size as usize,
            count: count as usize,
        }
    }

    /// The Windows language id of the first table.
    pub fn language_id(&self) -> Option<u16> {
        if self.count == 0 {
            return None;
        }
        self.block.get(..size_of::<u16>()).map(LE::read_u16)
    }

    /// Number of string pointers in each table.
    pub const fn strings_per_table(&self) -> usize {
        self.entry_size.saturating_sub(LANGUAGE_TABLE_PREFIX) / size_of::<u32>()
    }

    /// Decodes the strings of every table in order. Null pointers decode to empty strings.
    pub fn entries(&self, strings: &StringTable) -> Result<Vec<NsisString>> {
        let needed = self
            .count
            .checked_mul(self.entry_size)
            .filter(|&needed| needed <= self.block.len())
            .ok_or_else(|| {
                NsisError::truncated(
                    "language tables",
                    0,
                    self.count.saturating_mul(self.entry_size),
                    self.block.len(),
                )
            })?;
        let per_table = self.strings_per_table();
        let mut entries = Vec::with_capacity(needed / size_of::<u32>());

        for table in 0..self.count {
            let start = table * self.entry_size + LANGUAGE_TABLE_PREFIX;
            for index in 0..per_table {
                let offset = start + index * size_of::<u32>();
                let pointer = LE::read_i32(slice(
                    self.block,
                    offset,
                    size_of::<u32>(),
                    "language string pointer",
                )?);
                entries.push(if pointer == 0 {
                    NsisString::default()
                } else {
                    strings.get(pointer)?
                });
            }
        }

        Ok(entries)
    }
}
