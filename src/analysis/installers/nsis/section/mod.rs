mod flags;

use derive_more::Debug;
pub use flags::SectionFlags;
use zerocopy::{FromBytes, I32, Immutable, KnownLayout, LittleEndian};

use super::error::{NsisError, Result, slice};
use super::header::BlockHeader;
use super::instruction::Instruction;
use super::strings::StringTable;

#[derive(FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct RawSection {
    name: I32<LittleEndian>,
    install_types: I32<LittleEndian>,
    flags: SectionFlags,
    code: I32<LittleEndian>,
    code_size: I32<LittleEndian>,
    size_kb: I32<LittleEndian>,
}

#[derive(Clone, Debug)]
pub struct Section {
    #[debug("{:#x}", name_ptr)]
    pub name_ptr: i32,
    pub install_types: i32,
    pub flags: SectionFlags,
    pub code: i32,
    pub code_size: i32,
    pub size_kb: i32,
    /// The decoded section name. Empty for invisible sections.
    pub name: String,
}

impl Section {
    /// Reads `count` sections from the sections block.
    ///
    /// Section records end with an inline name buffer whose size depends on the toolchain build,
    /// so the record stride is taken from the gap between the sections and entries blocks.
    pub fn read_all(
        block: &[u8],
        sections: &BlockHeader,
        entries: &BlockHeader,
        strings: &StringTable,
    ) -> Result<Vec<Self>> {
        if sections.num == 0 {
            return Ok(Vec::new());
        }

        let stride = entries
            .offset
            .checked_sub(sections.offset)
            .map(|gap| gap as usize / sections.num as usize)
            .filter(|&stride| stride >= size_of::<RawSection>())
            .ok_or_else(|| {
                NsisError::truncated(
                    "section record",
                    sections.offset as usize,
                    size_of::<RawSection>(),
                    entries.offset.saturating_sub(sections.offset) as usize,
                )
            })?;

        (0..sections.num as usize)
            .map(|index| {
                let record = slice(block, index * stride, size_of::<RawSection>(), "section")?;
                let raw = RawSection::read_from_bytes(record).map_err(|_| {
                    NsisError::truncated("section", index * stride, size_of::<RawSection>(), 0)
                })?;
                let name_ptr = raw.name.get();
                Ok(Self {
                    name_ptr,
                    install_types: raw.install_types.get(),
                    flags: raw.flags,
                    code: raw.code.get(),
                    code_size: raw.code_size.get(),
                    size_kb: raw.size_kb.get(),
                    name: strings.get(name_ptr)?.to_string(),
                })
            })
            .collect()
    }

    /// Byte offset of the section's code in the entries block, or `None` for sections with no
    /// code.
    pub fn code_offset(&self) -> Option<usize> {
        usize::try_from(self.code)
            .ok()
            .map(|entry| entry * Instruction::SIZE)
    }

    /// The name used for the function holding the section's code.
    pub fn function_name(&self, index: usize) -> String {
        if self.name.is_empty() {
            format!("_section{index}")
        } else {
            canonize(&self.name)
        }
    }
}

/// Replaces every character that cannot appear in a script identifier with `_`.
pub fn canonize(name: &str) -> String {
    name.chars()
        .map(|char| {
            if char.is_ascii_alphanumeric() || char == '$' {
                char
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::canonize;

    #[test]
    fn canonize_keeps_identifier_characters() {
        assert_eq!(canonize("Main Files"), "Main_Files");
        assert_eq!(canonize("$INSTDIR\\bin"), "$INSTDIR_bin");
        assert_eq!(canonize("Über"), "_ber");
    }
}
