use std::fmt;
use std::io::Cursor;
use std::ops::{Index, Range};

use byteorder::{LE, ReadBytesExt};
use tracing::debug;

use crate::analysis::installers::nsis::error::{NsisError, Result};

/// The data blocks of an installer, in the order their headers appear in the block table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum BlockType {
    Pages,
    Sections,
    Entries,
    Strings,
    LangTables,
    CtlColors,
    BgFont,
    Data,
}

impl BlockType {
    pub const COUNT: usize = 8;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Pages,
        Self::Sections,
        Self::Entries,
        Self::Strings,
        Self::LangTables,
        Self::CtlColors,
        Self::BgFont,
        Self::Data,
    ];

    /// Size of one element for blocks whose length is fixed by their element count.
    pub const fn element_size(self) -> Option<usize> {
        match self {
            Self::Pages => Some(64),
            Self::Entries => Some(28),
            _ => None,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pages => "pages",
            Self::Sections => "sections",
            Self::Entries => "entries",
            Self::Strings => "strings",
            Self::LangTables => "language tables",
            Self::CtlColors => "control colors",
            Self::BgFont => "background font",
            Self::Data => "data",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockHeader {
    /// Offset of the block within the inflated header.
    pub offset: u64,
    /// Number of elements in the block.
    pub num: u32,
}

impl BlockHeader {
    pub const fn is_present(&self) -> bool {
        self.offset != 0
    }
}

/// Whether the block table stores 32-bit or 64-bit offsets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockTableWidth {
    Narrow,
    Wide,
}

impl BlockTableWidth {
    pub const fn stride(self) -> usize {
        match self {
            Self::Narrow => 8,
            Self::Wide => 12,
        }
    }

    /// A wide table is only possible when the header can hold eight 12-byte entries. The table is
    /// wide when the high halves of every 64-bit offset, which a narrow table would fill with
    /// element counts, are zero.
    pub fn detect(header: &[u8], declared_size: u32) -> Self {
        const FLAGS_LEN: usize = size_of::<u32>();
        let wide_len = FLAGS_LEN + BlockType::COUNT * Self::Wide.stride();
        if (declared_size as usize) < wide_len {
            return Self::Narrow;
        }

        let high_words_clear = (0..BlockType::COUNT)
            .map(|index| FLAGS_LEN + index * Self::Wide.stride() + size_of::<u32>())
            .filter_map(|offset| header.get(offset..offset + size_of::<u32>()))
            .all(|word| word == [0; 4]);

        if high_words_clear {
            Self::Wide
        } else {
            Self::Narrow
        }
    }
}

#[derive(Clone, Debug)]
pub struct BlockHeaders([BlockHeader; BlockType::COUNT]);

impl BlockHeaders {
    /// Reads `count` block headers from `cursor`. Slots beyond `count` are left absent.
    pub fn read(
        cursor: &mut Cursor<&[u8]>,
        width: BlockTableWidth,
        count: usize,
    ) -> Result<Self> {
        let mut headers = [BlockHeader::default(); BlockType::COUNT];
        for header in headers.iter_mut().take(count) {
            let position = cursor.position() as usize;
            let read = |cursor: &mut Cursor<&[u8]>| -> std::io::Result<BlockHeader> {
                let offset = match width {
                    BlockTableWidth::Narrow => u64::from(cursor.read_u32::<LE>()?),
                    BlockTableWidth::Wide => cursor.read_u64::<LE>()?,
                };
                let num = cursor.read_u32::<LE>()?;
                Ok(BlockHeader { offset, num })
            };
            *header = read(cursor).map_err(|_| {
                NsisError::truncated(
                    "block header",
                    position,
                    width.stride(),
                    cursor.get_ref().len().saturating_sub(position),
                )
            })?;
        }
        Ok(Self(headers))
    }

    /// Computes the byte range of every block within a header of `header_len` bytes.
    ///
    /// Pages and entries are sized by their element count. Every other block ends where the next
    /// present block starts, or at the end of the header when no present block follows.
    pub fn ranges(&self, header_len: usize) -> [Range<usize>; BlockType::COUNT] {
        BlockType::ALL.map(|block_type| {
            let header = self[block_type];
            if !header.is_present() {
                return 0..0;
            }
            let start = usize::try_from(header.offset)
                .unwrap_or(usize::MAX)
                .min(header_len);
            let end = match block_type.element_size() {
                Some(element_size) => start.saturating_add(header.num as usize * element_size),
                None => self.0[block_type.index() + 1..]
                    .iter()
                    .find(|next| next.is_present())
                    .map_or(header_len, |next| {
                        usize::try_from(next.offset).unwrap_or(usize::MAX)
                    }),
            };
            let range = start..end.clamp(start, header_len);
            debug!(block = %block_type, ?range, num = header.num, "Block range");
            range
        })
    }
}

impl Index<BlockType> for BlockHeaders {
    type Output = BlockHeader;

    fn index(&self, block_type: BlockType) -> &Self::Output {
        &self.0[block_type.index()]
    }
}
