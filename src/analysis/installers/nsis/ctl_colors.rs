use bitflags::bitflags;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout};

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct CtlColorFlags: u32 {
        const TEXT = 1 << 0;
        const TEXT_SYS = 1 << 1;
        const BACKGROUND = 1 << 2;
        const BACKGROUND_SYS = 1 << 3;
        const BACKGROUND_BRUSH = 1 << 4;
    }
}

/// Colors applied to a dialog control by `SetCtlColors`.
#[derive(Copy, Clone, Debug, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct CtlColors {
    pub text: U32,
    pub background: U32,
    pub list_style: U32,
    pub brush: U32,
    pub mode: U32,
    flags: U32,
}

impl CtlColors {
    pub const SIZE: usize = size_of::<Self>();

    /// Reads every complete record in the control colors block.
    pub fn read_all(block: &[u8]) -> Vec<Self> {
        block
            .chunks_exact(Self::SIZE)
            .filter_map(|record| Self::read_from_bytes(record).ok())
            .collect()
    }

    pub fn flags(&self) -> CtlColorFlags {
        CtlColorFlags::from_bits_retain(self.flags.get())
    }
}
