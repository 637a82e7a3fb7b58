use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, KnownLayout};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, FromBytes, KnownLayout, Immutable)]
#[repr(transparent)]
pub struct SectionFlags(u32);

bitflags! {
    impl SectionFlags: u32 {
        const SELECTED = 1 << 0;
        const SECTION_GROUP = 1 << 1;
        const SECTION_GROUP_END = 1 << 2;
        const BOLD = 1 << 3;
        const READ_ONLY = 1 << 4;
        const EXPAND = 1 << 5;
        const PARTIALLY_SELECTED = 1 << 6;
        const TOGGLED = 1 << 7;
        const NAME_CHANGE = 1 << 8;
    }
}
