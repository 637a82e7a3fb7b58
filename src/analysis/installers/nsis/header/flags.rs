use bitflags::bitflags;

bitflags! {
    /// Installer-wide options stored at the start of the inflated header.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct CommonFlags: u32 {
        const DETAILS_SHOW_DETAILS = 1 << 0;
        const DETAILS_NEVER_SHOW = 1 << 1;
        const PROGRESS_COLORED = 1 << 2;
        const SILENT = 1 << 3;
        const SILENT_LOG = 1 << 4;
        const AUTO_CLOSE = 1 << 5;
        const DIR_NO_SHOW = 1 << 6;
        const NO_ROOT_DIR = 1 << 7;
        const COMP_ONLY_ON_CUSTOM = 1 << 8;
        const NO_CUSTOM = 1 << 9;
    }
}
