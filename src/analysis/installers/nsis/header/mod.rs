mod block;
mod flags;

use std::io::Cursor;
use std::ops::Range;

use byteorder::{ByteOrder, LE, ReadBytesExt};
use tracing::debug;

pub use block::{BlockHeader, BlockHeaders, BlockTableWidth, BlockType};
pub use flags::CommonFlags;

use super::error::{NsisError, Result};

/// Pages block offset written by toolchains that predate the reboot-failed callback.
const LEGACY_PAGES_OFFSET: u64 = 276;

/// Toolchains writing the pages block at or after this offset also store the uninstaller strings.
const UNINSTALL_STRINGS_PAGES_OFFSET: u64 = 288;

pub const MAX_INST_TYPES: usize = 32;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeaderLayout {
    /// No reboot-failed callback and no uninstaller strings. Narrow block tables of this layout
    /// hold seven block headers.
    Legacy,
    /// Eight block headers and the reboot-failed callback, but no uninstaller strings.
    WithoutUninstallStrings,
    Current,
}

impl HeaderLayout {
    fn detect(pages_offset: u64) -> Self {
        if pages_offset == LEGACY_PAGES_OFFSET {
            Self::Legacy
        } else if pages_offset >= UNINSTALL_STRINGS_PAGES_OFFSET {
            Self::Current
        } else {
            Self::WithoutUninstallStrings
        }
    }

    const fn block_slots(self, width: BlockTableWidth) -> usize {
        match (self, width) {
            (Self::Legacy, BlockTableWidth::Narrow) => BlockType::COUNT - 1,
            _ => BlockType::COUNT,
        }
    }

    pub const fn has_reboot_callback(self) -> bool {
        !matches!(self, Self::Legacy)
    }

    pub const fn has_uninstall_strings(self) -> bool {
        matches!(self, Self::Current)
    }
}

/// Installer lifecycle events that can run a script function.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Callback {
    Init,
    InstSuccess,
    InstFailed,
    UserAbort,
    GuiInit,
    GuiEnd,
    MouseOverSection,
    VerifyInstDir,
    SelChange,
    RebootFailed,
}

impl Callback {
    pub const COUNT: usize = 10;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Init,
        Self::InstSuccess,
        Self::InstFailed,
        Self::UserAbort,
        Self::GuiInit,
        Self::GuiEnd,
        Self::MouseOverSection,
        Self::VerifyInstDir,
        Self::SelChange,
        Self::RebootFailed,
    ];

    /// Name of the function the script declares for this event.
    pub const fn function_name(self) -> &'static str {
        match self {
            Self::Init => "_onInit",
            Self::InstSuccess => "_onInstSuccess",
            Self::InstFailed => "_onInstFailed",
            Self::UserAbort => "_onUserAbort",
            Self::GuiInit => "_onGUIInit",
            Self::GuiEnd => "_onGUIEnd",
            Self::MouseOverSection => "_onMouseOverSection",
            Self::VerifyInstDir => "_onVerifyInstDir",
            Self::SelChange => "_onSelChange",
            Self::RebootFailed => "_onRebootFailed",
        }
    }
}

/// The inflated second header: the block table followed by installer-wide properties.
#[derive(Debug)]
pub struct Header {
    pub flags: CommonFlags,
    pub blocks: BlockHeaders,
    pub width: BlockTableWidth,
    pub layout: HeaderLayout,
    pub install_reg_rootkey: i32,
    pub install_reg_key: i32,
    pub install_reg_value: i32,
    pub bg_color1: i32,
    pub bg_color2: i32,
    pub bg_text_color: i32,
    pub lb_bg: i32,
    pub lb_fg: i32,
    pub langtable_size: u32,
    pub license_bg: i32,
    callbacks: [i32; Callback::COUNT],
    pub install_types: [i32; MAX_INST_TYPES + 1],
    pub install_directory: i32,
    pub install_directory_auto_append: i32,
    pub uninstall_child: i32,
    pub uninstall_command: i32,
    pub wininit: i32,
    /// Size the first header declares for the inflated header.
    pub declared_size: u32,
    raw: Vec<u8>,
    ranges: [Range<usize>; BlockType::COUNT],
}

impl Header {
    /// Parses an inflated header. `declared_size` is the header size from the first header.
    pub fn parse(mut raw: Vec<u8>, declared_size: u32) -> Result<Self> {
        // Solid archives prefix the header with its own size
        if raw.len() >= size_of::<u32>() && LE::read_u32(&raw) == declared_size {
            raw.drain(..size_of::<u32>());
        }

        let width = BlockTableWidth::detect(&raw, declared_size);
        let mut cursor = Cursor::new(raw.as_slice());

        let flags = CommonFlags::from_bits_retain(read_field(&mut cursor, "header flags")? as u32);

        let pages_offset = raw.get(4..8).map_or(0, |word| u64::from(LE::read_u32(word)));
        let layout = HeaderLayout::detect(pages_offset);
        let blocks = BlockHeaders::read(&mut cursor, width, layout.block_slots(width))?;

        debug!(?width, ?layout, "Parsing NSIS header");

        let mut field = |what| read_field(&mut cursor, what);

        let install_reg_rootkey = field("install registry root key")?;
        let install_reg_key = field("install registry key")?;
        let install_reg_value = field("install registry value")?;
        let bg_color1 = field("background color")?;
        let bg_color2 = field("background gradient color")?;
        let bg_text_color = field("background text color")?;
        let lb_bg = field("list background color")?;
        let lb_fg = field("list foreground color")?;
        let langtable_size = field("language table size")? as u32;
        let license_bg = field("license background color")?;

        let mut callbacks = [-1; Callback::COUNT];
        for callback in Callback::ALL {
            if callback == Callback::RebootFailed && !layout.has_reboot_callback() {
                continue;
            }
            callbacks[callback as usize] = field("callback")?;
        }

        let mut install_types = [0; MAX_INST_TYPES + 1];
        for install_type in &mut install_types {
            *install_type = field("install type")?;
        }
        let install_directory = field("install directory")?;

        let (install_directory_auto_append, uninstall_child, uninstall_command, wininit) =
            if layout.has_uninstall_strings() {
                (
                    field("install directory auto append")?,
                    field("uninstall child")?,
                    field("uninstall command")?,
                    field("wininit")?,
                )
            } else {
                (0, 0, 0, 0)
            };

        let header_len = raw.len().min(declared_size as usize);
        let mut ranges = blocks.ranges(header_len);
        ranges[BlockType::Data as usize] = header_len..raw.len();

        Ok(Self {
            flags,
            blocks,
            width,
            layout,
            install_reg_rootkey,
            install_reg_key,
            install_reg_value,
            bg_color1,
            bg_color2,
            bg_text_color,
            lb_bg,
            lb_fg,
            langtable_size,
            license_bg,
            callbacks,
            install_types,
            install_directory,
            install_directory_auto_append,
            uninstall_child,
            uninstall_command,
            wininit,
            declared_size,
            raw,
            ranges,
        })
    }

    /// Code pointer of the function registered for `callback`, if any.
    pub fn callback(&self, callback: Callback) -> Option<u32> {
        u32::try_from(self.callbacks[callback as usize]).ok()
    }

    /// The bytes of `block_type` within the inflated header.
    ///
    /// For [`BlockType::Data`] this is whatever follows the header in the inflated stream, which
    /// is only the payload for solid archives.
    pub fn block(&self, block_type: BlockType) -> &[u8] {
        &self.raw[self.block_range(block_type)]
    }

    pub fn block_range(&self, block_type: BlockType) -> Range<usize> {
        self.ranges[block_type as usize].clone()
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

fn read_field(cursor: &mut Cursor<&[u8]>, what: &'static str) -> Result<i32> {
    let position = cursor.position() as usize;
    let len = cursor.get_ref().len();
    cursor.read_i32::<LE>().map_err(|_| {
        NsisError::truncated(what, position, size_of::<i32>(), len.saturating_sub(position))
    })
}

#[cfg(test)]
mod tests {
    use super::{BlockTableWidth, BlockType, Callback, Header, HeaderLayout, MAX_INST_TYPES};

    /// Builds a narrow header with `slots` block headers and the fields the layout implies.
    fn header_bytes(pages_offset: u32, slots: usize, reboot: bool, uninstall_strings: bool) -> Vec<u8> {
        let mut words = vec![0u32];
        words.extend([pages_offset, 1]);
        words.extend(std::iter::repeat_n(0, (slots - 1) * 2));
        // registry, colors, language table size and license color
        words.extend([1, 2, 3, 4, 5, 6, 7, 8, 42, 9]);
        // callbacks: onInit at entry 5, everything else unset
        words.push(5);
        words.extend(std::iter::repeat_n(u32::MAX, 8));
        if reboot {
            words.push(7);
        }
        words.extend(std::iter::repeat_n(0, MAX_INST_TYPES + 1));
        words.push(0x1234);
        if uninstall_strings {
            words.extend([11, 12, 13, 14]);
        }

        let mut bytes = words
            .into_iter()
            .flat_map(u32::to_le_bytes)
            .collect::<Vec<_>>();
        bytes.resize(pages_offset as usize + 64, 0);
        bytes
    }

    #[test]
    fn legacy_pages_offset_selects_seven_block_layout() {
        let bytes = header_bytes(276, 7, false, false);
        let header = Header::parse(bytes.clone(), bytes.len() as u32).unwrap();

        assert_eq!(header.width, BlockTableWidth::Narrow);
        assert_eq!(header.layout, HeaderLayout::Legacy);
        assert_eq!(header.callback(Callback::Init), Some(5));
        assert_eq!(header.callback(Callback::RebootFailed), None);
        assert_eq!(header.langtable_size, 42);
        assert_eq!(header.install_directory, 0x1234);
        assert_eq!(header.uninstall_child, 0);
        assert!(!header.blocks[BlockType::Data].is_present());
    }

    #[test]
    fn legacy_pages_offset_drops_reboot_callback_from_wide_tables() {
        let mut bytes = 0u32.to_le_bytes().to_vec();
        bytes.extend(276u64.to_le_bytes());
        bytes.extend(1u32.to_le_bytes());
        bytes.resize(4 + 8 * 12, 0);
        // registry root key, a zero key pointer, then the rest of the properties
        let mut words = vec![1u32, 0, 3, 4, 5, 6, 7, 8, 42, 9];
        words.push(5);
        words.extend(std::iter::repeat_n(u32::MAX, 8));
        words.extend(std::iter::repeat_n(0, MAX_INST_TYPES + 1));
        words.push(0x1234);
        bytes.extend(words.into_iter().flat_map(u32::to_le_bytes));
        bytes.resize(276 + 64, 0);

        let header = Header::parse(bytes.clone(), bytes.len() as u32).unwrap();
        assert_eq!(header.width, BlockTableWidth::Wide);
        assert_eq!(header.layout, HeaderLayout::Legacy);
        assert_eq!(header.blocks[BlockType::Pages].offset, 276);
        assert_eq!(header.callback(Callback::Init), Some(5));
        assert_eq!(header.callback(Callback::RebootFailed), None);
        assert_eq!(header.langtable_size, 42);
        assert_eq!(header.install_directory, 0x1234);
    }

    #[test]
    fn current_layout_reads_reboot_callback_and_uninstall_strings() {
        let bytes = header_bytes(300, 8, true, true);
        let header = Header::parse(bytes.clone(), bytes.len() as u32).unwrap();

        assert_eq!(header.layout, HeaderLayout::Current);
        assert_eq!(header.callback(Callback::RebootFailed), Some(7));
        assert_eq!(header.callback(Callback::GuiInit), None);
        assert_eq!(header.install_directory, 0x1234);
        assert_eq!(header.install_directory_auto_append, 11);
        assert_eq!(header.wininit, 14);
        assert_eq!(header.block(BlockType::Pages).len(), 64);
    }

    #[test]
    fn strips_solid_size_prefix() {
        let bytes = header_bytes(300, 8, true, true);
        let mut solid = (bytes.len() as u32).to_le_bytes().to_vec();
        solid.extend_from_slice(&bytes);
        solid.extend_from_slice(b"payload");

        let header = Header::parse(solid, bytes.len() as u32).unwrap();
        assert_eq!(header.raw().len(), bytes.len() + 7);
        assert_eq!(header.block(BlockType::Data), b"payload");
        assert_eq!(header.install_directory, 0x1234);
    }

    #[test]
    fn truncated_fields_are_reported() {
        let bytes = header_bytes(300, 8, true, true);
        assert!(matches!(
            Header::parse(bytes[..120].to_vec(), 400),
            Err(super::NsisError::Truncated { .. })
        ));
    }
}
