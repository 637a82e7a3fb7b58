use bitflags::bitflags;
use zerocopy::{FromBytes, I32, Immutable, KnownLayout, LittleEndian};

use super::error::{NsisError, Result};
use super::instruction::Instruction;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct PageFlags: u32 {
        const LICENSE_SELECTED = 1 << 0;
        const NEXT_ENABLE = 1 << 1;
        const CANCEL_ENABLE = 1 << 2;
        const BACK_SHOW = 1 << 3;
        const LICENSE_STREAM = 1 << 4;
        const LICENSE_FORCE_SELECTION = 1 << 5;
        const LICENSE_NO_FORCE_SELECTION = 1 << 6;
        const NO_NEXT_FOCUS = 1 << 7;
        const BACK_ENABLE = 1 << 8;
        const PAGE_EX = 1 << 9;
        const DIR_NO_BTN_DISABLE = 1 << 10;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageCallback {
    Pre,
    Show,
    Leave,
}

impl PageCallback {
    pub const ALL: [Self; 3] = [Self::Pre, Self::Show, Self::Leave];

    const fn suffix(self) -> &'static str {
        match self {
            Self::Pre => "prefunc",
            Self::Show => "showfunc",
            Self::Leave => "leavefunc",
        }
    }
}

#[derive(Copy, Clone, Debug, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Page {
    pub dlg_id: I32<LittleEndian>,
    pub wndproc_id: I32<LittleEndian>,
    pre_func: I32<LittleEndian>,
    show_func: I32<LittleEndian>,
    leave_func: I32<LittleEndian>,
    flags: I32<LittleEndian>,
    pub caption: I32<LittleEndian>,
    pub back: I32<LittleEndian>,
    pub next: I32<LittleEndian>,
    pub click_next: I32<LittleEndian>,
    pub cancel: I32<LittleEndian>,
    pub params: [I32<LittleEndian>; 5],
}

impl Page {
    pub const SIZE: usize = size_of::<Self>();

    pub fn read_all(block: &[u8], count: u32) -> Result<Vec<Self>> {
        let needed = count as usize * Self::SIZE;
        let records = block.get(..needed).ok_or_else(|| {
            NsisError::truncated("pages", 0, needed, block.len())
        })?;
        Ok(records
            .chunks_exact(Self::SIZE)
            .filter_map(|record| Self::read_from_bytes(record).ok())
            .collect())
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_retain(self.flags.get() as u32)
    }

    /// Byte offset in the entries block of the function registered for `callback`, if any.
    pub fn callback_offset(&self, callback: PageCallback) -> Option<usize> {
        let pointer = match callback {
            PageCallback::Pre => self.pre_func,
            PageCallback::Show => self.show_func,
            PageCallback::Leave => self.leave_func,
        };
        usize::try_from(pointer.get())
            .ok()
            .map(|entry| entry * Instruction::SIZE)
    }

    pub fn function_name(index: usize, callback: PageCallback) -> String {
        format!("_page_{index}_{}", callback.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::{Page, PageCallback, PageFlags};

    #[test]
    fn reads_page_records() {
        let mut block = Vec::new();
        for words in [[105, 1, 4, -1, 9, 0x102, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5]] {
            block.extend(words.into_iter().flat_map(i32::to_le_bytes));
        }
        assert_eq!(block.len(), Page::SIZE);

        let pages = Page::read_all(&block, 1).unwrap();
        let page = &pages[0];
        assert_eq!(page.dlg_id.get(), 105);
        assert_eq!(page.callback_offset(PageCallback::Pre), Some(4 * 28));
        assert_eq!(page.callback_offset(PageCallback::Show), None);
        assert_eq!(page.callback_offset(PageCallback::Leave), Some(9 * 28));
        assert_eq!(page.flags(), PageFlags::NEXT_ENABLE | PageFlags::BACK_ENABLE);
        assert_eq!(page.params.map(|param| param.get()), [1, 2, 3, 4, 5]);
        assert_eq!(Page::function_name(0, PageCallback::Leave), "_page_0_leavefunc");
    }

    #[test]
    fn short_block_is_truncated() {
        assert!(Page::read_all(&[0; 40], 1).is_err());
    }
}
