use bitflags::bitflags;
use tracing::debug;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout, TryFromBytes};

use super::error::{NsisError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromBytes, KnownLayout, Immutable)]
#[repr(transparent)]
pub struct HeaderFlags(u32);

bitflags! {
    impl HeaderFlags: u32 {
        const UNINSTALL = 1 << 0;
        const SILENT = 1 << 1;
        const NO_CRC = 1 << 2;
        const FORCE_CRC = 1 << 3;
        // NSISBI fork flags:
        const BI_LONG_OFFSET = 1 << 4;
        const BI_EXTERNAL_FILE_SUPPORT = 1 << 5;
        const BI_EXTERNAL_FILE = 1 << 6;
        const BI_IS_STUB_INSTALLER = 1 << 7;
    }
}

#[expect(dead_code)]
#[derive(Copy, Clone, Debug, TryFromBytes, KnownLayout, Immutable)]
#[repr(u32)]
enum Magic1 {
    DeadBeef = 0xDEAD_BEEF,
    DeadBeed = 0xDEAD_BEED,
}

#[expect(dead_code)]
#[derive(Copy, Clone, Debug, TryFromBytes, KnownLayout, Immutable)]
#[repr(u32)]
enum Magic2 {
    Null = u32::from_le_bytes(*b"Null"),
    Nsis = u32::from_le_bytes(*b"nsis"),
}

#[expect(dead_code)]
#[derive(Copy, Clone, Debug, TryFromBytes, KnownLayout, Immutable)]
#[repr(u32)]
enum Magic3 {
    SoftL = u32::from_le_bytes(*b"soft"),
    SoftU = u32::from_le_bytes(*b"Soft"),
    Inst = u32::from_le_bytes(*b"inst"),
}

#[expect(dead_code)]
#[derive(Copy, Clone, Debug, TryFromBytes, KnownLayout, Immutable)]
#[repr(u32)]
enum Magic4 {
    Inst = u32::from_le_bytes(*b"Inst"),
    All0 = u32::from_le_bytes(*b"all\0"),
}

#[derive(Copy, Clone, Debug, TryFromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct NsisSignature(Magic1, Magic2, Magic3, Magic4);

#[derive(Copy, Clone, Debug, TryFromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct RawFirstHeader {
    flags: HeaderFlags,
    signature: NsisSignature,
    header_size: U32,
    length_of_following_data: U32,
}

/// The fixed-size header that precedes the installer's compressed data.
#[derive(Copy, Clone, Debug)]
pub struct FirstHeader {
    pub flags: HeaderFlags,
    /// Size of the inflated header.
    pub header_size: u32,
    /// Size of everything following the first header, compressed header included.
    pub length_of_following_data: u32,
    /// Offset in the host stream where the first header was found.
    pub offset: usize,
}

impl FirstHeader {
    pub const SIZE: usize = size_of::<RawFirstHeader>();

    /// Windows the host stream is scanned in: one small window for installers with no host
    /// executable, then large windows.
    const FIRST_WINDOW: usize = 512;
    const WINDOW: usize = 32 * 1024;
    const CANDIDATE_ALIGNMENT: usize = 4;

    /// Scans `stream` for the first header signature.
    ///
    /// Candidates are checked at every 4-byte-aligned offset of each window.
    pub fn locate(stream: &[u8]) -> Result<Self> {
        let mut window_start = 0;
        let mut window_len = Self::FIRST_WINDOW;

        while window_start < stream.len() {
            let window_end = stream.len().min(window_start + window_len);
            let found = (window_start..window_end)
                .step_by(Self::CANDIDATE_ALIGNMENT)
                .find_map(|offset| Self::read_at(stream, offset));
            if let Some(first_header) = found {
                debug!(
                    offset = first_header.offset,
                    header_size = first_header.header_size,
                    flags = ?first_header.flags,
                    "Found NSIS first header"
                );
                return Ok(first_header);
            }
            window_start = window_end;
            window_len = Self::WINDOW;
        }

        Err(NsisError::NotNsisFile)
    }

    fn read_at(stream: &[u8], offset: usize) -> Option<Self> {
        let (raw, _) = RawFirstHeader::try_read_from_prefix(stream.get(offset..)?).ok()?;
        Some(Self {
            flags: raw.flags,
            header_size: raw.header_size.get(),
            length_of_following_data: raw.length_of_following_data.get(),
            offset,
        })
    }

    /// Offset of the compressed header, immediately after the first header.
    pub const fn data_offset(&self) -> usize {
        self.offset + Self::SIZE
    }

    pub const fn is_uninstaller(&self) -> bool {
        self.flags.contains(HeaderFlags::UNINSTALL)
    }
}

#[cfg(test)]
mod tests {
    use super::{FirstHeader, HeaderFlags};
    use crate::analysis::installers::nsis::NsisError;

    fn first_header(flags: u32, magic: &[u8; 16]) -> Vec<u8> {
        let mut bytes = flags.to_le_bytes().to_vec();
        bytes.extend_from_slice(magic);
        bytes.extend_from_slice(&0x1234u32.to_le_bytes());
        bytes.extend_from_slice(&0x5678u32.to_le_bytes());
        bytes
    }

    const NULLSOFT: &[u8; 16] = b"\xEF\xBE\xAD\xDENullsoftInst";

    #[test]
    fn finds_header_after_host_bytes() {
        let mut stream = vec![0u8; 40_000];
        stream.extend(first_header(1, NULLSOFT));

        let header = FirstHeader::locate(&stream).unwrap();
        assert_eq!(header.offset, 40_000);
        assert_eq!(header.data_offset(), 40_000 + 28);
        assert_eq!(header.header_size, 0x1234);
        assert_eq!(header.length_of_following_data, 0x5678);
        assert!(header.is_uninstaller());
        assert_eq!(header.flags, HeaderFlags::UNINSTALL);
    }

    #[test]
    fn accepts_alternative_signature() {
        let stream = first_header(0, b"\xED\xBE\xAD\xDEnsisinstall\0");
        assert_eq!(FirstHeader::locate(&stream).unwrap().offset, 0);
    }

    #[test]
    fn ignores_unaligned_candidates() {
        let mut stream = vec![0u8; 2];
        stream.extend(first_header(0, NULLSOFT));
        assert!(matches!(
            FirstHeader::locate(&stream),
            Err(NsisError::NotNsisFile)
        ));
    }

    #[test]
    fn missing_signature_is_not_nsis() {
        assert!(matches!(
            FirstHeader::locate(b"MZ\x90\x00 not an installer"),
            Err(NsisError::NotNsisFile)
        ));
    }
}
