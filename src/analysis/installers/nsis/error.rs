use thiserror::Error;

use super::compression::Compression;

pub type Result<T, E = NsisError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum NsisError {
    #[error("File is not an NSIS installer")]
    NotNsisFile,
    #[error("{what} at offset {offset:#x} needs {needed} bytes but only {available} are available")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Unknown compression method: {0}")]
    UnknownCompression(String),
    #[error("Opcode {opcode} uses an unsupported operand shape '{shape}'")]
    UnsupportedOperandShape { opcode: &'static str, shape: char },
    #[error("Malformed NSIS version string: {0:?}")]
    MalformedVersion(String),
    #[error("End of method at {0:#x} was queried before method boundaries were resolved")]
    MethodEndUnresolved(usize),
    #[error("Failed to decompress {compression} data: {reason}")]
    Decompression {
        compression: Compression,
        reason: String,
    },
    #[error(transparent)]
    Lzma(#[from] liblzma::stream::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NsisError {
    pub(super) const fn truncated(
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    ) -> Self {
        Self::Truncated {
            what,
            offset,
            needed,
            available,
        }
    }

    pub(super) fn decompression(compression: Compression, reason: impl ToString) -> Self {
        Self::Decompression {
            compression,
            reason: reason.to_string(),
        }
    }
}

/// Returns `len` bytes of `data` starting at `offset`, or a [`NsisError::Truncated`] naming `what`
/// was being read.
pub(super) fn slice<'data>(
    data: &'data [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'data [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            NsisError::truncated(what, offset, len, data.len().saturating_sub(offset))
        })
}
