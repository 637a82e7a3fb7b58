use bon::Builder;

use super::compression::Compression;

/// Settings for reading an installer.
///
/// ```
/// use nsis_disasm::analysis::installers::nsis::{Compression, NsisOptions};
///
/// let options = NsisOptions::builder()
///     .compression(Compression::Lzma)
///     .parallel(false)
///     .build();
/// assert_eq!(options.compression, Some(Compression::Lzma));
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq, Builder)]
pub struct NsisOptions {
    /// Decompresses the header with this algorithm instead of detecting it.
    pub compression: Option<Compression>,
    /// Disassembles methods on the rayon thread pool.
    #[builder(default = true)]
    pub parallel: bool,
}

impl Default for NsisOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::NsisOptions;

    #[test]
    fn defaults_detect_compression_in_parallel() {
        let options = NsisOptions::default();
        assert_eq!(options.compression, None);
        assert!(options.parallel);
    }
}
