use std::fmt;

use tracing::debug;

use super::error::{NsisError, Result};
use super::strings::{Dialect, RawStrings};

/// Product name the legacy Unicode fork writes in front of its version in language table slot 0.
const UNICODE_FORK_PREFIX: &str = "Nullsoft Install System (Unicode) v";

/// The toolchain generation that compiled an installer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Family {
    Legacy,
    Current,
}

impl Family {
    /// Classifies a string block by the control codes its strings start with.
    ///
    /// Every generation places its codes in a different range, so the family whose codes lead
    /// the most strings wins, with the legacy families taking ties.
    pub fn detect(raw_strings: RawStrings) -> Self {
        let (mut legacy_ansi, mut legacy_unicode, mut current) = (0usize, 0usize, 0usize);

        for raw in raw_strings {
            match raw {
                [] | [0] | [0, 0] => {}
                [first, 0xE0, ..] if *first <= 3 => legacy_unicode += 1,
                [first, ..] if *first <= 4 => current += 1,
                [first, ..] if *first >= 252 => legacy_ansi += 1,
                _ => {}
            }
        }

        let legacy = legacy_ansi.max(legacy_unicode);
        let family = if legacy > 0 && legacy >= current {
            Self::Legacy
        } else {
            Self::Current
        };
        debug!(legacy_ansi, legacy_unicode, current, ?family, "Detected NSIS family");
        family
    }

    pub const fn dialect(self, unicode: bool) -> Dialect {
        match (self, unicode) {
            (Self::Current, _) => Dialect::CURRENT,
            (Self::Legacy, false) => Dialect::LEGACY_ANSI,
            (Self::Legacy, true) => Dialect::LEGACY_UNICODE,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("2"),
            Self::Current => f.write_str("3"),
        }
    }
}

/// Sub-editions of the legacy Unicode fork, each adding opcodes that shift the numbering.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Edition {
    /// 2.46.1 and earlier.
    First,
    /// 2.46.2, which adds `GetFontVersion`.
    Second,
    /// 2.46.3 and later, which also add `GetFontName` and logging.
    Third,
}

impl Edition {
    /// Parses the fork's version string, e.g. `Nullsoft Install System (Unicode) v2.46.3-x`.
    pub fn from_version_string(version: &str) -> Result<Self> {
        let malformed = || NsisError::MalformedVersion(version.to_owned());

        let numbers = version
            .strip_prefix(UNICODE_FORK_PREFIX)
            .ok_or_else(malformed)?;
        let numbers = numbers.split('-').next().unwrap_or_default();

        let mut parts = numbers.split('.').map(str::parse::<u32>);
        let mut next = || parts.next().and_then(|part| part.ok()).ok_or_else(malformed);
        let (_major, minor, patch) = (next()?, next()?, next()?);

        let edition = if minor == 46 && patch == 2 {
            Self::Second
        } else if minor >= 46 && patch >= 3 {
            Self::Third
        } else {
            Self::First
        };
        debug!(version, ?edition, "Detected Unicode fork edition");
        Ok(edition)
    }
}

/// Everything about the compiling toolchain that affects decoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NsisVersion {
    pub family: Family,
    pub unicode: bool,
    /// Only known for legacy Unicode installers.
    pub edition: Option<Edition>,
}

impl NsisVersion {
    pub const fn is_legacy_unicode(&self) -> bool {
        matches!(self.family, Family::Legacy) && self.unicode
    }

    pub const fn dialect(&self) -> Dialect {
        self.family.dialect(self.unicode)
    }
}
