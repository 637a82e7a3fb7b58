/// The in-band control codes one toolchain generation uses inside strings.
#[derive(Copy, Clone, Debug)]
pub struct Dialect {
    pub skip: u16,
    pub var: u16,
    pub shell: u16,
    pub lang: u16,
    is_code: fn(u16) -> bool,
}

impl Dialect {
    /// Codes used by the current toolchain, for both ANSI and Unicode builds.
    pub const CURRENT: Self = Self {
        lang: 1,
        shell: 2,
        var: 3,
        skip: 4,
        is_code: |char| char < 4,
    };

    /// Codes used by the legacy ANSI toolchain, at the top of the byte range.
    pub const LEGACY_ANSI: Self = Self {
        skip: 252,
        var: 253,
        shell: 254,
        lang: 255,
        is_code: |char| (253..=255).contains(&char),
    };

    /// Codes used by the legacy Unicode fork, in the private use area.
    pub const LEGACY_UNICODE: Self = Self {
        skip: 0xE000,
        var: 0xE001,
        shell: 0xE002,
        lang: 0xE003,
        is_code: |char| (0xE001..=0xE003).contains(&char),
    };

    /// Whether `char` introduces a two-byte parameter.
    pub fn is_code(&self, char: u16) -> bool {
        (self.is_code)(char)
    }
}
