mod dialect;
mod symbol;

use std::fmt;

use byteorder::{ByteOrder, LE};
use encoding_rs::WINDOWS_1252;

pub use dialect::Dialect;
pub use symbol::{FIRST_USER_VARIABLE, Symbol, Variable};

use super::error::{Result, slice};

/// Strings are never longer than this many characters.
pub const MAX_STRING_LEN: usize = 1024;

/// A decoded string: literal text interleaved with symbolic references.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NsisString(Vec<Symbol>);

impl NsisString {
    pub fn symbols(&self) -> &[Symbol] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every variable referenced by the string.
    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.0.iter().filter_map(|symbol| match symbol {
            Symbol::Variable(variable) => Some(*variable),
            _ => None,
        })
    }
}

impl From<Symbol> for NsisString {
    fn from(symbol: Symbol) -> Self {
        Self(vec![symbol])
    }
}

impl fmt::Display for NsisString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|symbol| fmt::Display::fmt(symbol, f))
    }
}

/// A string decoded at a byte offset, with the number of bytes it occupied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decoded {
    pub string: NsisString,
    pub consumed: usize,
}

/// Literal text accumulated between symbols, in the string block's encoding.
enum TextBuffer {
    Ansi(Vec<u8>),
    Unicode(Vec<u16>),
}

impl TextBuffer {
    const fn new(unicode: bool) -> Self {
        if unicode {
            Self::Unicode(Vec::new())
        } else {
            Self::Ansi(Vec::new())
        }
    }

    fn push(&mut self, char: u16) {
        match self {
            Self::Ansi(bytes) => bytes.push(char as u8),
            Self::Unicode(units) => units.push(char),
        }
    }

    fn push_str(&mut self, text: &str) {
        match self {
            Self::Ansi(bytes) => bytes.extend_from_slice(text.as_bytes()),
            Self::Unicode(units) => units.extend(text.encode_utf16()),
        }
    }

    fn flush_into(&mut self, symbols: &mut Vec<Symbol>) {
        let text = match self {
            Self::Ansi(bytes) if !bytes.is_empty() => {
                let text = WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned();
                bytes.clear();
                text
            }
            Self::Unicode(units) if !units.is_empty() => {
                let text = String::from_utf16_lossy(units);
                units.clear();
                text
            }
            _ => return,
        };
        symbols.push(Symbol::Text(text));
    }
}

/// Script escapes for characters that cannot appear literally in a quoted string.
const fn escape(char: u16) -> Option<&'static str> {
    match char {
        0x09 => Some("$\\t"),
        0x0A => Some("$\\n"),
        0x0D => Some("$\\r"),
        0x22 => Some("$\\\""),
        0x24 => Some("$$"),
        _ => None,
    }
}

/// The strings block together with the encoding and dialect needed to decode it.
#[derive(Copy, Clone, Debug)]
pub struct StringTable<'data> {
    block: &'data [u8],
    unicode: bool,
    dialect: Dialect,
}

impl<'data> StringTable<'data> {
    pub const fn new(block: &'data [u8], unicode: bool, dialect: Dialect) -> Self {
        Self {
            block,
            unicode,
            dialect,
        }
    }

    /// Unicode string blocks start with an empty UTF-16 string.
    pub fn is_unicode(block: &[u8]) -> bool {
        matches!(block, [0, 0, ..])
    }

    pub const fn char_width(&self) -> usize {
        if self.unicode { 2 } else { 1 }
    }

    pub const fn block(&self) -> &'data [u8] {
        self.block
    }

    /// Decodes the string at a string-table address. Addresses count characters, and negative
    /// addresses refer to language strings.
    pub fn get(&self, address: i32) -> Result<NsisString> {
        match usize::try_from(address) {
            Ok(address) => Ok(self.decode(address * self.char_width())?.string),
            Err(_) => Ok(Symbol::LangString(address.unsigned_abs() - 1).into()),
        }
    }

    /// The raw bytes of the string at a string-table address, terminator included.
    pub fn raw(&self, address: u32) -> &'data [u8] {
        raw_at(self.block, address as usize * self.char_width(), self.char_width())
    }

    /// Decodes the string starting at byte `offset` of the block.
    ///
    /// Decoding stops at a terminator, at the end of the block, or after [`MAX_STRING_LEN`]
    /// characters.
    pub fn decode(&self, offset: usize) -> Result<Decoded> {
        let width = self.char_width();
        let limit = self
            .block
            .len()
            .min(offset.saturating_add(MAX_STRING_LEN * width));

        let mut symbols = Vec::new();
        let mut text = TextBuffer::new(self.unicode);
        let mut position = offset;

        while position + width <= limit {
            let char = if self.unicode {
                LE::read_u16(&self.block[position..])
            } else {
                u16::from(self.block[position])
            };
            position += width;

            if char == 0 {
                break;
            }

            if self.dialect.is_code(char) {
                text.flush_into(&mut symbols);
                let params = slice(self.block, position, 2, "string code parameter")?;
                let (param1, param2) = (params[0], params[1]);
                position += 2;

                let param = (u32::from(param2 & 0x7F) << 7) | u32::from(param1 & 0x7F);
                symbols.push(if char == self.dialect.shell {
                    Symbol::Shell { param1, param2 }
                } else if char == self.dialect.var {
                    Symbol::Variable(Variable(param))
                } else {
                    Symbol::LangString(param)
                });
            } else if char == self.dialect.skip {
                // Kept as-is: the marker stays in the text and only one byte is skipped, even
                // when characters are two bytes wide.
                text.push(char);
                position += 1;
            } else if let Some(escaped) = escape(char) {
                text.push_str(escaped);
            } else {
                text.push(char);
            }
        }
        text.flush_into(&mut symbols);

        Ok(Decoded {
            string: NsisString(symbols),
            consumed: position - offset,
        })
    }

    /// Decodes every non-empty string in the block, in block order.
    pub fn all(&self) -> Result<Vec<NsisString>> {
        let mut strings = Vec::new();
        let mut offset = 0;
        while offset < self.block.len() {
            let Decoded { string, consumed } = self.decode(offset)?;
            if consumed == 0 {
                break;
            }
            if !string.is_empty() {
                strings.push(string);
            }
            offset += consumed;
        }
        Ok(strings)
    }

    pub fn raw_strings(&self) -> RawStrings<'data> {
        RawStrings::new(self.block, self.unicode)
    }
}

fn raw_at(block: &[u8], offset: usize, width: usize) -> &[u8] {
    let Some(rest) = block.get(offset..) else {
        return &[];
    };
    let len = rest
        .chunks_exact(width)
        .position(|char| char.iter().all(|&byte| byte == 0))
        .map_or(rest.len() - rest.len() % width, |index| (index + 1) * width);
    &rest[..len]
}

/// Iterates the undecoded strings of a string block, terminators included.
pub struct RawStrings<'data> {
    block: &'data [u8],
    width: usize,
    offset: usize,
}

impl<'data> RawStrings<'data> {
    /// Unicode blocks are walked from their second character, past the leading empty string.
    pub const fn new(block: &'data [u8], unicode: bool) -> Self {
        let width = if unicode { 2 } else { 1 };
        Self {
            block,
            width,
            offset: if unicode { 2 } else { 0 },
        }
    }
}

impl<'data> Iterator for RawStrings<'data> {
    type Item = &'data [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let raw = raw_at(self.block, self.offset, self.width);
        if raw.is_empty() {
            return None;
        }
        self.offset += raw.len();
        Some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::{Dialect, MAX_STRING_LEN, StringTable, Symbol, Variable};
    use crate::analysis::installers::nsis::NsisError;

    fn utf16(units: &[u16]) -> Vec<u8> {
        units.iter().flat_map(|unit| unit.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_variables_and_shell_folders() {
        let block = b"\0Install \x03\x95\x80 to \x02\x26\x80\0";
        let strings = StringTable::new(block, false, Dialect::CURRENT);

        let decoded = strings.decode(1).unwrap();
        assert_eq!(
            decoded.string.to_string(),
            "Install $OUTPUTDIR to %PROGRAM_FILES%"
        );
        assert_eq!(decoded.consumed, block.len() - 1);
        assert_eq!(decoded.string.variables().collect::<Vec<_>>(), [Variable(21)]);
    }

    #[test]
    fn escapes_script_metacharacters() {
        let strings = StringTable::new(b"a\tb$c\"\r\n\0", false, Dialect::CURRENT);
        assert_eq!(strings.get(0).unwrap().to_string(), "a$\\tb$$c$\\\"$\\r$\\n");
    }

    #[test]
    fn language_strings_from_codes_and_negative_addresses() {
        let strings = StringTable::new(b"\x01\x05\x80\0", false, Dialect::CURRENT);
        assert_eq!(strings.get(0).unwrap().symbols(), [Symbol::LangString(5)]);
        assert_eq!(strings.get(-3).unwrap().symbols(), [Symbol::LangString(2)]);
        assert_eq!(strings.get(-1).unwrap().to_string(), "$(LSTR_0)");
    }

    #[test]
    fn legacy_ansi_codes() {
        let strings = StringTable::new(b"x\xFD\x81\x80y\xFF\x02\x80\0", false, Dialect::LEGACY_ANSI);
        assert_eq!(strings.get(0).unwrap().to_string(), "x$1y$(LSTR_2)");
    }

    #[test]
    fn ansi_text_is_windows_1252() {
        let strings = StringTable::new(b"\x80 \xE9\0", false, Dialect::CURRENT);
        assert_eq!(strings.get(0).unwrap().to_string(), "€ é");
    }

    #[test]
    fn legacy_unicode_addresses_count_characters() {
        let mut block = utf16(&[0, u16::from(b'H'), u16::from(b'i'), 0xE001]);
        block.extend_from_slice(&[0x95, 0x80]);
        block.extend(utf16(&[u16::from(b'!'), 0]));
        let strings = StringTable::new(&block, true, Dialect::LEGACY_UNICODE);

        assert!(StringTable::is_unicode(&block));
        assert_eq!(strings.get(1).unwrap().to_string(), "Hi$OUTPUTDIR!");
        assert_eq!(strings.raw(1), &block[2..]);
    }

    #[test]
    fn skip_code_keeps_marker_and_drops_next_byte() {
        // Known quirk: the skip code is copied into the text and swallows the byte after it.
        let strings = StringTable::new(b"a\x04bc\0", false, Dialect::CURRENT);
        let decoded = strings.decode(0).unwrap();
        assert_eq!(decoded.string.symbols(), [Symbol::Text("a\u{4}c".to_owned())]);
        assert_eq!(decoded.consumed, 5);
    }

    #[test]
    fn decoding_is_idempotent() {
        let strings = StringTable::new(b"\x03\x01\x80abc\x04de\0", false, Dialect::CURRENT);
        assert_eq!(strings.decode(0).unwrap(), strings.decode(0).unwrap());
    }

    #[test]
    fn code_parameters_past_the_block_are_truncated() {
        let strings = StringTable::new(b"ab\x03\x95", false, Dialect::CURRENT);
        assert!(matches!(strings.decode(0), Err(NsisError::Truncated { .. })));
    }

    #[test]
    fn strings_are_capped() {
        let block = vec![b'a'; MAX_STRING_LEN * 2];
        let strings = StringTable::new(&block, false, Dialect::CURRENT);
        let decoded = strings.decode(0).unwrap();
        assert_eq!(decoded.consumed, MAX_STRING_LEN);
        assert_eq!(decoded.string.to_string().len(), MAX_STRING_LEN);
    }

    #[test]
    fn walks_all_strings() {
        let strings = StringTable::new(b"\0one\0\0two\x03\x81\x80\0", false, Dialect::CURRENT);
        let all = strings
            .all()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        assert_eq!(all, ["one", "two$1"]);

        let raw = strings.raw_strings().collect::<Vec<_>>();
        assert_eq!(raw, [&b"\0"[..], b"one\0", b"\0", b"two\x03\x81\x80\0"]);
    }
}
