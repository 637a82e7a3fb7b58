mod compression;
mod ctl_colors;
mod disassembler;
mod error;
mod first_header;
mod header;
mod instruction;
mod language;
mod method;
mod opcode;
mod options;
mod page;
mod section;
mod strings;
mod version;

use std::io::{Read, Seek};

use tracing::debug;

pub use compression::Compression;
pub use ctl_colors::{CtlColorFlags, CtlColors};
pub use disassembler::EntryPoint;
pub use error::{NsisError, Result};
pub use first_header::{FirstHeader, HeaderFlags};
pub use header::{
    BlockHeader, BlockHeaders, BlockTableWidth, BlockType, Callback, CommonFlags, Header,
    HeaderLayout,
};
pub use instruction::{Instruction, Label, Operand};
pub use method::Method;
pub use opcode::{ControlFlow, OPCODES, Opcode, OpcodeDef};
pub use options::NsisOptions;
pub use page::{Page, PageCallback, PageFlags};
pub use section::{Section, SectionFlags};
pub use strings::{Dialect, NsisString, RawStrings, StringTable, Symbol, Variable};
pub use version::{Edition, Family, NsisVersion};

use compression::read_block;
use disassembler::{Disassembler, entry_points};
use instruction::InstructionDecoder;
use language::LanguageTables;

/// A parsed NSIS installer with its code disassembled into methods.
#[derive(Debug)]
pub struct Nsis {
    first_header: FirstHeader,
    header: Header,
    compression: Compression,
    solid: bool,
    version: NsisVersion,
    /// The data that follows the compressed header in the host stream. Empty for solid archives,
    /// whose payload is inflated together with the header.
    stream_payload: Vec<u8>,
    sections: Vec<Section>,
    pages: Vec<Page>,
    ctl_colors: Vec<CtlColors>,
    language_id: Option<u16>,
    language_entries: Vec<NsisString>,
    methods: Vec<Method>,
}

impl Nsis {
    pub fn new<R: Read + Seek>(reader: R) -> Result<Self> {
        Self::with_options(reader, NsisOptions::default())
    }

    pub fn with_options<R: Read + Seek>(mut reader: R, options: NsisOptions) -> Result<Self> {
        let mut data = Vec::new();
        reader.rewind()?;
        reader.read_to_end(&mut data)?;

        let first_header = FirstHeader::locate(&data)?;
        let unit =
            compression::read_header(&data, first_header.data_offset(), options.compression)?;
        let header = Header::parse(unit.data, first_header.header_size)?;

        let strings_block = header.block(BlockType::Strings);
        let unicode = StringTable::is_unicode(strings_block);
        let family = Family::detect(RawStrings::new(strings_block, unicode));
        let strings = StringTable::new(strings_block, unicode, family.dialect(unicode));

        let language_tables = LanguageTables::new(
            header.block(BlockType::LangTables),
            header.langtable_size,
            header.blocks[BlockType::LangTables].num,
        );
        let language_entries = language_tables.entries(&strings)?;
        let language_id = language_tables.language_id();

        let edition = if family == Family::Legacy && unicode {
            let version_string = language_entries
                .first()
                .map(ToString::to_string)
                .unwrap_or_default();
            Some(Edition::from_version_string(&version_string)?)
        } else {
            None
        };
        let version = NsisVersion {
            family,
            unicode,
            edition,
        };
        debug!(%family, unicode, ?edition, "Detected NSIS version");

        let sections = Section::read_all(
            header.block(BlockType::Sections),
            &header.blocks[BlockType::Sections],
            &header.blocks[BlockType::Entries],
            &strings,
        )?;
        let pages = Page::read_all(
            header.block(BlockType::Pages),
            header.blocks[BlockType::Pages].num,
        )?;
        let ctl_colors = CtlColors::read_all(header.block(BlockType::CtlColors));
        debug!(
            sections = sections.len(),
            pages = pages.len(),
            ctl_colors = ctl_colors.len(),
            "Read NSIS tables"
        );

        let decoder = InstructionDecoder::new(header.block(BlockType::Entries), strings, edition);
        let methods = Disassembler::new(decoder).disassemble(
            entry_points(&sections, &pages, &header),
            options.parallel,
        )?;

        let stream_payload = if unit.solid {
            Vec::new()
        } else {
            data.split_off(unit.end.min(data.len()))
        };

        Ok(Self {
            first_header,
            compression: unit.compression,
            solid: unit.solid,
            version,
            stream_payload,
            sections,
            pages,
            ctl_colors,
            language_id,
            language_entries,
            methods,
            header,
        })
    }

    /// Every method ordered by start offset.
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|method| method.name() == name)
    }

    pub fn strings(&self) -> StringTable<'_> {
        StringTable::new(
            self.header.block(BlockType::Strings),
            self.version.unicode,
            self.version.dialect(),
        )
    }

    /// Decodes the string at a string-table address.
    pub fn resolve_string(&self, address: i32) -> Result<NsisString> {
        self.strings().get(address)
    }

    /// The undecoded bytes of the string at a string-table address, terminator included.
    pub fn resolve_raw_string(&self, address: u32) -> &[u8] {
        self.strings().raw(address)
    }

    /// Every non-empty string of the string block.
    pub fn all_strings(&self) -> Result<Vec<NsisString>> {
        self.strings().all()
    }

    pub fn raw_strings(&self) -> RawStrings<'_> {
        self.strings().raw_strings()
    }

    /// The strings of every language table, in table order.
    pub fn language_table_entries(&self) -> &[NsisString] {
        &self.language_entries
    }

    pub const fn language_id(&self) -> Option<u16> {
        self.language_id
    }

    /// The data block: the packed files and resources the installer extracts.
    pub fn payload(&self) -> &[u8] {
        if self.solid {
            self.header.block(BlockType::Data)
        } else {
            &self.stream_payload
        }
    }

    /// Reads the size-prefixed entry at `offset` in the data block, decompressing it with the
    /// installer's algorithm when its size word is flagged as compressed.
    pub fn extract_payload(&self, offset: usize) -> Result<Vec<u8>> {
        read_block(self.payload(), offset, self.compression).map(|unit| unit.data)
    }

    pub const fn version(&self) -> NsisVersion {
        self.version
    }

    pub const fn is_unicode(&self) -> bool {
        self.version.unicode
    }

    pub const fn compression(&self) -> Compression {
        self.compression
    }

    pub const fn compression_name(&self) -> &'static str {
        self.compression.name()
    }

    pub const fn is_solid(&self) -> bool {
        self.solid
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn ctl_colors(&self) -> &[CtlColors] {
        &self.ctl_colors
    }

    pub const fn first_header(&self) -> &FirstHeader {
        &self.first_header
    }

    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// The highest-numbered non-register variable referenced by any instruction, including
    /// variables embedded in string operands.
    pub fn max_user_variable(&self) -> Option<Variable> {
        self.methods
            .iter()
            .flat_map(Method::instructions)
            .flat_map(Instruction::operands)
            .flat_map(|operand| match operand {
                Operand::Var(variable) => vec![*variable],
                Operand::Str(string) => string.variables().collect(),
                _ => Vec::new(),
            })
            .filter(|variable| !variable.is_register())
            .max()
    }
}
