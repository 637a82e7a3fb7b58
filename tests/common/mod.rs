#![allow(dead_code)]

use std::io::Write;

use flate2::{Compression as Level, write::DeflateEncoder};
use liblzma::stream::{Action, Filters, LzmaOptions, Status, Stream};

const COMPRESSED_FLAG: u32 = 1 << 31;
const FIELDS_LEN: usize = 300;
const LEGACY_FIELDS_LEN: usize = 276;
const LZMA_DICTIONARY_SIZE: u32 = 1 << 23;
const SECTION_STRIDE: usize = 32;
const LANGUAGE_TABLE_PREFIX: usize = 10;

/// How the header is stored after the first header.
#[derive(Copy, Clone, Debug)]
pub enum Packing {
    Stored,
    Deflate,
    Lzma,
    /// Header and payload in one LZMA stream with no size word in front.
    SolidLzma,
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Level::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Raw LZMA1 behind its 5-byte properties header, ending with an end marker.
pub fn lzma(data: &[u8]) -> Vec<u8> {
    let mut options = LzmaOptions::new_preset(6).unwrap();
    options.dict_size(LZMA_DICTIONARY_SIZE);
    let mut filters = Filters::new();
    filters.lzma1(&options);

    let mut stream = Stream::new_raw_encoder(&filters).unwrap();
    let mut packed = Vec::with_capacity(data.len() + 64);
    loop {
        if packed.len() == packed.capacity() {
            packed.reserve(data.len() + 64);
        }
        let consumed = stream.total_in() as usize;
        let status = stream
            .process_vec(&data[consumed..], &mut packed, Action::Finish)
            .unwrap();
        if matches!(status, Status::StreamEnd) {
            break;
        }
    }

    let mut encoded = vec![0x5D];
    encoded.extend(LZMA_DICTIONARY_SIZE.to_le_bytes());
    encoded.extend(packed);
    encoded
}

fn compressed_unit(packed: Vec<u8>) -> Vec<u8> {
    let mut unit = (packed.len() as u32 | COMPRESSED_FLAG).to_le_bytes().to_vec();
    unit.extend(packed);
    unit
}

fn words(words: &[i32]) -> impl Iterator<Item = u8> + '_ {
    words.iter().flat_map(|word| word.to_le_bytes())
}

/// Assembles an installer behind a fake host executable.
pub struct InstallerBuilder {
    unicode: bool,
    legacy_layout: bool,
    strings: Vec<u8>,
    entries: Vec<u8>,
    sections: Vec<[i32; 6]>,
    pages: Vec<[i32; 16]>,
    callbacks: [i32; 10],
    language_id: u16,
    language_strings: Vec<i32>,
    payload: Vec<u8>,
}

impl InstallerBuilder {
    pub fn new() -> Self {
        Self {
            unicode: false,
            legacy_layout: false,
            strings: vec![0],
            entries: Vec::new(),
            sections: Vec::new(),
            pages: Vec::new(),
            callbacks: [-1; 10],
            language_id: 1033,
            language_strings: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn unicode() -> Self {
        Self {
            unicode: true,
            strings: vec![0, 0],
            ..Self::new()
        }
    }

    /// Writes the pre-reboot-callback header: seven block slots, nine callbacks, no uninstaller
    /// strings and the pages block at 276.
    pub fn legacy_layout(mut self) -> Self {
        self.legacy_layout = true;
        self
    }

    const fn width(&self) -> usize {
        if self.unicode { 2 } else { 1 }
    }

    /// Appends a string given as raw block bytes, terminator included, and returns its address.
    pub fn raw_string(&mut self, bytes: &[u8]) -> i32 {
        let address = self.strings.len() / self.width();
        self.strings.extend_from_slice(bytes);
        address as i32
    }

    /// Appends a plain string and returns its address.
    pub fn string(&mut self, text: &str) -> i32 {
        let bytes = if self.unicode {
            text.encode_utf16()
                .chain([0])
                .flat_map(u16::to_le_bytes)
                .collect::<Vec<_>>()
        } else {
            text.bytes().chain([0]).collect()
        };
        self.raw_string(&bytes)
    }

    /// Appends an instruction and returns its entry index.
    pub fn instruction(&mut self, opcode: u32, operands: [u32; 6]) -> u32 {
        let index = self.entries.len() / 28;
        self.entries.extend(opcode.to_le_bytes());
        self.entries
            .extend(operands.iter().flat_map(|operand| operand.to_le_bytes()));
        index as u32
    }

    pub fn section(&mut self, name: i32, code: i32) {
        self.sections.push([name, 0, 1, code, 0, 0]);
    }

    pub fn page(&mut self, pre: i32, show: i32, leave: i32) {
        let mut page = [0; 16];
        page[2..5].copy_from_slice(&[pre, show, leave]);
        self.pages.push(page);
    }

    pub fn callback(&mut self, index: usize, entry: i32) {
        self.callbacks[index] = entry;
    }

    pub fn language(&mut self, id: u16, strings: &[i32]) {
        self.language_id = id;
        self.language_strings = strings.to_vec();
    }

    /// Appends a size-prefixed payload entry and returns its offset in the data block.
    pub fn payload_entry(&mut self, data: &[u8], compressed: bool) -> usize {
        let offset = self.payload.len();
        if compressed {
            self.payload.extend(compressed_unit(deflate(data)));
        } else {
            self.payload.extend((data.len() as u32).to_le_bytes());
            self.payload.extend_from_slice(data);
        }
        offset
    }

    pub fn entries(&self) -> &[u8] {
        &self.entries
    }

    /// The inflated header.
    pub fn header(&self) -> Vec<u8> {
        let fields_len = if self.legacy_layout {
            LEGACY_FIELDS_LEN
        } else {
            FIELDS_LEN
        };
        let pages = fields_len;
        let sections = pages + self.pages.len() * 64;
        let entries = sections + self.sections.len() * SECTION_STRIDE;
        let strings = entries + self.entries.len();
        let languages = strings + self.strings.len();
        let language_table_size = LANGUAGE_TABLE_PREFIX + self.language_strings.len() * 4;

        let blocks = [
            (pages, self.pages.len()),
            (sections, self.sections.len()),
            (entries, self.entries.len() / 28),
            (strings, 0),
            (languages, 1),
            (0, 0),
            (0, 0),
            (0, 0),
        ];

        let slots = if self.legacy_layout { 7 } else { 8 };
        let mut header = vec![0; 4];
        for (offset, num) in blocks.into_iter().take(slots) {
            header.extend((offset as u32).to_le_bytes());
            header.extend((num as u32).to_le_bytes());
        }
        // registry, colors, language table size and license color
        header.extend(words(&[0, 0, 0, -1, -1, -1, -1, -1]));
        header.extend(words(&[language_table_size as i32, -1]));
        if self.legacy_layout {
            header.extend(words(&self.callbacks[..9]));
            header.extend(words(&[0; 33]));
            // install directory
            header.extend(words(&[0]));
            header.resize(LEGACY_FIELDS_LEN, 0);
        } else {
            header.extend(words(&self.callbacks));
            header.extend(words(&[0; 33]));
            // install directory and uninstaller strings
            header.extend(words(&[0; 5]));
        }
        assert_eq!(header.len(), fields_len);

        for page in &self.pages {
            header.extend(words(page));
        }
        for section in &self.sections {
            header.extend(words(section));
            header.resize(header.len() + SECTION_STRIDE - 24, 0);
        }
        header.extend_from_slice(&self.entries);
        header.extend_from_slice(&self.strings);

        header.extend(self.language_id.to_le_bytes());
        header.resize(header.len() + LANGUAGE_TABLE_PREFIX - 2, 0);
        header.extend(words(&self.language_strings));
        header
    }

    /// The complete file: a host stub, the first header, the header and the payload.
    pub fn build(&self, packing: Packing) -> Vec<u8> {
        let header = self.header();
        let mut stored = match packing {
            Packing::Stored => {
                let mut stored = (header.len() as u32).to_le_bytes().to_vec();
                stored.extend_from_slice(&header);
                stored
            }
            Packing::Deflate => compressed_unit(deflate(&header)),
            Packing::Lzma => compressed_unit(lzma(&header)),
            Packing::SolidLzma => {
                let mut solid = (header.len() as u32).to_le_bytes().to_vec();
                solid.extend_from_slice(&header);
                solid.extend_from_slice(&self.payload);
                lzma(&solid)
            }
        };
        if !matches!(packing, Packing::SolidLzma) {
            stored.extend_from_slice(&self.payload);
        }

        let mut file = b"MZ".to_vec();
        file.resize(1000, 0);
        file.extend(0u32.to_le_bytes());
        file.extend(0xDEAD_BEEFu32.to_le_bytes());
        file.extend_from_slice(b"NullsoftInst");
        file.extend((header.len() as u32).to_le_bytes());
        file.extend((stored.len() as u32).to_le_bytes());
        file.extend(stored);
        file
    }
}
