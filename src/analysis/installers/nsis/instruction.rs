use std::fmt;

use byteorder::{ByteOrder, LE};
use tracing::warn;

use super::error::{NsisError, Result, slice};
use super::opcode::Opcode;
use super::strings::{FIRST_USER_VARIABLE, NsisString, StringTable, Variable};
use super::version::Edition;

/// Variable operands of the legacy Unicode fork carry flags above these bits.
const LEGACY_UNICODE_VARIABLE_MASK: u32 = 0x7FFF;

/// Receives the branch targets found while typing jump operands.
pub trait BranchTargets {
    /// Returns the name of the function starting at `offset`, registering it if it is new.
    fn call(&mut self, offset: usize) -> String;

    /// Records a jump to `offset`, returning whether it lands inside the function being decoded.
    fn label(&mut self, offset: usize) -> bool;
}

/// A jump target within a function.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Label(pub usize);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label_{:x}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operand {
    Int(u32),
    Str(NsisString),
    Var(Variable),
    Label(Label),
    /// The function a `Call` instruction jumps to.
    Call { offset: usize, name: String },
    /// A value passed through untyped, such as an unset jump target.
    Raw(u32),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value:#x}"),
            Self::Str(string) => write!(f, "\"{string}\""),
            Self::Var(variable) => fmt::Display::fmt(variable, f),
            Self::Label(label) => fmt::Display::fmt(label, f),
            Self::Call { name, .. } => f.write_str(name),
            Self::Raw(value) => write!(f, "{}", *value as i32),
        }
    }
}

/// One decoded entry of the entries block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    /// Byte offset within the entries block.
    pub offset: usize,
    pub opcode: Opcode,
    /// The opcode number as stored, before edition remapping.
    stored: u32,
    raw: [u32; 6],
    operands: Vec<Operand>,
}

impl Instruction {
    /// Every entry is an opcode word followed by six operand words.
    pub const SIZE: usize = 28;

    pub fn name(&self) -> &'static str {
        self.opcode.name()
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// The six operand words exactly as stored.
    pub const fn raw(&self) -> &[u32; 6] {
        &self.raw
    }

    /// Re-encodes the entry as it appeared in the entries block.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        LE::write_u32(&mut bytes, self.stored);
        LE::write_u32_into(&self.raw, &mut bytes[size_of::<u32>()..]);
        bytes
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        for (index, operand) in self.operands.iter().enumerate() {
            f.write_str(if index == 0 { " " } else { ", " })?;
            fmt::Display::fmt(operand, f)?;
        }
        Ok(())
    }
}

/// Decodes entries with the string table and opcode numbering of one installer.
#[derive(Copy, Clone, Debug)]
pub struct InstructionDecoder<'data> {
    entries: &'data [u8],
    strings: StringTable<'data>,
    edition: Option<Edition>,
    mask_variables: bool,
}

impl<'data> InstructionDecoder<'data> {
    /// `edition` is only set for the legacy Unicode fork, which also flags its variable numbers.
    pub const fn new(
        entries: &'data [u8],
        strings: StringTable<'data>,
        edition: Option<Edition>,
    ) -> Self {
        Self {
            entries,
            strings,
            edition,
            mask_variables: edition.is_some(),
        }
    }

    pub const fn entries(&self) -> &'data [u8] {
        self.entries
    }

    /// Decodes the entry at byte `offset`, reporting branch targets to `targets`.
    pub fn decode(&self, offset: usize, targets: &mut impl BranchTargets) -> Result<Instruction> {
        let bytes = slice(self.entries, offset, Instruction::SIZE, "instruction")?;
        let stored = LE::read_u32(bytes);
        let mut raw = [0; 6];
        LE::read_u32_into(&bytes[size_of::<u32>()..], &mut raw);

        let opcode = Opcode::from_stored(stored, self.edition).resolve_virtual(&raw);

        let operands = opcode
            .def()
            .shape
            .chars()
            .zip(raw)
            .map(|(shape, value)| self.operand(opcode, shape, value, targets))
            .collect::<Result<Vec<_>>>()?;

        Ok(Instruction {
            offset,
            opcode,
            stored,
            raw,
            operands,
        })
    }

    fn operand(
        &self,
        opcode: Opcode,
        shape: char,
        value: u32,
        targets: &mut impl BranchTargets,
    ) -> Result<Operand> {
        let operand = match shape {
            'I' | 'O' => Operand::Int(value),
            'S' => Operand::Str(self.strings.get(value as i32)?),
            'V' => match value {
                0..FIRST_USER_VARIABLE => Operand::Var(Variable(value)),
                u32::MAX => Operand::Raw(value),
                _ if self.mask_variables => {
                    Operand::Var(Variable(value & LEGACY_UNICODE_VARIABLE_MASK))
                }
                _ => Operand::Var(Variable(value)),
            },
            'J' => match (value as i32).checked_sub(1).map(usize::try_from) {
                Some(Ok(entry)) => {
                    let target = entry * Instruction::SIZE;
                    if opcode.is_call() {
                        Operand::Call {
                            offset: target,
                            name: targets.call(target),
                        }
                    } else if targets.label(target) {
                        Operand::Label(Label(target))
                    } else {
                        warn!(
                            opcode = opcode.name(),
                            target, "Jump target lies outside its function"
                        );
                        Operand::Raw(value)
                    }
                }
                _ => Operand::Raw(value),
            },
            '2' => Operand::Int(value >> 2),
            _ => {
                return Err(NsisError::UnsupportedOperandShape {
                    opcode: opcode.name(),
                    shape,
                });
            }
        };
        Ok(operand)
    }
}
