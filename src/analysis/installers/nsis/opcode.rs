use std::fmt;

use bitflags::bitflags;

use super::version::Edition;

bitflags! {
    /// How an instruction affects control flow and its operands.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct ControlFlow: u32 {
        /// Execution does not continue with the next instruction.
        const STOP = 1 << 0;
        const CALL = 1 << 1;
        const CHG1 = 1 << 2;
        const CHG2 = 1 << 3;
        const CHG3 = 1 << 4;
        const CHG4 = 1 << 5;
        const CHG5 = 1 << 6;
        const CHG6 = 1 << 7;
        const USE1 = 1 << 8;
        const USE2 = 1 << 9;
        const USE3 = 1 << 10;
        const USE4 = 1 << 11;
        const USE5 = 1 << 12;
        const USE6 = 1 << 13;
        /// Control passes through an indirect jump or call.
        const JUMP = 1 << 14;
        const SHIFT = 1 << 15;
        /// May appear in a compiled script function.
        const HLL = 1 << 16;
    }
}

/// A catalog entry: the instruction's name, one shape letter per operand and its control flow.
///
/// Shape letters are `I` integer, `J` jump target, `S` string, `V` variable, `O` operator and
/// `2` a value stored shifted left by two.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OpcodeDef {
    pub name: &'static str,
    pub shape: &'static str,
    pub flow: ControlFlow,
}

const fn def(name: &'static str, shape: &'static str, flow: ControlFlow) -> OpcodeDef {
    OpcodeDef { name, shape, flow }
}

const NONE: ControlFlow = ControlFlow::empty();
const STOP: ControlFlow = ControlFlow::STOP;
const CALL: ControlFlow = ControlFlow::CALL;
const C1: ControlFlow = ControlFlow::CHG1;
const C2: ControlFlow = ControlFlow::CHG2;
const U1: ControlFlow = ControlFlow::USE1;
const U2: ControlFlow = ControlFlow::USE2;
const U3: ControlFlow = ControlFlow::USE3;
const U4: ControlFlow = ControlFlow::USE4;
const U5: ControlFlow = ControlFlow::USE5;
const U6: ControlFlow = ControlFlow::USE6;

const U12: ControlFlow = U1.union(U2);
const U123: ControlFlow = U12.union(U3);
const U1234: ControlFlow = U123.union(U4);
const U12345: ControlFlow = U1234.union(U5);
const U123456: ControlFlow = U12345.union(U6);
const C1U2: ControlFlow = C1.union(U2);
const C1U23: ControlFlow = C1U2.union(U3);
const C1U234: ControlFlow = C1U23.union(U4);
const C1U2345: ControlFlow = C1U234.union(U5);
const C12U3: ControlFlow = C1.union(C2).union(U3);

/// Every instruction, indexed by canonical opcode number.
pub static OPCODES: [OpcodeDef; Opcode::COUNT] = [
    def("INVALID", "", NONE),
    def("Return", "", STOP),
    def("Jmp", "J", U1),
    def("Abort", "I", U1.union(STOP)),
    def("Quit", "", STOP),
    def("Call", "J", U1.union(CALL)),
    def("UpdateText", "S", U1),
    def("Sleep", "I", U1),
    def("BringToFront", "", NONE),
    def("ChDetailsView", "SS", U12),
    def("SetFileAttributes", "SI", U12),
    def("CreateDir", "SI", U12),
    def("IfFileExists", "SJJ", U123),
    def("SetFlag", "IS", U12),
    def("IfFlag", "JJII", U1234),
    def("GetFlag", "VI", C1U2),
    // 0x10
    def("Rename", "SSIS", C1U234),
    def("GetFullPathName", "SVI", U1.union(C2).union(U3)),
    def("SearchPath", "VS", C1U2),
    def("GetTempFilename", "VS", C1U2),
    def("ExtractFile", "ISIIII", U123456),
    def("DeleteFile", "SI", U12),
    def("MessageBox", "ISIJIJ", U12345),
    def("RmDir", "SI", U12),
    def("StrLen", "VS", C1U2),
    def("StrCpy", "VSSS", C1U234),
    def("StrCmp", "SSJJI", U12345),
    def("ReadEnv", "VSI", C1U23),
    def("IntCmp", "SSJJJI", U123456),
    def("IntOp", "VSSO", C1U234),
    def("IntFmt", "VSS", C1U23),
    def("PushPop", "", NONE),
    // 0x20
    def("FindWindow", "VSSSS", C1U2345),
    def("SendMessage", "VSSSS2", C1U2345.union(U6)),
    def("IsWindow", "SJJ", U123),
    def("GetDlgItem", "VSS", C1U23),
    def("SetCtlColors", "SI", U12),
    def("SetBrandingImage", "SII", U12),
    def("CreateFont", "VSSSI", C1U2345),
    def("ShowWindow", "SS", U12),
    def("ShellExec", "SSSS", U1234),
    def("Execute", "SII", U123),
    def("GetFileTime", "VVS", C12U3),
    def("GetDLLVersion", "VVS", C12U3),
    def("RegisterDLL", "SSSI", U1234),
    def("CreateShortcut", "SSSSS", U12345),
    def("CopyFiles", "SSS", U123),
    def("Reboot", "", NONE),
    // 0x30
    def("WriteIni", "SSSS", U1234),
    def("ReadIni", "VSSS", C1U234),
    def("DeleteRegKey", "ISSS", U1234),
    def("WriteRegValue", "ISSII", U12345),
    def("ReadRegValue", "VISSI", C1U2345),
    def("RegEnumKey", "VISS", C1U234),
    def("FileClose", "V", U1),
    def("FileOpen", "VIIS", C1U234),
    def("FileWrite", "VS", U12),
    def("FileRead", "VVS", U1.union(C2).union(U3)),
    def("FileSeek", "VVSI", U1.union(C2).union(U3).union(U4)),
    def("FindClose", "V", U1),
    def("FindNext", "VV", C1U2),
    def("FindFirst", "VVS", C12U3),
    def("WriteUninstaller", "SIIS", U1234),
    def("LogText", "S", U1),
    // 0x40
    def("SectionSet", "SII", U123),
    def("InstTypeSet", "SIII", U1234),
    def("GetLabelAddr", "", NONE),
    def("GetFunctionAddr", "", NONE),
    def("LockWindow", "I", U1),
    def("Push", "S", U1),
    def("Pop", "V", C1),
    def("Exch", "I", U1.union(C1)),
    def("ClearErrors", "", NONE),
    def("IfErrors", "J", U1),
    def("AssignVar", "VS", C1U2),
    def("EnableWindow", "SS", U12),
    def("HideWindow", "SS", U12),
    def("DeleteRegValue", "ISSS", U1234),
    def("RegEnumValue", "VISS", C1U234),
    def("FileWriteByte", "VS", U12),
    // 0x50
    def("FileReadByte", "VV", U1.union(C2)),
    def("LogSet", "I", U1),
    def("PluginCall", "", U123),
    def("GetFontVersion", "V", U1),
    def("GetFontName", "V", U1),
    def("FindProc", "V", U1),
];

/// A canonical opcode number, always a valid index into [`OPCODES`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Opcode(u8);

impl Opcode {
    pub const COUNT: usize = 86;

    pub const INVALID: Self = Self(0x00);
    pub const RETURN: Self = Self(0x01);
    pub const JMP: Self = Self(0x02);
    pub const CALL: Self = Self(0x05);
    pub const SET_FLAG: Self = Self(0x0D);
    pub const IF_FLAG: Self = Self(0x0E);
    pub const STR_CPY: Self = Self(0x19);
    pub const PUSH_POP: Self = Self(0x1F);
    pub const SHOW_WINDOW: Self = Self(0x27);
    pub const DELETE_REG_KEY: Self = Self(0x32);
    pub const REG_ENUM_KEY: Self = Self(0x35);
    pub const FILE_WRITE: Self = Self(0x38);
    pub const FILE_READ: Self = Self(0x39);
    pub const LOG_TEXT: Self = Self(0x3F);
    pub const PUSH: Self = Self(0x45);
    pub const POP: Self = Self(0x46);
    pub const EXCH: Self = Self(0x47);
    pub const CLEAR_ERRORS: Self = Self(0x48);
    pub const IF_ERRORS: Self = Self(0x49);
    pub const ASSIGN_VAR: Self = Self(0x4A);
    pub const ENABLE_WINDOW: Self = Self(0x4B);
    pub const HIDE_WINDOW: Self = Self(0x4C);
    pub const DELETE_REG_VALUE: Self = Self(0x4D);
    pub const REG_ENUM_VALUE: Self = Self(0x4E);
    pub const FILE_WRITE_BYTE: Self = Self(0x4F);
    pub const FILE_READ_BYTE: Self = Self(0x50);
    pub const LOG_SET: Self = Self(0x51);
    pub const GET_FONT_VERSION: Self = Self(0x53);
    pub const GET_FONT_NAME: Self = Self(0x54);
    pub const FIND_PROC: Self = Self(0x55);

    /// Looks up a canonical opcode number. Numbers past the catalog map to [`Self::INVALID`].
    pub const fn from_number(number: u32) -> Self {
        if (number as usize) < Self::COUNT {
            Self(number as u8)
        } else {
            Self::INVALID
        }
    }

    /// Translates an opcode number as stored in the entries block into a canonical one.
    ///
    /// Only the legacy Unicode fork needs this: each of its editions inserts extra instructions
    /// into the numbering, and every build moves the wide-character file instructions. Every
    /// other toolchain stores canonical numbers.
    pub const fn from_stored(stored: u32, edition: Option<Edition>) -> Self {
        let Some(edition) = edition else {
            return Self::from_number(stored);
        };
        Self::from_number(remap(stored, edition))
    }

    pub const fn number(self) -> u8 {
        self.0
    }

    pub fn def(self) -> &'static OpcodeDef {
        &OPCODES[usize::from(self.0)]
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }

    /// Picks the specific instruction a generic encoding stands for, based on its operands.
    ///
    /// Several script instructions compile to one opcode and are only told apart by flag
    /// operands. Every other opcode is returned unchanged.
    pub const fn resolve_virtual(self, raw: &[u32; 6]) -> Self {
        match self {
            Self::PUSH_POP => {
                if raw[1] != 0 {
                    Self::POP
                } else if raw[2] != 0 {
                    Self::EXCH
                } else {
                    Self::PUSH
                }
            }
            Self::SET_FLAG if raw[0] == 2 && raw[1] == 0xAC => Self::CLEAR_ERRORS,
            Self::IF_FLAG if raw[1] == 0 && raw[2] == 2 && raw[3] == 0 => Self::IF_ERRORS,
            Self::STR_CPY if raw[2] == 0 && raw[3] == 0 => Self::ASSIGN_VAR,
            Self::SHOW_WINDOW if raw[2] != 0 => Self::HIDE_WINDOW,
            Self::SHOW_WINDOW if raw[3] != 0 => Self::ENABLE_WINDOW,
            Self::DELETE_REG_KEY if raw[4] == 0 => Self::DELETE_REG_VALUE,
            Self::REG_ENUM_KEY if raw[4] == 0 => Self::REG_ENUM_VALUE,
            Self::FILE_WRITE if raw[2] != 0 => Self::FILE_WRITE_BYTE,
            Self::FILE_READ if raw[3] != 0 => Self::FILE_READ_BYTE,
            Self::LOG_TEXT if raw[0] != 0 => Self::LOG_SET,
            _ => self,
        }
    }

    pub fn is_call(self) -> bool {
        self.def().flow.contains(ControlFlow::CALL)
    }

    pub fn stops(self) -> bool {
        self.def().flow.contains(ControlFlow::STOP)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const fn remap(stored: u32, edition: Edition) -> u32 {
    if stored < 44 {
        return stored;
    }

    let mut number = stored;
    if matches!(edition, Edition::Second | Edition::Third) {
        if number == 44 {
            return Opcode::GET_FONT_VERSION.0 as u32;
        }
        number -= 1;
    }
    if matches!(edition, Edition::Third) {
        if number == 44 {
            return Opcode::GET_FONT_NAME.0 as u32;
        }
        number -= 1;
    }
    if number >= 58 {
        // Wide-character FileWrite and FileRead
        if number == 58 {
            return Opcode::FILE_WRITE.0 as u32;
        }
        if number == 59 {
            return Opcode::FILE_READ.0 as u32;
        }
        number -= 2;
        if number >= 63 && matches!(edition, Edition::Third) {
            if number == 63 {
                return Opcode::LOG_SET.0 as u32;
            }
            return number - 1;
        }
        if number == 68 {
            return Opcode::FIND_PROC.0 as u32;
        }
    }
    number
}
