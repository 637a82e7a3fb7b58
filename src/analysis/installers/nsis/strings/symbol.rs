use std::fmt;

/// Number of the first variable that is not a register (`$0`-`$9`, `$R0`-`$R9`).
pub const FIRST_USER_VARIABLE: u32 = 20;

/// Built-in variables that follow the registers, in slot order.
const SYSTEM_VARIABLES: [&str; 11] = [
    "INSTALLDIR",
    "OUTPUTDIR",
    "EXEDIR",
    "LANGUAGE",
    "TEMPDIR",
    "PLUGINSDIR",
    "EXEPATH",
    "EXEFILE",
    "HWNDPARENT",
    "CLICKNEXT",
    "COMMANDLINE",
];

/// Shell folder names indexed by CSIDL. Empty names have no script constant.
const SHELL_FOLDERS: [&str; 62] = [
    "DESKTOP",
    "INTERNET",
    "SMPROGRAMS",
    "CONTROLS",
    "PRINTERS",
    "DOCUMENTS",
    "FAVORITES",
    "SMSTARTUP",
    "RECENT",
    "SENDTO",
    "BITBUCKET",
    "STARTMENU",
    "",
    "MUSIC",
    "VIDEOS",
    "",
    "DESKTOP",
    "DRIVES",
    "NETWORK",
    "NETHOOD",
    "FONTS",
    "TEMPLATES",
    "STARTMENU",
    "SMPROGRAMS",
    "SMSTARTUP",
    "DESKTOP",
    "APPDATA",
    "PRINTHOOD",
    "LOCALAPPDATA",
    "ALTSTARTUP",
    "ALTSTARTUP",
    "FAVORITES",
    "INTERNET_CACHE",
    "COOKIES",
    "HISTORY",
    "APPDATA",
    "WINDIR",
    "SYSDIR",
    "PROGRAM_FILES",
    "PICTURES",
    "PROFILE",
    "SYSTEMX86",
    "PROGRAM_FILESX86",
    "PROGRAM_FILES_COMMON",
    "PROGRAM_FILES_COMMONX86",
    "TEMPLATES",
    "DOCUMENTS",
    "ADMINTOOLS",
    "ADMINTOOLS",
    "CONNECTIONS",
    "",
    "",
    "",
    "MUSIC",
    "PICTURES",
    "VIDEOS",
    "RESOURCES",
    "RESOURCES_LOCALIZED",
    "COMMON_OEM_LINKS",
    "CDBURN_AREA",
    "",
    "COMPUTERSNEARME",
];

/// A numbered variable slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Variable(pub u32);

impl Variable {
    /// Whether this is one of the twenty registers rather than a named or user variable.
    pub const fn is_register(self) -> bool {
        self.0 < FIRST_USER_VARIABLE
    }

    /// Whether this is a variable declared by the script.
    pub const fn is_user(self) -> bool {
        self.0 >= FIRST_USER_VARIABLE + SYSTEM_VARIABLES.len() as u32
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            number @ 0..10 => write!(f, "${number}"),
            number @ 10..FIRST_USER_VARIABLE => write!(f, "$R{}", number - 10),
            number => match SYSTEM_VARIABLES.get((number - FIRST_USER_VARIABLE) as usize) {
                Some(name) => write!(f, "${name}"),
                None => write!(f, "$__var{number}__"),
            },
        }
    }
}

/// A decoded string token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Symbol {
    Text(String),
    Variable(Variable),
    /// Index into the installer's language string table.
    LangString(u32),
    /// A shell folder constant, stored as the two parameter bytes that follow the shell code.
    Shell { param1: u8, param2: u8 },
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Variable(variable) => fmt::Display::fmt(variable, f),
            Self::LangString(index) => write!(f, "$(LSTR_{index})"),
            Self::Shell { param1, param2 } => {
                match SHELL_FOLDERS.get(usize::from(*param1)) {
                    Some(name) if !name.is_empty() => write!(f, "%{name}%"),
                    _ => write!(f, "$__SHELL_{param1}_{param2}__"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Symbol, Variable};

    #[test]
    fn registers_and_named_variables() {
        assert_eq!(Variable(3).to_string(), "$3");
        assert_eq!(Variable(15).to_string(), "$R5");
        assert_eq!(Variable(20).to_string(), "$INSTALLDIR");
        assert_eq!(Variable(21).to_string(), "$OUTPUTDIR");
        assert_eq!(Variable(30).to_string(), "$COMMANDLINE");
        assert_eq!(Variable(31).to_string(), "$__var31__");
        assert!(Variable(19).is_register());
        assert!(!Variable(20).is_register());
        assert!(!Variable(30).is_user());
        assert!(Variable(31).is_user());
    }

    #[test]
    fn shell_folders() {
        let symbol = |param1| Symbol::Shell { param1, param2: 0x80 };
        assert_eq!(symbol(0x1A).to_string(), "%APPDATA%");
        assert_eq!(symbol(0x26).to_string(), "%PROGRAM_FILES%");
        assert_eq!(symbol(12).to_string(), "$__SHELL_12_128__");
        assert_eq!(symbol(200).to_string(), "$__SHELL_200_128__");
    }

    #[test]
    fn language_strings() {
        assert_eq!(Symbol::LangString(7).to_string(), "$(LSTR_7)");
    }
}
