//! Disassembler for NSIS installers.
//!
//! [`Nsis`] locates the installer inside a host executable, inflates its header and splits the
//! compiled script into named methods of decoded instructions.
//!
//! ```no_run
//! use std::fs::File;
//!
//! use nsis_disasm::Nsis;
//!
//! let nsis = Nsis::new(File::open("setup.exe")?)?;
//! for method in nsis.methods() {
//!     println!("Function {}", method.name());
//!     for instruction in method.instructions() {
//!         println!("  {instruction}");
//!     }
//! }
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

pub mod analysis;

pub use analysis::installers::Nsis;
pub use analysis::installers::nsis::{NsisError, NsisOptions};
