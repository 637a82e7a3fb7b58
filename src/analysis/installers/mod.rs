pub mod nsis;

pub use nsis::Nsis;
