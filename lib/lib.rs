//! Binloader: executable format detection and normalized loading.
//!
//! Binloader opens an executable, works out which container format and
//! architecture it targets, and describes it with one uniform model: a
//! [`Binary`] holding the entry point, architecture, function symbols and
//! sections.
//!
//! Decoding of the on-disk layouts is delegated to a container-format
//! [`backend`]. The production backend is built on `goblin`, and loading a
//! file through it is one call:
//!
//! ```no_run
//! use binloader::{Binary, BinaryType};
//!
//! let mut binary = Binary::default();
//! binloader::load_binary("/bin/true", &mut binary, BinaryType::Auto).unwrap();
//! println!("{} {} entry={:#x}", binary.binary_type(), binary.architecture(), binary.entry());
//! ```
//!
//! Loading is a strict pipeline. A failure at any required stage aborts the
//! load and leaves the caller's [`Binary`] untouched. Symbol tables are
//! optional metadata: a symbol table that cannot be read is reported as a
//! [`Warning`] on the loaded binary instead of failing the load. Sections
//! are structural, and failing to read them fails the load.

pub mod architecture;
pub mod backend;
pub mod binary;
pub mod loader;
pub mod section;
pub mod symbol;
#[cfg(test)]
mod tests;

pub use crate::architecture::{Architecture, BinaryType, Bits};
pub use crate::backend::{BackendError, SymbolTable};
pub use crate::binary::{Binary, Warning, WarningKind};
pub use crate::loader::{load_binary, unload_binary, Loader};
pub use crate::section::{Permissions, Section, SectionKind};
pub use crate::symbol::{Symbol, SymbolKind};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Binloader Error types.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open binary {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("File {path:?} does not appear to be an executable: {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("Unrecognized format for binary {0:?}")]
    UnrecognizedFormat(PathBuf),
    #[error("Unsupported binary type {0}")]
    UnsupportedContainer(String),
    #[error("Unsupported architecture {0}")]
    UnsupportedArchitecture(String),
    #[error("Failed to read {table} symbol table: {source}")]
    SymbolTableRead {
        table: SymbolTable,
        #[source]
        source: BackendError,
    },
    #[error("Failed to read sections: {0}")]
    SectionRead(#[source] BackendError),
    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] std::collections::TryReserveError),
}

impl Error {
    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { .. } => ErrorKind::Open,
            Error::Format { .. } => ErrorKind::Format,
            Error::UnrecognizedFormat(_) => ErrorKind::UnrecognizedFormat,
            Error::UnsupportedContainer(_) => ErrorKind::UnsupportedContainer,
            Error::UnsupportedArchitecture(_) => ErrorKind::UnsupportedArchitecture,
            Error::SymbolTableRead { .. } => ErrorKind::SymbolTableRead,
            Error::SectionRead(_) => ErrorKind::SectionRead,
            Error::OutOfMemory(_) => ErrorKind::OutOfMemory,
        }
    }

    /// Returns true if a load may continue past this error.
    ///
    /// Only an unreadable symbol table is recoverable.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::SymbolTableRead
    }
}

/// The kind of an [`Error`], for callers which need to branch on the
/// failure without inspecting its details.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ErrorKind {
    Open,
    Format,
    UnrecognizedFormat,
    UnsupportedContainer,
    UnsupportedArchitecture,
    SymbolTableRead,
    SectionRead,
    OutOfMemory,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorKind::Open => "open error",
            ErrorKind::Format => "format error",
            ErrorKind::UnrecognizedFormat => "unrecognized format",
            ErrorKind::UnsupportedContainer => "unsupported container",
            ErrorKind::UnsupportedArchitecture => "unsupported architecture",
            ErrorKind::SymbolTableRead => "symbol table read error",
            ErrorKind::SectionRead => "section read error",
            ErrorKind::OutOfMemory => "out of memory",
        };
        write!(f, "{}", s)
    }
}
