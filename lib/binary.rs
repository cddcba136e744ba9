//! The normalized description of a loaded binary.

use crate::architecture::{Architecture, BinaryType, Bits};
use crate::section::Section;
use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The kind of a recoverable condition met while loading.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum WarningKind {
    /// A symbol table could not be read, and its symbols are missing.
    SymbolTableRead,
    /// The detected binary type differs from the type the caller expected.
    TypeMismatch,
}

/// A recoverable condition met while loading a `Binary`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Warning {
    kind: WarningKind,
    message: String,
}

impl Warning {
    pub fn new<S: Into<String>>(kind: WarningKind, message: S) -> Warning {
        Warning {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> WarningKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A loaded binary.
///
/// `Binary::default()` is the empty binary a caller hands to
/// [`load_binary`](crate::load_binary). Every field is set together once a
/// load succeeds, so a `Binary` is either empty or fully loaded.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Binary {
    filename: PathBuf,
    entry: u64,
    binary_type: BinaryType,
    type_name: String,
    architecture: Architecture,
    bits: u32,
    architecture_name: String,
    symbols: Vec<Symbol>,
    sections: Vec<Section>,
    warnings: Vec<Warning>,
}

impl Binary {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        filename: PathBuf,
        entry: u64,
        binary_type: BinaryType,
        type_name: String,
        architecture: Architecture,
        bits: Bits,
        architecture_name: String,
        symbols: Vec<Symbol>,
        sections: Vec<Section>,
        warnings: Vec<Warning>,
    ) -> Binary {
        Binary {
            filename,
            entry,
            binary_type,
            type_name,
            architecture,
            bits: bits.bits(),
            architecture_name,
            symbols,
            sections,
            warnings,
        }
    }

    /// Load the binary at `path` with the process-wide loader, detecting its
    /// format.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Binary, crate::Error> {
        crate::Loader::global().load(path, BinaryType::Auto)
    }

    /// The path this binary was loaded from.
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// The address program execution begins at.
    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub fn binary_type(&self) -> BinaryType {
        self.binary_type
    }

    /// The parsing library's name for this binary's format, informational
    /// only.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// The word size, 32 or 64. 0 if nothing has been loaded.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// The parsing library's name for this binary's architecture,
    /// informational only.
    pub fn architecture_name(&self) -> &str {
        &self.architecture_name
    }

    /// Function symbols, static symbols first and then dynamic symbols, each
    /// in table order.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Recoverable conditions met while loading.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// The first symbol with the given name.
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.name() == name)
    }

    /// The first section with the given name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name() == name)
    }

    /// The `.text` section, if there is one.
    pub fn text_section(&self) -> Option<&Section> {
        self.section(".text")
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} {}/{} ({}/{}) {} bits entry@{:#x}",
            self.filename,
            self.binary_type,
            self.type_name,
            self.architecture,
            self.architecture_name,
            self.bits,
            self.entry
        )
    }
}
