//! The container-format library interface.
//!
//! Binloader never decodes ELF or PE byte layouts itself. Instead it asks a
//! [`Backend`] to open a file, and then queries the resulting
//! [`ObjectHandle`] for the format, machine, symbols and sections. The
//! production backend, [`GoblinBackend`], is built on `goblin`.
//!
//! A handle owns the underlying file resource. Dropping the handle releases
//! it, so a handle is released exactly once no matter how a load ends.

pub mod elf;
pub mod pe;

use bitflags::bitflags;
use goblin::Hint;
use log::debug;
use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by a backend while querying an opened file.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum BackendError {
    #[error("File format not recognized: {0}")]
    WrongFormat(String),
    #[error("Malformed {0}")]
    Malformed(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Goblin error: {0}")]
    Goblin(String),
}

impl From<goblin::error::Error> for BackendError {
    fn from(e: goblin::error::Error) -> BackendError {
        BackendError::Goblin(e.to_string())
    }
}

/// The kind of file a handle may be checked against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    /// An executable, relocatable object or shared library.
    Object,
    /// A static archive of objects.
    Archive,
    /// A core dump.
    Core,
}

/// The container family of an object file.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Flavour {
    Unknown,
    Elf,
    Coff,
    MachO,
}

/// Selects which of a binary's symbol tables to read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SymbolTable {
    /// The regular symbol table, frequently stripped.
    Static,
    /// The dynamic symbol table, holding imports and exports.
    Dynamic,
}

impl fmt::Display for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymbolTable::Static => write!(f, "static"),
            SymbolTable::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Machine information for an opened object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchInfo {
    /// The raw machine code, as defined by the container format.
    pub machine: u32,
    /// The word size of the container class, 32 or 64.
    pub word_size: u32,
    /// A printable name for the machine, informational only.
    pub printable_name: String,
}

bitflags! {
    /// Flags attached to a raw symbol table entry.
    pub struct SymbolFlags: u32 {
        const LOCAL     = 0x0001;
        const GLOBAL    = 0x0002;
        const WEAK      = 0x0004;
        const FUNCTION  = 0x0008;
        const OBJECT    = 0x0010;
        const SECTION   = 0x0020;
        const FILE      = 0x0040;
        const DEBUGGING = 0x0080;
        const UNDEFINED = 0x0100;
        const DYNAMIC   = 0x0200;
        const INDIRECT  = 0x0400;
    }
}

bitflags! {
    /// Flags attached to a raw section.
    pub struct SectionFlags: u32 {
        /// Occupies memory when the binary is loaded.
        const ALLOC    = 0x01;
        /// Has contents in the file.
        const CONTENTS = 0x02;
        const READ     = 0x04;
        const WRITE    = 0x08;
        const EXECUTE  = 0x10;
        /// Holds executable code.
        const CODE     = 0x20;
        /// Holds initialised data.
        const DATA     = 0x40;
    }
}

/// A symbol table entry as decoded by a backend.
///
/// Names may borrow from storage owned by the handle, and must be copied
/// before the handle goes away.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawSymbol<'a> {
    pub name: Cow<'a, str>,
    pub value: u64,
    pub flags: SymbolFlags,
}

/// A section as decoded by a backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawSection<'a> {
    pub name: Cow<'a, str>,
    pub address: u64,
    pub size: u64,
    pub flags: SectionFlags,
}

/// A container-format parsing library.
pub trait Backend: Send + Sync {
    /// The handle type produced by `open`.
    type Handle: ObjectHandle;

    /// Process-wide initialisation of the library. Callers guarantee this
    /// runs at most once, before the first `open`.
    fn init(&self) {}

    /// Open the file at `path` for reading.
    fn open(&self, path: &Path) -> io::Result<Self::Handle>;
}

/// Queries over one opened file.
///
/// Dropping a handle closes it.
pub trait ObjectHandle {
    /// Check whether this file is of the given format. On failure the
    /// reason is available through `last_error`.
    fn check_format(&mut self, format: Format) -> bool;

    /// The error recorded by the last failing operation, if any.
    fn last_error(&self) -> Option<&BackendError>;

    /// Reset the recorded error state.
    fn clear_error(&mut self);

    /// The container flavour. Only meaningful after a successful
    /// `check_format`.
    fn flavour(&self) -> Flavour;

    /// The library's name for this file's target format, for example
    /// `elf64-x86-64`.
    fn target_name(&self) -> String;

    /// The address program execution begins at.
    fn start_address(&self) -> u64;

    /// Machine information for this file.
    fn arch_info(&self) -> ArchInfo;

    /// The number of entries needed to hold the given symbol table. A
    /// missing table has zero entries.
    fn symtab_upper_bound(&self, table: SymbolTable) -> Result<usize, BackendError>;

    /// Decode the given symbol table into `symbols`, in table order.
    fn canonicalize_symtab<'a>(
        &'a self,
        table: SymbolTable,
        symbols: &mut Vec<RawSymbol<'a>>,
    ) -> Result<(), BackendError>;

    /// Decode every section into `sections`, in table order.
    fn sections<'a>(&'a self, sections: &mut Vec<RawSection<'a>>) -> Result<(), BackendError>;
}

/// A `Backend` over the `goblin` parsing library.
#[derive(Clone, Debug, Default)]
pub struct GoblinBackend {}

impl GoblinBackend {
    pub fn new() -> GoblinBackend {
        GoblinBackend {}
    }
}

impl Backend for GoblinBackend {
    type Handle = GoblinHandle;

    fn init(&self) {
        debug!("initialising goblin backend");
    }

    fn open(&self, path: &Path) -> io::Result<GoblinHandle> {
        let bytes = std::fs::read(path)?;
        debug!("opened {:?}, {} bytes", path, bytes.len());
        Ok(GoblinHandle {
            path: path.to_path_buf(),
            bytes,
            details: None,
            error: None,
        })
    }
}

/// The decoded headers of a file, kept for the queries which follow a
/// successful `check_format`.
#[derive(Debug)]
enum Layout {
    Elf(elf::Layout),
    Pe(pe::Layout),
    /// A container we can name but not query.
    Opaque,
}

/// What `check_format` learned about a file.
#[derive(Debug)]
struct Details {
    flavour: Flavour,
    target_name: String,
    start_address: u64,
    arch_info: ArchInfo,
    layout: Layout,
}

impl Details {
    fn opaque(flavour: Flavour, target_name: &str) -> Details {
        Details {
            flavour,
            target_name: target_name.to_string(),
            start_address: 0,
            arch_info: ArchInfo {
                machine: 0,
                word_size: 0,
                printable_name: "unknown".to_string(),
            },
            layout: Layout::Opaque,
        }
    }
}

/// An opened file, backed by `goblin`.
///
/// Identifying the file decodes its headers and section table only. Symbol
/// tables are decoded from the raw bytes by the queries which read them.
#[derive(Debug)]
pub struct GoblinHandle {
    path: PathBuf,
    bytes: Vec<u8>,
    details: Option<Details>,
    error: Option<BackendError>,
}

impl GoblinHandle {
    /// Identify the file, returning its format along with what we need to
    /// answer later queries.
    fn detect(&self) -> Result<(Format, Details), BackendError> {
        let magic: &[u8; 16] = self
            .bytes
            .get(..16)
            .and_then(|magic| magic.try_into().ok())
            .ok_or_else(|| BackendError::WrongFormat("file too small".to_string()))?;

        match goblin::peek_bytes(magic)? {
            Hint::Elf(_) => {
                let layout = elf::Layout::parse(&self.bytes)?;
                let format = if layout.is_core() {
                    Format::Core
                } else {
                    Format::Object
                };
                let details = Details {
                    flavour: Flavour::Elf,
                    target_name: layout.target_name(),
                    start_address: layout.entry(),
                    arch_info: layout.arch_info(),
                    layout: Layout::Elf(layout),
                };
                Ok((format, details))
            }
            Hint::PE => {
                let layout = pe::Layout::parse(&self.bytes)?;
                let details = Details {
                    flavour: Flavour::Coff,
                    target_name: layout.target_name(),
                    start_address: layout.entry(),
                    arch_info: layout.arch_info(),
                    layout: Layout::Pe(layout),
                };
                Ok((Format::Object, details))
            }
            Hint::Mach(_) | Hint::MachFat(_) => {
                Ok((Format::Object, Details::opaque(Flavour::MachO, "mach-o")))
            }
            Hint::Archive => Ok((Format::Archive, Details::opaque(Flavour::Unknown, "archive"))),
            Hint::Unknown(magic) => Err(BackendError::WrongFormat(format!(
                "unknown magic {:#x}",
                magic
            ))),
            #[allow(unreachable_patterns)]
            _ => Err(BackendError::WrongFormat(
                "unsupported object kind".to_string(),
            )),
        }
    }

    fn details(&self) -> Option<&Details> {
        self.details.as_ref()
    }

    fn layout(&self) -> Result<&Layout, BackendError> {
        self.details()
            .map(|details| &details.layout)
            .ok_or_else(|| BackendError::InvalidOperation("format not checked".to_string()))
    }
}

impl ObjectHandle for GoblinHandle {
    fn check_format(&mut self, format: Format) -> bool {
        match self.detect() {
            Ok((detected, details)) => {
                if detected == format {
                    self.details = Some(details);
                    true
                } else {
                    self.error = Some(BackendError::WrongFormat(format!(
                        "file is {:?}, not {:?}",
                        detected, format
                    )));
                    false
                }
            }
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }

    fn last_error(&self) -> Option<&BackendError> {
        self.error.as_ref()
    }

    fn clear_error(&mut self) {
        self.error = None;
    }

    fn flavour(&self) -> Flavour {
        self.details()
            .map(|details| details.flavour)
            .unwrap_or(Flavour::Unknown)
    }

    fn target_name(&self) -> String {
        self.details()
            .map(|details| details.target_name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn start_address(&self) -> u64 {
        self.details()
            .map(|details| details.start_address)
            .unwrap_or(0)
    }

    fn arch_info(&self) -> ArchInfo {
        match self.details() {
            Some(details) => details.arch_info.clone(),
            None => ArchInfo {
                machine: 0,
                word_size: 0,
                printable_name: "unknown".to_string(),
            },
        }
    }

    fn symtab_upper_bound(&self, table: SymbolTable) -> Result<usize, BackendError> {
        match self.layout()? {
            Layout::Elf(layout) => elf::symtab_upper_bound(layout, self.bytes.len(), table),
            Layout::Pe(layout) => pe::symtab_upper_bound(layout, &self.bytes, table),
            Layout::Opaque => Err(BackendError::InvalidOperation(format!(
                "no symbol tables for {:?}",
                self.flavour()
            ))),
        }
    }

    fn canonicalize_symtab<'a>(
        &'a self,
        table: SymbolTable,
        symbols: &mut Vec<RawSymbol<'a>>,
    ) -> Result<(), BackendError> {
        match self.layout()? {
            Layout::Elf(layout) => elf::canonicalize_symtab(layout, &self.bytes, table, symbols),
            Layout::Pe(layout) => pe::canonicalize_symtab(layout, &self.bytes, table, symbols),
            Layout::Opaque => Err(BackendError::InvalidOperation(format!(
                "no {} symbol table",
                table
            ))),
        }
    }

    fn sections<'a>(&'a self, sections: &mut Vec<RawSection<'a>>) -> Result<(), BackendError> {
        match self.layout()? {
            Layout::Elf(layout) => elf::sections(layout, &self.bytes, sections),
            Layout::Pe(layout) => pe::sections(layout, &self.bytes, sections),
            Layout::Opaque => Err(BackendError::InvalidOperation(
                "no sections for this flavour".to_string(),
            )),
        }
    }
}

impl Drop for GoblinHandle {
    fn drop(&mut self) {
        debug!("closing {:?}", self.path);
    }
}
