//! Loading executable binaries into Binloader.
//!
//! A load is a fixed pipeline of stages run against one opened file:
//!
//! 1. the [`FormatProbe`] opens the file and checks it is an object file,
//! 2. the [`architecture`](crate::architecture) resolvers map its flavour
//!    and machine onto a `BinaryType`, `Architecture` and `Bits`,
//! 3. the static and dynamic function symbols are extracted,
//! 4. the sections are extracted.
//!
//! Symbols are optional metadata: an unreadable symbol table is logged,
//! recorded as a [`Warning`] and the load carries on. Sections are
//! structural, and failing to read them fails the load. Any failure leaves
//! the caller's `Binary` as it was.

mod probe;
mod sections;
mod symbols;

pub use self::probe::FormatProbe;
pub use self::sections::extract_sections;
pub use self::symbols::{extract_dynamic_symbols, extract_symbols};

use crate::architecture::{self, BinaryType};
use crate::backend::{Backend, GoblinBackend, ObjectHandle, SymbolTable};
use crate::binary::{Binary, Warning, WarningKind};
use crate::Error;
use log::{debug, trace, warn};
use once_cell::sync::OnceCell;
use std::path::Path;

/// The stages of a load.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadState {
    Start,
    Opened,
    FormatResolved,
    ArchResolved,
    SymbolsLoaded,
    SectionsLoaded,
    Done,
    Failed,
}

/// Loads binaries through a `Backend`.
///
/// A `Loader` may be shared between threads. Each load opens its own
/// handle, and the only state shared between loads is the backend's
/// one-time initialisation.
#[derive(Debug)]
pub struct Loader<B: Backend> {
    probe: FormatProbe<B>,
}

impl Loader<GoblinBackend> {
    /// The process-wide loader, backed by `goblin`.
    pub fn global() -> &'static Loader<GoblinBackend> {
        static LOADER: OnceCell<Loader<GoblinBackend>> = OnceCell::new();
        LOADER.get_or_init(|| Loader::new(GoblinBackend::new()))
    }
}

impl<B: Backend> Loader<B> {
    pub fn new(backend: B) -> Loader<B> {
        Loader {
            probe: FormatProbe::new(backend),
        }
    }

    pub fn backend(&self) -> &B {
        self.probe.backend()
    }

    /// Load the binary at `path`.
    ///
    /// `expected` is advisory. The format is always detected, and a
    /// detected type which differs from a non-`Auto` expectation is recorded
    /// as a warning.
    pub fn load<P: AsRef<Path>>(&self, path: P, expected: BinaryType) -> Result<Binary, Error> {
        Load::new(self, path.as_ref(), expected).complete()
    }

    /// Load the binary at `path` into `binary`.
    ///
    /// `binary` is only written once the load has succeeded. On failure it
    /// keeps its previous value.
    pub fn load_into<P: AsRef<Path>>(
        &self,
        path: P,
        binary: &mut Binary,
        expected: BinaryType,
    ) -> Result<(), Error> {
        *binary = self.load(path, expected)?;
        Ok(())
    }
}

/// One run of the load pipeline.
struct Load<'l, B: Backend> {
    loader: &'l Loader<B>,
    path: &'l Path,
    expected: BinaryType,
    state: LoadState,
}

impl<'l, B: Backend> Load<'l, B> {
    fn new(loader: &'l Loader<B>, path: &'l Path, expected: BinaryType) -> Load<'l, B> {
        Load {
            loader,
            path,
            expected,
            state: LoadState::Start,
        }
    }

    fn transition(&mut self, state: LoadState) {
        trace!("{:?}: {:?} -> {:?}", self.path, self.state, state);
        self.state = state;
    }

    /// Run every stage, ending in `Done` or `Failed`.
    fn complete(&mut self) -> Result<Binary, Error> {
        match self.run() {
            Ok(binary) => Ok(binary),
            Err(e) => {
                debug!(
                    "loading {:?} failed after {:?}: {}",
                    self.path, self.state, e
                );
                self.transition(LoadState::Failed);
                Err(e)
            }
        }
    }

    /// Run every stage. The handle is owned by this call and is released
    /// when it returns, whichever way it returns.
    fn run(&mut self) -> Result<Binary, Error> {
        let handle = self.loader.probe.open(self.path)?;
        self.transition(LoadState::Opened);

        let mut warnings = Vec::new();

        let entry = handle.start_address();
        let (binary_type, type_name) = architecture::resolve_type(&handle)?;
        if self.expected != BinaryType::Auto && self.expected != binary_type {
            let message = format!(
                "expected {} binary, but {:?} is {}",
                self.expected, self.path, binary_type
            );
            warn!("{}", message);
            warnings.push(Warning::new(WarningKind::TypeMismatch, message));
        }
        self.transition(LoadState::FormatResolved);

        let (architecture, bits, architecture_name) =
            architecture::resolve_architecture(&handle)?;
        self.transition(LoadState::ArchResolved);

        // Symbols may not be present if the binary is stripped, and an
        // unreadable symbol table does not fail the load.
        let mut symbols = Vec::new();
        for table in [SymbolTable::Static, SymbolTable::Dynamic] {
            match symbols::extract(&handle, table) {
                Ok(table_symbols) => symbols.extend(table_symbols),
                Err(e) if e.is_recoverable() => {
                    warn!("{:?}: {}", self.path, e);
                    warnings.push(Warning::new(WarningKind::SymbolTableRead, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        self.transition(LoadState::SymbolsLoaded);

        let sections = extract_sections(&handle)?;
        self.transition(LoadState::SectionsLoaded);

        let binary = Binary::new(
            self.path.to_path_buf(),
            entry,
            binary_type,
            type_name,
            architecture,
            bits,
            architecture_name,
            symbols,
            sections,
            warnings,
        );
        self.transition(LoadState::Done);

        Ok(binary)
    }
}

/// Load the binary at `path` into `binary` with the process-wide loader.
///
/// On failure `binary` is left untouched.
pub fn load_binary<P: AsRef<Path>>(
    path: P,
    binary: &mut Binary,
    expected: BinaryType,
) -> Result<(), Error> {
    Loader::global().load_into(path, binary, expected)
}

/// Release resources held by a loaded binary.
///
/// A `Binary` holds nothing beyond its own fields today, so this does
/// nothing, and is safe to call any number of times.
pub fn unload_binary(binary: &mut Binary) {
    trace!("unloading {:?}", binary.filename());
}
