//! Opening files and identifying their format.

use crate::backend::{Backend, Flavour, Format, ObjectHandle};
use crate::Error;
use log::{debug, trace};
use once_cell::sync::OnceCell;
use std::path::Path;

/// Opens files through a `Backend`, initialising the backend on first use.
#[derive(Debug)]
pub struct FormatProbe<B: Backend> {
    backend: B,
    initialized: OnceCell<()>,
}

impl<B: Backend> FormatProbe<B> {
    pub fn new(backend: B) -> FormatProbe<B> {
        FormatProbe {
            backend,
            initialized: OnceCell::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run backend initialisation once. Concurrent callers block until the
    /// first caller has finished initialising.
    fn initialize(&self) {
        self.initialized.get_or_init(|| {
            debug!("initialising backend");
            self.backend.init();
        });
    }

    /// Open `path` and verify it is an object file with a known flavour.
    ///
    /// The returned handle has a clear error state.
    pub fn open(&self, path: &Path) -> Result<B::Handle, Error> {
        self.initialize();

        let mut handle = self.backend.open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;

        if !handle.check_format(Format::Object) {
            let reason = handle
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "not an object file".to_string());
            return Err(Error::Format {
                path: path.to_path_buf(),
                reason,
            });
        }

        // The format check may leave an error behind from an earlier internal
        // probe even though it succeeded.
        handle.clear_error();

        if handle.flavour() == Flavour::Unknown {
            return Err(Error::UnrecognizedFormat(path.to_path_buf()));
        }

        trace!("{:?} is a {:?} object", path, handle.flavour());

        Ok(handle)
    }
}
