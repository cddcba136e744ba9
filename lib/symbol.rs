//! Function symbols discovered in a binary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a `Symbol`.
///
/// Only function symbols are loaded today. More kinds may be added, so
/// matches over this enum need a wildcard arm.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[non_exhaustive]
pub enum SymbolKind {
    Function,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "function"),
        }
    }
}

/// A named location in a binary.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Symbol {
    address: u64,
    name: String,
    kind: SymbolKind,
}

impl Symbol {
    pub fn new<S: Into<String>>(name: S, address: u64, kind: SymbolKind) -> Symbol {
        Symbol {
            name: name.into(),
            address,
            kind,
        }
    }

    /// Create a new function `Symbol`.
    pub fn function<S: Into<String>>(name: S, address: u64) -> Symbol {
        Symbol::new(name, address, SymbolKind::Function)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} -> {:X}", self.kind, self.name, self.address)
    }
}
