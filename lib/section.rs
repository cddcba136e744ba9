//! Sections of a loaded binary.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// RWX permissions for a section.
    #[derive(Default, Deserialize, Serialize)]
    pub struct Permissions: u32 {
        const NONE    = 0b000;
        const READ    = 0b001;
        const WRITE   = 0b010;
        const EXECUTE = 0b100;
        const ALL     = 0b111;
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let flag = |bit: Permissions, c: char| if self.contains(bit) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Permissions::READ, 'r'),
            flag(Permissions::WRITE, 'w'),
            flag(Permissions::EXECUTE, 'x')
        )
    }
}

/// What a section holds.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum SectionKind {
    /// Allocated, executable contents.
    Code,
    /// Allocated, non-executable contents.
    Data,
    /// Everything else: metadata, debug information, zero-fill.
    Other,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SectionKind::Code => write!(f, "code"),
            SectionKind::Data => write!(f, "data"),
            SectionKind::Other => write!(f, "other"),
        }
    }
}

/// A named, addressed region of a binary.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Section {
    name: String,
    address: u64,
    size: u64,
    permissions: Permissions,
    kind: SectionKind,
}

impl Section {
    pub fn new<S: Into<String>>(
        name: S,
        address: u64,
        size: u64,
        permissions: Permissions,
        kind: SectionKind,
    ) -> Section {
        Section {
            name: name.into(),
            address,
            size,
            permissions,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The virtual address this section starts at.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The size of this section in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The first address past the end of this section.
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    /// Returns true if `address` falls inside this section.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {:X}+{:X} {} {}",
            self.name, self.address, self.size, self.permissions, self.kind
        )
    }
}
