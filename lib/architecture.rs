//! Information and types for Binloader's supported architectures and
//! container formats.
//!
//! Raw flavour and machine codes reported by a [`backend`](crate::backend)
//! are mapped onto normalized values through the tables in this module. A
//! code without a table row is unsupported, so supporting a new
//! architecture means adding a row to `MACHINES`.

use crate::backend::{Flavour, ObjectHandle};
use crate::Error;
use goblin::elf::header::{EM_386, EM_X86_64};
use goblin::pe::header::{COFF_MACHINE_X86, COFF_MACHINE_X86_64};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The container format of a binary.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum BinaryType {
    /// Not yet determined. As an expected type, this asks the loader to
    /// detect the format.
    #[default]
    Auto,
    Elf,
    Pe,
}

impl fmt::Display for BinaryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BinaryType::Auto => write!(f, "auto"),
            BinaryType::Elf => write!(f, "ELF"),
            BinaryType::Pe => write!(f, "PE"),
        }
    }
}

/// Supported architecture families.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum Architecture {
    /// No architecture, the state of an unloaded `Binary`.
    #[default]
    None,
    X86,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Architecture::None => write!(f, "none"),
            Architecture::X86 => write!(f, "x86"),
        }
    }
}

/// The natural word size of an architecture.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Bits {
    Bits32,
    Bits64,
}

impl Bits {
    /// Get the word size in bits.
    pub fn bits(&self) -> u32 {
        match self {
            Bits::Bits32 => 32,
            Bits::Bits64 => 64,
        }
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Container flavours we know how to describe.
const FLAVOURS: &[(Flavour, BinaryType)] = &[
    (Flavour::Elf, BinaryType::Elf),
    (Flavour::Coff, BinaryType::Pe),
];

/// A row in the machine table.
struct MachineEntry {
    flavour: Flavour,
    machine: u32,
    word_size: u32,
    architecture: Architecture,
    bits: Bits,
}

/// Supported machines, keyed on flavour, raw machine code and the word
/// size of the container class. The word size is part of the key so that
/// x32 (ELF32 + `EM_X86_64`) is not mistaken for x86-64.
const MACHINES: &[MachineEntry] = &[
    MachineEntry {
        flavour: Flavour::Elf,
        machine: EM_386 as u32,
        word_size: 32,
        architecture: Architecture::X86,
        bits: Bits::Bits32,
    },
    MachineEntry {
        flavour: Flavour::Elf,
        machine: EM_X86_64 as u32,
        word_size: 64,
        architecture: Architecture::X86,
        bits: Bits::Bits64,
    },
    MachineEntry {
        flavour: Flavour::Coff,
        machine: COFF_MACHINE_X86 as u32,
        word_size: 32,
        architecture: Architecture::X86,
        bits: Bits::Bits32,
    },
    MachineEntry {
        flavour: Flavour::Coff,
        machine: COFF_MACHINE_X86_64 as u32,
        word_size: 64,
        architecture: Architecture::X86,
        bits: Bits::Bits64,
    },
];

/// Map the flavour of an opened handle to a `BinaryType`.
///
/// Returns the binary type along with the backend's name for the target
/// format.
pub fn resolve_type<H: ObjectHandle>(handle: &H) -> Result<(BinaryType, String), Error> {
    let flavour = handle.flavour();
    let type_name = handle.target_name();

    FLAVOURS
        .iter()
        .find(|(f, _)| *f == flavour)
        .map(|(_, binary_type)| (*binary_type, type_name.clone()))
        .ok_or_else(|| Error::UnsupportedContainer(format!("{} ({:?})", type_name, flavour)))
}

/// Map the machine of an opened handle to an architecture and word size.
///
/// Returns the architecture, its word size, and the backend's printable
/// name for the machine.
pub fn resolve_architecture<H: ObjectHandle>(
    handle: &H,
) -> Result<(Architecture, Bits, String), Error> {
    let flavour = handle.flavour();
    let info = handle.arch_info();

    MACHINES
        .iter()
        .find(|entry| {
            entry.flavour == flavour
                && entry.machine == info.machine
                && entry.word_size == info.word_size
        })
        .map(|entry| (entry.architecture, entry.bits, info.printable_name.clone()))
        .ok_or_else(|| {
            Error::UnsupportedArchitecture(format!(
                "{} (machine {:#x}, {}-bit {:?})",
                info.printable_name, info.machine, info.word_size, flavour
            ))
        })
}
