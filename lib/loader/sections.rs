//! Extracting sections from an opened file.

use crate::backend::{BackendError, ObjectHandle, RawSection, SectionFlags};
use crate::section::{Permissions, Section, SectionKind};
use crate::Error;
use log::debug;

fn permissions(flags: SectionFlags) -> Permissions {
    let mut permissions = Permissions::NONE;
    if flags.contains(SectionFlags::READ) {
        permissions |= Permissions::READ;
    }
    if flags.contains(SectionFlags::WRITE) {
        permissions |= Permissions::WRITE;
    }
    if flags.contains(SectionFlags::EXECUTE) {
        permissions |= Permissions::EXECUTE;
    }
    permissions
}

fn kind(flags: SectionFlags) -> SectionKind {
    if flags.contains(SectionFlags::CODE) {
        SectionKind::Code
    } else if flags.contains(SectionFlags::DATA) {
        SectionKind::Data
    } else {
        SectionKind::Other
    }
}

fn section(raw: &RawSection) -> Result<Section, Error> {
    if raw.address.checked_add(raw.size).is_none() {
        return Err(Error::SectionRead(BackendError::Malformed(format!(
            "section {} at {:#x} with size {:#x} wraps the address space",
            raw.name, raw.address, raw.size
        ))));
    }

    Ok(Section::new(
        raw.name.as_ref(),
        raw.address,
        raw.size,
        permissions(raw.flags),
        kind(raw.flags),
    ))
}

/// Every section of an opened file, in table order.
///
/// Zero sized sections are kept.
pub fn extract_sections<H: ObjectHandle>(handle: &H) -> Result<Vec<Section>, Error> {
    let mut raw_sections = Vec::new();
    handle
        .sections(&mut raw_sections)
        .map_err(Error::SectionRead)?;

    let sections = raw_sections
        .iter()
        .map(section)
        .collect::<Result<Vec<Section>, Error>>()?;

    debug!("loaded {} sections", sections.len());

    Ok(sections)
}
