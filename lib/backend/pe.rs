//! PE queries for the goblin backend.
//!
//! The static symbol table is the COFF symbol table, which linkers such as
//! MinGW leave in images. Most images have none. The export table serves
//! as the dynamic symbol table.

use crate::backend::{
    ArchInfo, BackendError, RawSection, RawSymbol, SectionFlags, SymbolFlags, SymbolTable,
};
use goblin::pe::export::{Export, ExportData};
use goblin::pe::header::{
    CoffHeader, Header, COFF_MACHINE_R4000, COFF_MACHINE_X86, COFF_MACHINE_X86_64,
    SIZEOF_COFF_HEADER, SIZEOF_PE_MAGIC,
};
use goblin::pe::optional_header::{OptionalHeader, MAGIC_64};
use goblin::pe::section_table::{
    SectionTable, IMAGE_SCN_CNT_CODE, IMAGE_SCN_CNT_INITIALIZED_DATA, IMAGE_SCN_MEM_EXECUTE,
    IMAGE_SCN_MEM_READ, IMAGE_SCN_MEM_WRITE,
};
use goblin::pe::symbol::{
    Symbol, IMAGE_SYM_CLASS_EXTERNAL, IMAGE_SYM_CLASS_FILE, IMAGE_SYM_CLASS_STATIC,
};
use std::borrow::Cow;

/// The size of one COFF symbol table record.
const COFF_SYMBOL_SIZE: usize = 18;

/// IMAGE_SYM_DTYPE_FUNCTION, the derived type of a function symbol.
const DTYPE_FUNCTION: u16 = 2;

/// The headers and section table of a PE image.
#[derive(Debug)]
pub struct Layout {
    coff_header: CoffHeader,
    optional_header: OptionalHeader,
    sections: Vec<SectionTable>,
}

impl Layout {
    /// Decode the headers and section table of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Layout, BackendError> {
        let header = Header::parse(bytes)?;
        let optional_header = header.optional_header.ok_or_else(|| {
            BackendError::Malformed("PE file without an optional header".to_string())
        })?;

        let mut offset = header.dos_header.pe_pointer as usize
            + SIZEOF_PE_MAGIC
            + SIZEOF_COFF_HEADER
            + header.coff_header.size_of_optional_header as usize;
        let sections = header.coff_header.sections(bytes, &mut offset)?;

        Ok(Layout {
            coff_header: header.coff_header,
            optional_header,
            sections,
        })
    }

    fn is_64(&self) -> bool {
        self.optional_header.standard_fields.magic == MAGIC_64
    }

    fn word_size(&self) -> u32 {
        if self.is_64() {
            64
        } else {
            32
        }
    }

    pub fn image_base(&self) -> u64 {
        self.optional_header.windows_fields.image_base as u64
    }

    pub fn entry(&self) -> u64 {
        self.image_base() + self.optional_header.standard_fields.address_of_entry_point as u64
    }

    /// The target name, `pei-x86-64` and friends.
    pub fn target_name(&self) -> String {
        match self.coff_header.machine {
            COFF_MACHINE_X86 => "pei-i386".to_string(),
            COFF_MACHINE_X86_64 => "pei-x86-64".to_string(),
            machine => format!("pei-{:#06x}", machine),
        }
    }

    pub fn arch_info(&self) -> ArchInfo {
        let machine = self.coff_header.machine;
        ArchInfo {
            machine: machine as u32,
            word_size: self.word_size(),
            printable_name: printable_name(machine),
        }
    }

    fn file_alignment(&self) -> u32 {
        self.optional_header.windows_fields.file_alignment
    }

    /// Decode the export table. Images without one export nothing.
    fn exports<'a>(&self, bytes: &'a [u8]) -> Result<Vec<Export<'a>>, BackendError> {
        let dd = match *self.optional_header.data_directories.get_export_table() {
            Some(dd) => dd,
            None => return Ok(Vec::new()),
        };
        let export_data = ExportData::parse(bytes, dd, &self.sections, self.file_alignment())?;
        Ok(Export::parse(
            bytes,
            &export_data,
            &self.sections,
            self.file_alignment(),
        )?)
    }
}

/// A printable name for a COFF machine.
pub fn printable_name(machine: u16) -> String {
    match machine {
        COFF_MACHINE_X86 => "i386".to_string(),
        COFF_MACHINE_X86_64 => "i386:x86-64".to_string(),
        COFF_MACHINE_R4000 => "mips:4000".to_string(),
        _ => format!("unknown:{:#06x}", machine),
    }
}

fn coff_symbol_count(layout: &Layout, file_size: usize) -> Result<usize, BackendError> {
    let coff_header = &layout.coff_header;
    if coff_header.pointer_to_symbol_table == 0 {
        return Ok(0);
    }

    let count = coff_header.number_of_symbol_table as usize;
    let end = count
        .checked_mul(COFF_SYMBOL_SIZE)
        .and_then(|size| size.checked_add(coff_header.pointer_to_symbol_table as usize));
    match end {
        Some(end) if end <= file_size => Ok(count),
        _ => Err(BackendError::Malformed(format!(
            "COFF symbol table at {:#x} with {} entries is past the end of the file",
            coff_header.pointer_to_symbol_table, count
        ))),
    }
}

pub fn symtab_upper_bound(
    layout: &Layout,
    bytes: &[u8],
    table: SymbolTable,
) -> Result<usize, BackendError> {
    match table {
        SymbolTable::Static => coff_symbol_count(layout, bytes.len()),
        SymbolTable::Dynamic => Ok(layout.exports(bytes)?.len()),
    }
}

fn is_code(section: &SectionTable) -> bool {
    section.characteristics & (IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE) != 0
}

/// The extent of a section in memory, relative to the image base.
fn rva_range(section: &SectionTable) -> (u64, u64) {
    let start = section.virtual_address as u64;
    let size = std::cmp::max(section.virtual_size, section.size_of_raw_data) as u64;
    (start, start + size)
}

fn export_flags(layout: &Layout, rva: u64, reexport: bool) -> SymbolFlags {
    let mut flags = SymbolFlags::GLOBAL | SymbolFlags::DYNAMIC;

    if reexport {
        return flags | SymbolFlags::INDIRECT;
    }

    let in_code = layout.sections.iter().any(|section| {
        let (start, end) = rva_range(section);
        is_code(section) && rva >= start && rva < end
    });

    if in_code {
        flags |= SymbolFlags::FUNCTION;
    } else {
        flags |= SymbolFlags::OBJECT;
    }

    flags
}

fn coff_symbol_flags(symbol: &Symbol) -> SymbolFlags {
    let mut flags = SymbolFlags::empty();

    match symbol.storage_class {
        IMAGE_SYM_CLASS_EXTERNAL => flags |= SymbolFlags::GLOBAL,
        IMAGE_SYM_CLASS_STATIC => flags |= SymbolFlags::LOCAL,
        IMAGE_SYM_CLASS_FILE => flags |= SymbolFlags::FILE | SymbolFlags::DEBUGGING,
        _ => {}
    }

    let function_type = (symbol.typ >> 4) & 0x3 == DTYPE_FUNCTION;
    if symbol.is_function_definition()
        || (function_type && symbol.storage_class == IMAGE_SYM_CLASS_STATIC)
    {
        flags |= SymbolFlags::FUNCTION;
    }

    if symbol.section_number == 0 {
        flags |= SymbolFlags::UNDEFINED;
    }

    flags
}

/// The address of a COFF symbol. Values of symbols in a section are
/// offsets from the start of that section.
fn coff_symbol_address(layout: &Layout, symbol: &Symbol) -> u64 {
    let section = if symbol.section_number > 0 {
        layout.sections.get(symbol.section_number as usize - 1)
    } else {
        None
    };
    match section {
        Some(section) => {
            layout.image_base() + section.virtual_address as u64 + symbol.value as u64
        }
        None => symbol.value as u64,
    }
}

pub fn canonicalize_symtab<'a>(
    layout: &Layout,
    bytes: &'a [u8],
    table: SymbolTable,
    symbols: &mut Vec<RawSymbol<'a>>,
) -> Result<(), BackendError> {
    match table {
        SymbolTable::Static => {
            if coff_symbol_count(layout, bytes.len())? == 0 {
                return Ok(());
            }

            let coff_symbols = layout.coff_header.symbols(bytes)?;
            let strings = layout.coff_header.strings(bytes)?;

            for (_, _, symbol) in coff_symbols.iter() {
                let name = symbol
                    .name(&strings)
                    .map_err(|e| BackendError::Malformed(format!("COFF symbol name: {}", e)))?
                    .to_string();
                symbols.push(RawSymbol {
                    name: Cow::Owned(name),
                    value: coff_symbol_address(layout, &symbol),
                    flags: coff_symbol_flags(&symbol),
                });
            }
        }
        SymbolTable::Dynamic => {
            for export in layout.exports(bytes)? {
                let rva = export.rva as u64;
                symbols.push(RawSymbol {
                    name: Cow::Borrowed(export.name.unwrap_or("")),
                    value: layout.image_base() + rva,
                    flags: export_flags(layout, rva, export.reexport.is_some()),
                });
            }
        }
    }

    Ok(())
}

fn section_flags(section: &SectionTable) -> SectionFlags {
    let characteristics = section.characteristics;
    let mut flags = SectionFlags::ALLOC;

    if section.size_of_raw_data > 0 {
        flags |= SectionFlags::CONTENTS;
    }
    if characteristics & IMAGE_SCN_MEM_READ != 0 {
        flags |= SectionFlags::READ;
    }
    if characteristics & IMAGE_SCN_MEM_WRITE != 0 {
        flags |= SectionFlags::WRITE;
    }
    if characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
        flags |= SectionFlags::EXECUTE;
    }
    if is_code(section) {
        flags |= SectionFlags::CODE;
    } else if characteristics & IMAGE_SCN_CNT_INITIALIZED_DATA != 0 {
        flags |= SectionFlags::DATA;
    }

    flags
}

pub fn sections<'a>(
    layout: &Layout,
    bytes: &'a [u8],
    sections: &mut Vec<RawSection<'a>>,
) -> Result<(), BackendError> {
    for section in &layout.sections {
        let name = section
            .name()
            .map_err(|e| BackendError::Malformed(format!("section name: {}", e)))?
            .to_string();

        let raw_end = section.pointer_to_raw_data as u64 + section.size_of_raw_data as u64;
        if section.size_of_raw_data > 0 && raw_end > bytes.len() as u64 {
            return Err(BackendError::Malformed(format!(
                "section {} contents {:#x}+{:#x} truncated",
                name, section.pointer_to_raw_data, section.size_of_raw_data
            )));
        }

        let size = if section.virtual_size > 0 {
            section.virtual_size
        } else {
            section.size_of_raw_data
        };

        sections.push(RawSection {
            name: Cow::Owned(name),
            address: layout.image_base() + section.virtual_address as u64,
            size: size as u64,
            flags: section_flags(section),
        });
    }

    Ok(())
}
