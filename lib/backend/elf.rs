//! ELF queries for the goblin backend.
//!
//! Only the file header and the section header table are decoded when a
//! file is identified. Symbol and string tables are decoded by the query
//! which needs them, so a damaged symbol table fails that query alone.

use crate::backend::{
    ArchInfo, BackendError, RawSection, RawSymbol, SectionFlags, SymbolFlags, SymbolTable,
};
use goblin::container::Ctx;
use goblin::elf::header::{
    machine_to_str, Header, EI_CLASS, EI_DATA, ELFCLASS64, ELFDATA2LSB, EM_386, EM_X86_64,
    ET_CORE,
};
use goblin::elf::section_header::{
    SectionHeader, SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE, SHT_DYNSYM, SHT_NOBITS, SHT_NULL,
    SHT_SYMTAB,
};
use goblin::elf::sym::{
    Sym, Symtab, STB_GLOBAL, STB_LOCAL, STB_WEAK, STT_FILE, STT_FUNC, STT_OBJECT, STT_SECTION,
};
use goblin::strtab::Strtab;
use std::borrow::Cow;

/// STT_GNU_IFUNC, an indirect function resolved at load time.
const STT_GNU_IFUNC: u8 = 10;

/// SHN_XINDEX, the real section name table index is in section 0.
const SHN_XINDEX: u16 = 0xffff;

/// The header and section headers of an ELF file.
#[derive(Debug)]
pub struct Layout {
    header: Header,
    ctx: Ctx,
    section_headers: Vec<SectionHeader>,
}

impl Layout {
    /// Decode the file header and section header table of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Layout, BackendError> {
        let header = goblin::elf::Elf::parse_header(bytes)?;
        let ctx = Ctx::new(header.container()?, header.endianness()?);

        let shoff = header.e_shoff as usize;
        let section_headers = if shoff == 0 {
            Vec::new()
        } else {
            let mut count = header.e_shnum as usize;
            // Extended numbering keeps the real count in section 0.
            if count == 0 {
                check_range(bytes.len(), shoff, header.e_shentsize as usize, "section 0")?;
                count = SectionHeader::parse(bytes, shoff, 1, ctx)?
                    .first()
                    .map(|sh| sh.sh_size as usize)
                    .unwrap_or(0);
            }
            let size = count
                .checked_mul(header.e_shentsize as usize)
                .ok_or_else(|| BackendError::Malformed("section header count".to_string()))?;
            check_range(bytes.len(), shoff, size, "section header table")?;
            SectionHeader::parse(bytes, shoff, count, ctx)?
        };

        let layout = Layout {
            header,
            ctx,
            section_headers,
        };

        // The section names must be addressable for the file to be usable.
        layout.shdr_strtab(bytes)?;

        Ok(layout)
    }

    pub fn is_core(&self) -> bool {
        self.header.e_type == ET_CORE
    }

    pub fn entry(&self) -> u64 {
        self.header.e_entry
    }

    fn word_size(&self) -> u32 {
        if self.header.e_ident[EI_CLASS] == ELFCLASS64 {
            64
        } else {
            32
        }
    }

    /// The target name, `elf64-x86-64` and friends.
    pub fn target_name(&self) -> String {
        let word_size = self.word_size();
        match self.header.e_machine {
            EM_386 => format!("elf{}-i386", word_size),
            EM_X86_64 => format!("elf{}-x86-64", word_size),
            _ => {
                let endian = if self.header.e_ident[EI_DATA] == ELFDATA2LSB {
                    "little"
                } else {
                    "big"
                };
                format!("elf{}-{}", word_size, endian)
            }
        }
    }

    pub fn arch_info(&self) -> ArchInfo {
        ArchInfo {
            machine: self.header.e_machine as u32,
            word_size: self.word_size(),
            printable_name: printable_name(self.header.e_machine),
        }
    }

    fn shdr_strtab<'a>(&self, bytes: &'a [u8]) -> Result<Strtab<'a>, BackendError> {
        let index = if self.header.e_shstrndx == SHN_XINDEX {
            self.section_headers
                .first()
                .map(|sh| sh.sh_link as usize)
                .unwrap_or(0)
        } else {
            self.header.e_shstrndx as usize
        };
        match self.section_headers.get(index) {
            Some(sh) if index != 0 => strtab(bytes, sh),
            _ => Ok(Strtab::default()),
        }
    }

    /// The section header of the given symbol table, located by type.
    fn symbol_table(&self, table: SymbolTable) -> Option<&SectionHeader> {
        let sh_type = match table {
            SymbolTable::Static => SHT_SYMTAB,
            SymbolTable::Dynamic => SHT_DYNSYM,
        };
        self.section_headers.iter().find(|sh| sh.sh_type == sh_type)
    }
}

fn check_range(
    file_size: usize,
    offset: usize,
    size: usize,
    what: &str,
) -> Result<(), BackendError> {
    match offset.checked_add(size) {
        Some(end) if end <= file_size => Ok(()),
        _ => Err(BackendError::Malformed(format!(
            "{} at {:#x}+{:#x} is past the end of the file",
            what, offset, size
        ))),
    }
}

fn strtab<'a>(bytes: &'a [u8], sh: &SectionHeader) -> Result<Strtab<'a>, BackendError> {
    Ok(Strtab::parse(bytes, sh.sh_offset as usize, sh.sh_size as usize, 0x0)?)
}

/// A printable name for an ELF machine.
pub fn printable_name(machine: u16) -> String {
    match machine {
        EM_386 => "i386".to_string(),
        EM_X86_64 => "i386:x86-64".to_string(),
        _ => machine_to_str(machine).to_lowercase(),
    }
}

pub fn symtab_upper_bound(
    layout: &Layout,
    file_size: usize,
    table: SymbolTable,
) -> Result<usize, BackendError> {
    let sh = match layout.symbol_table(table) {
        Some(sh) => sh,
        None => return Ok(0),
    };

    if sh.sh_entsize == 0 {
        return Err(BackendError::Malformed(format!(
            "{} symbol table has no entry size",
            table
        )));
    }
    check_range(
        file_size,
        sh.sh_offset as usize,
        sh.sh_size as usize,
        &format!("{} symbol table", table),
    )?;

    Ok((sh.sh_size / sh.sh_entsize) as usize)
}

fn symbol_flags(sym: &Sym, table: SymbolTable) -> SymbolFlags {
    let mut flags = SymbolFlags::empty();

    match sym.st_bind() {
        STB_LOCAL => flags |= SymbolFlags::LOCAL,
        STB_GLOBAL => flags |= SymbolFlags::GLOBAL,
        STB_WEAK => flags |= SymbolFlags::WEAK,
        _ => {}
    }

    match sym.st_type() {
        STT_FUNC => flags |= SymbolFlags::FUNCTION,
        STT_GNU_IFUNC => flags |= SymbolFlags::FUNCTION | SymbolFlags::INDIRECT,
        STT_OBJECT => flags |= SymbolFlags::OBJECT,
        STT_SECTION => flags |= SymbolFlags::SECTION | SymbolFlags::DEBUGGING,
        STT_FILE => flags |= SymbolFlags::FILE | SymbolFlags::DEBUGGING,
        _ => {}
    }

    if sym.st_shndx == 0 {
        flags |= SymbolFlags::UNDEFINED;
    }

    if table == SymbolTable::Dynamic {
        flags |= SymbolFlags::DYNAMIC;
    }

    flags
}

pub fn canonicalize_symtab<'a>(
    layout: &Layout,
    bytes: &'a [u8],
    table: SymbolTable,
    symbols: &mut Vec<RawSymbol<'a>>,
) -> Result<(), BackendError> {
    let sh = match layout.symbol_table(table) {
        Some(sh) => sh,
        None => return Ok(()),
    };

    let count = symtab_upper_bound(layout, bytes.len(), table)?;
    let syms = Symtab::parse(bytes, sh.sh_offset as usize, count, layout.ctx)?;

    let names = match layout.section_headers.get(sh.sh_link as usize) {
        Some(link) if sh.sh_link != 0 => strtab(bytes, link)?,
        _ => {
            return Err(BackendError::Malformed(format!(
                "{} symbol table has no string table",
                table
            )))
        }
    };

    for sym in syms.iter() {
        let name = names.get_at(sym.st_name).ok_or_else(|| {
            BackendError::Malformed(format!(
                "{} symbol name offset {:#x} outside string table",
                table, sym.st_name
            ))
        })?;

        symbols.push(RawSymbol {
            name: Cow::Borrowed(name),
            value: sym.st_value,
            flags: symbol_flags(&sym, table),
        });
    }

    Ok(())
}

fn section_flags(sh: &SectionHeader) -> SectionFlags {
    let mut flags = SectionFlags::empty();

    let alloc = sh.sh_flags & SHF_ALLOC as u64 != 0;
    let write = sh.sh_flags & SHF_WRITE as u64 != 0;
    let execute = sh.sh_flags & SHF_EXECINSTR as u64 != 0;
    let contents = sh.sh_type != SHT_NOBITS && sh.sh_type != SHT_NULL;

    if alloc {
        flags |= SectionFlags::ALLOC | SectionFlags::READ;
    }
    if contents {
        flags |= SectionFlags::CONTENTS;
    }
    if write {
        flags |= SectionFlags::WRITE;
    }
    if execute {
        flags |= SectionFlags::EXECUTE;
    }
    if alloc && execute {
        flags |= SectionFlags::CODE;
    } else if alloc && contents {
        flags |= SectionFlags::DATA;
    }

    flags
}

/// Every section header but the reserved null header at index 0.
///
/// Loadable sections must have their contents inside the file. Other
/// sections are described as their headers say, and any damage to them
/// is left to the query which reads them.
pub fn sections<'a>(
    layout: &Layout,
    bytes: &'a [u8],
    sections: &mut Vec<RawSection<'a>>,
) -> Result<(), BackendError> {
    let shdr_strtab = layout.shdr_strtab(bytes)?;

    for (index, sh) in layout.section_headers.iter().enumerate() {
        if index == 0 && sh.sh_type == SHT_NULL {
            continue;
        }

        let name = shdr_strtab.get_at(sh.sh_name).ok_or_else(|| {
            BackendError::Malformed(format!(
                "section {} name offset {:#x} outside string table",
                index, sh.sh_name
            ))
        })?;

        let flags = section_flags(sh);

        if flags.contains(SectionFlags::ALLOC | SectionFlags::CONTENTS) {
            check_range(
                bytes.len(),
                sh.sh_offset as usize,
                sh.sh_size as usize,
                &format!("section {}", name),
            )?;
        }

        sections.push(RawSection {
            name: Cow::Borrowed(name),
            address: sh.sh_addr,
            size: sh.sh_size,
            flags,
        });
    }

    Ok(())
}
