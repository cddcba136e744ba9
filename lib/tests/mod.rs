
use self::fixtures::*;
use self::mock::{MockBackend, MockObject};
use crate::backend::{
    Flavour, GoblinBackend, ObjectHandle, RawSymbol, SymbolFlags, SymbolTable,
};
use crate::loader::FormatProbe;
use crate::*;
use goblin::elf::header::{EM_AARCH64, EM_X86_64, ET_CORE};
use std::path::Path;

fn load(bytes: &[u8]) -> Result<Binary, Error> {
    let file = write_fixture(bytes);
    Loader::global().load(file.path(), BinaryType::Auto)
}

#[test]
fn elf64_executable() {
    let file = write_fixture(&ElfFixture::x86_64().bytes());
    let binary = Loader::global().load(file.path(), BinaryType::Auto).unwrap();

    assert_eq!(binary.filename(), file.path());
    assert_eq!(binary.binary_type(), BinaryType::Elf);
    assert_eq!(binary.type_name(), "elf64-x86-64");
    assert_eq!(binary.architecture(), Architecture::X86);
    assert_eq!(binary.architecture_name(), "i386:x86-64");
    assert_eq!(binary.bits(), 64);
    assert_eq!(binary.entry(), 0x401020);
    assert_eq!(binary.symbols(), &[Symbol::function("main", 0x401000)]);
    assert_eq!(binary.symbols()[0].kind(), SymbolKind::Function);
    assert!(binary.warnings().is_empty());
}

#[test]
fn elf64_sections() {
    let binary = load(&ElfFixture::x86_64().bytes()).unwrap();

    let names: Vec<&str> = binary.sections().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec![".text", ".bss", ".symtab", ".strtab", ".shstrtab"]);

    let text = binary.text_section().unwrap();
    assert_eq!(text.address(), 0x401000);
    assert_eq!(text.size(), TEXT_SIZE);
    assert_eq!(text.permissions(), Permissions::READ | Permissions::EXECUTE);
    assert_eq!(text.kind(), SectionKind::Code);
    assert!(text.contains(binary.entry()));

    let bss = binary.section(".bss").unwrap();
    assert_eq!(bss.address(), BSS_ADDRESS);
    assert_eq!(bss.size(), BSS_SIZE);
    assert_eq!(bss.permissions(), Permissions::READ | Permissions::WRITE);
    assert_eq!(bss.kind(), SectionKind::Other);

    let symtab = binary.section(".symtab").unwrap();
    assert_eq!(symtab.permissions(), Permissions::NONE);
    assert_eq!(symtab.kind(), SectionKind::Other);
}

#[test]
fn elf32_executable() {
    let binary = load(&ElfFixture::i386().bytes()).unwrap();

    assert_eq!(binary.binary_type(), BinaryType::Elf);
    assert_eq!(binary.type_name(), "elf32-i386");
    assert_eq!(binary.architecture(), Architecture::X86);
    assert_eq!(binary.architecture_name(), "i386");
    assert_eq!(binary.bits(), 32);
    assert_eq!(binary.entry(), 0x8049010);
    assert_eq!(binary.symbols(), &[Symbol::function("main", 0x8049000)]);
}

#[test]
fn stripped_elf_has_no_symbols() {
    let binary = load(&ElfFixture::x86_64().stripped().bytes()).unwrap();

    assert!(binary.symbols().is_empty());
    assert!(binary.warnings().is_empty());
    assert!(binary.section(".symtab").is_none());
    assert!(binary.text_section().is_some());
}

#[test]
fn symbols_keep_table_order() {
    let mut fixture = ElfFixture::x86_64();
    fixture.symbols = Some(vec![
        FixtureSymbol::function("zeta", 0x401010),
        FixtureSymbol::object("counter", BSS_ADDRESS),
        FixtureSymbol::function("alpha", 0x401000),
        FixtureSymbol::function("alpha", 0x401000),
    ]);
    let binary = load(&fixture.bytes()).unwrap();

    assert_eq!(
        binary.symbols(),
        &[
            Symbol::function("zeta", 0x401010),
            Symbol::function("alpha", 0x401000),
            Symbol::function("alpha", 0x401000),
        ]
    );
}

#[test]
fn pe64_image() {
    let binary = load(&PeFixture::amd64().bytes()).unwrap();

    assert_eq!(binary.binary_type(), BinaryType::Pe);
    assert_eq!(binary.type_name(), "pei-x86-64");
    assert_eq!(binary.architecture(), Architecture::X86);
    assert_eq!(binary.bits(), 64);
    assert_eq!(binary.entry(), 0x1_4000_1000);
    assert!(binary.symbols().is_empty());

    let text = binary.text_section().unwrap();
    assert_eq!(text.address(), 0x1_4000_1000);
    assert_eq!(text.size(), PE_TEXT_SIZE as u64);
    assert_eq!(text.permissions(), Permissions::READ | Permissions::EXECUTE);
    assert_eq!(text.kind(), SectionKind::Code);
}

#[test]
fn pe32_image() {
    let binary = load(&PeFixture::i386().bytes()).unwrap();

    assert_eq!(binary.binary_type(), BinaryType::Pe);
    assert_eq!(binary.type_name(), "pei-i386");
    assert_eq!(binary.architecture_name(), "i386");
    assert_eq!(binary.bits(), 32);
    assert_eq!(binary.entry(), 0x40_1000);
    assert_eq!(binary.sections().len(), 2);

    let rdata = binary.section(".rdata").unwrap();
    assert_eq!(rdata.address(), 0x40_2000);
    assert_eq!(rdata.permissions(), Permissions::READ);
    assert_eq!(rdata.kind(), SectionKind::Data);
}

#[test]
fn text_file_is_not_an_object() {
    let e = load(b"#!/bin/sh\necho this is not an executable\n").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Format);
}

#[test]
fn tiny_file_is_not_an_object() {
    let e = load(b"MZ").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Format);
}

#[test]
fn core_dump_is_not_an_object() {
    let mut fixture = ElfFixture::x86_64().stripped();
    fixture.e_type = ET_CORE;
    let e = load(&fixture.bytes()).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Format);
}

#[test]
fn truncated_elf_is_not_an_object() {
    let mut bytes = ElfFixture::x86_64().bytes();
    bytes.truncate(bytes.len() / 2);
    let e = load(&bytes).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Format);
}

#[test]
fn missing_file() {
    let e = Loader::global()
        .load("/nonexistent/binloader/a.out", BinaryType::Auto)
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Open);
}

#[test]
fn directory_cannot_be_opened() {
    let dir = tempfile::tempdir().unwrap();
    let e = Loader::global().load(dir.path(), BinaryType::Auto).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Open);
}

#[test]
fn aarch64_is_unsupported() {
    let mut fixture = ElfFixture::x86_64();
    fixture.machine = EM_AARCH64;
    let e = load(&fixture.bytes()).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UnsupportedArchitecture);
}

#[test]
fn x32_is_unsupported() {
    let mut fixture = ElfFixture::i386();
    fixture.machine = EM_X86_64;
    let e = load(&fixture.bytes()).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UnsupportedArchitecture);
}

#[test]
fn unreadable_symbol_table_is_a_warning() {
    let mut fixture = ElfFixture::x86_64();
    fixture.bad_symbol_name = true;
    let binary = load(&fixture.bytes()).unwrap();

    assert!(binary.symbols().is_empty());
    assert_eq!(binary.warnings().len(), 1);
    assert_eq!(binary.warnings()[0].kind(), WarningKind::SymbolTableRead);
    assert_eq!(binary.bits(), 64);
    assert!(binary.text_section().is_some());
}

#[test]
fn oversized_symbol_table_is_a_warning() {
    let mut fixture = ElfFixture::x86_64();
    fixture.symtab_size = Some(0x100000);
    let binary = load(&fixture.bytes()).unwrap();

    assert!(binary.symbols().is_empty());
    assert_eq!(binary.warnings().len(), 1);
    assert_eq!(binary.warnings()[0].kind(), WarningKind::SymbolTableRead);
    assert_eq!(binary.section(".symtab").unwrap().size(), 0x100000);
    assert_eq!(binary.entry(), 0x401020);
}

#[test]
fn oversized_symbol_table_keeps_dynamic_symbols() {
    let mut fixture = ElfFixture::x86_64();
    fixture.symtab_size = Some(0x100000);
    fixture.dynamic_symbols = Some(vec![FixtureSymbol::undefined("puts")]);
    let binary = load(&fixture.bytes()).unwrap();

    assert_eq!(binary.symbols(), &[Symbol::function("puts", 0)]);
    assert_eq!(binary.warnings().len(), 1);
}

#[test]
fn elf_dynamic_symbols() {
    let mut fixture = ElfFixture::x86_64();
    fixture.dynamic_symbols = Some(vec![
        FixtureSymbol::undefined("puts"),
        FixtureSymbol::ifunc("memcpy", 0x401010),
        FixtureSymbol::object("environ", BSS_ADDRESS + 8),
    ]);
    let binary = load(&fixture.bytes()).unwrap();

    assert_eq!(
        binary.symbols(),
        &[
            Symbol::function("main", 0x401000),
            Symbol::function("puts", 0),
            Symbol::function("memcpy", 0x401010),
        ]
    );
    assert!(binary.warnings().is_empty());
    assert!(binary.section(".dynsym").is_some());
    assert!(binary.section(".dynstr").is_some());
}

#[test]
fn elf_dynamic_symbol_flags() {
    let mut fixture = ElfFixture::x86_64().stripped();
    fixture.dynamic_symbols = Some(vec![
        FixtureSymbol::undefined("puts"),
        FixtureSymbol::ifunc("memcpy", 0x401010),
    ]);
    let file = write_fixture(&fixture.bytes());
    let probe = FormatProbe::new(GoblinBackend::new());
    let handle = probe.open(file.path()).unwrap();

    assert_eq!(handle.symtab_upper_bound(SymbolTable::Static).unwrap(), 0);
    assert_eq!(handle.symtab_upper_bound(SymbolTable::Dynamic).unwrap(), 3);

    let mut raw = Vec::new();
    handle
        .canonicalize_symtab(SymbolTable::Dynamic, &mut raw)
        .unwrap();
    let flags = |name: &str| raw.iter().find(|s| s.name == name).unwrap().flags;

    assert!(flags("puts").contains(SymbolFlags::FUNCTION | SymbolFlags::UNDEFINED));
    assert!(flags("memcpy").contains(
        SymbolFlags::FUNCTION | SymbolFlags::INDIRECT | SymbolFlags::DYNAMIC
    ));
    assert!(!flags("memcpy").contains(SymbolFlags::UNDEFINED));
}

#[test]
fn pe_exports() {
    let binary = load(&PeFixture::amd64().with_exports().bytes()).unwrap();

    assert_eq!(binary.symbols(), &[Symbol::function("main", 0x1_4000_1000)]);
    assert!(binary.warnings().is_empty());
}

#[test]
fn pe_export_flags() {
    let file = write_fixture(&PeFixture::i386().with_exports().bytes());
    let probe = FormatProbe::new(GoblinBackend::new());
    let handle = probe.open(file.path()).unwrap();

    assert_eq!(handle.symtab_upper_bound(SymbolTable::Dynamic).unwrap(), 3);

    let mut raw: Vec<RawSymbol> = Vec::new();
    handle
        .canonicalize_symtab(SymbolTable::Dynamic, &mut raw)
        .unwrap();
    let export = |name: &str| raw.iter().find(|s| s.name == name).unwrap().clone();

    let main = export("main");
    assert_eq!(main.value, 0x40_1000);
    assert!(main.flags.contains(SymbolFlags::FUNCTION | SymbolFlags::DYNAMIC));

    let table = export("table");
    assert_eq!(table.value, 0x40_0000 + PE_EXPORTED_DATA_RVA as u64);
    assert!(table.flags.contains(SymbolFlags::OBJECT));
    assert!(!table.flags.contains(SymbolFlags::FUNCTION));

    let alloc = export("Alloc");
    assert!(alloc.flags.contains(SymbolFlags::INDIRECT));
    assert!(!alloc.flags.contains(SymbolFlags::FUNCTION));
}

#[test]
fn pe_coff_symbols() {
    let binary = load(&PeFixture::amd64().with_coff_symbols().bytes()).unwrap();

    assert_eq!(
        binary.symbols(),
        &[
            Symbol::function("main", 0x1_4000_1000),
            Symbol::function(PE_LONG_NAME, 0x1_4000_1000 + PE_LONG_NAME_OFFSET as u64),
        ]
    );
    assert!(binary.warnings().is_empty());
}

#[test]
fn pe_static_then_exported_symbols() {
    let fixture = PeFixture::i386().with_coff_symbols().with_exports();
    let binary = load(&fixture.bytes()).unwrap();

    assert_eq!(
        binary.symbols(),
        &[
            Symbol::function("main", 0x40_1000),
            Symbol::function(PE_LONG_NAME, 0x40_1000 + PE_LONG_NAME_OFFSET as u64),
            Symbol::function("main", 0x40_1000),
        ]
    );
}

#[test]
fn pe_coff_data_symbols_are_not_functions() {
    let file = write_fixture(&PeFixture::amd64().with_coff_symbols().bytes());
    let probe = FormatProbe::new(GoblinBackend::new());
    let handle = probe.open(file.path()).unwrap();

    assert_eq!(handle.symtab_upper_bound(SymbolTable::Static).unwrap(), 6);

    let mut raw = Vec::new();
    handle
        .canonicalize_symtab(SymbolTable::Static, &mut raw)
        .unwrap();
    let symbol = |name: &str| raw.iter().find(|s| s.name == name).unwrap().clone();

    let counter = symbol("counter");
    assert_eq!(counter.value, 0x1_4000_2100);
    assert!(counter.flags.contains(SymbolFlags::GLOBAL));
    assert!(!counter.flags.contains(SymbolFlags::FUNCTION));

    let puts = symbol("puts");
    assert!(puts.flags.contains(SymbolFlags::UNDEFINED));
    assert!(!puts.flags.contains(SymbolFlags::FUNCTION));

    assert!(symbol(".file").flags.contains(SymbolFlags::FILE));
}

#[test]
fn unreadable_section_table_fails() {
    let mut fixture = ElfFixture::x86_64();
    fixture.bad_section_name = true;
    let e = load(&fixture.bytes()).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::SectionRead);
}

#[test]
fn failed_load_leaves_binary_untouched() {
    let good = write_fixture(&ElfFixture::x86_64().bytes());
    let mut binary = Binary::default();
    load_binary(good.path(), &mut binary, BinaryType::Auto).unwrap();
    let loaded = binary.clone();

    let mut fixture = ElfFixture::x86_64();
    fixture.machine = EM_AARCH64;
    let bad = write_fixture(&fixture.bytes());
    assert!(load_binary(bad.path(), &mut binary, BinaryType::Auto).is_err());
    assert_eq!(binary, loaded);

    let mut empty = Binary::default();
    assert!(load_binary(bad.path(), &mut empty, BinaryType::Auto).is_err());
    assert_eq!(empty, Binary::default());
    assert_eq!(empty.bits(), 0);
}

#[test]
fn loading_twice_is_identical() {
    let file = write_fixture(&ElfFixture::x86_64().bytes());
    let first = Binary::load(file.path()).unwrap();
    let second = Binary::load(file.path()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn expected_type_is_advisory() {
    let file = write_fixture(&ElfFixture::x86_64().bytes());

    let binary = Loader::global().load(file.path(), BinaryType::Elf).unwrap();
    assert!(binary.warnings().is_empty());

    let binary = Loader::global().load(file.path(), BinaryType::Pe).unwrap();
    assert_eq!(binary.binary_type(), BinaryType::Elf);
    assert_eq!(binary.warnings().len(), 1);
    assert_eq!(binary.warnings()[0].kind(), WarningKind::TypeMismatch);
}

#[test]
fn unload_is_always_safe() {
    let mut binary = Binary::default();
    unload_binary(&mut binary);
    unload_binary(&mut binary);

    let mut binary = load(&ElfFixture::x86_64().bytes()).unwrap();
    let loaded = binary.clone();
    unload_binary(&mut binary);
    assert_eq!(binary, loaded);
}

#[test]
fn binary_serializes() {
    let binary = load(&ElfFixture::x86_64().bytes()).unwrap();
    let value = serde_json::to_value(&binary).unwrap();

    assert_eq!(value["entry"], 0x401020);
    assert_eq!(value["bits"], 64);
    assert_eq!(value["binary_type"], "Elf");
    assert_eq!(value["architecture"], "X86");
    assert_eq!(value["symbols"][0]["name"], "main");
    assert_eq!(value["symbols"][0]["address"], 0x401000);
    assert_eq!(value["symbols"][0]["kind"], "Function");
}

#[test]
fn goblin_probe_identifies_flavour() {
    let file = write_fixture(&PeFixture::amd64().bytes());
    let probe = FormatProbe::new(GoblinBackend::new());
    let handle = probe.open(file.path()).unwrap();

    assert_eq!(handle.flavour(), Flavour::Coff);
    assert!(handle.last_error().is_none());
    assert_eq!(handle.symtab_upper_bound(SymbolTable::Static).unwrap(), 0);
}

#[test]
fn absent_dynamic_table_is_empty() {
    let file = write_fixture(&ElfFixture::x86_64().bytes());
    let probe = FormatProbe::new(GoblinBackend::new());
    let handle = probe.open(file.path()).unwrap();

    assert!(loader::extract_dynamic_symbols(&handle).unwrap().is_empty());
    assert_eq!(
        loader::extract_symbols(&handle).unwrap(),
        vec![Symbol::function("main", 0x401000)]
    );
}

#[test]
fn init_runs_once_across_threads() {
    let loader = Loader::new(MockBackend::new().with_file("/bin/ls", MockObject::elf64()));

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..16 {
                    loader.load("/bin/ls", BinaryType::Auto).unwrap();
                }
            });
        }
    });

    assert_eq!(loader.backend().inits(), 1);
    assert_eq!(loader.backend().opened(), 128);
    assert_eq!(loader.backend().closed(), 128);
}

#[test]
fn init_runs_before_a_failed_open() {
    let loader = Loader::new(MockBackend::new());
    let e = loader.load("/missing", BinaryType::Auto).unwrap_err();

    assert_eq!(e.kind(), ErrorKind::Open);
    assert_eq!(loader.backend().inits(), 1);
    assert_eq!(loader.backend().opened(), 0);
    assert_eq!(loader.backend().closed(), 0);
}

#[test]
fn failed_loads_release_their_handle() {
    let mut unknown = MockObject::elf64();
    unknown.flavour = Flavour::Unknown;
    let mut macho = MockObject::elf64();
    macho.flavour = Flavour::MachO;
    let mut sections = MockObject::elf64();
    sections.section_error = true;
    let mut huge = MockObject::elf64();
    huge.symtab_upper_bound = Some(usize::MAX);

    let cases = vec![
        ("/text", MockObject::not_an_object(), ErrorKind::Format),
        ("/unknown", unknown, ErrorKind::UnrecognizedFormat),
        ("/macho", macho, ErrorKind::UnsupportedContainer),
        ("/arm64", MockObject::aarch64(), ErrorKind::UnsupportedArchitecture),
        ("/sections", sections, ErrorKind::SectionRead),
        ("/huge", huge, ErrorKind::OutOfMemory),
    ];

    let mut backend = MockBackend::new();
    for (path, object, _) in &cases {
        backend = backend.with_file(*path, object.clone());
    }
    let loader = Loader::new(backend);

    for (i, (path, _, kind)) in cases.iter().enumerate() {
        for _ in 0..10 {
            let e = loader.load(path, BinaryType::Auto).unwrap_err();
            assert_eq!(e.kind(), *kind, "{}", path);
        }
        assert_eq!(loader.backend().opened(), (i + 1) * 10);
        assert_eq!(loader.backend().closed(), (i + 1) * 10);
    }
}

#[test]
fn stale_error_is_cleared() {
    let mut object = MockObject::elf64();
    object.stale_error = true;
    let probe = FormatProbe::new(MockBackend::new().with_file("/bin/stale", object));

    let handle = probe.open(Path::new("/bin/stale")).unwrap();
    assert!(handle.last_error().is_none());
}

#[test]
fn static_then_dynamic_symbols() {
    let loader = Loader::new(MockBackend::new().with_file("/bin/ls", MockObject::elf64()));
    let binary = loader.load("/bin/ls", BinaryType::Auto).unwrap();

    assert_eq!(
        binary.symbols(),
        &[Symbol::function("main", 0x401000), Symbol::function("puts", 0)]
    );
    assert_eq!(binary.sections().len(), 2);
    assert_eq!(binary.section(".comment").unwrap().size(), 0);
}

#[test]
fn symbol_table_failure_keeps_other_table() {
    let mut object = MockObject::elf32();
    object.symtab_error = Some(SymbolTable::Static);
    let loader = Loader::new(MockBackend::new().with_file("/bin/ls", object));
    let binary = loader.load("/bin/ls", BinaryType::Auto).unwrap();

    assert_eq!(binary.bits(), 32);
    assert_eq!(binary.symbols(), &[Symbol::function("puts", 0)]);
    assert_eq!(binary.warnings().len(), 1);
    assert_eq!(binary.warnings()[0].kind(), WarningKind::SymbolTableRead);
    assert_eq!(loader.backend().closed(), 1);
}

#[test]
fn only_function_symbols_are_kept() {
    let mut object = MockObject::elf64();
    object.symbols.push((
        "_start".to_string(),
        0x401020,
        SymbolFlags::FUNCTION | SymbolFlags::GLOBAL,
    ));
    object.symbols.push((".text".to_string(), 0x401000, SymbolFlags::SECTION));
    object.dynamic_symbols.clear();
    let loader = Loader::new(MockBackend::new().with_file("/bin/ls", object));
    let binary = loader.load("/bin/ls", BinaryType::Auto).unwrap();

    let names: Vec<&str> = binary.symbols().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["main", "_start"]);
}
