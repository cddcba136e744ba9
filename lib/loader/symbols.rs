//! Extracting function symbols from an opened file.

use crate::backend::{ObjectHandle, RawSymbol, SymbolFlags, SymbolTable};
use crate::symbol::{Symbol, SymbolKind};
use crate::Error;
use log::debug;

/// Function symbols from the static symbol table, in table order.
pub fn extract_symbols<H: ObjectHandle>(handle: &H) -> Result<Vec<Symbol>, Error> {
    extract(handle, SymbolTable::Static)
}

/// Function symbols from the dynamic symbol table, in table order.
pub fn extract_dynamic_symbols<H: ObjectHandle>(handle: &H) -> Result<Vec<Symbol>, Error> {
    extract(handle, SymbolTable::Dynamic)
}

/// Convert a raw entry, returning `None` for anything which is not a named
/// function.
fn function_symbol(raw: &RawSymbol) -> Option<Symbol> {
    if !raw.flags.contains(SymbolFlags::FUNCTION) || raw.name.is_empty() {
        return None;
    }
    Some(Symbol::new(raw.name.as_ref(), raw.value, SymbolKind::Function))
}

pub fn extract<H: ObjectHandle>(handle: &H, table: SymbolTable) -> Result<Vec<Symbol>, Error> {
    let upper_bound = handle
        .symtab_upper_bound(table)
        .map_err(|source| Error::SymbolTableRead { table, source })?;

    if upper_bound == 0 {
        debug!("no {} symbols", table);
        return Ok(Vec::new());
    }

    let mut raw_symbols: Vec<RawSymbol> = Vec::new();
    raw_symbols.try_reserve_exact(upper_bound)?;

    handle
        .canonicalize_symtab(table, &mut raw_symbols)
        .map_err(|source| Error::SymbolTableRead { table, source })?;

    let symbols: Vec<Symbol> = raw_symbols.iter().filter_map(function_symbol).collect();

    debug!(
        "{} of {} {} symbols are functions",
        symbols.len(),
        raw_symbols.len(),
        table
    );

    Ok(symbols)
}
