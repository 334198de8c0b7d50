//! Symbol table for the compiler
//!
//! A stack of scopes mapping names to (scope kind, slot index). Entering a
//! function pushes a scope; resolving a binding defined by an enclosing
//! function records it in `free_symbols` so the `Closure` instruction can
//! capture it as an upvalue. Globals and builtins resolve directly at any
//! depth.

use crate::builtins::BUILTINS;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Free,
    Builtin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: u16,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    store: HashMap<String, Symbol>,
    pub num_definitions: u16,
    /// Symbols of the enclosing function this scope captures, in capture
    /// order. `Free` slot N refers to the Nth entry.
    pub free_symbols: Vec<Symbol>,
    pub(super) outer: Option<Box<SymbolTable>>,
}

impl SymbolTable {
    /// Root (global) table with the builtin registry pre-defined.
    pub fn new() -> Self {
        let mut table = SymbolTable::default();
        for (index, (name, _)) in BUILTINS.iter().enumerate() {
            table.define_builtin(index as u16, name);
        }
        table
    }

    /// A function scope nested inside `outer`.
    pub fn enclosed(outer: SymbolTable) -> Self {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..SymbolTable::default()
        }
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    fn define_builtin(&mut self, index: u16, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original.clone());
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: (self.free_symbols.len() - 1) as u16,
        };
        self.store.insert(original.name, symbol.clone());
        symbol
    }

    /// Resolve a name, capturing locals of enclosing functions as upvalues.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let outer = self.outer.as_mut()?;
        let symbol = outer.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            SymbolScope::Local | SymbolScope::Free => Some(self.define_free(symbol)),
        }
    }

    /// Tear down a function scope, yielding (captured symbols, local count,
    /// enclosing table).
    pub fn into_parts(self) -> (Vec<Symbol>, u16, Option<SymbolTable>) {
        (
            self.free_symbols,
            self.num_definitions,
            self.outer.map(|boxed| *boxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_global_then_local() {
        let mut global = SymbolTable::new();
        let a = global.define("a");
        assert_eq!(a.scope, SymbolScope::Global);
        assert_eq!(a.index, 0);

        let mut local = SymbolTable::enclosed(global);
        let b = local.define("b");
        assert_eq!(b.scope, SymbolScope::Local);
        assert_eq!(b.index, 0);
    }

    #[test]
    fn test_globals_resolve_at_any_depth() {
        let mut global = SymbolTable::new();
        global.define("g");
        let mut inner = SymbolTable::enclosed(SymbolTable::enclosed(global));
        let g = inner.resolve("g").unwrap();
        assert_eq!(g.scope, SymbolScope::Global);
        assert!(inner.free_symbols.is_empty());
    }

    #[test]
    fn test_enclosing_local_becomes_free() {
        let mut global = SymbolTable::new();
        global.define("g");
        let mut middle = SymbolTable::enclosed(global);
        middle.define("m");
        let mut inner = SymbolTable::enclosed(middle);

        let m = inner.resolve("m").unwrap();
        assert_eq!(m.scope, SymbolScope::Free);
        assert_eq!(m.index, 0);
        assert_eq!(inner.free_symbols.len(), 1);
        assert_eq!(inner.free_symbols[0].scope, SymbolScope::Local);

        // resolving again reuses the recorded upvalue
        let again = inner.resolve("m").unwrap();
        assert_eq!(again, m);
    }

    #[test]
    fn test_transitive_capture_chains_frees() {
        let mut global = SymbolTable::new();
        global.define("g");
        let mut outer_fn = SymbolTable::enclosed(global);
        outer_fn.define("x");
        let middle_fn = SymbolTable::enclosed(outer_fn);
        let mut inner_fn = SymbolTable::enclosed(middle_fn);

        let x = inner_fn.resolve("x").unwrap();
        assert_eq!(x.scope, SymbolScope::Free);
        // the middle function captured it as a free symbol of its own
        let (_, _, middle) = inner_fn.into_parts();
        let middle = middle.unwrap();
        assert_eq!(middle.free_symbols.len(), 1);
        assert_eq!(middle.free_symbols[0].scope, SymbolScope::Local);
    }

    #[test]
    fn test_builtins_are_predefined() {
        let mut table = SymbolTable::new();
        let print = table.resolve("print").unwrap();
        assert_eq!(print.scope, SymbolScope::Builtin);
        assert_eq!(print.index, 0);
    }

    #[test]
    fn test_local_shadows_builtin() {
        let mut global = SymbolTable::new();
        let len = global.define("len");
        assert_eq!(len.scope, SymbolScope::Global);
        assert_eq!(global.resolve("len").unwrap().scope, SymbolScope::Global);
    }
}
