//! Build-time symbol table.
//!
//! A single append-only table indexed by insertion order; lookups are
//! linear. Acceptable given programs are small — a few hundred symbols at
//! most (§9 design notes). Maps name → (dtype, is_param).

use crate::dtype::Dtype;

#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    pub dtype: Dtype,
    pub is_param: bool,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.symbols[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.names.push(name.into());
        self.symbols.push(symbol);
    }

    /// All local (non-parameter) names ever assigned, in insertion order.
    /// Used by codegen to declare zero-initialized scalar locals.
    pub fn locals(&self) -> impl Iterator<Item = (&str, Dtype)> {
        self.names
            .iter()
            .zip(self.symbols.iter())
            .filter(|(_, s)| !s.is_param)
            .map(|(n, s)| (n.as_str(), s.dtype))
    }
}
