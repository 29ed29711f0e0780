use crate::asm::section::{SectionId, ABS_SECTION};
use crate::error::{Error, Result, SemanticError};
use std::collections::HashMap;

/// One symbol. A symbol exists from its first reference; `defined`
/// flips when a label or `.set` gives it a value. Forward references
/// register the index of their patch in `dependents` so definition can
/// re-attempt them.
#[derive(Debug, Clone)]
pub struct Sym {
    pub section: SectionId,
    pub value: u64,
    pub defined: bool,
    pub external: bool,
    pub dependents: Vec<usize>,
}

impl Sym {
    fn undefined() -> Sym {
        Sym {
            section: ABS_SECTION,
            value: 0,
            defined: false,
            external: false,
            dependents: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    syms: Vec<Sym>,
    map: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Index of `name`, creating an undefined entry on first reference.
    pub fn intern(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.map.get(name) {
            return idx;
        }
        let idx = self.syms.len();
        self.names.push(name.to_string());
        self.syms.push(Sym::undefined());
        self.map.insert(name.to_string(), idx);
        idx
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.map.get(name).copied()
    }

    pub fn get(&self, idx: usize) -> &Sym {
        &self.syms[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Sym {
        &mut self.syms[idx]
    }

    pub fn name(&self, idx: usize) -> &str {
        self.names[idx].as_str()
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Sym)> {
        self.names
            .iter()
            .map(|n| n.as_str())
            .zip(self.syms.iter())
    }

    /// Define `name`. Redefining an already-defined symbol is an error
    /// unless it comes from `.set` with the same section and value.
    /// Returns the indices of patches waiting on this symbol.
    pub fn define(
        &mut self,
        name: &str,
        section: SectionId,
        value: u64,
        from_set: bool,
    ) -> Result<(usize, Vec<usize>)> {
        let idx = self.intern(name);
        let deps = self.define_at(idx, section, value, from_set)?;
        Ok((idx, deps))
    }

    pub fn define_at(
        &mut self,
        idx: usize,
        section: SectionId,
        value: u64,
        from_set: bool,
    ) -> Result<Vec<usize>> {
        let sym = &mut self.syms[idx];
        if sym.defined && !(from_set && sym.section == section && sym.value == value) {
            return Err(Error::SemanticError(SemanticError::RedefinedSymbol(
                self.names[idx].clone(),
            )));
        }
        sym.section = section;
        sym.value = value;
        sym.defined = true;
        Ok(std::mem::take(&mut sym.dependents))
    }

    pub fn mark_external(&mut self, name: &str) {
        let idx = self.intern(name);
        self.syms[idx].external = true;
    }

    pub fn add_dependent(&mut self, idx: usize, patch: usize) {
        let sym = &mut self.syms[idx];
        if !sym.defined {
            sym.dependents.push(patch);
        }
    }

    /// Symbols that never got a definition and were not declared
    /// external. Non-empty after finalization means failure.
    pub fn unresolved(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, s)| !s.defined && !s.external)
            .map(|(n, _)| n)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_reference_then_define() {
        let mut tab = SymbolTable::new();
        let idx = tab.intern("label");
        assert!(!tab.get(idx).defined);
        tab.add_dependent(idx, 7);
        tab.add_dependent(idx, 9);
        let (idx2, deps) = tab.define("label", 0, 0x40, false).unwrap();
        assert_eq!(idx, idx2);
        assert_eq!(deps, vec![7, 9]);
        assert!(tab.get(idx).defined);
        assert_eq!(tab.get(idx).value, 0x40);
        assert!(tab.unresolved().is_empty());
    }

    #[test]
    fn test_redefinition_rules() {
        let mut tab = SymbolTable::new();
        tab.define("a", ABS_SECTION, 10, true).unwrap();
        // same value via .set is fine
        assert!(tab.define("a", ABS_SECTION, 10, true).is_ok());
        // different value is not
        assert!(matches!(
            tab.define("a", ABS_SECTION, 11, true),
            Err(Error::SemanticError(SemanticError::RedefinedSymbol(_)))
        ));
        // label over .set is not
        assert!(tab.define("a", 0, 10, false).is_err());
    }

    #[test]
    fn test_externals_are_not_unresolved() {
        let mut tab = SymbolTable::new();
        tab.intern("missing");
        tab.mark_external("printf_buf");
        assert_eq!(tab.unresolved(), vec!["missing"]);
    }
}
