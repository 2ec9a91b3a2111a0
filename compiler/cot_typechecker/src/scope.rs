//! Symbol tables and lexical scopes

use crate::types::TypeId;
use cot_common::Span;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Variable,
    Constant,
    Function,
    Struct,
    Enum,
    Trait,
    TypeAlias,
    EnumVariant,
    Method,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub type_id: TypeId,
    pub is_mutable: bool,
    pub span: Span,
}

/// Stack of lexical scopes; lookup walks outward.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self { scopes: vec![HashMap::new()] }
    }

    pub fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the root scope");
        self.scopes.pop();
    }

    /// Declare in the innermost scope. Returns the shadowed symbol if the
    /// name was already declared in this same scope.
    pub fn declare(&mut self, symbol: Symbol) -> Option<Symbol> {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(symbol.name.clone(), symbol)
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn lookup_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes.last().and_then(|scope| scope.get(name))
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Variable,
            type_id: 0,
            is_mutable: true,
            span: Span::dummy(),
        }
    }

    #[test]
    fn lookup_walks_outward() {
        let mut scopes = ScopeStack::new();
        scopes.declare(sym("a"));
        scopes.push();
        scopes.declare(sym("b"));
        assert!(scopes.lookup("a").is_some());
        assert!(scopes.lookup("b").is_some());
        scopes.pop();
        assert!(scopes.lookup("b").is_none());
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut scopes = ScopeStack::new();
        let mut outer = sym("x");
        outer.type_id = 1;
        scopes.declare(outer);
        scopes.push();
        let mut inner = sym("x");
        inner.type_id = 2;
        scopes.declare(inner);
        assert_eq!(scopes.lookup("x").unwrap().type_id, 2);
    }
}
