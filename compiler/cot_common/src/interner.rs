//! Identifier interning
//!
//! Deduplicates identifier strings so equality is a `u32` compare. The
//! interner is owned by a [`crate::Compilation`] and passed by reference;
//! there is no global table.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name(pub u32);

#[derive(Debug, Default)]
pub struct Interner {
    map: HashMap<String, Name>,
    strings: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Name {
        if let Some(&name) = self.map.get(s) {
            return name;
        }
        let name = Name(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.map.insert(s.to_string(), name);
        name
    }

    pub fn resolve(&self, name: Name) -> &str {
        &self.strings[name.0 as usize]
    }

    /// Consume the interner, yielding the strings in handle order.
    pub fn into_strings(self) -> Vec<String> {
        self.strings
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut interner = Interner::new();
        let a = interner.intern("main");
        let b = interner.intern("fib");
        let c = interner.intern("main");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(a), "main");
        assert_eq!(interner.len(), 2);
    }
}
