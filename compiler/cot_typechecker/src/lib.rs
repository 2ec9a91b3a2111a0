//! Type system and semantic checking for the Cot language
//!
//! Annotates every expression with a resolved type id, validates
//! declarations, populates scopes, registers user-defined types and checks
//! method and trait conformance. Errors poison the offending expression so
//! one mistake produces one diagnostic.

pub mod checker;
pub mod scope;
pub mod types;

pub use checker::{CheckedModule, FunctionInfo, TypeChecker};
pub use scope::{ScopeStack, Symbol, SymbolKind};
pub use types::{EnumVariant, PrimitiveType, TypeDesc, TypeId, TypeRegistry};
