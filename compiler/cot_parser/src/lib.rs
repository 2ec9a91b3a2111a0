//! Syntax analysis for the Cot language
//!
//! Builds the AST from the token stream: recursive descent for declarations
//! and statements, Pratt parsing for expressions.

pub mod ast;
pub mod parser;
pub mod precedence;

pub use ast::*;
pub use parser::Parser;
pub use precedence::Precedence;
