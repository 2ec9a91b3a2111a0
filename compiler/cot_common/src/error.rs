//! Error handling utilities for the Cot compiler

use thiserror::Error;

/// The main error type for the Cot compiler
#[derive(Error, Debug, Clone)]
pub enum CotError {
    #[error("Lexical error: {message}")]
    LexError { message: String },

    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("Lowering error: {message}")]
    LowerError { message: String },

    #[error("Emission error: {message}")]
    EmitError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },

    /// Invariant violation inside the compiler itself. The attached dump is
    /// the IR of the function being processed when the invariant broke.
    #[error("internal compiler error: {message}")]
    Ice { message: String, ir_dump: Option<String> },
}

/// Result type alias for Cot compiler operations
pub type CotResult<T> = Result<T, CotError>;

impl CotError {
    pub fn lex_error(message: impl Into<String>) -> Self {
        Self::LexError { message: message.into() }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError { message: message.into() }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError { message: message.into() }
    }

    pub fn lower_error(message: impl Into<String>) -> Self {
        Self::LowerError { message: message.into() }
    }

    pub fn emit_error(message: impl Into<String>) -> Self {
        Self::EmitError { message: message.into() }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::IoError { message: message.into() }
    }

    pub fn ice(message: impl Into<String>) -> Self {
        Self::Ice { message: message.into(), ir_dump: None }
    }

    pub fn ice_with_dump(message: impl Into<String>, ir_dump: impl Into<String>) -> Self {
        Self::Ice { message: message.into(), ir_dump: Some(ir_dump.into()) }
    }
}
