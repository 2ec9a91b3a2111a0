//! Lexical analysis for the Cot language
//!
//! Turns source text into a token stream. Whitespace and comments are
//! discarded; every token records its start and end position. Interpolated
//! strings lex to a `StringSegment`/`InterpStart`/…/`InterpEnd` run that the
//! parser reassembles.

pub mod lexer;
pub mod token;

pub use lexer::Lexer;
pub use token::{token, Token, TokenKind};
