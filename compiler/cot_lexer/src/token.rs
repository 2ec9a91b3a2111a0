//! Token definitions for the Cot language

use cot_common::{Span, Spanned};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Token types in the Cot language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    BoolLiteral(bool),

    // Interpolated strings: `"a${x}b"` lexes as
    // StringSegment("a") InterpStart <tokens of x> InterpEnd StringLiteral("b").
    StringSegment(String),
    InterpStart,
    InterpEnd,

    // Identifiers
    Identifier(String),

    // Keywords
    KeywordFn,
    KeywordVar,
    KeywordConst,
    KeywordReturn,
    KeywordIf,
    KeywordElse,
    KeywordWhile,
    KeywordFor,
    KeywordIn,
    KeywordSwitch,
    KeywordLoop,
    KeywordBreak,
    KeywordContinue,
    KeywordDefer,
    KeywordTry,
    KeywordCatch,
    KeywordThrow,
    KeywordStruct,
    KeywordEnum,
    KeywordImpl,
    KeywordTrait,
    KeywordUnion,
    KeywordType,
    KeywordTest,
    KeywordImport,
    KeywordComptime,
    KeywordPub,
    KeywordNew,
    KeywordAs,
    KeywordIs,
    KeywordNull,

    // Operators
    Plus,              // +
    Minus,             // -
    Star,              // *
    Slash,             // /
    Percent,           // %
    Assign,            // =
    Equal,             // ==
    NotEqual,          // !=
    Less,              // <
    LessEqual,         // <=
    Greater,           // >
    GreaterEqual,      // >=
    LogicalAnd,        // &&
    LogicalOr,         // ||
    LogicalNot,        // !
    Ampersand,         // &
    Pipe,              // |
    Caret,             // ^
    Tilde,             // ~
    LeftShift,         // <<
    RightShift,        // >>
    Range,             // ..
    RangeInclusive,    // ..=
    Question,          // ?
    QuestionDot,       // ?.
    QuestionColon,     // ?:
    Arrow,             // ->
    FatArrow,          // =>
    Dot,               // .
    DoubleColon,       // ::

    // Delimiters
    LeftParen,         // (
    RightParen,        // )
    LeftBrace,         // {
    RightBrace,        // }
    LeftBracket,       // [
    RightBracket,      // ]
    Comma,             // ,
    Semicolon,         // ;
    Colon,             // :
    Underscore,        // _

    // Special
    EndOfFile,

    // Error token for error recovery
    Error(String),
}

impl TokenKind {
    /// Keyword table lookup used by the identifier scanner.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        let kind = match ident {
            "fn" => TokenKind::KeywordFn,
            "var" => TokenKind::KeywordVar,
            "const" => TokenKind::KeywordConst,
            "return" => TokenKind::KeywordReturn,
            "if" => TokenKind::KeywordIf,
            "else" => TokenKind::KeywordElse,
            "while" => TokenKind::KeywordWhile,
            "for" => TokenKind::KeywordFor,
            "in" => TokenKind::KeywordIn,
            "switch" => TokenKind::KeywordSwitch,
            "loop" => TokenKind::KeywordLoop,
            "break" => TokenKind::KeywordBreak,
            "continue" => TokenKind::KeywordContinue,
            "defer" => TokenKind::KeywordDefer,
            "try" => TokenKind::KeywordTry,
            "catch" => TokenKind::KeywordCatch,
            "throw" => TokenKind::KeywordThrow,
            "struct" => TokenKind::KeywordStruct,
            "enum" => TokenKind::KeywordEnum,
            "impl" => TokenKind::KeywordImpl,
            "trait" => TokenKind::KeywordTrait,
            "union" => TokenKind::KeywordUnion,
            "type" => TokenKind::KeywordType,
            "test" => TokenKind::KeywordTest,
            "import" => TokenKind::KeywordImport,
            "comptime" => TokenKind::KeywordComptime,
            "pub" => TokenKind::KeywordPub,
            "new" => TokenKind::KeywordNew,
            "as" => TokenKind::KeywordAs,
            "is" => TokenKind::KeywordIs,
            "null" => TokenKind::KeywordNull,
            "true" => return Some(TokenKind::BoolLiteral(true)),
            "false" => return Some(TokenKind::BoolLiteral(false)),
            "_" => TokenKind::Underscore,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::KeywordFn
                | TokenKind::KeywordVar
                | TokenKind::KeywordConst
                | TokenKind::KeywordReturn
                | TokenKind::KeywordIf
                | TokenKind::KeywordElse
                | TokenKind::KeywordWhile
                | TokenKind::KeywordFor
                | TokenKind::KeywordIn
                | TokenKind::KeywordSwitch
                | TokenKind::KeywordLoop
                | TokenKind::KeywordBreak
                | TokenKind::KeywordContinue
                | TokenKind::KeywordDefer
                | TokenKind::KeywordTry
                | TokenKind::KeywordCatch
                | TokenKind::KeywordThrow
                | TokenKind::KeywordStruct
                | TokenKind::KeywordEnum
                | TokenKind::KeywordImpl
                | TokenKind::KeywordTrait
                | TokenKind::KeywordUnion
                | TokenKind::KeywordType
                | TokenKind::KeywordTest
                | TokenKind::KeywordImport
                | TokenKind::KeywordComptime
                | TokenKind::KeywordPub
                | TokenKind::KeywordNew
                | TokenKind::KeywordAs
                | TokenKind::KeywordIs
                | TokenKind::KeywordNull
        )
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::IntLiteral(_)
                | TokenKind::FloatLiteral(_)
                | TokenKind::StringLiteral(_)
                | TokenKind::BoolLiteral(_)
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TokenKind::Error(_))
    }

    /// Tokens that can begin a statement; the parser resynchronizes to these
    /// after a syntax error.
    pub fn starts_statement(&self) -> bool {
        matches!(
            self,
            TokenKind::KeywordFn
                | TokenKind::KeywordVar
                | TokenKind::KeywordConst
                | TokenKind::KeywordReturn
                | TokenKind::KeywordIf
                | TokenKind::KeywordWhile
                | TokenKind::KeywordFor
                | TokenKind::KeywordSwitch
                | TokenKind::KeywordLoop
                | TokenKind::KeywordBreak
                | TokenKind::KeywordContinue
                | TokenKind::KeywordDefer
                | TokenKind::KeywordTry
                | TokenKind::KeywordThrow
                | TokenKind::KeywordStruct
                | TokenKind::KeywordEnum
                | TokenKind::KeywordImpl
                | TokenKind::KeywordTrait
                | TokenKind::KeywordUnion
                | TokenKind::KeywordType
                | TokenKind::KeywordTest
                | TokenKind::KeywordImport
                | TokenKind::KeywordComptime
                | TokenKind::KeywordPub
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::IntLiteral(n) => write!(f, "{}", n),
            TokenKind::FloatLiteral(n) => write!(f, "{}", n),
            TokenKind::StringLiteral(s) => write!(f, "\"{}\"", s),
            TokenKind::BoolLiteral(b) => write!(f, "{}", b),
            TokenKind::StringSegment(s) => write!(f, "\"{}${{", s),
            TokenKind::InterpStart => write!(f, "${{"),
            TokenKind::InterpEnd => write!(f, "}}"),
            TokenKind::Identifier(name) => write!(f, "{}", name),
            TokenKind::Error(msg) => write!(f, "ERROR: {}", msg),
            _ => {
                let s = match self {
                    TokenKind::KeywordFn => "fn",
                    TokenKind::KeywordVar => "var",
                    TokenKind::KeywordConst => "const",
                    TokenKind::KeywordReturn => "return",
                    TokenKind::KeywordIf => "if",
                    TokenKind::KeywordElse => "else",
                    TokenKind::KeywordWhile => "while",
                    TokenKind::KeywordFor => "for",
                    TokenKind::KeywordIn => "in",
                    TokenKind::KeywordSwitch => "switch",
                    TokenKind::KeywordLoop => "loop",
                    TokenKind::KeywordBreak => "break",
                    TokenKind::KeywordContinue => "continue",
                    TokenKind::KeywordDefer => "defer",
                    TokenKind::KeywordTry => "try",
                    TokenKind::KeywordCatch => "catch",
                    TokenKind::KeywordThrow => "throw",
                    TokenKind::KeywordStruct => "struct",
                    TokenKind::KeywordEnum => "enum",
                    TokenKind::KeywordImpl => "impl",
                    TokenKind::KeywordTrait => "trait",
                    TokenKind::KeywordUnion => "union",
                    TokenKind::KeywordType => "type",
                    TokenKind::KeywordTest => "test",
                    TokenKind::KeywordImport => "import",
                    TokenKind::KeywordComptime => "comptime",
                    TokenKind::KeywordPub => "pub",
                    TokenKind::KeywordNew => "new",
                    TokenKind::KeywordAs => "as",
                    TokenKind::KeywordIs => "is",
                    TokenKind::KeywordNull => "null",
                    TokenKind::Plus => "+",
                    TokenKind::Minus => "-",
                    TokenKind::Star => "*",
                    TokenKind::Slash => "/",
                    TokenKind::Percent => "%",
                    TokenKind::Assign => "=",
                    TokenKind::Equal => "==",
                    TokenKind::NotEqual => "!=",
                    TokenKind::Less => "<",
                    TokenKind::LessEqual => "<=",
                    TokenKind::Greater => ">",
                    TokenKind::GreaterEqual => ">=",
                    TokenKind::LogicalAnd => "&&",
                    TokenKind::LogicalOr => "||",
                    TokenKind::LogicalNot => "!",
                    TokenKind::Ampersand => "&",
                    TokenKind::Pipe => "|",
                    TokenKind::Caret => "^",
                    TokenKind::Tilde => "~",
                    TokenKind::LeftShift => "<<",
                    TokenKind::RightShift => ">>",
                    TokenKind::Range => "..",
                    TokenKind::RangeInclusive => "..=",
                    TokenKind::Question => "?",
                    TokenKind::QuestionDot => "?.",
                    TokenKind::QuestionColon => "?:",
                    TokenKind::Arrow => "->",
                    TokenKind::FatArrow => "=>",
                    TokenKind::Dot => ".",
                    TokenKind::DoubleColon => "::",
                    TokenKind::LeftParen => "(",
                    TokenKind::RightParen => ")",
                    TokenKind::LeftBrace => "{",
                    TokenKind::RightBrace => "}",
                    TokenKind::LeftBracket => "[",
                    TokenKind::RightBracket => "]",
                    TokenKind::Comma => ",",
                    TokenKind::Semicolon => ";",
                    TokenKind::Colon => ":",
                    TokenKind::Underscore => "_",
                    TokenKind::EndOfFile => "EOF",
                    _ => unreachable!(),
                };
                write!(f, "{}", s)
            }
        }
    }
}

/// A token with source location information
pub type Token = Spanned<TokenKind>;

pub fn token(kind: TokenKind, span: Span) -> Token {
    Spanned::new(kind, span)
}
