//! Integration tests for the lexer

use cot_lexer::{Lexer, TokenKind};

#[test]
fn tokenizes_a_function_declaration() {
    let source = "fn main() i64 { return 42 }";
    let tokens = Lexer::new(source, 0).tokenize();

    let kinds: Vec<_> = tokens.iter().map(|t| &t.value).collect();
    assert!(matches!(kinds[0], TokenKind::KeywordFn));
    assert!(matches!(kinds[1], TokenKind::Identifier(n) if n == "main"));
    assert!(matches!(kinds[2], TokenKind::LeftParen));
    assert!(matches!(kinds[3], TokenKind::RightParen));
    assert!(matches!(kinds[4], TokenKind::Identifier(n) if n == "i64"));
    assert!(matches!(kinds[5], TokenKind::LeftBrace));
    assert!(matches!(kinds[6], TokenKind::KeywordReturn));
    assert!(matches!(kinds[7], TokenKind::IntLiteral(42)));
    assert!(matches!(kinds[8], TokenKind::RightBrace));
    assert!(matches!(kinds[9], TokenKind::EndOfFile));
}

#[test]
fn round_trips_lexemes_modulo_whitespace() {
    // Re-emitting token lexemes with single spaces must reproduce the
    // source modulo whitespace and comments.
    let source = "fn add ( a : i64 , b : i64 ) i64 { return a + b } // trailing";
    let tokens = Lexer::new(source, 0).tokenize();

    let rendered: Vec<String> = tokens
        .iter()
        .filter(|t| !matches!(t.value, TokenKind::EndOfFile))
        .map(|t| t.value.to_string())
        .collect();
    let expected: Vec<&str> = source
        .split("//")
        .next()
        .unwrap()
        .split_whitespace()
        .collect();
    assert_eq!(rendered, expected);
}

#[test]
fn keywords_are_not_identifiers() {
    let tokens = Lexer::new("defer deferred", 0).tokenize();
    assert!(matches!(tokens[0].value, TokenKind::KeywordDefer));
    assert!(matches!(&tokens[1].value, TokenKind::Identifier(n) if n == "deferred"));
}

#[test]
fn error_tokens_do_not_stop_the_stream() {
    let mut lexer = Lexer::new("var x = @ 1", 0);
    let tokens = lexer.tokenize();
    assert!(tokens.iter().any(|t| t.value.is_error()));
    assert!(tokens.iter().any(|t| matches!(t.value, TokenKind::IntLiteral(1))));
    assert_eq!(lexer.diagnostics().error_count(), 1);
}

#[test]
fn multi_part_interpolation() {
    let tokens = Lexer::new(r#""x=${x} y=${y}!""#, 0).tokenize();
    let kinds: Vec<_> = tokens.into_iter().map(|t| t.value).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::StringSegment("x=".to_string()),
            TokenKind::InterpStart,
            TokenKind::Identifier("x".to_string()),
            TokenKind::InterpEnd,
            TokenKind::StringSegment(" y=".to_string()),
            TokenKind::InterpStart,
            TokenKind::Identifier("y".to_string()),
            TokenKind::InterpEnd,
            TokenKind::StringLiteral("!".to_string()),
            TokenKind::EndOfFile,
        ]
    );
}
