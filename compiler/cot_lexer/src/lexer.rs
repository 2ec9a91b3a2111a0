//! Lexer implementation for the Cot language
//!
//! Converts a UTF-8 source buffer into a token stream terminated by an EOF
//! token. Tokenization never fails fatally: malformed input produces
//! [`TokenKind::Error`] tokens plus diagnostics, and scanning resumes at the
//! next plausible boundary.

use crate::token::{token, Token, TokenKind};
use cot_common::{Diagnostics, FileId, Position, Span};
use unicode_xid::UnicodeXID;

/// Lexer for the Cot language
pub struct Lexer<'a> {
    input: &'a str,
    input_bytes: &'a [u8],
    position: usize,
    current_pos: Position,
    file_id: FileId,
    diagnostics: Diagnostics,
    /// Brace depth per open `${`; a `}` at depth 0 closes the interpolation.
    interp_stack: Vec<u32>,
    /// Set after emitting InterpEnd: the next token continues the enclosing
    /// string literal.
    resume_string: bool,
    /// Second token of a two-token emission (StringSegment + InterpStart).
    pending: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, file_id: FileId) -> Self {
        Self {
            input,
            input_bytes: input.as_bytes(),
            position: 0,
            current_pos: Position::start(),
            file_id,
            diagnostics: Diagnostics::new(),
            interp_stack: Vec::new(),
            resume_string: false,
            pending: None,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    /// Tokenize the entire input into a vector of tokens, EOF-terminated.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        while let Some(tok) = self.next_token() {
            tokens.push(tok);
        }

        let eof_span = Span::single(self.current_pos, self.file_id);
        tokens.push(token(TokenKind::EndOfFile, eof_span));

        log::debug!(
            "lexed {} tokens from file {} ({} bytes)",
            tokens.len(),
            self.file_id,
            self.input.len()
        );
        tokens
    }

    /// Get the next token from the input, or `None` at end of input.
    pub fn next_token(&mut self) -> Option<Token> {
        if let Some(tok) = self.pending.take() {
            return Some(tok);
        }

        if self.resume_string {
            self.resume_string = false;
            let start_pos = self.current_pos;
            let kind = self.scan_string_run();
            return Some(self.spanned_from(kind, start_pos));
        }

        self.skip_whitespace_and_comments();

        if self.is_at_end() {
            return None;
        }

        let start_pos = self.current_pos;

        let kind = match self.current_char() {
            '(' => { self.advance(); TokenKind::LeftParen }
            ')' => { self.advance(); TokenKind::RightParen }
            '[' => { self.advance(); TokenKind::LeftBracket }
            ']' => { self.advance(); TokenKind::RightBracket }
            ',' => { self.advance(); TokenKind::Comma }
            ';' => { self.advance(); TokenKind::Semicolon }
            '~' => { self.advance(); TokenKind::Tilde }
            '^' => { self.advance(); TokenKind::Caret }
            '{' => self.scan_left_brace(),
            '}' => {
                if let Some(tok) = self.scan_right_brace(start_pos) {
                    return Some(tok);
                }
                TokenKind::RightBrace
            }

            '+' => { self.advance(); TokenKind::Plus }
            '-' => self.scan_minus(),
            '*' => { self.advance(); TokenKind::Star }
            '/' => { self.advance(); TokenKind::Slash }
            '%' => { self.advance(); TokenKind::Percent }
            '=' => self.scan_equal(),
            '!' => self.scan_not(),
            '<' => self.scan_less(),
            '>' => self.scan_greater(),
            '&' => self.scan_and(),
            '|' => self.scan_or(),
            ':' => self.scan_colon(),
            '.' => self.scan_dot(),
            '?' => self.scan_question(),

            '"' => {
                self.advance(); // opening quote
                self.scan_string_run()
            }

            c if c.is_ascii_digit() => self.scan_number(start_pos),

            c if c.is_xid_start() || c == '_' => self.scan_identifier_or_keyword(),

            c => {
                self.advance();
                let msg = format!("unexpected character '{}'", c);
                self.diagnostics.error(&msg, Span::single(start_pos, self.file_id));
                TokenKind::Error(msg)
            }
        };

        Some(self.spanned_from(kind, start_pos))
    }

    fn spanned_from(&self, kind: TokenKind, start_pos: Position) -> Token {
        token(kind, Span::new(start_pos, self.current_pos, self.file_id))
    }

    fn scan_left_brace(&mut self) -> TokenKind {
        self.advance();
        if let Some(depth) = self.interp_stack.last_mut() {
            *depth += 1;
        }
        TokenKind::LeftBrace
    }

    /// A `}` at interpolation depth 0 closes the `${`; otherwise it is an
    /// ordinary delimiter.
    fn scan_right_brace(&mut self, start_pos: Position) -> Option<Token> {
        self.advance();
        match self.interp_stack.last_mut() {
            Some(0) => {
                self.interp_stack.pop();
                self.resume_string = true;
                Some(self.spanned_from(TokenKind::InterpEnd, start_pos))
            }
            Some(depth) => {
                *depth -= 1;
                None
            }
            None => None,
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while !self.is_at_end() {
            match self.current_char() {
                ' ' | '\t' | '\r' => self.advance(),
                '\n' => self.advance_line(),
                '/' if self.peek_char() == Some('/') => self.skip_line_comment(),
                '/' if self.peek_char() == Some('*') => self.skip_block_comment(),
                _ => break,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        // The comment body cannot affect positions except by length, so jump
        // straight to the next newline.
        match memchr::memchr(b'\n', &self.input_bytes[self.position..]) {
            Some(rel) => {
                let target = self.position + rel;
                let skipped = self.input[self.position..target].chars().count() as u32;
                self.position = target;
                self.current_pos.column += skipped;
                self.current_pos.offset = self.position as u32;
            }
            None => {
                let skipped = self.input[self.position..].chars().count() as u32;
                self.position = self.input_bytes.len();
                self.current_pos.column += skipped;
                self.current_pos.offset = self.position as u32;
            }
        }
    }

    /// Block comments do not nest: the first `*/` terminates.
    fn skip_block_comment(&mut self) {
        let open_pos = self.current_pos;
        self.advance(); // '/'
        self.advance(); // '*'

        loop {
            if self.is_at_end() {
                self.diagnostics
                    .error("unterminated block comment", Span::single(open_pos, self.file_id));
                return;
            }
            match self.current_char() {
                '*' if self.peek_char() == Some('/') => {
                    self.advance();
                    self.advance();
                    return;
                }
                '\n' => self.advance_line(),
                _ => self.advance(),
            }
        }
    }

    fn scan_identifier_or_keyword(&mut self) -> TokenKind {
        let start = self.position;

        while !self.is_at_end()
            && (self.current_char().is_xid_continue() || self.current_char() == '_')
        {
            self.advance();
        }

        let identifier = &self.input[start..self.position];
        TokenKind::keyword(identifier)
            .unwrap_or_else(|| TokenKind::Identifier(identifier.to_string()))
    }

    /// Scan string content until the closing quote or a `${` interpolation.
    /// Returns `StringLiteral` for a completed string, or `StringSegment`
    /// (with `InterpStart` queued) when interpolation begins.
    fn scan_string_run(&mut self) -> TokenKind {
        let mut value = String::new();
        let open_pos = self.current_pos;

        loop {
            if self.is_at_end() {
                self.diagnostics
                    .error("unterminated string literal", Span::single(open_pos, self.file_id));
                return TokenKind::Error("unterminated string literal".to_string());
            }
            match self.current_char() {
                '"' => {
                    self.advance();
                    return TokenKind::StringLiteral(value);
                }
                '$' if self.peek_char() == Some('{') => {
                    let interp_pos = self.current_pos;
                    self.advance(); // '$'
                    self.advance(); // '{'
                    self.interp_stack.push(0);
                    let end = self.current_pos;
                    self.pending = Some(token(
                        TokenKind::InterpStart,
                        Span::new(interp_pos, end, self.file_id),
                    ));
                    return TokenKind::StringSegment(value);
                }
                '\\' => {
                    self.advance();
                    match self.scan_escape() {
                        Ok(c) => value.push(c),
                        Err(msg) => return TokenKind::Error(msg),
                    }
                }
                '\n' => {
                    self.advance_line();
                    value.push('\n');
                }
                c => {
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn scan_escape(&mut self) -> Result<char, String> {
        if self.is_at_end() {
            let msg = "unterminated string literal".to_string();
            self.diagnostics.error(&msg, Span::single(self.current_pos, self.file_id));
            return Err(msg);
        }
        let c = self.current_char();
        self.advance();
        match c {
            'n' => Ok('\n'),
            'r' => Ok('\r'),
            't' => Ok('\t'),
            '\\' => Ok('\\'),
            '"' => Ok('"'),
            '0' => Ok('\0'),
            '$' => Ok('$'),
            'x' => {
                let mut byte = 0u8;
                for _ in 0..2 {
                    let d = if self.is_at_end() { None } else { self.current_char().to_digit(16) };
                    match d {
                        Some(d) => {
                            byte = byte * 16 + d as u8;
                            self.advance();
                        }
                        None => {
                            let msg = "\\x escape requires two hex digits".to_string();
                            self.diagnostics
                                .error(&msg, Span::single(self.current_pos, self.file_id));
                            return Err(msg);
                        }
                    }
                }
                Ok(byte as char)
            }
            c => {
                let msg = format!("unknown escape sequence '\\{}'", c);
                self.diagnostics.error(&msg, Span::single(self.current_pos, self.file_id));
                Err(msg)
            }
        }
    }

    fn scan_number(&mut self, start_pos: Position) -> TokenKind {
        let input = self.input;
        let start = self.position;

        if self.current_char() == '0' {
            match self.peek_char() {
                Some('x') | Some('X') => return self.scan_radix_int(start_pos, 16),
                Some('b') | Some('B') => return self.scan_radix_int(start_pos, 2),
                _ => {}
            }
        }

        while !self.is_at_end() && self.current_char().is_ascii_digit() {
            self.advance();
        }

        let mut is_float = false;

        // A '.' only continues the number when followed by a digit, so `1..2`
        // stays a range and `x.1` stays field access.
        if !self.is_at_end()
            && self.current_char() == '.'
            && self.peek_char().map_or(false, |c| c.is_ascii_digit())
        {
            is_float = true;
            self.advance();
            while !self.is_at_end() && self.current_char().is_ascii_digit() {
                self.advance();
            }
        }

        if !self.is_at_end() && matches!(self.current_char(), 'e' | 'E') {
            let mut lookahead = 1;
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                lookahead = 2;
            }
            let digit_next = self.input[self.position..]
                .chars()
                .nth(lookahead)
                .map_or(false, |c| c.is_ascii_digit());
            if digit_next {
                is_float = true;
                self.advance(); // e/E
                if matches!(self.current_char(), '+' | '-') {
                    self.advance();
                }
                while !self.is_at_end() && self.current_char().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        let text = &input[start..self.position];
        if is_float {
            match text.parse::<f64>() {
                Ok(v) => TokenKind::FloatLiteral(v),
                Err(_) => self.number_error(start_pos, text),
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::IntLiteral(v),
                Err(_) => self.number_error(start_pos, text),
            }
        }
    }

    fn scan_radix_int(&mut self, start_pos: Position, radix: u32) -> TokenKind {
        let input = self.input;
        self.advance(); // '0'
        self.advance(); // 'x' or 'b'
        let digits_start = self.position;

        while !self.is_at_end() && (self.current_char().is_digit(radix) || self.current_char() == '_')
        {
            self.advance();
        }

        let digits: String =
            input[digits_start..self.position].chars().filter(|&c| c != '_').collect();
        if digits.is_empty() {
            return self.number_error(start_pos, &input[start_pos.offset as usize..self.position]);
        }
        match i64::from_str_radix(&digits, radix) {
            Ok(v) => TokenKind::IntLiteral(v),
            Err(_) => {
                self.number_error(start_pos, &input[start_pos.offset as usize..self.position])
            }
        }
    }

    fn number_error(&mut self, start_pos: Position, text: &str) -> TokenKind {
        let msg = format!("invalid numeric literal '{}'", text);
        self.diagnostics
            .error(&msg, Span::new(start_pos, self.current_pos, self.file_id));
        TokenKind::Error(msg)
    }

    // Operator scanners: greedy max-munch.
    fn scan_minus(&mut self) -> TokenKind {
        self.advance();
        if self.current_char_is('>') {
            self.advance();
            TokenKind::Arrow
        } else {
            TokenKind::Minus
        }
    }

    fn scan_equal(&mut self) -> TokenKind {
        self.advance();
        match self.current_char_opt() {
            Some('=') => { self.advance(); TokenKind::Equal }
            Some('>') => { self.advance(); TokenKind::FatArrow }
            _ => TokenKind::Assign,
        }
    }

    fn scan_not(&mut self) -> TokenKind {
        self.advance();
        if self.current_char_is('=') {
            self.advance();
            TokenKind::NotEqual
        } else {
            TokenKind::LogicalNot
        }
    }

    fn scan_less(&mut self) -> TokenKind {
        self.advance();
        match self.current_char_opt() {
            Some('=') => { self.advance(); TokenKind::LessEqual }
            Some('<') => { self.advance(); TokenKind::LeftShift }
            _ => TokenKind::Less,
        }
    }

    fn scan_greater(&mut self) -> TokenKind {
        self.advance();
        match self.current_char_opt() {
            Some('=') => { self.advance(); TokenKind::GreaterEqual }
            Some('>') => { self.advance(); TokenKind::RightShift }
            _ => TokenKind::Greater,
        }
    }

    fn scan_and(&mut self) -> TokenKind {
        self.advance();
        if self.current_char_is('&') {
            self.advance();
            TokenKind::LogicalAnd
        } else {
            TokenKind::Ampersand
        }
    }

    fn scan_or(&mut self) -> TokenKind {
        self.advance();
        if self.current_char_is('|') {
            self.advance();
            TokenKind::LogicalOr
        } else {
            TokenKind::Pipe
        }
    }

    fn scan_colon(&mut self) -> TokenKind {
        self.advance();
        if self.current_char_is(':') {
            self.advance();
            TokenKind::DoubleColon
        } else {
            TokenKind::Colon
        }
    }

    fn scan_dot(&mut self) -> TokenKind {
        self.advance();
        if self.current_char_is('.') {
            self.advance();
            if self.current_char_is('=') {
                self.advance();
                TokenKind::RangeInclusive
            } else {
                TokenKind::Range
            }
        } else {
            TokenKind::Dot
        }
    }

    fn scan_question(&mut self) -> TokenKind {
        self.advance();
        match self.current_char_opt() {
            Some('.') => { self.advance(); TokenKind::QuestionDot }
            Some(':') => { self.advance(); TokenKind::QuestionColon }
            _ => TokenKind::Question,
        }
    }

    // Cursor utilities. ASCII fast path, multi-byte slow path.
    fn current_char(&self) -> char {
        if self.position >= self.input_bytes.len() {
            return '\0';
        }
        let byte = self.input_bytes[self.position];
        if byte < 128 {
            return byte as char;
        }
        self.input[self.position..].chars().next().unwrap_or('\0')
    }

    fn current_char_opt(&self) -> Option<char> {
        if self.is_at_end() {
            None
        } else {
            Some(self.current_char())
        }
    }

    fn current_char_is(&self, c: char) -> bool {
        !self.is_at_end() && self.current_char() == c
    }

    fn peek_char(&self) -> Option<char> {
        if self.position >= self.input_bytes.len() {
            return None;
        }
        let mut chars = self.input[self.position..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            let byte = self.input_bytes[self.position];
            if byte < 128 {
                self.position += 1;
            } else if let Some(ch) = self.input[self.position..].chars().next() {
                self.position += ch.len_utf8();
            } else {
                self.position += 1;
            }
            self.current_pos.column += 1;
            self.current_pos.offset = self.position as u32;
        }
    }

    fn advance_line(&mut self) {
        if !self.is_at_end() {
            self.position += 1;
            self.current_pos.line += 1;
            self.current_pos.column = 1;
            self.current_pos.offset = self.position as u32;
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input_bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source, 0).tokenize().into_iter().map(|t| t.value).collect()
    }

    #[test]
    fn empty_source_is_one_eof_token() {
        assert_eq!(kinds(""), vec![TokenKind::EndOfFile]);
    }

    #[test]
    fn max_munch_operators() {
        assert_eq!(
            kinds("..= .. ?. ?: => -> :: << >>"),
            vec![
                TokenKind::RangeInclusive,
                TokenKind::Range,
                TokenKind::QuestionDot,
                TokenKind::QuestionColon,
                TokenKind::FatArrow,
                TokenKind::Arrow,
                TokenKind::DoubleColon,
                TokenKind::LeftShift,
                TokenKind::RightShift,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn int_range_is_not_a_float() {
        assert_eq!(
            kinds("1..2"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::Range,
                TokenKind::IntLiteral(2),
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn hex_and_binary_literals() {
        assert_eq!(
            kinds("0xFF 0b1010"),
            vec![TokenKind::IntLiteral(255), TokenKind::IntLiteral(10), TokenKind::EndOfFile]
        );
    }

    #[test]
    fn float_with_exponent() {
        assert_eq!(
            kinds("1.5e-3"),
            vec![TokenKind::FloatLiteral(1.5e-3), TokenKind::EndOfFile]
        );
    }

    #[test]
    fn interpolation_produces_segment_run() {
        assert_eq!(
            kinds(r#""a${x}b""#),
            vec![
                TokenKind::StringSegment("a".to_string()),
                TokenKind::InterpStart,
                TokenKind::Identifier("x".to_string()),
                TokenKind::InterpEnd,
                TokenKind::StringLiteral("b".to_string()),
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn interpolation_with_nested_braces() {
        // Braces inside the interpolated expression must not close the `${`.
        assert_eq!(
            kinds(r#""v=${Foo{ .x = 1 }.x}""#),
            vec![
                TokenKind::StringSegment("v=".to_string()),
                TokenKind::InterpStart,
                TokenKind::Identifier("Foo".to_string()),
                TokenKind::LeftBrace,
                TokenKind::Dot,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Assign,
                TokenKind::IntLiteral(1),
                TokenKind::RightBrace,
                TokenKind::Dot,
                TokenKind::Identifier("x".to_string()),
                TokenKind::InterpEnd,
                TokenKind::StringLiteral("".to_string()),
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_error_token() {
        let mut lexer = Lexer::new("\"abc", 0);
        let tokens = lexer.tokenize();
        assert!(matches!(tokens[0].value, TokenKind::Error(_)));
        assert!(lexer.diagnostics().has_errors());
    }

    #[test]
    fn block_comments_do_not_nest() {
        // The first */ ends the comment, leaving `x` and then a stray `*/`.
        let toks = kinds("/* /* */ x */");
        assert_eq!(toks[0], TokenKind::Identifier("x".to_string()));
        assert_eq!(toks[1], TokenKind::Star);
        assert_eq!(toks[2], TokenKind::Slash);
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let mut lexer = Lexer::new("var\n  x", 0);
        let tokens = lexer.tokenize();
        assert_eq!(tokens[0].span.start.line, 1);
        assert_eq!(tokens[0].span.start.column, 1);
        assert_eq!(tokens[1].span.start.line, 2);
        assert_eq!(tokens[1].span.start.column, 3);
    }

    #[test]
    fn hex_escape_in_string() {
        assert_eq!(
            kinds(r#""\x41""#),
            vec![TokenKind::StringLiteral("A".to_string()), TokenKind::EndOfFile]
        );
    }
}
