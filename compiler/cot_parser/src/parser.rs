//! Parser implementation
//!
//! Recursive descent for declarations and statements, Pratt parsing for
//! expressions. On a syntax error the parser reports one diagnostic and
//! resynchronizes to the next statement starter or matching close delimiter.

use crate::ast::*;
use crate::precedence::Precedence;
use cot_common::{Diagnostics, Span, Spanned};
use cot_lexer::{token, Token, TokenKind};

/// Parser for the Cot language
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    next_node_id: NodeId,
    diagnostics: Diagnostics,
}

type ParseResult<T> = Result<T, ()>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            next_node_id: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    /// Parse a whole source file.
    pub fn parse_module(&mut self) -> Module {
        let start = self.current_span();
        let mut decls = Vec::new();

        while !self.is_at_end() {
            match self.parse_decl() {
                Ok(decl) => decls.push(decl),
                Err(()) => {
                    let before = self.current;
                    self.recover_to_decl_boundary();
                    // Always make progress, even when the offending token is
                    // itself a boundary.
                    if self.current == before {
                        self.advance();
                    }
                }
            }
        }

        let span = if decls.is_empty() {
            start
        } else {
            start.combine(self.previous_span())
        };
        log::debug!("parsed {} top-level declarations", decls.len());
        Module { decls, span }
    }

    // ---------------------------------------------------------------------
    // Declarations
    // ---------------------------------------------------------------------

    fn parse_decl(&mut self) -> ParseResult<Decl> {
        let is_public = self.match_token(&TokenKind::KeywordPub);

        match self.current_kind() {
            TokenKind::KeywordFn => self.parse_function_decl(is_public),
            TokenKind::KeywordStruct => self.parse_struct_decl(is_public),
            TokenKind::KeywordEnum => self.parse_enum_decl(is_public),
            TokenKind::KeywordImpl => self.parse_impl_block(),
            TokenKind::KeywordTrait => self.parse_trait_decl(is_public),
            TokenKind::KeywordUnion => self.parse_union_decl(is_public),
            TokenKind::KeywordType => self.parse_type_alias(is_public),
            TokenKind::KeywordTest => self.parse_test_decl(),
            TokenKind::KeywordImport => self.parse_import_decl(),
            TokenKind::KeywordComptime => self.parse_comptime_block(),
            _ => {
                self.error_at_current("expected declaration");
                Err(())
            }
        }
    }

    fn parse_function_decl(&mut self, is_public: bool) -> ParseResult<Decl> {
        let start_span = self.current_span();
        let func = self.parse_function(is_public)?;
        Ok(self.decl(DeclKind::Function(func), start_span))
    }

    fn parse_function(&mut self, is_public: bool) -> ParseResult<Function> {
        self.expect(TokenKind::KeywordFn)?;
        let name = self.expect_identifier()?;

        self.expect(TokenKind::LeftParen)?;
        let params = self.parse_parameter_list()?;
        self.expect(TokenKind::RightParen)?;

        // Return type is written directly before the body; absent means void.
        let return_type = if self.check(&TokenKind::LeftBrace) {
            None
        } else {
            Some(self.parse_type()?)
        };

        let body = self.parse_block()?;

        Ok(Function { name, params, return_type, body, is_public })
    }

    fn parse_parameter_list(&mut self) -> ParseResult<Vec<Parameter>> {
        let mut params = Vec::new();
        if self.check(&TokenKind::RightParen) {
            return Ok(params);
        }
        loop {
            let start = self.current_span();
            let name = self.expect_identifier()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            let span = start.combine(self.previous_span());
            params.push(Parameter { name, ty, span });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_struct_decl(&mut self, is_public: bool) -> ParseResult<Decl> {
        let start_span = self.current_span();
        self.expect(TokenKind::KeywordStruct)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LeftBrace)?;
        let fields = self.parse_field_decls()?;
        self.expect(TokenKind::RightBrace)?;
        Ok(self.decl(DeclKind::Struct(StructDecl { name, fields, is_public }), start_span))
    }

    fn parse_field_decls(&mut self) -> ParseResult<Vec<FieldDecl>> {
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let start = self.current_span();
            let name = self.expect_identifier()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            let span = start.combine(self.previous_span());
            fields.push(FieldDecl { name, ty, span });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(fields)
    }

    fn parse_enum_decl(&mut self, is_public: bool) -> ParseResult<Decl> {
        let start_span = self.current_span();
        self.expect(TokenKind::KeywordEnum)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LeftBrace)?;

        let mut variants = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let vstart = self.current_span();
            let vname = self.expect_identifier()?;
            let payload = if self.match_token(&TokenKind::LeftParen) {
                let mut types = Vec::new();
                if !self.check(&TokenKind::RightParen) {
                    loop {
                        types.push(self.parse_type()?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RightParen)?;
                VariantPayload::Tuple(types)
            } else if self.match_token(&TokenKind::LeftBrace) {
                let fields = self.parse_field_decls()?;
                self.expect(TokenKind::RightBrace)?;
                VariantPayload::Struct(fields)
            } else {
                VariantPayload::Unit
            };
            let span = vstart.combine(self.previous_span());
            variants.push(VariantDecl { name: vname, payload, span });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::RightBrace)?;
        Ok(self.decl(DeclKind::Enum(EnumDecl { name, variants, is_public }), start_span))
    }

    fn parse_impl_block(&mut self) -> ParseResult<Decl> {
        let start_span = self.current_span();
        self.expect(TokenKind::KeywordImpl)?;

        // `impl Trait for Type` vs `impl Type`: decide by the `for` keyword.
        let first = self.parse_type()?;
        let (trait_name, self_type) = if self.match_token(&TokenKind::KeywordFor) {
            let trait_name = match *first.kind {
                TypeRefKind::Named { ref name, ref generic_args } if generic_args.is_empty() => {
                    Spanned::new(name.clone(), first.span)
                }
                _ => {
                    self.diagnostics.error("trait name must be a plain identifier", first.span);
                    return Err(());
                }
            };
            (Some(trait_name), self.parse_type()?)
        } else {
            (None, first)
        };

        self.expect(TokenKind::LeftBrace)?;
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let is_public = self.match_token(&TokenKind::KeywordPub);
            methods.push(self.parse_function(is_public)?);
        }
        self.expect(TokenKind::RightBrace)?;

        Ok(self.decl(DeclKind::Impl(ImplBlock { trait_name, self_type, methods }), start_span))
    }

    fn parse_trait_decl(&mut self, is_public: bool) -> ParseResult<Decl> {
        let start_span = self.current_span();
        self.expect(TokenKind::KeywordTrait)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LeftBrace)?;

        let mut methods = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let mstart = self.current_span();
            self.expect(TokenKind::KeywordFn)?;
            let mname = self.expect_identifier()?;
            self.expect(TokenKind::LeftParen)?;
            let params = self.parse_parameter_list()?;
            self.expect(TokenKind::RightParen)?;
            let return_type = if self.check(&TokenKind::RightBrace)
                || self.check_fn_keyword_next()
            {
                None
            } else {
                Some(self.parse_type()?)
            };
            let span = mstart.combine(self.previous_span());
            methods.push(TraitMethod { name: mname, params, return_type, span });
        }
        self.expect(TokenKind::RightBrace)?;

        Ok(self.decl(DeclKind::Trait(TraitDecl { name, methods, is_public }), start_span))
    }

    fn check_fn_keyword_next(&self) -> bool {
        matches!(self.current_kind(), TokenKind::KeywordFn)
    }

    fn parse_union_decl(&mut self, is_public: bool) -> ParseResult<Decl> {
        let start_span = self.current_span();
        self.expect(TokenKind::KeywordUnion)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LeftBrace)?;
        let fields = self.parse_field_decls()?;
        self.expect(TokenKind::RightBrace)?;
        Ok(self.decl(DeclKind::Union(UnionDecl { name, fields, is_public }), start_span))
    }

    fn parse_type_alias(&mut self, is_public: bool) -> ParseResult<Decl> {
        let start_span = self.current_span();
        self.expect(TokenKind::KeywordType)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::Assign)?;
        let ty = self.parse_type()?;
        Ok(self.decl(DeclKind::TypeAlias(TypeAlias { name, ty, is_public }), start_span))
    }

    fn parse_test_decl(&mut self) -> ParseResult<Decl> {
        let start_span = self.current_span();
        self.expect(TokenKind::KeywordTest)?;
        let name = match self.current_kind().clone() {
            TokenKind::StringLiteral(s) => {
                let span = self.current_span();
                self.advance();
                Spanned::new(s, span)
            }
            _ => {
                self.error_at_current("expected test name string");
                return Err(());
            }
        };
        let body = self.parse_block()?;
        Ok(self.decl(DeclKind::Test(TestDecl { name, body }), start_span))
    }

    fn parse_import_decl(&mut self) -> ParseResult<Decl> {
        let start_span = self.current_span();
        self.expect(TokenKind::KeywordImport)?;
        let path = match self.current_kind().clone() {
            TokenKind::StringLiteral(s) => {
                let span = self.current_span();
                self.advance();
                Spanned::new(s, span)
            }
            _ => {
                self.error_at_current("expected import path string");
                return Err(());
            }
        };
        let alias = if self.match_token(&TokenKind::KeywordAs) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        Ok(self.decl(DeclKind::Import(Import { path, alias }), start_span))
    }

    fn parse_comptime_block(&mut self) -> ParseResult<Decl> {
        let start_span = self.current_span();
        self.expect(TokenKind::KeywordComptime)?;
        let body = self.parse_block()?;
        Ok(self.decl(DeclKind::Comptime(body), start_span))
    }

    // ---------------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------------

    pub fn parse_type(&mut self) -> ParseResult<TypeRef> {
        let start = self.current_span();
        match self.current_kind().clone() {
            TokenKind::Star => {
                self.advance();
                let inner = self.parse_type()?;
                Ok(self.type_ref(TypeRefKind::Pointer(inner), start))
            }
            TokenKind::Question => {
                self.advance();
                let inner = self.parse_type()?;
                Ok(self.type_ref(TypeRefKind::Optional(inner), start))
            }
            TokenKind::LeftBracket => {
                self.advance();
                if self.match_token(&TokenKind::RightBracket) {
                    let element = self.parse_type()?;
                    Ok(self.type_ref(TypeRefKind::Slice(element), start))
                } else {
                    let size = match self.current_kind() {
                        TokenKind::IntLiteral(n) if *n >= 0 => *n as u64,
                        _ => {
                            self.error_at_current("expected array length");
                            return Err(());
                        }
                    };
                    self.advance();
                    self.expect(TokenKind::RightBracket)?;
                    let element = self.parse_type()?;
                    Ok(self.type_ref(TypeRefKind::Array { element, size }, start))
                }
            }
            TokenKind::KeywordFn => {
                self.advance();
                self.expect(TokenKind::LeftParen)?;
                let mut params = Vec::new();
                if !self.check(&TokenKind::RightParen) {
                    loop {
                        params.push(self.parse_type()?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RightParen)?;
                let return_type = if self.type_can_start_here() {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                Ok(self.type_ref(TypeRefKind::Function { params, return_type }, start))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                let generic_args = if self.check(&TokenKind::Less) {
                    self.parse_generic_args()?
                } else {
                    Vec::new()
                };
                Ok(self.type_ref(TypeRefKind::Named { name, generic_args }, start))
            }
            _ => {
                self.error_at_current("expected type");
                Err(())
            }
        }
    }

    fn type_can_start_here(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::Identifier(_)
                | TokenKind::Star
                | TokenKind::Question
                | TokenKind::LeftBracket
                | TokenKind::KeywordFn
        )
    }

    fn parse_generic_args(&mut self) -> ParseResult<Vec<TypeRef>> {
        self.expect(TokenKind::Less)?;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        // `>>` closes two nested generic argument lists.
        if self.check(&TokenKind::RightShift) {
            self.advance();
            self.insert_token_at_current(TokenKind::Greater);
        } else {
            self.expect(TokenKind::Greater)?;
        }
        Ok(args)
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    pub fn parse_block(&mut self) -> ParseResult<Block> {
        let start = self.current_span();
        self.expect(TokenKind::LeftBrace)?;

        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(()) => {
                    let before = self.current;
                    self.recover_to_stmt_boundary();
                    if self.check(&TokenKind::RightBrace) {
                        break;
                    }
                    if self.current == before {
                        self.advance();
                    }
                }
            }
        }

        self.expect(TokenKind::RightBrace)?;
        let span = start.combine(self.previous_span());
        Ok(Block { statements, span })
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.current_span();
        let kind = match self.current_kind() {
            TokenKind::KeywordVar => self.parse_let(false)?,
            TokenKind::KeywordConst => self.parse_let(true)?,
            TokenKind::KeywordReturn => {
                self.advance();
                let value = if self.check(&TokenKind::RightBrace)
                    || self.check(&TokenKind::Semicolon)
                {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                StmtKind::Return(value)
            }
            TokenKind::KeywordIf => self.parse_if()?,
            TokenKind::KeywordWhile => {
                self.advance();
                let condition = self.parse_paren_condition()?;
                let body = self.parse_block()?;
                StmtKind::While { condition, body }
            }
            TokenKind::KeywordFor => {
                self.advance();
                let binding = self.expect_identifier()?;
                self.expect(TokenKind::KeywordIn)?;
                let iterable = self.parse_expr()?;
                let body = self.parse_block()?;
                StmtKind::For(ForStmt { binding, iterable, body })
            }
            TokenKind::KeywordSwitch => self.parse_switch()?,
            TokenKind::KeywordLoop => {
                self.advance();
                StmtKind::Loop(self.parse_block()?)
            }
            TokenKind::KeywordBreak => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::KeywordContinue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::KeywordDefer => {
                self.advance();
                StmtKind::Defer(self.parse_expr()?)
            }
            TokenKind::KeywordTry => self.parse_try_catch()?,
            TokenKind::KeywordThrow => {
                self.advance();
                StmtKind::Throw(self.parse_expr()?)
            }
            TokenKind::LeftBrace => StmtKind::Block(self.parse_block()?),
            TokenKind::KeywordFn
            | TokenKind::KeywordStruct
            | TokenKind::KeywordEnum
            | TokenKind::KeywordImpl
            | TokenKind::KeywordTrait
            | TokenKind::KeywordUnion
            | TokenKind::KeywordType => {
                let decl = self.parse_decl()?;
                StmtKind::Decl(decl)
            }
            _ => {
                // Expression statement or assignment.
                let expr = self.parse_expr()?;
                if self.match_token(&TokenKind::Assign) {
                    let value = self.parse_expr()?;
                    StmtKind::Assign { target: expr, value }
                } else {
                    StmtKind::Expr(expr)
                }
            }
        };

        // Semicolons are optional separators.
        self.match_token(&TokenKind::Semicolon);

        let span = start.combine(self.previous_span());
        Ok(self.stmt(kind, span))
    }

    fn parse_let(&mut self, is_const: bool) -> ParseResult<StmtKind> {
        self.advance(); // var/const
        let name = self.expect_identifier()?;

        let ty = if self.match_token(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let initializer = if self.match_token(&TokenKind::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        if is_const && initializer.is_none() {
            self.diagnostics.error("const declaration requires an initializer", name.span);
        }
        if ty.is_none() && initializer.is_none() {
            self.diagnostics
                .error("declaration needs a type annotation or an initializer", name.span);
        }

        Ok(StmtKind::Let(LetStmt { name, ty, initializer, is_const }))
    }

    /// Conditions may be written with or without parentheses.
    fn parse_paren_condition(&mut self) -> ParseResult<Expr> {
        if self.match_token(&TokenKind::LeftParen) {
            let condition = self.parse_expr()?;
            self.expect(TokenKind::RightParen)?;
            Ok(condition)
        } else {
            self.parse_expr()
        }
    }

    fn parse_if(&mut self) -> ParseResult<StmtKind> {
        self.advance(); // if
        let condition = self.parse_paren_condition()?;
        let then_branch = self.parse_block()?;

        let else_branch = if self.match_token(&TokenKind::KeywordElse) {
            if self.check(&TokenKind::KeywordIf) {
                let start = self.current_span();
                let kind = self.parse_if()?;
                let span = start.combine(self.previous_span());
                Some(Box::new(self.stmt(kind, span)))
            } else {
                let start = self.current_span();
                let block = self.parse_block()?;
                let span = start.combine(self.previous_span());
                Some(Box::new(self.stmt(StmtKind::Block(block), span)))
            }
        } else {
            None
        };

        Ok(StmtKind::If(IfStmt { condition, then_branch, else_branch }))
    }

    fn parse_switch(&mut self) -> ParseResult<StmtKind> {
        self.advance(); // switch
        let scrutinee = self.parse_paren_condition()?;
        self.expect(TokenKind::LeftBrace)?;

        let mut arms = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let astart = self.current_span();
            let pattern = self.parse_pattern()?;
            self.expect(TokenKind::FatArrow)?;
            let body = self.parse_block()?;
            let span = astart.combine(self.previous_span());
            arms.push(SwitchArm { pattern, body, span });
            self.match_token(&TokenKind::Comma);
        }
        self.expect(TokenKind::RightBrace)?;

        Ok(StmtKind::Switch(SwitchStmt { scrutinee, arms }))
    }

    fn parse_pattern(&mut self) -> ParseResult<Pattern> {
        match self.current_kind().clone() {
            TokenKind::Underscore => {
                self.advance();
                Ok(Pattern::Wildcard)
            }
            TokenKind::Identifier(name) => {
                let span = self.current_span();
                self.advance();
                let name = Spanned::new(name, span);
                let mut bindings = Vec::new();
                if self.match_token(&TokenKind::LeftParen) {
                    if !self.check(&TokenKind::RightParen) {
                        loop {
                            bindings.push(self.expect_identifier()?);
                            if !self.match_token(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RightParen)?;
                }
                Ok(Pattern::Variant { name, bindings })
            }
            TokenKind::IntLiteral(_)
            | TokenKind::StringLiteral(_)
            | TokenKind::BoolLiteral(_)
            | TokenKind::Minus => {
                let expr = self.parse_expr()?;
                Ok(Pattern::Literal(expr))
            }
            _ => {
                self.error_at_current("expected switch pattern");
                Err(())
            }
        }
    }

    fn parse_try_catch(&mut self) -> ParseResult<StmtKind> {
        self.advance(); // try
        let try_block = self.parse_block()?;
        self.expect(TokenKind::KeywordCatch)?;
        self.expect(TokenKind::LeftParen)?;
        let catch_binding = self.expect_identifier()?;
        self.expect(TokenKind::RightParen)?;
        let catch_block = self.parse_block()?;
        Ok(StmtKind::TryCatch(TryCatchStmt { try_block, catch_binding, catch_block }))
    }

    // ---------------------------------------------------------------------
    // Expressions (Pratt)
    // ---------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.parse_coalesce()?;

        if self.check(&TokenKind::Question) && !self.next_is(&TokenKind::LeftBracket) {
            let start = condition.span;
            self.advance(); // ?
            let then_value = self.parse_expr()?;
            self.expect(TokenKind::Colon)?;
            let else_value = self.parse_ternary()?;
            let span = start.combine(self.previous_span());
            return Ok(self.expr(ExprKind::Ternary { condition, then_value, else_value }, span));
        }

        Ok(condition)
    }

    fn parse_coalesce(&mut self) -> ParseResult<Expr> {
        let value = self.parse_binary(Precedence::Or)?;
        if self.match_token(&TokenKind::QuestionColon) {
            let start = value.span;
            let fallback = self.parse_coalesce()?;
            let span = start.combine(self.previous_span());
            return Ok(self.expr(ExprKind::NullCoalesce { value, fallback }, span));
        }
        Ok(value)
    }

    fn binary_op_of(kind: &TokenKind) -> Option<(BinaryOp, Precedence)> {
        let entry = match kind {
            TokenKind::LogicalOr => (BinaryOp::Or, Precedence::Or),
            TokenKind::LogicalAnd => (BinaryOp::And, Precedence::And),
            TokenKind::Equal => (BinaryOp::Eq, Precedence::Equality),
            TokenKind::NotEqual => (BinaryOp::Ne, Precedence::Equality),
            TokenKind::Less => (BinaryOp::Lt, Precedence::Comparison),
            TokenKind::LessEqual => (BinaryOp::Le, Precedence::Comparison),
            TokenKind::Greater => (BinaryOp::Gt, Precedence::Comparison),
            TokenKind::GreaterEqual => (BinaryOp::Ge, Precedence::Comparison),
            TokenKind::Plus => (BinaryOp::Add, Precedence::Term),
            TokenKind::Minus => (BinaryOp::Sub, Precedence::Term),
            TokenKind::Pipe => (BinaryOp::BitOr, Precedence::Term),
            TokenKind::Caret => (BinaryOp::BitXor, Precedence::Term),
            TokenKind::Star => (BinaryOp::Mul, Precedence::Factor),
            TokenKind::Slash => (BinaryOp::Div, Precedence::Factor),
            TokenKind::Percent => (BinaryOp::Mod, Precedence::Factor),
            TokenKind::Ampersand => (BinaryOp::BitAnd, Precedence::Factor),
            TokenKind::LeftShift => (BinaryOp::Shl, Precedence::Factor),
            TokenKind::RightShift => (BinaryOp::Shr, Precedence::Factor),
            _ => return None,
        };
        Some(entry)
    }

    /// Precedence-climbing loop for left-associative binary operators, with
    /// the range and cast/test levels folded in at their spots.
    fn parse_binary(&mut self, min_prec: Precedence) -> ParseResult<Expr> {
        let mut left = if min_prec >= Precedence::Term {
            self.parse_unary()?
        } else {
            self.parse_range_level(min_prec)?
        };

        loop {
            let Some((op, prec)) = Self::binary_op_of(self.current_kind()) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let next_prec = Self::next_higher(prec);
            let right = self.parse_binary(next_prec)?;
            let span = left.span.combine(right.span);
            left = self.expr(ExprKind::Binary { op, left, right }, span);
        }

        Ok(left)
    }

    fn next_higher(prec: Precedence) -> Precedence {
        match prec {
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Range,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            _ => Precedence::Unary,
        }
    }

    /// Handles the `..`/`..=` and `as`/`is` levels between comparison and
    /// the additive operators.
    fn parse_range_level(&mut self, min_prec: Precedence) -> ParseResult<Expr> {
        if min_prec > Precedence::Range {
            return self.parse_cast_level();
        }
        let start = self.parse_cast_level()?;

        let inclusive = match self.current_kind() {
            TokenKind::Range => false,
            TokenKind::RangeInclusive => true,
            _ => return Ok(start),
        };
        self.advance();
        let end = self.parse_cast_level()?;
        let span = start.span.combine(end.span);
        Ok(self.expr(ExprKind::Range { start, end, inclusive }, span))
    }

    fn parse_cast_level(&mut self) -> ParseResult<Expr> {
        let mut operand = self.parse_binary(Precedence::Term)?;

        loop {
            if self.match_token(&TokenKind::KeywordAs) {
                let ty = self.parse_type()?;
                let span = operand.span.combine(self.previous_span());
                operand = self.expr(ExprKind::Cast { operand, ty }, span);
            } else if self.match_token(&TokenKind::KeywordIs) {
                let ty = self.parse_type()?;
                let span = operand.span.combine(self.previous_span());
                operand = self.expr(ExprKind::TypeTest { operand, ty }, span);
            } else {
                break;
            }
        }

        Ok(operand)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let op = match self.current_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::LogicalNot => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Star => Some(UnaryOp::Deref),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.combine(operand.span);
            return Ok(self.expr(ExprKind::Unary { op, operand }, span));
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.current_kind() {
                TokenKind::LeftParen => {
                    self.advance();
                    let args = self.parse_call_args()?;
                    let span = expr.span.combine(self.previous_span());
                    expr = self.expr(ExprKind::Call { callee: expr, args }, span);
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RightBracket)?;
                    let span = expr.span.combine(self.previous_span());
                    expr = self.index_or_slice(expr, index, span);
                }
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_identifier()?;
                    if self.match_token(&TokenKind::LeftParen) {
                        let args = self.parse_call_args()?;
                        let span = expr.span.combine(self.previous_span());
                        expr = self.expr(
                            ExprKind::MethodCall { receiver: expr, method: field, args },
                            span,
                        );
                    } else {
                        let span = expr.span.combine(field.span);
                        expr = self.expr(ExprKind::Field { receiver: expr, field }, span);
                    }
                }
                TokenKind::QuestionDot => {
                    self.advance();
                    let field = self.expect_identifier()?;
                    let span = expr.span.combine(field.span);
                    expr = self.expr(ExprKind::OptionalField { receiver: expr, field }, span);
                }
                TokenKind::Question if self.next_is(&TokenKind::LeftBracket) => {
                    self.advance(); // ?
                    self.advance(); // [
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RightBracket)?;
                    let span = expr.span.combine(self.previous_span());
                    expr = self.expr(ExprKind::OptionalIndex { receiver: expr, index }, span);
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// `e[a..b]` becomes a slice; any other index expression stays an index.
    fn index_or_slice(&mut self, receiver: Expr, index: Expr, span: Span) -> Expr {
        if let ExprKind::Range { start, end, inclusive } = *index.kind {
            let (start, end) = if inclusive {
                // Normalize `a..=b` to an exclusive end of `b + 1`.
                let one = self.expr(ExprKind::IntLiteral(1), end.span);
                let bump_span = end.span;
                let bumped = self.expr(
                    ExprKind::Binary { op: BinaryOp::Add, left: end, right: one },
                    bump_span,
                );
                (start, bumped)
            } else {
                (start, end)
            };
            self.expr(ExprKind::Slice { receiver, start, end }, span)
        } else {
            self.expr(ExprKind::Index { receiver, index }, span)
        }
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        match self.current_kind().clone() {
            TokenKind::IntLiteral(n) => {
                self.advance();
                Ok(self.expr(ExprKind::IntLiteral(n), start))
            }
            TokenKind::FloatLiteral(v) => {
                self.advance();
                Ok(self.expr(ExprKind::FloatLiteral(v), start))
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(self.expr(ExprKind::StringLiteral(s), start))
            }
            TokenKind::BoolLiteral(b) => {
                self.advance();
                Ok(self.expr(ExprKind::BoolLiteral(b), start))
            }
            TokenKind::KeywordNull => {
                self.advance();
                Ok(self.expr(ExprKind::NullLiteral, start))
            }
            TokenKind::StringSegment(_) => self.parse_interpolated_string(),
            TokenKind::Identifier(name) => self.parse_identifier_expr(name),
            TokenKind::KeywordNew => self.parse_new_expr(),
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RightParen)?;
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RightBracket) {
                    loop {
                        elements.push(self.parse_expr()?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RightBracket)?;
                let span = start.combine(self.previous_span());
                Ok(self.expr(ExprKind::ArrayInit { elements }, span))
            }
            TokenKind::Pipe => self.parse_lambda(),
            _ => {
                self.error_at_current("expected expression");
                Err(())
            }
        }
    }

    fn parse_identifier_expr(&mut self, name: String) -> ParseResult<Expr> {
        let start = self.current_span();
        self.advance();
        let name = Spanned::new(name, start);

        // `Enum::Variant` or `Enum::Variant(args)`
        if self.match_token(&TokenKind::DoubleColon) {
            let variant = self.expect_identifier()?;
            let args = if self.match_token(&TokenKind::LeftParen) {
                self.parse_call_args()?
            } else {
                Vec::new()
            };
            let span = start.combine(self.previous_span());
            return Ok(self.expr(
                ExprKind::VariantInit { enum_name: name, variant, args },
                span,
            ));
        }

        // `Foo{ .field = e }` struct initialization. The leading dot (or an
        // immediately closing brace) disambiguates from block statements.
        if self.check(&TokenKind::LeftBrace) && self.struct_init_ahead() {
            let ty = self.type_ref(
                TypeRefKind::Named { name: name.value.clone(), generic_args: Vec::new() },
                start,
            );
            return self.parse_struct_init_body(ty, false, start);
        }

        Ok(self.expr(ExprKind::Identifier(name.value), start))
    }

    /// Lookahead for `{ .` which begins a struct initializer field list.
    fn struct_init_ahead(&self) -> bool {
        matches!(self.peek_kind(1), Some(TokenKind::Dot))
    }

    fn parse_struct_init_body(
        &mut self,
        ty: TypeRef,
        heap: bool,
        start: Span,
    ) -> ParseResult<Expr> {
        self.expect(TokenKind::LeftBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let fstart = self.current_span();
            self.expect(TokenKind::Dot)?;
            let fname = self.expect_identifier()?;
            self.expect(TokenKind::Assign)?;
            let value = self.parse_expr()?;
            let span = fstart.combine(self.previous_span());
            fields.push(FieldInit { name: fname, value, span });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace)?;
        let span = start.combine(self.previous_span());
        Ok(self.expr(ExprKind::StructInit { ty, fields, heap }, span))
    }

    /// `new Foo{ .. }` heap-allocates a struct; `new List<T>` / `new Map<K,V>`
    /// constructs an empty collection.
    fn parse_new_expr(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        self.expect(TokenKind::KeywordNew)?;
        let ty = self.parse_type()?;

        if self.check(&TokenKind::LeftBrace) {
            return self.parse_struct_init_body(ty, true, start);
        }

        let span = start.combine(self.previous_span());
        Ok(self.expr(ExprKind::CollectionInit { ty }, span))
    }

    fn parse_lambda(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        self.expect(TokenKind::Pipe)?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::Pipe) {
            loop {
                let pstart = self.current_span();
                let name = self.expect_identifier()?;
                let ty = if self.match_token(&TokenKind::Colon) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                let span = pstart.combine(self.previous_span());
                params.push(LambdaParam { name, ty, span });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Pipe)?;

        // Either a block body or a single expression body.
        let body = if self.check(&TokenKind::LeftBrace) {
            self.parse_block()?
        } else {
            let expr = self.parse_expr()?;
            let span = expr.span;
            let ret = self.stmt(StmtKind::Return(Some(expr)), span);
            Block { statements: vec![ret], span }
        };

        let span = start.combine(self.previous_span());
        Ok(self.expr(ExprKind::Lambda { params, body }, span))
    }

    fn parse_interpolated_string(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let mut segments = Vec::new();
        let mut exprs = Vec::new();

        loop {
            match self.current_kind().clone() {
                TokenKind::StringSegment(s) => {
                    self.advance();
                    segments.push(s);
                    self.expect(TokenKind::InterpStart)?;
                    exprs.push(self.parse_expr()?);
                    self.expect(TokenKind::InterpEnd)?;
                }
                TokenKind::StringLiteral(s) => {
                    self.advance();
                    segments.push(s);
                    break;
                }
                _ => {
                    self.error_at_current("malformed interpolated string");
                    return Err(());
                }
            }
        }

        let span = start.combine(self.previous_span());
        Ok(self.expr(ExprKind::InterpolatedString { segments, exprs }, span))
    }

    // ---------------------------------------------------------------------
    // Error recovery
    // ---------------------------------------------------------------------

    fn recover_to_decl_boundary(&mut self) {
        let mut depth = 0usize;
        while !self.is_at_end() {
            match self.current_kind() {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                    depth -= 1;
                }
                k if depth == 0 && k.starts_statement() => return,
                _ => {}
            }
            self.advance();
        }
    }

    fn recover_to_stmt_boundary(&mut self) {
        let mut depth = 0usize;
        while !self.is_at_end() {
            match self.current_kind() {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    if depth == 0 {
                        return; // caller closes the block
                    }
                    depth -= 1;
                }
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                k if depth == 0 && k.starts_statement() => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---------------------------------------------------------------------
    // Token utilities
    // ---------------------------------------------------------------------

    fn expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        Expr { kind: Box::new(kind), span, id: self.next_id() }
    }

    fn stmt(&mut self, kind: StmtKind, span: Span) -> Stmt {
        Stmt { kind, span, id: self.next_id() }
    }

    fn decl(&mut self, kind: DeclKind, start: Span) -> Decl {
        let span = start.combine(self.previous_span());
        Decl { kind, span, id: self.next_id() }
    }

    fn type_ref(&mut self, kind: TypeRefKind, start: Span) -> TypeRef {
        let span = start.combine(self.previous_span());
        TypeRef { kind: Box::new(kind), span }
    }

    fn next_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    fn current_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.current)
            .map(|t| &t.value)
            .unwrap_or(&TokenKind::EndOfFile)
    }

    fn peek_kind(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + offset).map(|t| &t.value)
    }

    fn next_is(&self, kind: &TokenKind) -> bool {
        self.peek_kind(1) == Some(kind)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.current)
            .map(|t| t.span)
            .unwrap_or_else(Span::dummy)
    }

    fn previous_span(&self) -> Span {
        if self.current == 0 {
            return self.current_span();
        }
        self.tokens
            .get(self.current - 1)
            .map(|t| t.span)
            .unwrap_or_else(Span::dummy)
    }

    fn advance(&mut self) {
        if self.current < self.tokens.len() {
            self.current += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::EndOfFile)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current_kind() == kind
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<()> {
        if self.match_token(&kind) {
            Ok(())
        } else {
            self.error_at_current(&format!("expected '{}'", kind));
            Err(())
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<Spanned<String>> {
        match self.current_kind().clone() {
            TokenKind::Identifier(name) => {
                let span = self.current_span();
                self.advance();
                Ok(Spanned::new(name, span))
            }
            _ => {
                self.error_at_current("expected identifier");
                Err(())
            }
        }
    }

    fn error_at_current(&mut self, message: &str) {
        let msg = format!("{}, found '{}'", message, self.current_kind());
        self.diagnostics.error(msg, self.current_span());
    }

    fn insert_token_at_current(&mut self, kind: TokenKind) {
        let span = self.current_span();
        self.tokens.insert(self.current, token(kind, span));
    }
}
