//! Abstract Syntax Tree definitions for the Cot language
//!
//! Three entity families: declarations/statements, expressions, and type
//! references. Children are heap-allocated (`Box`) and always present when
//! the grammar requires them; optional children are `Option`. Growing lists
//! are frozen into `Vec`s before being attached to their parent.

use cot_common::{Span, Spanned};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type alias for node IDs
pub type NodeId = u32;

/// A complete Cot source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub decls: Vec<Decl>,
    pub span: Span,
}

/// Top-level declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decl {
    pub kind: DeclKind,
    pub span: Span,
    pub id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeclKind {
    Function(Function),
    Struct(StructDecl),
    Enum(EnumDecl),
    Impl(ImplBlock),
    Trait(TraitDecl),
    Union(UnionDecl),
    TypeAlias(TypeAlias),
    Test(TestDecl),
    Import(Import),
    Comptime(Block),
}

/// Function definition: `fn name(params) ret { body }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: Spanned<String>,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeRef>,
    pub body: Block,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: Spanned<String>,
    pub ty: TypeRef,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: Spanned<String>,
    pub fields: Vec<FieldDecl>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: Spanned<String>,
    pub ty: TypeRef,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: Spanned<String>,
    pub variants: Vec<VariantDecl>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantDecl {
    pub name: Spanned<String>,
    pub payload: VariantPayload,
    pub span: Span,
}

/// Enum variants may carry a tuple payload `Name(T1, T2)` or a struct-like
/// payload `Name { field: T }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VariantPayload {
    Unit,
    Tuple(Vec<TypeRef>),
    Struct(Vec<FieldDecl>),
}

/// `impl Type { .. }` or `impl Trait for Type { .. }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplBlock {
    pub trait_name: Option<Spanned<String>>,
    pub self_type: TypeRef,
    pub methods: Vec<Function>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitDecl {
    pub name: Spanned<String>,
    pub methods: Vec<TraitMethod>,
    pub is_public: bool,
}

/// Trait method signature (no body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitMethod {
    pub name: Spanned<String>,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeRef>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionDecl {
    pub name: Spanned<String>,
    pub fields: Vec<FieldDecl>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeAlias {
    pub name: Spanned<String>,
    pub ty: TypeRef,
    pub is_public: bool,
}

/// `test "name" { body }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDecl {
    pub name: Spanned<String>,
    pub body: Block,
}

/// `import "path"` with optional `as alias`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub path: Spanned<String>,
    pub alias: Option<Spanned<String>>,
}

/// Block of statements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

/// Statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
    pub id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    /// `var x = e` / `var x: T = e` / `const X = e`
    Let(LetStmt),
    /// `lvalue = e`
    Assign { target: Expr, value: Expr },
    Expr(Expr),
    Return(Option<Expr>),
    If(IfStmt),
    While { condition: Expr, body: Block },
    /// `for x in e { .. }`; `e` is a range or a collection.
    For(ForStmt),
    Block(Block),
    Switch(SwitchStmt),
    /// `loop { .. }`
    Loop(Block),
    Break,
    Continue,
    /// `defer e`; runs LIFO on every scope exit.
    Defer(Expr),
    TryCatch(TryCatchStmt),
    Throw(Expr),
    /// Nested declaration (function-local struct, etc.)
    Decl(Decl),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetStmt {
    pub name: Spanned<String>,
    pub ty: Option<TypeRef>,
    pub initializer: Option<Expr>,
    pub is_const: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_branch: Block,
    pub else_branch: Option<Box<Stmt>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForStmt {
    pub binding: Spanned<String>,
    pub iterable: Expr,
    pub body: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchStmt {
    pub scrutinee: Expr,
    pub arms: Vec<SwitchArm>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchArm {
    pub pattern: Pattern,
    pub body: Block,
    pub span: Span,
}

/// Switch arm patterns: a literal, an enum variant with payload bindings, or
/// the wildcard `_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Pattern {
    Literal(Expr),
    Variant { name: Spanned<String>, bindings: Vec<Spanned<String>> },
    Wildcard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryCatchStmt {
    pub try_block: Block,
    pub catch_binding: Spanned<String>,
    pub catch_block: Block,
}

/// Expression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: Box<ExprKind>,
    pub span: Span,
    pub id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    BoolLiteral(bool),
    NullLiteral,
    Identifier(String),
    Unary { op: UnaryOp, operand: Expr },
    Binary { op: BinaryOp, left: Expr, right: Expr },
    /// `cond ? a : b`
    Ternary { condition: Expr, then_value: Expr, else_value: Expr },
    /// `a ?: b` — `a` unless it is null, then `b`.
    NullCoalesce { value: Expr, fallback: Expr },
    Call { callee: Expr, args: Vec<Expr> },
    MethodCall { receiver: Expr, method: Spanned<String>, args: Vec<Expr> },
    Field { receiver: Expr, field: Spanned<String> },
    /// `recv?.field`; yields null when the receiver is null.
    OptionalField { receiver: Expr, field: Spanned<String> },
    Index { receiver: Expr, index: Expr },
    /// `recv?[i]`
    OptionalIndex { receiver: Expr, index: Expr },
    Slice { receiver: Expr, start: Expr, end: Expr },
    Range { start: Expr, end: Expr, inclusive: bool },
    Cast { operand: Expr, ty: TypeRef },
    /// `e is T`
    TypeTest { operand: Expr, ty: TypeRef },
    /// `Foo{ .a = 1 }`; `new Foo{ .. }` heap-allocates and yields `*Foo`.
    StructInit { ty: TypeRef, fields: Vec<FieldInit>, heap: bool },
    /// `new List<T>` / `new Map<K, V>`
    CollectionInit { ty: TypeRef },
    ArrayInit { elements: Vec<Expr> },
    Lambda { params: Vec<LambdaParam>, body: Block },
    /// `"a${x}b"`: literal segments interleaved with expressions; there is
    /// always one more segment than expressions.
    InterpolatedString { segments: Vec<String>, exprs: Vec<Expr> },
    /// `Enum::Variant(args)` construction.
    VariantInit { enum_name: Spanned<String>, variant: Spanned<String>, args: Vec<Expr> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInit {
    pub name: Spanned<String>,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LambdaParam {
    pub name: Spanned<String>,
    pub ty: Option<TypeRef>,
    pub span: Span,
}

/// Type reference as written in source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRef {
    pub kind: Box<TypeRefKind>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeRefKind {
    /// `i64`, `string`, `Foo`, `List<T>`
    Named { name: String, generic_args: Vec<TypeRef> },
    /// `*T`
    Pointer(TypeRef),
    /// `?T`
    Optional(TypeRef),
    /// `[N]T`
    Array { element: TypeRef, size: u64 },
    /// `[]T`
    Slice(TypeRef),
    /// `fn(T1, T2) R`
    Function { params: Vec<TypeRef>, return_type: Option<TypeRef> },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add, Sub, Mul, Div, Mod,
    Eq, Ne, Lt, Le, Gt, Ge,
    And, Or,
    BitAnd, BitOr, BitXor, Shl, Shr,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,    // -
    Not,    // !
    BitNot, // ~
    Deref,  // *
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        };
        write!(f, "{}", op)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::Deref => "*",
        };
        write!(f, "{}", op)
    }
}

impl fmt::Display for TypeRefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRefKind::Named { name, generic_args } => {
                write!(f, "{}", name)?;
                if !generic_args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in generic_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg.kind)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            TypeRefKind::Pointer(inner) => write!(f, "*{}", inner.kind),
            TypeRefKind::Optional(inner) => write!(f, "?{}", inner.kind),
            TypeRefKind::Array { element, size } => write!(f, "[{}]{}", size, element.kind),
            TypeRefKind::Slice(inner) => write!(f, "[]{}", inner.kind),
            TypeRefKind::Function { params, return_type } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p.kind)?;
                }
                write!(f, ")")?;
                if let Some(ret) = return_type {
                    write!(f, " {}", ret.kind)?;
                }
                Ok(())
            }
        }
    }
}
