//! Type checking implementation
//!
//! Two passes: collect registers every top-level type and signature so
//! forward references resolve, then check walks each body. Every expression
//! node gets a resolved type id recorded in the side table; errors poison
//! the expression with the error sentinel so one mistake produces one
//! diagnostic.

use crate::scope::{ScopeStack, Symbol, SymbolKind};
use crate::types::{EnumVariant, PrimitiveType, TypeDesc, TypeId, TypeRegistry};
use cot_common::{Diagnostics, Span};
use cot_parser::*;
use hashbrown::HashMap;

/// Signature of a callable, free function or method.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub params: Vec<(String, TypeId)>,
    pub ret: TypeId,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
struct TraitMethodSig {
    name: String,
    params: Vec<TypeId>,
    ret: TypeId,
}

/// Everything downstream phases need from type checking.
#[derive(Debug)]
pub struct CheckedModule {
    pub registry: TypeRegistry,
    pub expr_types: HashMap<NodeId, TypeId>,
    pub functions: HashMap<String, FunctionInfo>,
    /// Function symbol names in declaration order; methods are mangled as
    /// `Type::method`.
    pub function_order: Vec<String>,
    /// MethodCall node -> resolved function symbol, for user-defined methods.
    pub method_targets: HashMap<NodeId, String>,
    pub named_types: HashMap<String, TypeId>,
}

/// Type checker
pub struct TypeChecker {
    registry: TypeRegistry,
    scopes: ScopeStack,
    diagnostics: Diagnostics,
    functions: HashMap<String, FunctionInfo>,
    function_order: Vec<String>,
    named_types: HashMap<String, TypeId>,
    traits: HashMap<String, Vec<TraitMethodSig>>,
    /// (receiver base type, method name) -> function symbol name
    methods: HashMap<(TypeId, String), String>,
    expr_types: HashMap<NodeId, TypeId>,
    method_targets: HashMap<NodeId, String>,
    current_return: TypeId,
    /// Symbol name of the function being checked; local functions mangle
    /// their routine names under it.
    current_function: String,
    in_lambda: bool,
    loop_depth: u32,
}

impl TypeChecker {
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::new(),
            scopes: ScopeStack::new(),
            diagnostics: Diagnostics::new(),
            functions: HashMap::new(),
            function_order: Vec::new(),
            named_types: HashMap::new(),
            traits: HashMap::new(),
            methods: HashMap::new(),
            expr_types: HashMap::new(),
            method_targets: HashMap::new(),
            current_return: 0,
            current_function: String::new(),
            in_lambda: false,
            loop_depth: 0,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn check_module(mut self, module: &Module) -> (CheckedModule, Diagnostics) {
        self.collect(module);
        self.check_bodies(module);

        log::debug!(
            "type checking finished: {} functions, {} types, {} errors",
            self.functions.len(),
            self.registry.len(),
            self.diagnostics.error_count()
        );

        let checked = CheckedModule {
            registry: self.registry,
            expr_types: self.expr_types,
            functions: self.functions,
            function_order: self.function_order,
            method_targets: self.method_targets,
            named_types: self.named_types,
        };
        (checked, self.diagnostics)
    }

    // ------------------------------------------------------------------
    // Pass 1: collect declarations
    // ------------------------------------------------------------------

    fn collect(&mut self, module: &Module) {
        // Forward-declare nominal types so fields can reference each other.
        for decl in &module.decls {
            match &decl.kind {
                DeclKind::Struct(s) => {
                    self.declare_named(&s.name.value, decl.span, |reg| {
                        reg.declare(TypeDesc::Struct { name: s.name.value.clone(), fields: vec![] })
                    });
                }
                DeclKind::Enum(e) => {
                    self.declare_named(&e.name.value, decl.span, |reg| {
                        reg.declare(TypeDesc::Enum { name: e.name.value.clone(), variants: vec![] })
                    });
                }
                DeclKind::Union(u) => {
                    // Unions reuse the struct layout with overlapping slots.
                    self.declare_named(&u.name.value, decl.span, |reg| {
                        reg.declare(TypeDesc::Struct { name: u.name.value.clone(), fields: vec![] })
                    });
                }
                _ => {}
            }
        }

        // Fill in field and variant types.
        for decl in &module.decls {
            match &decl.kind {
                DeclKind::Struct(s) => {
                    let id = self.named_types[&s.name.value];
                    let fields = self.collect_fields(&s.fields);
                    self.registry.define(id, TypeDesc::Struct { name: s.name.value.clone(), fields });
                }
                DeclKind::Union(u) => {
                    let id = self.named_types[&u.name.value];
                    let fields = self.collect_fields(&u.fields);
                    self.registry.define(id, TypeDesc::Struct { name: u.name.value.clone(), fields });
                }
                DeclKind::Enum(e) => {
                    let id = self.named_types[&e.name.value];
                    let variants = e
                        .variants
                        .iter()
                        .map(|v| {
                            let payload = match &v.payload {
                                VariantPayload::Unit => vec![],
                                VariantPayload::Tuple(types) => {
                                    types.iter().map(|t| self.resolve_type(t)).collect()
                                }
                                VariantPayload::Struct(fields) => {
                                    fields.iter().map(|f| self.resolve_type(&f.ty)).collect()
                                }
                            };
                            EnumVariant { name: v.name.value.clone(), payload }
                        })
                        .collect();
                    self.registry.define(id, TypeDesc::Enum { name: e.name.value.clone(), variants });
                }
                DeclKind::TypeAlias(alias) => {
                    let target = self.resolve_type(&alias.ty);
                    if self.named_types.contains_key(&alias.name.value) {
                        self.diagnostics.error(
                            format!("duplicate definition of '{}'", alias.name.value),
                            decl.span,
                        );
                    } else {
                        self.named_types.insert(alias.name.value.clone(), target);
                    }
                }
                _ => {}
            }
        }

        // Trait signatures.
        for decl in &module.decls {
            if let DeclKind::Trait(t) = &decl.kind {
                let sigs = t
                    .methods
                    .iter()
                    .map(|m| TraitMethodSig {
                        name: m.name.value.clone(),
                        params: m.params.iter().map(|p| self.resolve_type(&p.ty)).collect(),
                        ret: m
                            .return_type
                            .as_ref()
                            .map(|ty| self.resolve_type(ty))
                            .unwrap_or_else(|| self.registry.void()),
                    })
                    .collect();
                if self.traits.insert(t.name.value.clone(), sigs).is_some() {
                    self.diagnostics
                        .error(format!("duplicate definition of trait '{}'", t.name.value), decl.span);
                }
            }
        }

        // Function and method signatures.
        for decl in &module.decls {
            match &decl.kind {
                DeclKind::Function(f) => self.collect_function(f, None),
                DeclKind::Impl(imp) => {
                    let self_ty = self.resolve_type(&imp.self_type);
                    let type_name = self.registry.display(self_ty);
                    for method in &imp.methods {
                        self.collect_function(method, Some((self_ty, type_name.clone())));
                    }
                    self.check_trait_conformance(imp, self_ty, decl.span);
                }
                _ => {}
            }
        }
    }

    fn declare_named(
        &mut self,
        name: &str,
        span: Span,
        declare: impl FnOnce(&mut TypeRegistry) -> TypeId,
    ) {
        if self.named_types.contains_key(name) {
            self.diagnostics.error(format!("duplicate definition of '{}'", name), span);
            return;
        }
        let id = declare(&mut self.registry);
        self.named_types.insert(name.to_string(), id);
    }

    fn collect_fields(&mut self, fields: &[FieldDecl]) -> Vec<(String, TypeId)> {
        let mut seen: HashMap<&str, ()> = HashMap::new();
        let mut out = Vec::new();
        for field in fields {
            if seen.insert(&field.name.value, ()).is_some() {
                self.diagnostics.error(
                    format!("duplicate field '{}'", field.name.value),
                    field.span,
                );
                continue;
            }
            let ty = self.resolve_type(&field.ty);
            out.push((field.name.value.clone(), ty));
        }
        out
    }

    fn collect_function(&mut self, f: &Function, receiver: Option<(TypeId, String)>) {
        let symbol_name = match &receiver {
            Some((_, type_name)) => format!("{}::{}", type_name, f.name.value),
            None => f.name.value.clone(),
        };

        let params: Vec<(String, TypeId)> = f
            .params
            .iter()
            .map(|p| (p.name.value.clone(), self.resolve_type(&p.ty)))
            .collect();
        let ret = f
            .return_type
            .as_ref()
            .map(|ty| self.resolve_type(ty))
            .unwrap_or_else(|| self.registry.void());

        if self.functions.contains_key(&symbol_name) {
            self.diagnostics
                .error(format!("duplicate definition of '{}'", symbol_name), f.name.span);
            return;
        }

        if let Some((self_ty, _)) = &receiver {
            let base = self.method_base(*self_ty);
            self.methods.insert((base, f.name.value.clone()), symbol_name.clone());
        }

        self.function_order.push(symbol_name.clone());
        self.functions.insert(
            symbol_name.clone(),
            FunctionInfo { name: symbol_name, params, ret, is_public: f.is_public, span: f.name.span },
        );
    }

    /// Method lookup resolves through pointers: `impl Item` methods are
    /// callable on `Item` and `*Item` receivers alike.
    fn method_base(&self, ty: TypeId) -> TypeId {
        match self.registry.get(ty) {
            TypeDesc::Pointer(inner) => *inner,
            _ => ty,
        }
    }

    fn check_trait_conformance(&mut self, imp: &ImplBlock, self_ty: TypeId, span: Span) {
        let Some(trait_name) = &imp.trait_name else { return };
        let Some(sigs) = self.traits.get(&trait_name.value).cloned() else {
            self.diagnostics
                .error(format!("unknown trait '{}'", trait_name.value), trait_name.span);
            return;
        };

        for sig in &sigs {
            let Some(method) = imp.methods.iter().find(|m| m.name.value == sig.name) else {
                self.diagnostics.error(
                    format!(
                        "impl of trait '{}' for '{}' is missing method '{}'",
                        trait_name.value,
                        self.registry.display(self_ty),
                        sig.name
                    ),
                    span,
                );
                continue;
            };

            // The first parameter is the receiver; the trait signature
            // describes the rest.
            let impl_params: Vec<TypeId> =
                method.params.iter().map(|p| self.resolve_type(&p.ty)).collect();
            let impl_ret = method
                .return_type
                .as_ref()
                .map(|ty| self.resolve_type(ty))
                .unwrap_or_else(|| self.registry.void());

            if impl_params.is_empty() {
                self.diagnostics.error(
                    format!("method '{}' must take a receiver parameter", sig.name),
                    method.name.span,
                );
                continue;
            }
            if impl_params[1..] != sig.params[..] || impl_ret != sig.ret {
                self.diagnostics.error(
                    format!(
                        "method '{}' does not match the signature declared by trait '{}'",
                        sig.name, trait_name.value
                    ),
                    method.name.span,
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Type resolution
    // ------------------------------------------------------------------

    fn resolve_type(&mut self, ty: &TypeRef) -> TypeId {
        match ty.kind.as_ref() {
            TypeRefKind::Named { name, generic_args } => {
                if let Some(prim) = PrimitiveType::from_name(name) {
                    if !generic_args.is_empty() {
                        self.diagnostics
                            .error(format!("type '{}' takes no type arguments", name), ty.span);
                    }
                    return self.registry.primitive(prim);
                }
                match name.as_str() {
                    "List" | "Map" => {
                        let def = if name == "List" {
                            self.registry.list_def
                        } else {
                            self.registry.map_def
                        };
                        let expected = if name == "List" { 1 } else { 2 };
                        if generic_args.len() != expected {
                            self.diagnostics.error(
                                format!(
                                    "'{}' expects {} type argument(s), got {}",
                                    name,
                                    expected,
                                    generic_args.len()
                                ),
                                ty.span,
                            );
                            return self.registry.error_type();
                        }
                        let args: Vec<TypeId> =
                            generic_args.iter().map(|a| self.resolve_type(a)).collect();
                        self.registry.instantiate(def, args)
                    }
                    _ => {
                        // Locally declared types shadow module-level ones.
                        let scoped = self.scopes.lookup(name).and_then(|symbol| {
                            matches!(
                                symbol.kind,
                                SymbolKind::Struct | SymbolKind::Enum | SymbolKind::TypeAlias
                            )
                            .then_some(symbol.type_id)
                        });
                        if let Some(id) = scoped {
                            if !generic_args.is_empty() {
                                self.diagnostics.error(
                                    format!("type '{}' takes no type arguments", name),
                                    ty.span,
                                );
                            }
                            id
                        } else if let Some(&id) = self.named_types.get(name) {
                            if !generic_args.is_empty() {
                                self.diagnostics.error(
                                    format!("type '{}' takes no type arguments", name),
                                    ty.span,
                                );
                            }
                            id
                        } else {
                            self.diagnostics.error(format!("unknown type '{}'", name), ty.span);
                            self.registry.error_type()
                        }
                    }
                }
            }
            TypeRefKind::Pointer(inner) => {
                let inner = self.resolve_type(inner);
                self.registry.pointer_to(inner)
            }
            TypeRefKind::Optional(inner) => {
                let inner = self.resolve_type(inner);
                self.registry.optional_of(inner)
            }
            TypeRefKind::Array { element, size } => {
                let element = self.resolve_type(element);
                self.registry.intern(TypeDesc::Array { element, size: *size })
            }
            TypeRefKind::Slice(element) => {
                let element = self.resolve_type(element);
                self.registry.slice_of(element)
            }
            TypeRefKind::Function { params, return_type } => {
                let params: Vec<TypeId> = params.iter().map(|p| self.resolve_type(p)).collect();
                let ret = return_type
                    .as_ref()
                    .map(|r| self.resolve_type(r))
                    .unwrap_or_else(|| self.registry.void());
                self.registry.intern(TypeDesc::Function { params, ret })
            }
        }
    }

    // ------------------------------------------------------------------
    // Pass 2: check bodies
    // ------------------------------------------------------------------

    fn check_bodies(&mut self, module: &Module) {
        for decl in &module.decls {
            match &decl.kind {
                DeclKind::Function(f) => self.check_function(f, None),
                DeclKind::Impl(imp) => {
                    let self_ty = self.resolve_type(&imp.self_type);
                    let type_name = self.registry.display(self_ty);
                    for method in &imp.methods {
                        self.check_function(method, Some(type_name.clone()));
                    }
                }
                DeclKind::Test(t) => {
                    let void = self.registry.void();
                    self.current_return = void;
                    self.current_function = format!("test::{}", t.name.value);
                    self.scopes.push();
                    self.check_block(&t.body);
                    self.scopes.pop();
                }
                DeclKind::Comptime(block) => {
                    let void = self.registry.void();
                    self.current_return = void;
                    self.current_function = "comptime".to_string();
                    self.scopes.push();
                    self.check_block(block);
                    self.scopes.pop();
                }
                _ => {}
            }
        }
    }

    fn check_function(&mut self, f: &Function, receiver_type_name: Option<String>) {
        let symbol_name = match &receiver_type_name {
            Some(type_name) => format!("{}::{}", type_name, f.name.value),
            None => f.name.value.clone(),
        };
        let Some(info) = self.functions.get(&symbol_name).cloned() else {
            // Collect failed (duplicate definition); skip the body.
            return;
        };

        self.current_return = info.ret;
        self.current_function = symbol_name;
        self.scopes.push();
        for (param, (name, ty)) in f.params.iter().zip(info.params.iter()) {
            self.scopes.declare(Symbol {
                name: name.clone(),
                kind: SymbolKind::Variable,
                type_id: *ty,
                is_mutable: false,
                span: param.span,
            });
        }
        self.check_block(&f.body);
        self.scopes.pop();
    }

    fn check_block(&mut self, block: &Block) {
        self.scopes.push();
        for stmt in &block.statements {
            self.check_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let(let_stmt) => self.check_let(let_stmt, stmt.id, stmt.span),
            StmtKind::Assign { target, value } => {
                let target_ty = self.check_expr(target);
                let value_ty = self.check_expr(value);
                if !self.is_lvalue(target) {
                    self.diagnostics.error("invalid assignment target", target.span);
                }
                self.require_assignable(value_ty, target_ty, value.span);
                if let ExprKind::Identifier(name) = target.kind.as_ref() {
                    if let Some(sym) = self.scopes.lookup(name) {
                        if sym.kind == SymbolKind::Constant {
                            self.diagnostics.error(
                                format!("cannot assign to constant '{}'", name),
                                target.span,
                            );
                        } else if !sym.is_mutable {
                            self.diagnostics.error(
                                format!("cannot assign to immutable binding '{}'", name),
                                target.span,
                            );
                        }
                    }
                }
            }
            StmtKind::Expr(expr) => {
                self.check_expr(expr);
            }
            StmtKind::Return(value) => {
                let ret_ty = self.current_return;
                match value {
                    Some(expr) => {
                        let ty = self.check_expr(expr);
                        self.require_assignable(ty, ret_ty, expr.span);
                    }
                    None => {
                        if !self.registry.is_void(ret_ty) && !self.registry.is_error(ret_ty) {
                            self.diagnostics.error(
                                format!(
                                    "function returns '{}' but return has no value",
                                    self.registry.display(ret_ty)
                                ),
                                stmt.span,
                            );
                        }
                    }
                }
            }
            StmtKind::If(if_stmt) => {
                let cond_ty = self.check_expr(&if_stmt.condition);
                self.require_bool(cond_ty, if_stmt.condition.span);
                self.check_block(&if_stmt.then_branch);
                if let Some(else_branch) = &if_stmt.else_branch {
                    self.check_stmt(else_branch);
                }
            }
            StmtKind::While { condition, body } => {
                let cond_ty = self.check_expr(condition);
                self.require_bool(cond_ty, condition.span);
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            StmtKind::For(for_stmt) => self.check_for(for_stmt),
            StmtKind::Block(block) => self.check_block(block),
            StmtKind::Switch(switch) => self.check_switch(switch, stmt.span),
            StmtKind::Loop(body) => {
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.diagnostics.error("break/continue outside of a loop", stmt.span);
                }
            }
            StmtKind::Defer(expr) => {
                self.check_expr(expr);
            }
            StmtKind::TryCatch(tc) => {
                self.check_block(&tc.try_block);
                self.scopes.push();
                let i64_t = self.registry.i64_type();
                self.scopes.declare(Symbol {
                    name: tc.catch_binding.value.clone(),
                    kind: SymbolKind::Variable,
                    type_id: i64_t,
                    is_mutable: false,
                    span: tc.catch_binding.span,
                });
                self.check_block(&tc.catch_block);
                self.scopes.pop();
            }
            StmtKind::Throw(expr) => {
                let ty = self.check_expr(expr);
                // Thrown values are i64 error codes by convention.
                if !self.registry.is_integer(ty) && !self.registry.is_error(ty) {
                    self.diagnostics.error(
                        format!("throw expects an integer code, found '{}'", self.registry.display(ty)),
                        expr.span,
                    );
                }
            }
            StmtKind::Decl(decl) => self.check_nested_decl(decl, stmt.span),
        }
    }

    /// Declarations in statement position: types register in the current
    /// scope, local functions become mangled routines. Impl blocks, traits,
    /// tests and imports stay module-level.
    fn check_nested_decl(&mut self, decl: &Decl, span: Span) {
        match &decl.kind {
            DeclKind::Struct(s) => {
                let fields = self.collect_fields(&s.fields);
                let id = self
                    .registry
                    .declare(TypeDesc::Struct { name: s.name.value.clone(), fields });
                self.declare_scope_symbol(&s.name, SymbolKind::Struct, id);
            }
            DeclKind::Union(u) => {
                let fields = self.collect_fields(&u.fields);
                let id = self
                    .registry
                    .declare(TypeDesc::Struct { name: u.name.value.clone(), fields });
                self.declare_scope_symbol(&u.name, SymbolKind::Struct, id);
            }
            DeclKind::Enum(e) => {
                let variants = e
                    .variants
                    .iter()
                    .map(|v| {
                        let payload = match &v.payload {
                            VariantPayload::Unit => vec![],
                            VariantPayload::Tuple(types) => {
                                types.iter().map(|t| self.resolve_type(t)).collect()
                            }
                            VariantPayload::Struct(fields) => {
                                fields.iter().map(|f| self.resolve_type(&f.ty)).collect()
                            }
                        };
                        EnumVariant { name: v.name.value.clone(), payload }
                    })
                    .collect();
                let id = self
                    .registry
                    .declare(TypeDesc::Enum { name: e.name.value.clone(), variants });
                self.declare_scope_symbol(&e.name, SymbolKind::Enum, id);
            }
            DeclKind::TypeAlias(alias) => {
                let target = self.resolve_type(&alias.ty);
                self.declare_scope_symbol(&alias.name, SymbolKind::TypeAlias, target);
            }
            DeclKind::Function(f) => self.check_local_function(f),
            _ => {
                self.diagnostics.error(
                    "impl, trait, test and import declarations must appear at module scope",
                    span,
                );
            }
        }
    }

    fn declare_scope_symbol(
        &mut self,
        name: &cot_common::Spanned<String>,
        kind: SymbolKind,
        type_id: TypeId,
    ) {
        if self.scopes.lookup_local(&name.value).is_some() {
            self.diagnostics
                .error(format!("duplicate definition of '{}'", name.value), name.span);
            return;
        }
        self.scopes.declare(Symbol {
            name: name.value.clone(),
            kind,
            type_id,
            is_mutable: false,
            span: name.span,
        });
    }

    /// A local function mangles to `outer::name`, binds in the enclosing
    /// scope as a function-typed value, and sees module scope plus its own
    /// parameters rather than the enclosing locals.
    fn check_local_function(&mut self, f: &Function) {
        if self.in_lambda {
            self.diagnostics
                .error("local functions are not supported inside lambdas", f.name.span);
            return;
        }
        let symbol_name = format!("{}::{}", self.current_function, f.name.value);

        let params: Vec<(String, TypeId)> = f
            .params
            .iter()
            .map(|p| (p.name.value.clone(), self.resolve_type(&p.ty)))
            .collect();
        let ret = f
            .return_type
            .as_ref()
            .map(|ty| self.resolve_type(ty))
            .unwrap_or_else(|| self.registry.void());

        if self.functions.contains_key(&symbol_name) {
            self.diagnostics
                .error(format!("duplicate definition of '{}'", f.name.value), f.name.span);
            return;
        }

        let param_types: Vec<TypeId> = params.iter().map(|(_, t)| *t).collect();
        let fn_type = self.registry.intern(TypeDesc::Function { params: param_types, ret });
        self.declare_scope_symbol(&f.name, SymbolKind::Function, fn_type);

        self.function_order.push(symbol_name.clone());
        self.functions.insert(
            symbol_name.clone(),
            FunctionInfo {
                name: symbol_name.clone(),
                params: params.clone(),
                ret,
                is_public: false,
                span: f.name.span,
            },
        );

        let saved_scopes = std::mem::replace(&mut self.scopes, ScopeStack::new());
        let saved_return = self.current_return;
        let saved_function = std::mem::replace(&mut self.current_function, symbol_name);

        // The function may call itself through its own name.
        self.scopes.declare(Symbol {
            name: f.name.value.clone(),
            kind: SymbolKind::Function,
            type_id: fn_type,
            is_mutable: false,
            span: f.name.span,
        });
        self.current_return = ret;
        self.scopes.push();
        for (param, (name, ty)) in f.params.iter().zip(params.iter()) {
            self.scopes.declare(Symbol {
                name: name.clone(),
                kind: SymbolKind::Variable,
                type_id: *ty,
                is_mutable: false,
                span: param.span,
            });
        }
        self.check_block(&f.body);
        self.scopes.pop();

        self.scopes = saved_scopes;
        self.current_return = saved_return;
        self.current_function = saved_function;
    }

    fn check_let(&mut self, let_stmt: &LetStmt, stmt_id: NodeId, span: Span) {
        let annotated = let_stmt.ty.as_ref().map(|ty| self.resolve_type(ty));
        let inferred = let_stmt.initializer.as_ref().map(|init| self.check_expr(init));

        let ty = match (annotated, inferred) {
            (Some(expected), Some(found)) => {
                let init_span = let_stmt.initializer.as_ref().map(|i| i.span).unwrap_or(span);
                self.require_assignable(found, expected, init_span);
                expected
            }
            (Some(expected), None) => expected,
            (None, Some(found)) => found,
            (None, None) => self.registry.error_type(),
        };

        // The declared type is recorded under the statement's node id so the
        // lowerer can type the stack slot.
        self.expr_types.insert(stmt_id, ty);

        if self.scopes.lookup_local(&let_stmt.name.value).is_some() {
            self.diagnostics.error(
                format!("duplicate definition of '{}'", let_stmt.name.value),
                let_stmt.name.span,
            );
        }

        self.scopes.declare(Symbol {
            name: let_stmt.name.value.clone(),
            kind: if let_stmt.is_const { SymbolKind::Constant } else { SymbolKind::Variable },
            type_id: ty,
            is_mutable: !let_stmt.is_const,
            span: let_stmt.name.span,
        });
    }

    fn check_for(&mut self, for_stmt: &ForStmt) {
        let iter_ty = self.check_expr(&for_stmt.iterable);
        let binding_ty = match self.registry.get(iter_ty).clone() {
            TypeDesc::Range { .. } => self.registry.i64_type(),
            TypeDesc::Slice(element) => element,
            TypeDesc::Array { element, .. } => element,
            TypeDesc::GenericInstance { base, args } if base == self.registry.list_def => args[0],
            // Iterating a string yields byte values.
            TypeDesc::Primitive(PrimitiveType::String) => self.registry.i64_type(),
            TypeDesc::Error => self.registry.error_type(),
            _ => {
                self.diagnostics.error(
                    format!("cannot iterate over '{}'", self.registry.display(iter_ty)),
                    for_stmt.iterable.span,
                );
                self.registry.error_type()
            }
        };

        self.scopes.push();
        self.scopes.declare(Symbol {
            name: for_stmt.binding.value.clone(),
            kind: SymbolKind::Variable,
            type_id: binding_ty,
            is_mutable: false,
            span: for_stmt.binding.span,
        });
        self.loop_depth += 1;
        self.check_block(&for_stmt.body);
        self.loop_depth -= 1;
        self.scopes.pop();
    }

    fn check_switch(&mut self, switch: &SwitchStmt, span: Span) {
        let scrutinee_ty = self.check_expr(&switch.scrutinee);
        let enum_variants = match self.registry.get(scrutinee_ty) {
            TypeDesc::Enum { variants, .. } => Some(variants.clone()),
            _ => None,
        };

        let mut covered: Vec<String> = Vec::new();
        let mut has_wildcard = false;

        for arm in &switch.arms {
            self.scopes.push();
            match &arm.pattern {
                Pattern::Wildcard => has_wildcard = true,
                Pattern::Literal(expr) => {
                    let lit_ty = self.check_expr(expr);
                    self.require_assignable(lit_ty, scrutinee_ty, expr.span);
                }
                Pattern::Variant { name, bindings } => {
                    let Some(variants) = &enum_variants else {
                        self.diagnostics.error(
                            format!(
                                "variant pattern on non-enum type '{}'",
                                self.registry.display(scrutinee_ty)
                            ),
                            arm.span,
                        );
                        self.scopes.pop();
                        continue;
                    };
                    let Some(variant) = variants.iter().find(|v| v.name == name.value) else {
                        self.diagnostics.error(
                            format!("unknown variant '{}'", name.value),
                            name.span,
                        );
                        self.scopes.pop();
                        continue;
                    };
                    if bindings.len() != variant.payload.len() {
                        self.diagnostics.error(
                            format!(
                                "variant '{}' carries {} value(s), pattern binds {}",
                                name.value,
                                variant.payload.len(),
                                bindings.len()
                            ),
                            name.span,
                        );
                    }
                    for (binding, payload_ty) in bindings.iter().zip(variant.payload.iter()) {
                        self.scopes.declare(Symbol {
                            name: binding.value.clone(),
                            kind: SymbolKind::Variable,
                            type_id: *payload_ty,
                            is_mutable: false,
                            span: binding.span,
                        });
                    }
                    covered.push(name.value.clone());
                }
            }
            self.check_block(&arm.body);
            self.scopes.pop();
        }

        if let Some(variants) = &enum_variants {
            if !has_wildcard {
                let missing: Vec<&str> = variants
                    .iter()
                    .filter(|v| !covered.iter().any(|c| c == &v.name))
                    .map(|v| v.name.as_str())
                    .collect();
                if !missing.is_empty() {
                    self.diagnostics.error(
                        format!("non-exhaustive switch: missing {}", missing.join(", ")),
                        span,
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn record(&mut self, id: NodeId, ty: TypeId) -> TypeId {
        self.expr_types.insert(id, ty);
        ty
    }

    pub fn check_expr(&mut self, expr: &Expr) -> TypeId {
        let ty = self.check_expr_inner(expr);
        self.record(expr.id, ty)
    }

    fn check_expr_inner(&mut self, expr: &Expr) -> TypeId {
        match expr.kind.as_ref() {
            ExprKind::IntLiteral(_) => self.registry.i64_type(),
            ExprKind::FloatLiteral(_) => self.registry.f64_type(),
            ExprKind::StringLiteral(_) => self.registry.string_type(),
            ExprKind::BoolLiteral(_) => self.registry.bool_type(),
            ExprKind::NullLiteral => {
                // Null coerces to any optional; the bare type is ?void.
                let void = self.registry.void();
                self.registry.optional_of(void)
            }
            ExprKind::Identifier(name) => self.check_identifier(name, expr.span),
            ExprKind::Unary { op, operand } => self.check_unary(*op, operand, expr.span),
            ExprKind::Binary { op, left, right } => self.check_binary(*op, left, right, expr.span),
            ExprKind::Ternary { condition, then_value, else_value } => {
                let cond_ty = self.check_expr(condition);
                self.require_bool(cond_ty, condition.span);
                let then_ty = self.check_expr(then_value);
                let else_ty = self.check_expr(else_value);
                self.unify(then_ty, else_ty, expr.span)
            }
            ExprKind::NullCoalesce { value, fallback } => {
                let value_ty = self.check_expr(value);
                let fallback_ty = self.check_expr(fallback);
                match self.registry.get(value_ty).clone() {
                    TypeDesc::Optional(inner) => {
                        self.require_assignable(fallback_ty, inner, fallback.span);
                        inner
                    }
                    TypeDesc::Error => value_ty,
                    _ => {
                        self.diagnostics.error(
                            format!(
                                "'?:' needs an optional left operand, found '{}'",
                                self.registry.display(value_ty)
                            ),
                            value.span,
                        );
                        self.registry.error_type()
                    }
                }
            }
            ExprKind::Call { callee, args } => self.check_call(callee, args, expr.span),
            ExprKind::MethodCall { receiver, method, args } => {
                self.check_method_call(expr.id, receiver, method, args)
            }
            ExprKind::Field { receiver, field } => {
                let recv_ty = self.check_expr(receiver);
                self.check_field_access(recv_ty, field, false)
            }
            ExprKind::OptionalField { receiver, field } => {
                let recv_ty = self.check_expr(receiver);
                let recv_ty = match self.registry.get(recv_ty).clone() {
                    TypeDesc::Optional(inner) => inner,
                    _ => recv_ty,
                };
                self.check_field_access(recv_ty, field, true)
            }
            ExprKind::Index { receiver, index } => {
                let recv_ty = self.check_expr(receiver);
                let index_ty = self.check_expr(index);
                self.require_integer(index_ty, index.span);
                self.element_type_of(recv_ty, receiver.span, false)
            }
            ExprKind::OptionalIndex { receiver, index } => {
                let recv_ty = self.check_expr(receiver);
                let recv_ty = match self.registry.get(recv_ty).clone() {
                    TypeDesc::Optional(inner) => inner,
                    _ => recv_ty,
                };
                let index_ty = self.check_expr(index);
                self.require_integer(index_ty, index.span);
                self.element_type_of(recv_ty, receiver.span, true)
            }
            ExprKind::Slice { receiver, start, end } => {
                let recv_ty = self.check_expr(receiver);
                let start_ty = self.check_expr(start);
                let end_ty = self.check_expr(end);
                self.require_integer(start_ty, start.span);
                self.require_integer(end_ty, end.span);
                match self.registry.get(recv_ty).clone() {
                    TypeDesc::Primitive(PrimitiveType::String) => recv_ty,
                    TypeDesc::Slice(element) => self.registry.slice_of(element),
                    TypeDesc::Array { element, .. } => self.registry.slice_of(element),
                    TypeDesc::Error => recv_ty,
                    _ => {
                        self.diagnostics.error(
                            format!("cannot slice '{}'", self.registry.display(recv_ty)),
                            receiver.span,
                        );
                        self.registry.error_type()
                    }
                }
            }
            ExprKind::Range { start, end, inclusive } => {
                let start_ty = self.check_expr(start);
                let end_ty = self.check_expr(end);
                self.require_integer(start_ty, start.span);
                self.require_integer(end_ty, end.span);
                self.registry.range_type(*inclusive)
            }
            ExprKind::Cast { operand, ty } => {
                let from = self.check_expr(operand);
                let to = self.resolve_type(ty);
                self.check_cast(from, to, expr.span)
            }
            ExprKind::TypeTest { operand, ty } => {
                let _from = self.check_expr(operand);
                let _to = self.resolve_type(ty);
                self.registry.bool_type()
            }
            ExprKind::StructInit { ty, fields, heap } => {
                self.check_struct_init(ty, fields, *heap, expr.span)
            }
            ExprKind::CollectionInit { ty } => {
                let resolved = self.resolve_type(ty);
                match self.registry.get(resolved) {
                    TypeDesc::GenericInstance { .. } => resolved,
                    TypeDesc::Error => resolved,
                    _ => {
                        self.diagnostics.error(
                            format!("'new' expects List<T> or Map<K, V>, found '{}'",
                                self.registry.display(resolved)),
                            expr.span,
                        );
                        self.registry.error_type()
                    }
                }
            }
            ExprKind::ArrayInit { elements } => {
                if elements.is_empty() {
                    // The empty array literal adopts any slice type.
                    let err = self.registry.error_type();
                    return self.registry.intern(TypeDesc::Array { element: err, size: 0 });
                }
                let first_ty = self.check_expr(&elements[0]);
                for element in &elements[1..] {
                    let ty = self.check_expr(element);
                    self.require_assignable(ty, first_ty, element.span);
                }
                self.registry
                    .intern(TypeDesc::Array { element: first_ty, size: elements.len() as u64 })
            }
            ExprKind::Lambda { params, body } => self.check_lambda(params, body, expr.span),
            ExprKind::InterpolatedString { exprs, .. } => {
                for inner in exprs {
                    let ty = self.check_expr(inner);
                    // Interpolation stringifies scalars and strings.
                    if !self.registry.is_numeric(ty)
                        && !self.registry.is_string(ty)
                        && !self.registry.is_bool(ty)
                        && !self.registry.is_error(ty)
                    {
                        self.diagnostics.error(
                            format!(
                                "cannot interpolate value of type '{}'",
                                self.registry.display(ty)
                            ),
                            inner.span,
                        );
                    }
                }
                self.registry.string_type()
            }
            ExprKind::VariantInit { enum_name, variant, args } => {
                self.check_variant_init(enum_name, variant, args)
            }
        }
    }

    fn check_identifier(&mut self, name: &str, span: Span) -> TypeId {
        if let Some(symbol) = self.scopes.lookup(name) {
            return symbol.type_id;
        }
        if let Some(info) = self.functions.get(name) {
            let params: Vec<TypeId> = info.params.iter().map(|(_, t)| *t).collect();
            let ret = info.ret;
            return self.registry.intern(TypeDesc::Function { params, ret });
        }
        self.diagnostics.error(format!("undefined identifier '{}'", name), span);
        self.registry.error_type()
    }

    fn check_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> TypeId {
        let ty = self.check_expr(operand);
        if self.registry.is_error(ty) {
            return ty;
        }
        match op {
            UnaryOp::Neg => {
                if self.registry.is_numeric(ty) {
                    ty
                } else {
                    self.type_error("cannot negate", ty, span)
                }
            }
            UnaryOp::Not => {
                if self.registry.is_bool(ty) {
                    ty
                } else {
                    self.type_error("'!' expects bool, found", ty, span)
                }
            }
            UnaryOp::BitNot => {
                if self.registry.is_integer(ty) {
                    ty
                } else {
                    self.type_error("'~' expects an integer, found", ty, span)
                }
            }
            UnaryOp::Deref => match self.registry.get(ty) {
                TypeDesc::Pointer(inner) => *inner,
                _ => self.type_error("cannot dereference", ty, span),
            },
        }
    }

    fn check_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> TypeId {
        let left_ty = self.check_expr(left);
        let right_ty = self.check_expr(right);

        if self.registry.is_error(left_ty) || self.registry.is_error(right_ty) {
            return self.registry.error_type();
        }

        match op {
            BinaryOp::Add
                if self.registry.is_string(left_ty) && self.registry.is_string(right_ty) =>
            {
                left_ty
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.arith_result(left_ty, right_ty, span)
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
            | BinaryOp::Ge => {
                let comparable = self.comparable(left_ty, right_ty);
                if !comparable {
                    self.diagnostics.error(
                        format!(
                            "cannot compare '{}' with '{}'",
                            self.registry.display(left_ty),
                            self.registry.display(right_ty)
                        ),
                        span,
                    );
                }
                self.registry.bool_type()
            }
            BinaryOp::And | BinaryOp::Or => {
                self.require_bool(left_ty, left.span);
                self.require_bool(right_ty, right.span);
                self.registry.bool_type()
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl
            | BinaryOp::Shr => {
                self.require_integer(left_ty, left.span);
                self.require_integer(right_ty, right.span);
                left_ty
            }
        }
    }

    /// Integer/float promotion: the wider rank wins; mixing int and float
    /// widens to the float operand.
    fn arith_result(&mut self, left: TypeId, right: TypeId, span: Span) -> TypeId {
        let (Some(lp), Some(rp)) =
            (self.registry.as_primitive(left), self.registry.as_primitive(right))
        else {
            return self.arith_error(left, right, span);
        };
        if !lp.is_numeric() || !rp.is_numeric() {
            return self.arith_error(left, right, span);
        }
        if lp.numeric_rank() >= rp.numeric_rank() {
            left
        } else {
            right
        }
    }

    fn arith_error(&mut self, left: TypeId, right: TypeId, span: Span) -> TypeId {
        self.diagnostics.error(
            format!(
                "invalid operands '{}' and '{}'",
                self.registry.display(left),
                self.registry.display(right)
            ),
            span,
        );
        self.registry.error_type()
    }

    fn comparable(&mut self, left: TypeId, right: TypeId) -> bool {
        if left == right {
            return true;
        }
        if self.registry.is_numeric(left) && self.registry.is_numeric(right) {
            return true;
        }
        // Null comparison against optionals and pointers.
        let void = self.registry.void();
        let null_ty = self.registry.optional_of(void);
        if left == null_ty || right == null_ty {
            let other = if left == null_ty { right } else { left };
            return matches!(self.registry.get(other), TypeDesc::Optional(_) | TypeDesc::Pointer(_));
        }
        false
    }

    fn check_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> TypeId {
        // Builtins take a dedicated path so `string(x)` can accept any scalar.
        if let ExprKind::Identifier(name) = callee.kind.as_ref() {
            if let Some(ty) = self.check_builtin_call(name, args, span) {
                return ty;
            }
            if self.scopes.lookup(name).is_none() {
                if let Some(info) = self.functions.get(name).cloned() {
                    self.check_args(&info, args, span);
                    return info.ret;
                }
                self.diagnostics.error(format!("undefined function '{}'", name), span);
                return self.registry.error_type();
            }
        }

        // Calling a function-typed value (closure).
        let callee_ty = self.check_expr(callee);
        match self.registry.get(callee_ty).clone() {
            TypeDesc::Function { params, ret } => {
                if args.len() != params.len() {
                    self.diagnostics.error(
                        format!("expected {} argument(s), got {}", params.len(), args.len()),
                        span,
                    );
                }
                for (arg, param) in args.iter().zip(params.iter()) {
                    let arg_ty = self.check_expr(arg);
                    self.require_assignable(arg_ty, *param, arg.span);
                }
                ret
            }
            TypeDesc::Error => callee_ty,
            _ => {
                self.diagnostics.error(
                    format!("'{}' is not callable", self.registry.display(callee_ty)),
                    callee.span,
                );
                self.registry.error_type()
            }
        }
    }

    fn check_builtin_call(&mut self, name: &str, args: &[Expr], span: Span) -> Option<TypeId> {
        match name {
            "println" | "print" => {
                if args.len() != 1 {
                    self.diagnostics
                        .error(format!("'{}' expects 1 argument, got {}", name, args.len()), span);
                }
                for arg in args {
                    let ty = self.check_expr(arg);
                    if !self.registry.is_string(ty) && !self.registry.is_error(ty) {
                        self.diagnostics.error(
                            format!("'{}' expects a string, found '{}'", name, self.registry.display(ty)),
                            arg.span,
                        );
                    }
                }
                Some(self.registry.void())
            }
            "string" => {
                if args.len() != 1 {
                    self.diagnostics
                        .error(format!("'string' expects 1 argument, got {}", args.len()), span);
                    return Some(self.registry.string_type());
                }
                let ty = self.check_expr(&args[0]);
                if !self.registry.is_numeric(ty)
                    && !self.registry.is_bool(ty)
                    && !self.registry.is_string(ty)
                    && !self.registry.is_error(ty)
                {
                    self.diagnostics.error(
                        format!("cannot stringify '{}'", self.registry.display(ty)),
                        args[0].span,
                    );
                }
                Some(self.registry.string_type())
            }
            "len" => {
                if args.len() != 1 {
                    self.diagnostics
                        .error(format!("'len' expects 1 argument, got {}", args.len()), span);
                    return Some(self.registry.i64_type());
                }
                let ty = self.check_expr(&args[0]);
                let ok = matches!(
                    self.registry.get(ty),
                    TypeDesc::Primitive(PrimitiveType::String)
                        | TypeDesc::Slice(_)
                        | TypeDesc::Array { .. }
                        | TypeDesc::GenericInstance { .. }
                        | TypeDesc::Error
                );
                if !ok {
                    self.diagnostics.error(
                        format!("'len' is not defined for '{}'", self.registry.display(ty)),
                        args[0].span,
                    );
                }
                Some(self.registry.i64_type())
            }
            "assert" => {
                if args.len() != 1 {
                    self.diagnostics
                        .error(format!("'assert' expects 1 argument, got {}", args.len()), span);
                }
                for arg in args {
                    let ty = self.check_expr(arg);
                    self.require_bool(ty, arg.span);
                }
                Some(self.registry.void())
            }
            "panic" => {
                if args.len() != 1 {
                    self.diagnostics
                        .error(format!("'panic' expects 1 argument, got {}", args.len()), span);
                }
                for arg in args {
                    let ty = self.check_expr(arg);
                    if !self.registry.is_string(ty) && !self.registry.is_error(ty) {
                        self.diagnostics.error(
                            format!("'panic' expects a string, found '{}'", self.registry.display(ty)),
                            arg.span,
                        );
                    }
                }
                Some(self.registry.void())
            }
            _ => None,
        }
    }

    fn check_args(&mut self, info: &FunctionInfo, args: &[Expr], span: Span) {
        if args.len() != info.params.len() {
            self.diagnostics.error(
                format!(
                    "'{}' expects {} argument(s), got {}",
                    info.name,
                    info.params.len(),
                    args.len()
                ),
                span,
            );
        }
        for (arg, (_, param_ty)) in args.iter().zip(info.params.iter()) {
            let arg_ty = self.check_expr(arg);
            self.require_assignable(arg_ty, *param_ty, arg.span);
        }
    }

    fn check_method_call(
        &mut self,
        node: NodeId,
        receiver: &Expr,
        method: &cot_common::Spanned<String>,
        args: &[Expr],
    ) -> TypeId {
        let recv_ty = self.check_expr(receiver);
        if self.registry.is_error(recv_ty) {
            for arg in args {
                self.check_expr(arg);
            }
            return recv_ty;
        }

        // Built-in generic collections: method return types substitute the
        // instance's type arguments.
        if let TypeDesc::GenericInstance { base, args: type_args } =
            self.registry.get(recv_ty).clone()
        {
            if base == self.registry.list_def {
                return self.check_list_method(&type_args, method, args);
            }
            if base == self.registry.map_def {
                return self.check_map_method(&type_args, method, args);
            }
        }

        // `len` on strings, arrays and slices.
        if method.value == "len"
            && matches!(
                self.registry.get(recv_ty),
                TypeDesc::Primitive(PrimitiveType::String)
                    | TypeDesc::Slice(_)
                    | TypeDesc::Array { .. }
            )
        {
            if !args.is_empty() {
                self.diagnostics.error("'len' takes no arguments", method.span);
            }
            return self.registry.i64_type();
        }

        // User-defined methods; receiver passed as the first argument.
        let base = self.method_base(recv_ty);
        let Some(symbol_name) = self.methods.get(&(base, method.value.clone())).cloned() else {
            self.diagnostics.error(
                format!(
                    "no method '{}' on type '{}'",
                    method.value,
                    self.registry.display(recv_ty)
                ),
                method.span,
            );
            for arg in args {
                self.check_expr(arg);
            }
            return self.registry.error_type();
        };

        let info = self.functions[&symbol_name].clone();
        if info.params.is_empty() {
            self.diagnostics.error(
                format!("method '{}' is missing its receiver parameter", method.value),
                method.span,
            );
            return self.registry.error_type();
        }
        self.require_assignable(recv_ty, info.params[0].1, receiver.span);
        if args.len() != info.params.len() - 1 {
            self.diagnostics.error(
                format!(
                    "'{}' expects {} argument(s), got {}",
                    method.value,
                    info.params.len() - 1,
                    args.len()
                ),
                method.span,
            );
        }
        for (arg, (_, param_ty)) in args.iter().zip(info.params[1..].iter()) {
            let arg_ty = self.check_expr(arg);
            self.require_assignable(arg_ty, *param_ty, arg.span);
        }

        self.method_targets.insert(node, symbol_name);
        info.ret
    }

    fn check_list_method(
        &mut self,
        type_args: &[TypeId],
        method: &cot_common::Spanned<String>,
        args: &[Expr],
    ) -> TypeId {
        let element = type_args[0];
        let i64_t = self.registry.i64_type();
        let void = self.registry.void();
        let (params, ret): (Vec<TypeId>, TypeId) = match method.value.as_str() {
            "push" => (vec![element], void),
            "pop" => (vec![], element),
            "get" => (vec![i64_t], element),
            "set" => (vec![i64_t, element], void),
            "len" => (vec![], i64_t),
            _ => {
                self.diagnostics
                    .error(format!("no method '{}' on List", method.value), method.span);
                for arg in args {
                    self.check_expr(arg);
                }
                return self.registry.error_type();
            }
        };
        self.check_builtin_method_args(&params, args, method.span);
        ret
    }

    fn check_map_method(
        &mut self,
        type_args: &[TypeId],
        method: &cot_common::Spanned<String>,
        args: &[Expr],
    ) -> TypeId {
        let key = type_args[0];
        let value = type_args[1];
        let i64_t = self.registry.i64_type();
        let bool_t = self.registry.bool_type();
        let void = self.registry.void();
        let (params, ret): (Vec<TypeId>, TypeId) = match method.value.as_str() {
            "set" => (vec![key, value], void),
            "get" => (vec![key], value),
            "has" => (vec![key], bool_t),
            "delete" => (vec![key], void),
            "len" => (vec![], i64_t),
            _ => {
                self.diagnostics
                    .error(format!("no method '{}' on Map", method.value), method.span);
                for arg in args {
                    self.check_expr(arg);
                }
                return self.registry.error_type();
            }
        };
        self.check_builtin_method_args(&params, args, method.span);
        ret
    }

    fn check_builtin_method_args(&mut self, params: &[TypeId], args: &[Expr], span: Span) {
        if args.len() != params.len() {
            self.diagnostics.error(
                format!("expected {} argument(s), got {}", params.len(), args.len()),
                span,
            );
        }
        for (arg, param) in args.iter().zip(params.iter()) {
            let arg_ty = self.check_expr(arg);
            self.require_assignable(arg_ty, *param, arg.span);
        }
    }

    fn check_field_access(
        &mut self,
        recv_ty: TypeId,
        field: &cot_common::Spanned<String>,
        optional: bool,
    ) -> TypeId {
        if self.registry.is_error(recv_ty) {
            return recv_ty;
        }
        let Some(fields) = self.registry.struct_fields(recv_ty).map(|f| f.to_vec()) else {
            self.diagnostics.error(
                format!(
                    "type '{}' has no fields",
                    self.registry.display(recv_ty)
                ),
                field.span,
            );
            return self.registry.error_type();
        };
        let Some((_, field_ty)) = fields.iter().find(|(name, _)| name == &field.value) else {
            self.diagnostics.error(
                format!(
                    "no field '{}' on type '{}'",
                    field.value,
                    self.registry.display(recv_ty)
                ),
                field.span,
            );
            return self.registry.error_type();
        };
        if optional {
            self.registry.optional_of(*field_ty)
        } else {
            *field_ty
        }
    }

    fn element_type_of(&mut self, recv_ty: TypeId, span: Span, optional: bool) -> TypeId {
        let element = match self.registry.get(recv_ty).clone() {
            // String indexing yields the byte value.
            TypeDesc::Primitive(PrimitiveType::String) => self.registry.i64_type(),
            TypeDesc::Slice(element) => element,
            TypeDesc::Array { element, .. } => element,
            TypeDesc::Error => recv_ty,
            _ => {
                self.diagnostics.error(
                    format!("cannot index '{}'", self.registry.display(recv_ty)),
                    span,
                );
                self.registry.error_type()
            }
        };
        if optional {
            self.registry.optional_of(element)
        } else {
            element
        }
    }

    fn check_cast(&mut self, from: TypeId, to: TypeId, span: Span) -> TypeId {
        if self.registry.is_error(from) || self.registry.is_error(to) {
            return to;
        }
        let numeric = self.registry.is_numeric(from) && self.registry.is_numeric(to);
        let pointer = matches!(self.registry.get(from), TypeDesc::Pointer(_))
            && matches!(self.registry.get(to), TypeDesc::Pointer(_));
        // `?*T -> *T` after a null check is allowed without narrowing.
        let optional_unwrap = match self.registry.get(from) {
            TypeDesc::Optional(inner) => *inner == to,
            _ => false,
        };
        if !numeric && !pointer && !optional_unwrap {
            self.diagnostics.error(
                format!(
                    "invalid cast from '{}' to '{}'",
                    self.registry.display(from),
                    self.registry.display(to)
                ),
                span,
            );
            return self.registry.error_type();
        }
        to
    }

    fn check_struct_init(
        &mut self,
        ty: &TypeRef,
        field_inits: &[FieldInit],
        heap: bool,
        span: Span,
    ) -> TypeId {
        let struct_ty = self.resolve_type(ty);
        if self.registry.is_error(struct_ty) {
            for init in field_inits {
                self.check_expr(&init.value);
            }
            return struct_ty;
        }
        let TypeDesc::Struct { name, fields } = self.registry.get(struct_ty).clone() else {
            self.diagnostics.error(
                format!("'{}' is not a struct", self.registry.display(struct_ty)),
                span,
            );
            for init in field_inits {
                self.check_expr(&init.value);
            }
            return self.registry.error_type();
        };

        let mut seen: Vec<&str> = Vec::new();
        for init in field_inits {
            if seen.contains(&init.name.value.as_str()) {
                self.diagnostics.error(
                    format!("field '{}' initialized twice", init.name.value),
                    init.span,
                );
                continue;
            }
            let value_ty = self.check_expr(&init.value);
            match fields.iter().find(|(fname, _)| fname == &init.name.value) {
                Some((_, field_ty)) => {
                    self.require_assignable(value_ty, *field_ty, init.value.span);
                }
                None => {
                    self.diagnostics.error(
                        format!("no field '{}' on struct '{}'", init.name.value, name),
                        init.name.span,
                    );
                }
            }
            seen.push(&init.name.value);
        }
        for (fname, _) in &fields {
            if !seen.contains(&fname.as_str()) {
                self.diagnostics
                    .error(format!("missing field '{}' in initializer of '{}'", fname, name), span);
            }
        }

        if heap {
            self.registry.pointer_to(struct_ty)
        } else {
            struct_ty
        }
    }

    fn check_lambda(&mut self, params: &[LambdaParam], body: &Block, span: Span) -> TypeId {
        let mut param_types = Vec::new();
        self.scopes.push();
        for param in params {
            let ty = match &param.ty {
                Some(ty) => self.resolve_type(ty),
                None => {
                    self.diagnostics.error(
                        format!("lambda parameter '{}' needs a type annotation", param.name.value),
                        param.span,
                    );
                    self.registry.error_type()
                }
            };
            param_types.push(ty);
            self.scopes.declare(Symbol {
                name: param.name.value.clone(),
                kind: SymbolKind::Variable,
                type_id: ty,
                is_mutable: false,
                span: param.span,
            });
        }

        // Infer the return type from the first valued return.
        let saved_return = self.current_return;
        let saved_in_lambda = self.in_lambda;
        let ret = self
            .first_return_type(body)
            .unwrap_or_else(|| self.registry.void());
        self.current_return = ret;
        self.in_lambda = true;
        self.check_block(body);
        self.current_return = saved_return;
        self.in_lambda = saved_in_lambda;
        self.scopes.pop();

        let _ = span;
        self.registry.intern(TypeDesc::Function { params: param_types, ret })
    }

    fn first_return_type(&mut self, body: &Block) -> Option<TypeId> {
        for stmt in &body.statements {
            if let StmtKind::Return(Some(expr)) = &stmt.kind {
                return Some(self.check_expr(expr));
            }
        }
        None
    }

    fn check_variant_init(
        &mut self,
        enum_name: &cot_common::Spanned<String>,
        variant: &cot_common::Spanned<String>,
        args: &[Expr],
    ) -> TypeId {
        let scoped = self.scopes.lookup(&enum_name.value).and_then(|symbol| {
            (symbol.kind == SymbolKind::Enum).then_some(symbol.type_id)
        });
        let Some(enum_ty) = scoped.or_else(|| self.named_types.get(&enum_name.value).copied())
        else {
            self.diagnostics
                .error(format!("unknown type '{}'", enum_name.value), enum_name.span);
            for arg in args {
                self.check_expr(arg);
            }
            return self.registry.error_type();
        };
        let TypeDesc::Enum { variants, .. } = self.registry.get(enum_ty).clone() else {
            self.diagnostics
                .error(format!("'{}' is not an enum", enum_name.value), enum_name.span);
            for arg in args {
                self.check_expr(arg);
            }
            return self.registry.error_type();
        };
        let Some(var) = variants.iter().find(|v| v.name == variant.value) else {
            self.diagnostics.error(
                format!("enum '{}' has no variant '{}'", enum_name.value, variant.value),
                variant.span,
            );
            for arg in args {
                self.check_expr(arg);
            }
            return self.registry.error_type();
        };
        if args.len() != var.payload.len() {
            self.diagnostics.error(
                format!(
                    "variant '{}' carries {} value(s), got {}",
                    variant.value,
                    var.payload.len(),
                    args.len()
                ),
                variant.span,
            );
        }
        for (arg, payload_ty) in args.iter().zip(var.payload.clone().iter()) {
            let arg_ty = self.check_expr(arg);
            self.require_assignable(arg_ty, *payload_ty, arg.span);
        }
        enum_ty
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn is_lvalue(&self, expr: &Expr) -> bool {
        match expr.kind.as_ref() {
            ExprKind::Identifier(_) => true,
            ExprKind::Field { .. } => true,
            ExprKind::Index { .. } => true,
            ExprKind::Unary { op: UnaryOp::Deref, .. } => true,
            _ => false,
        }
    }

    /// Assignability: exact match, or one of the sanctioned coercions.
    fn assignable(&mut self, from: TypeId, to: TypeId) -> bool {
        if from == to || self.registry.is_error(from) || self.registry.is_error(to) {
            return true;
        }
        let void = self.registry.void();
        let null_ty = self.registry.optional_of(void);
        match self.registry.get(to).clone() {
            // Null and inner values coerce into optionals.
            TypeDesc::Optional(inner) => from == null_ty || self.assignable(from, inner),
            // Array literals coerce into slices; the empty literal into any.
            TypeDesc::Slice(to_elem) => match self.registry.get(from) {
                TypeDesc::Array { size: 0, .. } => true,
                TypeDesc::Array { element, .. } => *element == to_elem,
                _ => false,
            },
            _ => false,
        }
    }

    fn require_assignable(&mut self, from: TypeId, to: TypeId, span: Span) {
        if !self.assignable(from, to) {
            self.diagnostics.error(
                format!(
                    "type mismatch: expected '{}', found '{}'",
                    self.registry.display(to),
                    self.registry.display(from)
                ),
                span,
            );
        }
    }

    fn unify(&mut self, a: TypeId, b: TypeId, span: Span) -> TypeId {
        if a == b || self.registry.is_error(b) {
            return a;
        }
        if self.registry.is_error(a) {
            return b;
        }
        if self.assignable(b, a) {
            return a;
        }
        if self.assignable(a, b) {
            return b;
        }
        self.diagnostics.error(
            format!(
                "branches have mismatched types '{}' and '{}'",
                self.registry.display(a),
                self.registry.display(b)
            ),
            span,
        );
        self.registry.error_type()
    }

    fn require_bool(&mut self, ty: TypeId, span: Span) {
        if !self.registry.is_bool(ty) && !self.registry.is_error(ty) {
            self.type_error("expected bool, found", ty, span);
        }
    }

    fn require_integer(&mut self, ty: TypeId, span: Span) {
        if !self.registry.is_integer(ty) && !self.registry.is_error(ty) {
            self.type_error("expected an integer, found", ty, span);
        }
    }

    fn type_error(&mut self, prefix: &str, ty: TypeId, span: Span) -> TypeId {
        self.diagnostics
            .error(format!("{} '{}'", prefix, self.registry.display(ty)), span);
        self.registry.error_type()
    }
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}
