//! AST to SSA lowering
//!
//! Translates the annotated AST into the IR module, preserving defer order,
//! short-circuit evaluation and try/catch boundaries. Loop induction
//! variables and short-circuit joins become phis; mutable locals become
//! alloca slots with explicit loads and stores.

use crate::ir::*;
use cot_common::{Diagnostics, Interner, Span};
use cot_parser::{self as ast, DeclKind, ExprKind, Pattern, StmtKind};
use cot_typechecker::{CheckedModule, PrimitiveType, TypeDesc, TypeId, TypeRegistry};
use hashbrown::HashMap;
use smallvec::smallvec;

/// Result of lowering: the IR module plus the registry the emitter needs
/// for layout and refcounting decisions.
pub struct Lowered {
    pub module: Module,
    pub registry: TypeRegistry,
    pub diagnostics: Diagnostics,
}

/// Lower a checked module to SSA IR.
pub fn lower_module(ast_module: &ast::Module, checked: CheckedModule) -> Lowered {
    let mut lowerer = Lowerer {
        checked,
        module: Module::default(),
        diagnostics: Diagnostics::new(),
        strings: Interner::new(),
        lambda_counter: 0,
    };

    for decl in &ast_module.decls {
        match &decl.kind {
            DeclKind::Function(f) => lowerer.lower_function(f, None),
            DeclKind::Impl(imp) => {
                let type_name = lowerer.impl_type_name(imp);
                for method in &imp.methods {
                    lowerer.lower_function(method, Some(type_name.clone()));
                }
            }
            // Tests lower to routines named `test::<name>` so the driver can
            // run them with `cot test`.
            DeclKind::Test(t) => {
                let func = ast::Function {
                    name: t.name.clone(),
                    params: vec![],
                    return_type: None,
                    body: t.body.clone(),
                    is_public: false,
                };
                lowerer.lower_named_function(&func, format!("test::{}", t.name.value));
            }
            _ => {}
        }
    }

    log::debug!(
        "lowered {} functions, {} interned strings",
        lowerer.module.functions.len(),
        lowerer.strings.len()
    );

    let mut module = lowerer.module;
    module.strings = lowerer.strings.into_strings();
    Lowered {
        module,
        registry: lowerer.checked.registry,
        diagnostics: lowerer.diagnostics,
    }
}

struct Lowerer {
    checked: CheckedModule,
    module: Module,
    diagnostics: Diagnostics,
    /// Module-local string interner; becomes the IR module's string pool.
    strings: Interner,
    lambda_counter: u32,
}

impl Lowerer {
    fn impl_type_name(&mut self, imp: &ast::ImplBlock) -> String {
        match imp.self_type.kind.as_ref() {
            ast::TypeRefKind::Named { name, .. } => name.clone(),
            ast::TypeRefKind::Pointer(inner) => match inner.kind.as_ref() {
                ast::TypeRefKind::Named { name, .. } => name.clone(),
                _ => "<impl>".to_string(),
            },
            _ => "<impl>".to_string(),
        }
    }

    fn intern_string(&mut self, s: &str) -> StrId {
        self.strings.intern(s).0
    }

    fn lower_function(&mut self, f: &ast::Function, receiver_type: Option<String>) {
        let symbol_name = match receiver_type {
            Some(type_name) => format!("{}::{}", type_name, f.name.value),
            None => f.name.value.clone(),
        };
        self.lower_named_function(f, symbol_name);
    }

    fn lower_named_function(&mut self, f: &ast::Function, symbol_name: String) {
        let Some(info) = self.checked.functions.get(&symbol_name).cloned() else {
            // Tests are not in the function table; synthesize a void signature.
            let void = self.checked.registry.void();
            let info = cot_typechecker::FunctionInfo {
                name: symbol_name.clone(),
                params: vec![],
                ret: void,
                is_public: false,
                span: f.name.span,
            };
            self.build_function(f, symbol_name, info);
            return;
        };
        self.build_function(f, symbol_name, info);
    }

    fn build_function(
        &mut self,
        f: &ast::Function,
        symbol_name: String,
        info: cot_typechecker::FunctionInfo,
    ) {
        let mut builder = FunctionLowerer::new(self, symbol_name.clone(), &info);

        for (i, (name, _)) in info.params.iter().enumerate() {
            let value = builder.func.params[i].id;
            builder.bind_value(name.clone(), value);
        }

        builder.frames.push(Frame { kind: FrameKind::Function, defers: vec![] });
        builder.lower_block(&f.body);
        if !builder.terminated {
            builder.emit_frame_defers_at(0);
            builder.terminate(Inst::Ret { value: None });
        }
        builder.frames.pop();

        let mut func = builder.finish();
        remove_unreachable_blocks(&mut func);
        self.module.functions.push(func);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FrameKind {
    Function,
    Block,
    Loop { continue_to: BlockId, break_to: BlockId },
    Try,
}

struct Frame {
    kind: FrameKind,
    defers: Vec<ast::Expr>,
}

#[derive(Debug, Clone, Copy)]
enum Binding {
    /// Mutable local backed by an alloca slot.
    Slot(ValueId),
    /// Immutable SSA binding: parameters, loop variables, catch and switch
    /// payload bindings.
    Value(ValueId),
}

struct FunctionLowerer<'a> {
    ctx: &'a mut Lowerer,
    func: Function,
    current: BlockId,
    terminated: bool,
    scopes: Vec<HashMap<String, Binding>>,
    frames: Vec<Frame>,
    last_line: u32,
}

impl<'a> FunctionLowerer<'a> {
    fn new(ctx: &'a mut Lowerer, name: String, info: &cot_typechecker::FunctionInfo) -> Self {
        let mut func = Function {
            name,
            params: Vec::new(),
            return_type: info.ret,
            blocks: Vec::new(),
            value_types: Vec::new(),
            is_public: info.is_public,
        };
        for (_, ty) in &info.params {
            let id = func.value_types.len() as ValueId;
            func.value_types.push(*ty);
            func.params.push(Value { id, type_id: *ty });
        }
        func.blocks.push(Block { id: 0, label: "entry".to_string(), insts: vec![], preds: vec![] });

        Self {
            ctx,
            func,
            current: 0,
            terminated: false,
            scopes: vec![HashMap::new()],
            frames: Vec::new(),
            last_line: 0,
        }
    }

    fn finish(self) -> Function {
        self.func
    }

    // ------------------------------------------------------------------
    // Builder plumbing
    // ------------------------------------------------------------------

    fn registry(&mut self) -> &mut TypeRegistry {
        &mut self.ctx.checked.registry
    }

    fn expr_type(&self, expr: &ast::Expr) -> TypeId {
        // Expressions the checker never reached stay poisoned.
        self.ctx
            .checked
            .expr_types
            .get(&expr.id)
            .copied()
            .unwrap_or(self.ctx.checked.registry.error_ty)
    }

    fn new_value(&mut self, ty: TypeId) -> ValueId {
        let id = self.func.value_types.len() as ValueId;
        self.func.value_types.push(ty);
        id
    }

    fn new_block(&mut self, label: &str) -> BlockId {
        let id = self.func.blocks.len() as BlockId;
        self.func.blocks.push(Block {
            id,
            label: format!("{}{}", label, id),
            insts: vec![],
            preds: vec![],
        });
        id
    }

    fn start_block(&mut self, id: BlockId) {
        self.current = id;
        self.terminated = false;
    }

    fn emit(&mut self, inst: Inst) {
        debug_assert!(!inst.is_terminator(), "terminators go through terminate()");
        if self.terminated {
            // Unreachable code after return/break; park it in a fresh block
            // that the unreachable-block sweep deletes.
            let dead = self.new_block("dead");
            self.start_block(dead);
        }
        self.func.blocks[self.current as usize].insts.push(inst);
    }

    fn terminate(&mut self, inst: Inst) {
        if self.terminated {
            return;
        }
        for succ in inst.successors() {
            let from = self.current;
            let preds = &mut self.func.blocks[succ as usize].preds;
            if !preds.contains(&from) {
                preds.push(from);
            }
        }
        self.func.blocks[self.current as usize].insts.push(inst);
        self.terminated = true;
    }

    fn jump(&mut self, target: BlockId) {
        self.terminate(Inst::Jump { target });
    }

    fn br_if(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Inst::BrIf { cond, then_block, else_block });
    }

    fn add_phi_arg(&mut self, block: BlockId, phi: ValueId, arg: PhiArg) {
        for inst in &mut self.func.blocks[block as usize].insts {
            if let Inst::Phi { dest, args } = inst {
                if *dest == phi {
                    args.push(arg);
                    return;
                }
            }
        }
        debug_assert!(false, "phi %{} not found in bb{}", phi, block);
    }

    // ------------------------------------------------------------------
    // Scope and bindings
    // ------------------------------------------------------------------

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind_value(&mut self, name: String, value: ValueId) {
        self.scopes.last_mut().unwrap().insert(name, Binding::Value(value));
    }

    fn bind_slot(&mut self, name: String, slot: ValueId) {
        self.scopes.last_mut().unwrap().insert(name, Binding::Slot(slot));
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    /// Names visible in the enclosing function, used for lambda capture
    /// analysis.
    fn visible_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for scope in &self.scopes {
            for name in scope.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    // ------------------------------------------------------------------
    // Defer bookkeeping
    // ------------------------------------------------------------------

    /// Emit the defers of frames `at..` in LIFO order, without popping.
    fn emit_frame_defers_at(&mut self, at: usize) {
        let pending: Vec<ast::Expr> = self.frames[at..]
            .iter()
            .rev()
            .flat_map(|frame| frame.defers.iter().rev().cloned())
            .collect();
        for expr in &pending {
            self.lower_expr(expr);
        }
    }

    fn innermost_loop(&self) -> Option<(usize, BlockId, BlockId)> {
        self.frames.iter().enumerate().rev().find_map(|(i, frame)| match frame.kind {
            FrameKind::Loop { continue_to, break_to } => Some((i, continue_to, break_to)),
            _ => None,
        })
    }

    fn innermost_try(&self) -> Option<usize> {
        self.frames
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, frame)| (frame.kind == FrameKind::Try).then_some(i))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_block(&mut self, block: &ast::Block) {
        self.push_scope();
        self.frames.push(Frame { kind: FrameKind::Block, defers: vec![] });
        for stmt in &block.statements {
            self.lower_stmt(stmt);
        }
        let frame_index = self.frames.len() - 1;
        if !self.terminated {
            self.emit_frame_defers_at(frame_index);
        }
        self.frames.pop();
        self.pop_scope();
    }

    fn note_line(&mut self, span: Span) {
        let line = span.start.line;
        if line != self.last_line {
            self.last_line = line;
            self.emit(Inst::DebugLine { line });
        }
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt) {
        if self.terminated {
            // Unreachable statement; nothing observable to lower.
            return;
        }
        self.note_line(stmt.span);
        match &stmt.kind {
            StmtKind::Let(let_stmt) => self.lower_let(let_stmt, stmt.id),
            StmtKind::Assign { target, value } => self.lower_assign(target, value),
            StmtKind::Expr(expr) => {
                self.lower_expr(expr);
            }
            StmtKind::Return(value) => {
                let lowered = value.as_ref().map(|expr| self.lower_expr(expr));
                self.emit_frame_defers_at(0);
                self.terminate(Inst::Ret { value: lowered });
            }
            StmtKind::If(if_stmt) => self.lower_if(if_stmt),
            StmtKind::While { condition, body } => self.lower_while(condition, body),
            StmtKind::For(for_stmt) => self.lower_for(for_stmt),
            StmtKind::Block(block) => self.lower_block(block),
            StmtKind::Switch(switch) => self.lower_switch(switch),
            StmtKind::Loop(body) => self.lower_loop(body),
            StmtKind::Break => {
                let Some((frame_index, _, break_to)) = self.innermost_loop() else {
                    return;
                };
                self.emit_frame_defers_at(frame_index);
                self.jump(break_to);
            }
            StmtKind::Continue => {
                let Some((frame_index, continue_to, _)) = self.innermost_loop() else {
                    return;
                };
                self.emit_frame_defers_at(frame_index);
                self.jump(continue_to);
            }
            StmtKind::Defer(expr) => {
                self.frames.last_mut().unwrap().defers.push(expr.clone());
            }
            StmtKind::TryCatch(tc) => self.lower_try_catch(tc),
            StmtKind::Throw(expr) => {
                let value = self.lower_expr(expr);
                let boundary = self.innermost_try().map(|i| i + 1).unwrap_or(0);
                self.emit_frame_defers_at(boundary);
                self.terminate(Inst::Throw { value });
            }
            StmtKind::Decl(decl) => self.lower_nested_decl(decl),
        }
    }

    fn lower_nested_decl(&mut self, decl: &ast::Decl) {
        match &decl.kind {
            // Type-only declarations were registered by the checker and
            // leave no code behind.
            DeclKind::Struct(_)
            | DeclKind::Enum(_)
            | DeclKind::Union(_)
            | DeclKind::TypeAlias(_) => {}
            DeclKind::Function(f) => self.lower_local_function(f),
            // Anything else in statement position was already diagnosed.
            _ => {}
        }
    }

    /// A local function becomes its own routine named `outer::name`; the
    /// name binds in the enclosing scope as a capture-free closure.
    fn lower_local_function(&mut self, f: &ast::Function) {
        let symbol_name = format!("{}::{}", self.func.name, f.name.value);
        let Some(info) = self.ctx.checked.functions.get(&symbol_name).cloned() else {
            // The checker rejected the declaration; nothing to lower.
            return;
        };

        let param_types: Vec<TypeId> = info.params.iter().map(|(_, t)| *t).collect();
        let fn_ty = self
            .registry()
            .intern(TypeDesc::Function { params: param_types, ret: info.ret });

        let mut builder = FunctionLowerer::new(self.ctx, symbol_name.clone(), &info);
        // The function can call itself through its own name.
        let self_closure = builder.new_value(fn_ty);
        builder.emit(Inst::MakeClosure {
            dest: self_closure,
            function: symbol_name.clone(),
            captures: vec![],
        });
        builder.bind_value(f.name.value.clone(), self_closure);
        for (i, (name, _)) in info.params.iter().enumerate() {
            let value = builder.func.params[i].id;
            builder.bind_value(name.clone(), value);
        }
        builder.frames.push(Frame { kind: FrameKind::Function, defers: vec![] });
        builder.lower_block(&f.body);
        if !builder.terminated {
            builder.emit_frame_defers_at(0);
            builder.terminate(Inst::Ret { value: None });
        }
        builder.frames.pop();
        let mut func = builder.finish();
        remove_unreachable_blocks(&mut func);
        self.ctx.module.functions.push(func);

        let dest = self.new_value(fn_ty);
        self.emit(Inst::MakeClosure { dest, function: symbol_name, captures: vec![] });
        self.bind_value(f.name.value.clone(), dest);
    }

    fn lower_let(&mut self, let_stmt: &ast::LetStmt, stmt_id: ast::NodeId) {
        // The checker records the declared type under the statement id.
        let slot_ty = self
            .ctx
            .checked
            .expr_types
            .get(&stmt_id)
            .copied()
            .or_else(|| let_stmt.initializer.as_ref().map(|init| self.expr_type(init)))
            .unwrap_or(self.ctx.checked.registry.error_ty);

        let slot = self.new_value(slot_ty);
        self.emit(Inst::Alloca { dest: slot, ty: slot_ty });
        if let Some(init) = &let_stmt.initializer {
            let value = self.lower_expr(init);
            self.emit(Inst::Store { slot, value });
        }
        self.bind_slot(let_stmt.name.value.clone(), slot);
    }

    fn lower_assign(&mut self, target: &ast::Expr, value: &ast::Expr) {
        match target.kind.as_ref() {
            ExprKind::Identifier(name) => {
                let lowered = self.lower_expr(value);
                match self.lookup(name) {
                    Some(Binding::Slot(slot)) => self.emit(Inst::Store { slot, value: lowered }),
                    Some(Binding::Value(_)) | None => {
                        self.ctx.diagnostics.error(
                            format!("cannot assign to immutable binding '{}'", name),
                            target.span,
                        );
                    }
                }
            }
            ExprKind::Field { receiver, field } => {
                let base = self.lower_expr(receiver);
                let lowered = self.lower_expr(value);
                let recv_ty = self.expr_type(receiver);
                if let Some(index) = self.field_index(recv_ty, &field.value) {
                    self.emit(Inst::StructSet { base, index, value: lowered });
                }
            }
            ExprKind::Index { receiver, index } => {
                let recv_ty = self.expr_type(receiver);
                let array = self.lower_expr(receiver);
                let idx = self.lower_expr(index);
                let lowered = self.lower_expr(value);
                match self.ctx.checked.registry.get(recv_ty) {
                    TypeDesc::Array { .. } | TypeDesc::Slice(_) => {
                        self.emit(Inst::ArrayStore { array, index: idx, value: lowered });
                    }
                    _ => {
                        self.ctx.diagnostics.error(
                            "unsupported construct: assignment through this index",
                            target.span,
                        );
                    }
                }
            }
            _ => {
                self.ctx
                    .diagnostics
                    .error("unsupported construct: assignment target", target.span);
            }
        }
    }

    fn field_index(&mut self, recv_ty: TypeId, field: &str) -> Option<u32> {
        let fields = self.ctx.checked.registry.struct_fields(recv_ty)?;
        fields.iter().position(|(name, _)| name == field).map(|i| i as u32)
    }

    fn lower_if(&mut self, if_stmt: &ast::IfStmt) {
        let cond = self.lower_expr(&if_stmt.condition);
        let then_bb = self.new_block("then");
        let merge_bb = self.new_block("endif");
        let else_bb = if if_stmt.else_branch.is_some() {
            self.new_block("else")
        } else {
            merge_bb
        };

        self.br_if(cond, then_bb, else_bb);

        self.start_block(then_bb);
        self.lower_block(&if_stmt.then_branch);
        if !self.terminated {
            self.jump(merge_bb);
        }

        if let Some(else_branch) = &if_stmt.else_branch {
            self.start_block(else_bb);
            self.lower_stmt(else_branch);
            if !self.terminated {
                self.jump(merge_bb);
            }
        }

        self.start_block(merge_bb);
    }

    fn lower_while(&mut self, condition: &ast::Expr, body: &ast::Block) {
        let header = self.new_block("while_head");
        let body_bb = self.new_block("while_body");
        let exit = self.new_block("while_exit");

        self.jump(header);
        self.start_block(header);
        let cond = self.lower_expr(condition);
        self.br_if(cond, body_bb, exit);

        self.start_block(body_bb);
        self.frames.push(Frame {
            kind: FrameKind::Loop { continue_to: header, break_to: exit },
            defers: vec![],
        });
        self.lower_block(body);
        self.frames.pop();
        if !self.terminated {
            self.jump(header);
        }

        self.start_block(exit);
    }

    fn lower_loop(&mut self, body: &ast::Block) {
        let header = self.new_block("loop");
        let exit = self.new_block("loop_exit");

        self.jump(header);
        self.start_block(header);
        self.frames.push(Frame {
            kind: FrameKind::Loop { continue_to: header, break_to: exit },
            defers: vec![],
        });
        self.lower_block(body);
        self.frames.pop();
        if !self.terminated {
            self.jump(header);
        }

        self.start_block(exit);
    }

    fn lower_for(&mut self, for_stmt: &ast::ForStmt) {
        let iter_ty = self.expr_type(&for_stmt.iterable);
        match self.ctx.checked.registry.get(iter_ty).clone() {
            TypeDesc::Range { inclusive } => self.lower_for_range(for_stmt, inclusive),
            TypeDesc::Error => {}
            _ => self.lower_for_collection(for_stmt, iter_ty),
        }
    }

    /// `for i in a..b`: phi for the induction variable, and the bound value
    /// is phi'd through the back edge to pin loop invariance.
    fn lower_for_range(&mut self, for_stmt: &ast::ForStmt, inclusive: bool) {
        let ExprKind::Range { start, end, .. } = for_stmt.iterable.kind.as_ref() else {
            self.ctx
                .diagnostics
                .error("unsupported construct: non-literal range loop", for_stmt.iterable.span);
            return;
        };
        let start_v = self.lower_expr(start);
        let end_v = self.lower_expr(end);
        let pre = self.current;

        let i64_t = self.registry().i64_type();
        let bool_t = self.registry().bool_type();

        let header = self.new_block("for_head");
        let body_bb = self.new_block("for_body");
        let latch = self.new_block("for_latch");
        let exit = self.new_block("for_exit");

        self.jump(header);
        self.start_block(header);
        let induction = self.new_value(i64_t);
        self.emit(Inst::Phi {
            dest: induction,
            args: smallvec![PhiArg { block: pre, value: start_v }],
        });
        let bound = self.new_value(i64_t);
        self.emit(Inst::Phi { dest: bound, args: smallvec![PhiArg { block: pre, value: end_v }] });
        // The bound is invariant: the back edge feeds it back to itself.
        self.add_phi_arg(header, bound, PhiArg { block: latch, value: bound });

        let cc = if inclusive { CondCode::Le } else { CondCode::Lt };
        let cond = self.new_value(bool_t);
        self.emit(Inst::ICmp { dest: cond, cc, lhs: induction, rhs: bound });
        self.br_if(cond, body_bb, exit);

        self.start_block(body_bb);
        self.push_scope();
        self.bind_value(for_stmt.binding.value.clone(), induction);
        self.frames.push(Frame {
            kind: FrameKind::Loop { continue_to: latch, break_to: exit },
            defers: vec![],
        });
        self.lower_block(&for_stmt.body);
        self.frames.pop();
        self.pop_scope();
        if !self.terminated {
            self.jump(latch);
        }

        self.start_block(latch);
        let one = self.new_value(i64_t);
        self.emit(Inst::IConst { dest: one, value: 1 });
        let next = self.new_value(i64_t);
        self.emit(Inst::IAdd { dest: next, lhs: induction, rhs: one });
        self.jump(header);
        self.add_phi_arg(header, induction, PhiArg { block: latch, value: next });

        self.start_block(exit);
    }

    fn lower_for_collection(&mut self, for_stmt: &ast::ForStmt, iter_ty: TypeId) {
        let collection = self.lower_expr(&for_stmt.iterable);

        let i64_t = self.registry().i64_type();
        let bool_t = self.registry().bool_type();

        enum IterKind {
            List(TypeId),
            ArrayLike(TypeId),
            Str,
        }
        let list_def = self.ctx.checked.registry.list_def;
        let kind = match self.ctx.checked.registry.get(iter_ty).clone() {
            TypeDesc::GenericInstance { base, args } if base == list_def => IterKind::List(args[0]),
            TypeDesc::Slice(element) => IterKind::ArrayLike(element),
            TypeDesc::Array { element, .. } => IterKind::ArrayLike(element),
            TypeDesc::Primitive(PrimitiveType::String) => IterKind::Str,
            _ => {
                self.ctx
                    .diagnostics
                    .error("unsupported construct: iteration over this type", for_stmt.iterable.span);
                return;
            }
        };

        let len = self.new_value(i64_t);
        match &kind {
            IterKind::List(_) => self.emit(Inst::ListLen { dest: len, list: collection }),
            IterKind::ArrayLike(_) => self.emit(Inst::ArrayLen { dest: len, array: collection }),
            IterKind::Str => self.emit(Inst::StrLen { dest: len, operand: collection }),
        }
        let zero = self.new_value(i64_t);
        self.emit(Inst::IConst { dest: zero, value: 0 });
        let pre = self.current;

        let header = self.new_block("for_head");
        let body_bb = self.new_block("for_body");
        let latch = self.new_block("for_latch");
        let exit = self.new_block("for_exit");

        self.jump(header);
        self.start_block(header);
        let index = self.new_value(i64_t);
        self.emit(Inst::Phi { dest: index, args: smallvec![PhiArg { block: pre, value: zero }] });
        let cond = self.new_value(bool_t);
        self.emit(Inst::ICmp { dest: cond, cc: CondCode::Lt, lhs: index, rhs: len });
        self.br_if(cond, body_bb, exit);

        self.start_block(body_bb);
        let element = match kind {
            IterKind::List(element_ty) => {
                let dest = self.new_value(element_ty);
                self.emit(Inst::ListGet { dest, list: collection, index });
                dest
            }
            IterKind::ArrayLike(element_ty) => {
                let dest = self.new_value(element_ty);
                self.emit(Inst::ArrayLoad { dest, array: collection, index });
                dest
            }
            IterKind::Str => {
                let dest = self.new_value(i64_t);
                self.emit(Inst::StrIndex { dest, operand: collection, index });
                dest
            }
        };
        self.push_scope();
        self.bind_value(for_stmt.binding.value.clone(), element);
        self.frames.push(Frame {
            kind: FrameKind::Loop { continue_to: latch, break_to: exit },
            defers: vec![],
        });
        self.lower_block(&for_stmt.body);
        self.frames.pop();
        self.pop_scope();
        if !self.terminated {
            self.jump(latch);
        }

        self.start_block(latch);
        let one = self.new_value(i64_t);
        self.emit(Inst::IConst { dest: one, value: 1 });
        let next = self.new_value(i64_t);
        self.emit(Inst::IAdd { dest: next, lhs: index, rhs: one });
        self.jump(header);
        self.add_phi_arg(header, index, PhiArg { block: latch, value: next });

        self.start_block(exit);
    }

    fn lower_switch(&mut self, switch: &ast::SwitchStmt) {
        let scrutinee_ty = self.expr_type(&switch.scrutinee);
        let scrutinee = self.lower_expr(&switch.scrutinee);
        let is_enum = matches!(self.ctx.checked.registry.get(scrutinee_ty), TypeDesc::Enum { .. });

        let merge = self.new_block("switch_end");

        if is_enum {
            self.lower_enum_switch(switch, scrutinee, scrutinee_ty, merge);
        } else {
            self.lower_value_switch(switch, scrutinee, scrutinee_ty, merge);
        }

        self.start_block(merge);
    }

    /// Enum switch: `variant_get_tag` feeds a `br_table`; payload extraction
    /// happens inside each arm.
    fn lower_enum_switch(
        &mut self,
        switch: &ast::SwitchStmt,
        scrutinee: ValueId,
        scrutinee_ty: TypeId,
        merge: BlockId,
    ) {
        let TypeDesc::Enum { variants, .. } = self.ctx.checked.registry.get(scrutinee_ty).clone()
        else {
            return;
        };

        let i64_t = self.registry().i64_type();
        let tag = self.new_value(i64_t);
        self.emit(Inst::VariantGetTag { dest: tag, variant: scrutinee });

        let mut targets: Vec<(i64, BlockId)> = Vec::new();
        let mut arm_blocks: Vec<(BlockId, &ast::SwitchArm)> = Vec::new();
        let mut default = merge;

        for arm in &switch.arms {
            let arm_bb = self.new_block("arm");
            match &arm.pattern {
                Pattern::Variant { name, .. } => {
                    if let Some(tag_value) =
                        variants.iter().position(|v| v.name == name.value)
                    {
                        targets.push((tag_value as i64, arm_bb));
                    }
                }
                Pattern::Wildcard => default = arm_bb,
                Pattern::Literal(_) => {
                    self.ctx
                        .diagnostics
                        .error("unsupported construct: literal pattern on enum", arm.span);
                }
            }
            arm_blocks.push((arm_bb, arm));
        }

        self.terminate(Inst::BrTable { value: tag, targets, default });

        for (arm_bb, arm) in arm_blocks {
            self.start_block(arm_bb);
            self.push_scope();
            if let Pattern::Variant { name, bindings } = &arm.pattern {
                if let Some(variant) = variants.iter().find(|v| v.name == name.value) {
                    for (i, (binding, payload_ty)) in
                        bindings.iter().zip(variant.payload.iter()).enumerate()
                    {
                        let dest = self.new_value(*payload_ty);
                        self.emit(Inst::VariantGetPayload {
                            dest,
                            variant: scrutinee,
                            index: i as u32,
                        });
                        self.bind_value(binding.value.clone(), dest);
                    }
                }
            }
            self.lower_block(&arm.body);
            if !self.terminated {
                self.jump(merge);
            }
            self.pop_scope();
        }
    }

    /// Integer switches become a `br_table`; strings and bools compare arm
    /// by arm.
    fn lower_value_switch(
        &mut self,
        switch: &ast::SwitchStmt,
        scrutinee: ValueId,
        scrutinee_ty: TypeId,
        merge: BlockId,
    ) {
        let is_int = self.ctx.checked.registry.is_integer(scrutinee_ty);
        let bool_t = self.registry().bool_type();

        if is_int {
            let mut targets: Vec<(i64, BlockId)> = Vec::new();
            let mut default = merge;
            let mut arm_blocks: Vec<(BlockId, &ast::SwitchArm)> = Vec::new();

            for arm in &switch.arms {
                let arm_bb = self.new_block("case");
                match &arm.pattern {
                    Pattern::Literal(expr) => {
                        if let Some(value) = const_int_of(expr) {
                            targets.push((value, arm_bb));
                        } else {
                            self.ctx.diagnostics.error(
                                "switch case must be an integer literal",
                                expr.span,
                            );
                        }
                    }
                    Pattern::Wildcard => default = arm_bb,
                    Pattern::Variant { name, .. } => {
                        self.ctx.diagnostics.error(
                            format!("variant pattern '{}' on non-enum switch", name.value),
                            arm.span,
                        );
                    }
                }
                arm_blocks.push((arm_bb, arm));
            }

            self.terminate(Inst::BrTable { value: scrutinee, targets, default });

            for (arm_bb, arm) in arm_blocks {
                self.start_block(arm_bb);
                self.lower_block(&arm.body);
                if !self.terminated {
                    self.jump(merge);
                }
            }
            return;
        }

        // Compare chain for strings and bools.
        let is_string = self.ctx.checked.registry.is_string(scrutinee_ty);
        let mut wildcard_arm: Option<&ast::SwitchArm> = None;
        for arm in &switch.arms {
            match &arm.pattern {
                Pattern::Wildcard => wildcard_arm = Some(arm),
                Pattern::Literal(expr) => {
                    let case_value = self.lower_expr(expr);
                    let cond = self.new_value(bool_t);
                    if is_string {
                        self.emit(Inst::StrCompare {
                            dest: cond,
                            cc: CondCode::Eq,
                            lhs: scrutinee,
                            rhs: case_value,
                        });
                    } else {
                        self.emit(Inst::ICmp {
                            dest: cond,
                            cc: CondCode::Eq,
                            lhs: scrutinee,
                            rhs: case_value,
                        });
                    }
                    let arm_bb = self.new_block("case");
                    let next = self.new_block("case_next");
                    self.br_if(cond, arm_bb, next);
                    self.start_block(arm_bb);
                    self.lower_block(&arm.body);
                    if !self.terminated {
                        self.jump(merge);
                    }
                    self.start_block(next);
                }
                Pattern::Variant { name, .. } => {
                    self.ctx.diagnostics.error(
                        format!("variant pattern '{}' on non-enum switch", name.value),
                        arm.span,
                    );
                }
            }
        }
        if let Some(arm) = wildcard_arm {
            self.lower_block(&arm.body);
        }
        if !self.terminated {
            self.jump(merge);
        }
    }

    fn lower_try_catch(&mut self, tc: &ast::TryCatchStmt) {
        let catch_bb = self.new_block("catch");
        let merge = self.new_block("try_end");

        self.emit(Inst::SetHandler { handler: catch_bb });
        self.frames.push(Frame { kind: FrameKind::Try, defers: vec![] });
        self.lower_block(&tc.try_block);
        self.frames.pop();
        if !self.terminated {
            self.emit(Inst::ClearHandler);
            self.jump(merge);
        }

        self.start_block(catch_bb);
        let i64_t = self.registry().i64_type();
        let payload = self.new_value(i64_t);
        self.emit(Inst::CatchPayload { dest: payload });
        self.push_scope();
        self.bind_value(tc.catch_binding.value.clone(), payload);
        self.lower_block(&tc.catch_block);
        self.pop_scope();
        if !self.terminated {
            self.jump(merge);
        }

        self.start_block(merge);
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn lower_expr(&mut self, expr: &ast::Expr) -> ValueId {
        let ty = self.expr_type(expr);
        match expr.kind.as_ref() {
            ExprKind::IntLiteral(value) => {
                let dest = self.new_value(ty);
                self.emit(Inst::IConst { dest, value: *value });
                dest
            }
            ExprKind::FloatLiteral(value) => {
                let dest = self.new_value(ty);
                self.emit(Inst::FConst { dest, value: *value });
                dest
            }
            ExprKind::StringLiteral(s) => {
                let id = self.ctx.intern_string(s);
                let dest = self.new_value(ty);
                self.emit(Inst::SConst { dest, value: id });
                dest
            }
            ExprKind::BoolLiteral(value) => {
                let dest = self.new_value(ty);
                self.emit(Inst::BConst { dest, value: *value });
                dest
            }
            ExprKind::NullLiteral => {
                let dest = self.new_value(ty);
                self.emit(Inst::NullConst { dest });
                dest
            }
            ExprKind::Identifier(name) => self.lower_identifier(name, ty, expr.span),
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand, ty),
            ExprKind::Binary { op, left, right } => self.lower_binary(*op, left, right, ty),
            ExprKind::Ternary { condition, then_value, else_value } => {
                self.lower_ternary(condition, then_value, else_value, ty)
            }
            ExprKind::NullCoalesce { value, fallback } => {
                self.lower_null_coalesce(value, fallback, ty)
            }
            ExprKind::Call { callee, args } => self.lower_call(callee, args, ty),
            ExprKind::MethodCall { receiver, method, args } => {
                self.lower_method_call(expr, receiver, method, args, ty)
            }
            ExprKind::Field { receiver, field } => {
                let base = self.lower_expr(receiver);
                let recv_ty = self.expr_type(receiver);
                let dest = self.new_value(ty);
                let index = self.field_index(recv_ty, &field.value).unwrap_or(0);
                self.emit(Inst::StructGet { dest, base, index });
                dest
            }
            ExprKind::OptionalField { receiver, field } => {
                let recv_ty = self.expr_type(receiver);
                let base = self.lower_expr(receiver);
                let index = {
                    let inner = match self.ctx.checked.registry.get(recv_ty) {
                        TypeDesc::Optional(inner) => *inner,
                        _ => recv_ty,
                    };
                    self.field_index(inner, &field.value).unwrap_or(0)
                };
                self.lower_optional_access(base, ty, |this, unwrapped| {
                    let dest_ty = ty;
                    let dest = this.new_value(dest_ty);
                    this.emit(Inst::StructGet { dest, base: unwrapped, index });
                    dest
                })
            }
            ExprKind::Index { receiver, index } => {
                let recv_ty = self.expr_type(receiver);
                let base = self.lower_expr(receiver);
                let idx = self.lower_expr(index);
                let dest = self.new_value(ty);
                match self.ctx.checked.registry.get(recv_ty) {
                    TypeDesc::Primitive(PrimitiveType::String) => {
                        self.emit(Inst::StrIndex { dest, operand: base, index: idx });
                    }
                    _ => {
                        self.emit(Inst::ArrayLoad { dest, array: base, index: idx });
                    }
                }
                dest
            }
            ExprKind::OptionalIndex { receiver, index } => {
                let recv_ty = self.expr_type(receiver);
                let base = self.lower_expr(receiver);
                let idx = self.lower_expr(index);
                let inner = match self.ctx.checked.registry.get(recv_ty) {
                    TypeDesc::Optional(inner) => *inner,
                    _ => recv_ty,
                };
                let is_string = self.ctx.checked.registry.is_string(inner);
                self.lower_optional_access(base, ty, |this, unwrapped| {
                    let dest = this.new_value(ty);
                    if is_string {
                        this.emit(Inst::StrIndex { dest, operand: unwrapped, index: idx });
                    } else {
                        this.emit(Inst::ArrayLoad { dest, array: unwrapped, index: idx });
                    }
                    dest
                })
            }
            ExprKind::Slice { receiver, start, end } => {
                let recv_ty = self.expr_type(receiver);
                let base = self.lower_expr(receiver);
                let start_v = self.lower_expr(start);
                let end_v = self.lower_expr(end);
                let dest = self.new_value(ty);
                if self.ctx.checked.registry.is_string(recv_ty) {
                    self.emit(Inst::StrSlice { dest, operand: base, start: start_v, end: end_v });
                } else {
                    self.emit(Inst::SliceNew { dest, base, start: start_v, end: end_v });
                }
                dest
            }
            ExprKind::Range { .. } => {
                // Ranges only exist as loop bounds; a first-class range value
                // has no runtime representation.
                self.ctx
                    .diagnostics
                    .error("unsupported construct: range outside of a for loop", expr.span);
                let dest = self.new_value(ty);
                self.emit(Inst::IConst { dest, value: 0 });
                dest
            }
            ExprKind::Cast { operand, ty: _ } => self.lower_cast(operand, ty),
            ExprKind::TypeTest { operand, ty: _ } => {
                // `is` resolves statically except for the optional null test.
                let operand_ty = self.expr_type(operand);
                let value = self.lower_expr(operand);
                let dest = self.new_value(ty);
                if matches!(self.ctx.checked.registry.get(operand_ty), TypeDesc::Optional(_)) {
                    let bool_t = self.registry().bool_type();
                    let isnull = self.new_value(bool_t);
                    self.emit(Inst::IsNull { dest: isnull, operand: value });
                    self.emit(Inst::LogNot { dest, operand: isnull });
                } else {
                    self.emit(Inst::BConst { dest, value: true });
                }
                dest
            }
            ExprKind::StructInit { fields, .. } => {
                let struct_ty = match self.ctx.checked.registry.get(ty) {
                    TypeDesc::Pointer(inner) => *inner,
                    _ => ty,
                };
                let field_order: Vec<String> = self
                    .ctx
                    .checked
                    .registry
                    .struct_fields(struct_ty)
                    .map(|fs| fs.iter().map(|(n, _)| n.clone()).collect())
                    .unwrap_or_default();
                let mut ordered: Vec<ValueId> = Vec::with_capacity(field_order.len());
                for field_name in &field_order {
                    let init = fields.iter().find(|f| &f.name.value == field_name);
                    match init {
                        Some(init) => ordered.push(self.lower_expr(&init.value)),
                        None => {
                            // Checker already reported the missing field.
                            let dest = self.new_value(struct_ty);
                            self.emit(Inst::IConst { dest, value: 0 });
                            ordered.push(dest);
                        }
                    }
                }
                let dest = self.new_value(ty);
                self.emit(Inst::StructNew { dest, ty: struct_ty, fields: ordered });
                dest
            }
            ExprKind::CollectionInit { .. } => {
                let dest = self.new_value(ty);
                let list_def = self.ctx.checked.registry.list_def;
                let is_list = matches!(
                    self.ctx.checked.registry.get(ty),
                    TypeDesc::GenericInstance { base, .. } if *base == list_def
                );
                if is_list {
                    self.emit(Inst::ListNew { dest });
                } else {
                    self.emit(Inst::MapNew { dest });
                }
                dest
            }
            ExprKind::ArrayInit { elements } => {
                let element_ty = match self.ctx.checked.registry.get(ty) {
                    TypeDesc::Array { element, .. } => *element,
                    _ => ty,
                };
                let dest = self.new_value(ty);
                self.emit(Inst::ArrayNew {
                    dest,
                    element: element_ty,
                    len: elements.len() as u64,
                });
                let i64_t = self.registry().i64_type();
                for (i, element) in elements.iter().enumerate() {
                    let value = self.lower_expr(element);
                    let index = self.new_value(i64_t);
                    self.emit(Inst::IConst { dest: index, value: i as i64 });
                    self.emit(Inst::ArrayStore { array: dest, index, value });
                }
                dest
            }
            ExprKind::Lambda { params, body } => self.lower_lambda(params, body, ty),
            ExprKind::InterpolatedString { segments, exprs } => {
                self.lower_interpolated_string(segments, exprs, ty)
            }
            ExprKind::VariantInit { variant, args, .. } => {
                let tag = match self.ctx.checked.registry.get(ty) {
                    TypeDesc::Enum { variants, .. } => variants
                        .iter()
                        .position(|v| v.name == variant.value)
                        .unwrap_or(0) as u32,
                    _ => 0,
                };
                let payload: Vec<ValueId> =
                    args.iter().map(|arg| self.lower_expr(arg)).collect();
                let dest = self.new_value(ty);
                self.emit(Inst::VariantConstruct { dest, ty, tag, payload });
                dest
            }
        }
    }

    fn lower_identifier(&mut self, name: &str, ty: TypeId, span: Span) -> ValueId {
        match self.lookup(name) {
            Some(Binding::Value(value)) => value,
            Some(Binding::Slot(slot)) => {
                let dest = self.new_value(ty);
                self.emit(Inst::Load { dest, slot });
                dest
            }
            None => {
                // A bare function name becomes a capture-free closure.
                if self.ctx.checked.functions.contains_key(name) {
                    let dest = self.new_value(ty);
                    self.emit(Inst::MakeClosure {
                        dest,
                        function: name.to_string(),
                        captures: vec![],
                    });
                    return dest;
                }
                self.ctx
                    .diagnostics
                    .error(format!("unresolved identifier '{}'", name), span);
                let dest = self.new_value(ty);
                self.emit(Inst::IConst { dest, value: 0 });
                dest
            }
        }
    }

    fn lower_unary(&mut self, op: ast::UnaryOp, operand: &ast::Expr, ty: TypeId) -> ValueId {
        // Constant folding for literal operands.
        if let Some(folded) = self.fold_unary(op, operand, ty) {
            return folded;
        }

        let value = self.lower_expr(operand);
        let operand_ty = self.expr_type(operand);
        let dest = self.new_value(ty);
        match op {
            ast::UnaryOp::Neg => {
                if self.ctx.checked.registry.as_primitive(operand_ty).map_or(false, |p| p.is_float())
                {
                    self.emit(Inst::FNeg { dest, operand: value });
                } else {
                    self.emit(Inst::INeg { dest, operand: value });
                }
            }
            ast::UnaryOp::Not => self.emit(Inst::LogNot { dest, operand: value }),
            ast::UnaryOp::BitNot => self.emit(Inst::BNot { dest, operand: value }),
            ast::UnaryOp::Deref => self.emit(Inst::Bitcast { dest, operand: value }),
        }
        dest
    }

    fn fold_unary(&mut self, op: ast::UnaryOp, operand: &ast::Expr, ty: TypeId) -> Option<ValueId> {
        match (op, operand.kind.as_ref()) {
            (ast::UnaryOp::Neg, ExprKind::IntLiteral(v)) => {
                let dest = self.new_value(ty);
                self.emit(Inst::IConst { dest, value: v.wrapping_neg() });
                Some(dest)
            }
            (ast::UnaryOp::Neg, ExprKind::FloatLiteral(v)) => {
                let dest = self.new_value(ty);
                self.emit(Inst::FConst { dest, value: -v });
                Some(dest)
            }
            (ast::UnaryOp::Not, ExprKind::BoolLiteral(v)) => {
                let dest = self.new_value(ty);
                self.emit(Inst::BConst { dest, value: !v });
                Some(dest)
            }
            (ast::UnaryOp::BitNot, ExprKind::IntLiteral(v)) => {
                let dest = self.new_value(ty);
                self.emit(Inst::IConst { dest, value: !v });
                Some(dest)
            }
            _ => None,
        }
    }

    fn lower_binary(
        &mut self,
        op: ast::BinaryOp,
        left: &ast::Expr,
        right: &ast::Expr,
        ty: TypeId,
    ) -> ValueId {
        use ast::BinaryOp as B;

        // Short-circuit operators build a diamond with a phi at the join.
        if matches!(op, B::And | B::Or) {
            return self.lower_short_circuit(op, left, right, ty);
        }

        // Null comparisons use the dedicated null test.
        if matches!(op, B::Eq | B::Ne) {
            let null_operand = match (left.kind.as_ref(), right.kind.as_ref()) {
                (ExprKind::NullLiteral, _) => Some(right),
                (_, ExprKind::NullLiteral) => Some(left),
                _ => None,
            };
            if let Some(checked_side) = null_operand {
                let value = self.lower_expr(checked_side);
                let dest = self.new_value(ty);
                if op == B::Eq {
                    self.emit(Inst::IsNull { dest, operand: value });
                } else {
                    let bool_t = self.registry().bool_type();
                    let isnull = self.new_value(bool_t);
                    self.emit(Inst::IsNull { dest: isnull, operand: value });
                    self.emit(Inst::LogNot { dest, operand: isnull });
                }
                return dest;
            }
        }

        // Constant folding over literal operands, wrapping semantics.
        if let Some(folded) = self.fold_binary(op, left, right, ty) {
            return folded;
        }

        let left_ty = self.expr_type(left);
        let right_ty = self.expr_type(right);
        let lhs = self.lower_expr(left);
        let rhs = self.lower_expr(right);

        let lp = self.ctx.checked.registry.as_primitive(left_ty);
        let rp = self.ctx.checked.registry.as_primitive(right_ty);
        let string_op = self.ctx.checked.registry.is_string(left_ty)
            && self.ctx.checked.registry.is_string(right_ty);
        let float_op = lp.map_or(false, |p| p.is_float()) || rp.map_or(false, |p| p.is_float());
        let signed = lp.map_or(true, |p| p.is_signed() || p.is_float());

        // Widen the integer side of a mixed int/float operation.
        let (lhs, rhs) = if float_op {
            let f64_t = self.registry().f64_type();
            let lhs = if lp.map_or(false, |p| p.is_integer()) {
                let conv = self.new_value(f64_t);
                self.emit(Inst::IntToFloat { dest: conv, operand: lhs });
                conv
            } else {
                lhs
            };
            let rhs = if rp.map_or(false, |p| p.is_integer()) {
                let conv = self.new_value(f64_t);
                self.emit(Inst::IntToFloat { dest: conv, operand: rhs });
                conv
            } else {
                rhs
            };
            (lhs, rhs)
        } else {
            (lhs, rhs)
        };

        let dest = self.new_value(ty);
        match op {
            B::Add if string_op => self.emit(Inst::StrConcat { dest, lhs, rhs }),
            B::Add if float_op => self.emit(Inst::FAdd { dest, lhs, rhs }),
            B::Add => self.emit(Inst::IAdd { dest, lhs, rhs }),
            B::Sub if float_op => self.emit(Inst::FSub { dest, lhs, rhs }),
            B::Sub => self.emit(Inst::ISub { dest, lhs, rhs }),
            B::Mul if float_op => self.emit(Inst::FMul { dest, lhs, rhs }),
            B::Mul => self.emit(Inst::IMul { dest, lhs, rhs }),
            B::Div if float_op => self.emit(Inst::FDiv { dest, lhs, rhs }),
            B::Div if signed => self.emit(Inst::SDiv { dest, lhs, rhs }),
            B::Div => self.emit(Inst::UDiv { dest, lhs, rhs }),
            B::Mod if signed => self.emit(Inst::SRem { dest, lhs, rhs }),
            B::Mod => self.emit(Inst::URem { dest, lhs, rhs }),
            B::Eq | B::Ne | B::Lt | B::Le | B::Gt | B::Ge => {
                let cc = match op {
                    B::Eq => CondCode::Eq,
                    B::Ne => CondCode::Ne,
                    B::Lt => CondCode::Lt,
                    B::Le => CondCode::Le,
                    B::Gt => CondCode::Gt,
                    _ => CondCode::Ge,
                };
                if string_op {
                    self.emit(Inst::StrCompare { dest, cc, lhs, rhs });
                } else if float_op {
                    self.emit(Inst::FCmp { dest, cc, lhs, rhs });
                } else {
                    self.emit(Inst::ICmp { dest, cc, lhs, rhs });
                }
            }
            B::BitAnd => self.emit(Inst::BAnd { dest, lhs, rhs }),
            B::BitOr => self.emit(Inst::BOr { dest, lhs, rhs }),
            B::BitXor => self.emit(Inst::BXor { dest, lhs, rhs }),
            B::Shl => self.emit(Inst::Shl { dest, lhs, rhs }),
            B::Shr if signed => self.emit(Inst::AShr { dest, lhs, rhs }),
            B::Shr => self.emit(Inst::LShr { dest, lhs, rhs }),
            B::And | B::Or => unreachable!("short-circuit handled above"),
        }
        dest
    }

    fn fold_binary(
        &mut self,
        op: ast::BinaryOp,
        left: &ast::Expr,
        right: &ast::Expr,
        ty: TypeId,
    ) -> Option<ValueId> {
        use ast::BinaryOp as B;
        let a = eval_const_int(left)?;
        let b = eval_const_int(right)?;
        if let Some(value) = apply_int_op(op, a, b) {
            let dest = self.new_value(ty);
            self.emit(Inst::IConst { dest, value });
            return Some(dest);
        }
        let bool_result = match op {
            B::Eq => Some(a == b),
            B::Ne => Some(a != b),
            B::Lt => Some(a < b),
            B::Le => Some(a <= b),
            B::Gt => Some(a > b),
            B::Ge => Some(a >= b),
            _ => None,
        };
        bool_result.map(|value| {
            let dest = self.new_value(ty);
            self.emit(Inst::BConst { dest, value });
            dest
        })
    }

    fn lower_short_circuit(
        &mut self,
        op: ast::BinaryOp,
        left: &ast::Expr,
        right: &ast::Expr,
        ty: TypeId,
    ) -> ValueId {
        let lhs = self.lower_expr(left);

        // The short-circuit result for the skipping edge.
        let skip_value = self.new_value(ty);
        self.emit(Inst::BConst {
            dest: skip_value,
            value: matches!(op, ast::BinaryOp::Or),
        });
        let entry = self.current;

        let rhs_bb = self.new_block("sc_rhs");
        let merge = self.new_block("sc_end");

        if matches!(op, ast::BinaryOp::And) {
            self.br_if(lhs, rhs_bb, merge);
        } else {
            self.br_if(lhs, merge, rhs_bb);
        }

        self.start_block(rhs_bb);
        let rhs = self.lower_expr(right);
        let rhs_end = self.current;
        self.jump(merge);

        self.start_block(merge);
        let dest = self.new_value(ty);
        self.emit(Inst::Phi {
            dest,
            args: smallvec![
                PhiArg { block: entry, value: skip_value },
                PhiArg { block: rhs_end, value: rhs },
            ],
        });
        dest
    }

    fn lower_ternary(
        &mut self,
        condition: &ast::Expr,
        then_value: &ast::Expr,
        else_value: &ast::Expr,
        ty: TypeId,
    ) -> ValueId {
        let cond = self.lower_expr(condition);
        let then_bb = self.new_block("tern_then");
        let else_bb = self.new_block("tern_else");
        let merge = self.new_block("tern_end");

        self.br_if(cond, then_bb, else_bb);

        self.start_block(then_bb);
        let then_v = self.lower_expr(then_value);
        let then_end = self.current;
        self.jump(merge);

        self.start_block(else_bb);
        let else_v = self.lower_expr(else_value);
        let else_end = self.current;
        self.jump(merge);

        self.start_block(merge);
        let dest = self.new_value(ty);
        self.emit(Inst::Phi {
            dest,
            args: smallvec![
                PhiArg { block: then_end, value: then_v },
                PhiArg { block: else_end, value: else_v },
            ],
        });
        dest
    }

    fn lower_null_coalesce(
        &mut self,
        value: &ast::Expr,
        fallback: &ast::Expr,
        ty: TypeId,
    ) -> ValueId {
        let lowered = self.lower_expr(value);
        let bool_t = self.registry().bool_type();
        let isnull = self.new_value(bool_t);
        self.emit(Inst::IsNull { dest: isnull, operand: lowered });

        let null_bb = self.new_block("coalesce_null");
        let ok_bb = self.new_block("coalesce_ok");
        let merge = self.new_block("coalesce_end");

        self.br_if(isnull, null_bb, ok_bb);

        self.start_block(null_bb);
        let fallback_v = self.lower_expr(fallback);
        let null_end = self.current;
        self.jump(merge);

        self.start_block(ok_bb);
        let unwrapped = self.new_value(ty);
        self.emit(Inst::UnwrapOptional { dest: unwrapped, operand: lowered });
        let ok_end = self.current;
        self.jump(merge);

        self.start_block(merge);
        let dest = self.new_value(ty);
        self.emit(Inst::Phi {
            dest,
            args: smallvec![
                PhiArg { block: null_end, value: fallback_v },
                PhiArg { block: ok_end, value: unwrapped },
            ],
        });
        dest
    }

    /// Shared shape of `?.` and `?[`: null check, access on the non-null
    /// path, wrap, and a phi joining with the null result.
    fn lower_optional_access(
        &mut self,
        base: ValueId,
        result_ty: TypeId,
        access: impl FnOnce(&mut Self, ValueId) -> ValueId,
    ) -> ValueId {
        let bool_t = self.registry().bool_type();
        let isnull = self.new_value(bool_t);
        self.emit(Inst::IsNull { dest: isnull, operand: base });

        let null_bb = self.new_block("opt_null");
        let ok_bb = self.new_block("opt_ok");
        let merge = self.new_block("opt_end");

        self.br_if(isnull, null_bb, ok_bb);

        self.start_block(null_bb);
        let null_v = self.new_value(result_ty);
        self.emit(Inst::NullConst { dest: null_v });
        let null_end = self.current;
        self.jump(merge);

        self.start_block(ok_bb);
        let base_ty = self.func.value_types[base as usize];
        let unwrapped = self.new_value(base_ty);
        self.emit(Inst::UnwrapOptional { dest: unwrapped, operand: base });
        let raw = access(self, unwrapped);
        let wrapped = self.new_value(result_ty);
        self.emit(Inst::WrapOptional { dest: wrapped, operand: raw });
        let ok_end = self.current;
        self.jump(merge);

        self.start_block(merge);
        let dest = self.new_value(result_ty);
        self.emit(Inst::Phi {
            dest,
            args: smallvec![
                PhiArg { block: null_end, value: null_v },
                PhiArg { block: ok_end, value: wrapped },
            ],
        });
        dest
    }

    fn lower_call(&mut self, callee: &ast::Expr, args: &[ast::Expr], ty: TypeId) -> ValueId {
        if let ExprKind::Identifier(name) = callee.kind.as_ref() {
            if self.lookup(name).is_none() {
                if let Some(value) = self.lower_builtin_call(name, args, ty) {
                    return value;
                }
                if self.ctx.checked.functions.contains_key(name.as_str()) {
                    let lowered: Vec<ValueId> =
                        args.iter().map(|arg| self.lower_expr(arg)).collect();
                    let dest = self.call_dest(ty);
                    self.emit(Inst::Call {
                        dest,
                        callee: name.clone(),
                        args: lowered,
                    });
                    return dest.map(|v| v.id).unwrap_or_else(|| self.void_value());
                }
            }
        }

        // Calling a closure value.
        let closure = self.lower_expr(callee);
        let lowered: Vec<ValueId> = args.iter().map(|arg| self.lower_expr(arg)).collect();
        let dest = self.call_dest(ty);
        self.emit(Inst::CallClosure { dest, closure, args: lowered });
        dest.map(|v| v.id).unwrap_or_else(|| self.void_value())
    }

    fn call_dest(&mut self, ty: TypeId) -> Option<Value> {
        if self.ctx.checked.registry.is_void(ty) {
            None
        } else {
            let id = self.new_value(ty);
            Some(Value { id, type_id: ty })
        }
    }

    /// Placeholder value for void calls used in expression position.
    fn void_value(&mut self) -> ValueId {
        let void = self.registry().void();
        let dest = self.new_value(void);
        self.emit(Inst::IConst { dest, value: 0 });
        dest
    }

    fn lower_builtin_call(
        &mut self,
        name: &str,
        args: &[ast::Expr],
        ty: TypeId,
    ) -> Option<ValueId> {
        match name {
            "println" | "print" => {
                let func = if name == "println" { NativeFn::Println } else { NativeFn::Print };
                let lowered: Vec<ValueId> = args.iter().map(|a| self.lower_expr(a)).collect();
                self.emit(Inst::NativeCall { dest: None, func, args: lowered });
                Some(self.void_value())
            }
            "string" => {
                let arg = args.first()?;
                let arg_ty = self.expr_type(arg);
                let value = self.lower_expr(arg);
                Some(self.stringify(value, arg_ty, ty))
            }
            "len" => {
                let arg = args.first()?;
                let arg_ty = self.expr_type(arg);
                let value = self.lower_expr(arg);
                let dest = self.new_value(ty);
                let map_def = self.ctx.checked.registry.map_def;
                match self.ctx.checked.registry.get(arg_ty) {
                    TypeDesc::Primitive(PrimitiveType::String) => {
                        self.emit(Inst::StrLen { dest, operand: value })
                    }
                    TypeDesc::GenericInstance { base, .. } if *base == map_def => {
                        self.emit(Inst::MapLen { dest, map: value })
                    }
                    TypeDesc::GenericInstance { .. } => {
                        self.emit(Inst::ListLen { dest, list: value })
                    }
                    _ => self.emit(Inst::ArrayLen { dest, array: value }),
                }
                Some(dest)
            }
            "assert" => {
                let lowered: Vec<ValueId> = args.iter().map(|a| self.lower_expr(a)).collect();
                self.emit(Inst::NativeCall { dest: None, func: NativeFn::Assert, args: lowered });
                Some(self.void_value())
            }
            "panic" => {
                let lowered: Vec<ValueId> = args.iter().map(|a| self.lower_expr(a)).collect();
                self.emit(Inst::NativeCall { dest: None, func: NativeFn::Panic, args: lowered });
                Some(self.void_value())
            }
            _ => None,
        }
    }

    fn stringify(&mut self, value: ValueId, value_ty: TypeId, string_ty: TypeId) -> ValueId {
        if self.ctx.checked.registry.is_string(value_ty) {
            return value;
        }
        let func = if self
            .ctx
            .checked
            .registry
            .as_primitive(value_ty)
            .map_or(false, |p| p.is_float())
        {
            NativeFn::FloatToString
        } else if self.ctx.checked.registry.is_bool(value_ty) {
            NativeFn::BoolToString
        } else {
            NativeFn::IntToString
        };
        let dest = self.new_value(string_ty);
        self.emit(Inst::NativeCall {
            dest: Some(Value { id: dest, type_id: string_ty }),
            func,
            args: vec![value],
        });
        dest
    }

    fn lower_method_call(
        &mut self,
        expr: &ast::Expr,
        receiver: &ast::Expr,
        method: &cot_common::Spanned<String>,
        args: &[ast::Expr],
        ty: TypeId,
    ) -> ValueId {
        let recv_ty = self.expr_type(receiver);
        let recv = self.lower_expr(receiver);

        let list_def = self.ctx.checked.registry.list_def;
        let map_def = self.ctx.checked.registry.map_def;
        if let TypeDesc::GenericInstance { base, .. } = self.ctx.checked.registry.get(recv_ty) {
            let base = *base;
            if base == list_def {
                return self.lower_list_method(recv, method, args, ty);
            }
            if base == map_def {
                return self.lower_map_method(recv, method, args, ty);
            }
        }

        if method.value == "len" {
            let dest = self.new_value(ty);
            match self.ctx.checked.registry.get(recv_ty) {
                TypeDesc::Primitive(PrimitiveType::String) => {
                    self.emit(Inst::StrLen { dest, operand: recv })
                }
                _ => self.emit(Inst::ArrayLen { dest, array: recv }),
            }
            return dest;
        }

        // User method: receiver becomes the first argument.
        let Some(target) = self.ctx.checked.method_targets.get(&expr.id).cloned() else {
            self.ctx.diagnostics.error(
                format!("unsupported construct: unresolved method '{}'", method.value),
                method.span,
            );
            return self.void_value();
        };
        let mut lowered = vec![recv];
        lowered.extend(args.iter().map(|arg| self.lower_expr(arg)));
        let dest = self.call_dest(ty);
        self.emit(Inst::Call { dest, callee: target, args: lowered });
        dest.map(|v| v.id).unwrap_or_else(|| self.void_value())
    }

    fn lower_list_method(
        &mut self,
        list: ValueId,
        method: &cot_common::Spanned<String>,
        args: &[ast::Expr],
        ty: TypeId,
    ) -> ValueId {
        let lowered: Vec<ValueId> = args.iter().map(|arg| self.lower_expr(arg)).collect();
        match method.value.as_str() {
            "push" => {
                self.emit(Inst::ListPush { list, value: lowered[0] });
                self.void_value()
            }
            "pop" => {
                let dest = self.new_value(ty);
                self.emit(Inst::ListPop { dest, list });
                dest
            }
            "get" => {
                let dest = self.new_value(ty);
                self.emit(Inst::ListGet { dest, list, index: lowered[0] });
                dest
            }
            "set" => {
                self.emit(Inst::ListSet { list, index: lowered[0], value: lowered[1] });
                self.void_value()
            }
            "len" => {
                let dest = self.new_value(ty);
                self.emit(Inst::ListLen { dest, list });
                dest
            }
            _ => self.void_value(),
        }
    }

    fn lower_map_method(
        &mut self,
        map: ValueId,
        method: &cot_common::Spanned<String>,
        args: &[ast::Expr],
        ty: TypeId,
    ) -> ValueId {
        let lowered: Vec<ValueId> = args.iter().map(|arg| self.lower_expr(arg)).collect();
        match method.value.as_str() {
            "set" => {
                self.emit(Inst::MapSet { map, key: lowered[0], value: lowered[1] });
                self.void_value()
            }
            "get" => {
                let dest = self.new_value(ty);
                self.emit(Inst::MapGet { dest, map, key: lowered[0] });
                dest
            }
            "has" => {
                let dest = self.new_value(ty);
                self.emit(Inst::MapHas { dest, map, key: lowered[0] });
                dest
            }
            "delete" => {
                self.emit(Inst::MapDelete { map, key: lowered[0] });
                self.void_value()
            }
            "len" => {
                let dest = self.new_value(ty);
                self.emit(Inst::MapLen { dest, map });
                dest
            }
            _ => self.void_value(),
        }
    }

    fn lower_cast(&mut self, operand: &ast::Expr, to: TypeId) -> ValueId {
        let from = self.expr_type(operand);
        let value = self.lower_expr(operand);
        if from == to {
            return value;
        }

        // Optional unwrap after a null check carries no conversion.
        if matches!(self.ctx.checked.registry.get(from), TypeDesc::Optional(inner) if *inner == to)
        {
            let dest = self.new_value(to);
            self.emit(Inst::UnwrapOptional { dest, operand: value });
            return dest;
        }

        let fp = self.ctx.checked.registry.as_primitive(from);
        let tp = self.ctx.checked.registry.as_primitive(to);
        let dest = self.new_value(to);
        match (fp, tp) {
            (Some(f), Some(t)) if f.is_integer() && t.is_float() => {
                self.emit(Inst::IntToFloat { dest, operand: value })
            }
            (Some(f), Some(t)) if f.is_float() && t.is_integer() => {
                self.emit(Inst::FloatToInt { dest, operand: value })
            }
            (Some(f), Some(t)) if f.is_integer() && t.is_integer() => {
                if t.numeric_rank() > f.numeric_rank() {
                    if f.is_signed() {
                        self.emit(Inst::Sext { dest, operand: value })
                    } else {
                        self.emit(Inst::Uext { dest, operand: value })
                    }
                } else if t.numeric_rank() < f.numeric_rank() {
                    self.emit(Inst::Trunc { dest, operand: value })
                } else {
                    self.emit(Inst::Bitcast { dest, operand: value })
                }
            }
            _ => self.emit(Inst::Bitcast { dest, operand: value }),
        }
        dest
    }

    fn lower_lambda(
        &mut self,
        params: &[ast::LambdaParam],
        body: &ast::Block,
        ty: TypeId,
    ) -> ValueId {
        // Free variables: names used in the body that resolve in the
        // enclosing function rather than the lambda's own scope.
        let mut declared: Vec<String> =
            params.iter().map(|p| p.name.value.clone()).collect();
        let mut free = Vec::new();
        collect_free_vars(body, &mut declared, &mut free);

        let visible = self.visible_names();
        let captures: Vec<String> =
            free.into_iter().filter(|name| visible.contains(name)).collect();

        let capture_values: Vec<ValueId> = captures
            .iter()
            .map(|name| match self.lookup(name) {
                Some(Binding::Value(v)) => v,
                Some(Binding::Slot(slot)) => {
                    let ty = self.func.value_types[slot as usize];
                    let dest = self.new_value(ty);
                    self.emit(Inst::Load { dest, slot });
                    dest
                }
                None => unreachable!("capture resolved above"),
            })
            .collect();

        let lambda_name = format!("{}::lambda${}", self.func.name, self.ctx.lambda_counter);
        self.ctx.lambda_counter += 1;

        // The closure function receives captures as leading parameters,
        // then the declared parameters; the VM prepends the environment on
        // dispatch.
        let (param_types, ret) = match self.ctx.checked.registry.get(ty) {
            TypeDesc::Function { params, ret } => (params.clone(), *ret),
            _ => (vec![], self.ctx.checked.registry.void_ty),
        };
        let mut info_params: Vec<(String, TypeId)> = captures
            .iter()
            .zip(capture_values.iter())
            .map(|(name, v)| (name.clone(), self.func.value_types[*v as usize]))
            .collect();
        info_params.extend(
            params
                .iter()
                .zip(param_types.iter())
                .map(|(p, ty)| (p.name.value.clone(), *ty)),
        );
        let info = cot_typechecker::FunctionInfo {
            name: lambda_name.clone(),
            params: info_params,
            ret,
            is_public: false,
            span: Span::dummy(),
        };

        let lambda_ast = ast::Function {
            name: cot_common::Spanned::new(lambda_name.clone(), Span::dummy()),
            params: vec![],
            return_type: None,
            body: body.clone(),
            is_public: false,
        };

        // Build the lambda body as its own routine.
        let mut builder = FunctionLowerer::new(self.ctx, lambda_name.clone(), &info);
        for (i, (name, _)) in info.params.iter().enumerate() {
            let value = builder.func.params[i].id;
            builder.bind_value(name.clone(), value);
        }
        builder.frames.push(Frame { kind: FrameKind::Function, defers: vec![] });
        builder.lower_block(&lambda_ast.body);
        if !builder.terminated {
            builder.emit_frame_defers_at(0);
            builder.terminate(Inst::Ret { value: None });
        }
        builder.frames.pop();
        let mut lambda_func = builder.finish();
        remove_unreachable_blocks(&mut lambda_func);
        self.ctx.module.functions.push(lambda_func);

        // Register the signature so calls through the closure can be
        // arity-checked at emission.
        self.ctx.checked.functions.insert(lambda_name.clone(), info);

        let dest = self.new_value(ty);
        self.emit(Inst::MakeClosure { dest, function: lambda_name, captures: capture_values });
        dest
    }

    fn lower_interpolated_string(
        &mut self,
        segments: &[String],
        exprs: &[ast::Expr],
        ty: TypeId,
    ) -> ValueId {
        let mut acc: Option<ValueId> = None;

        let mut push = |this: &mut Self, piece: ValueId| {
            acc = Some(match acc {
                None => piece,
                Some(current) => {
                    let dest = this.new_value(ty);
                    this.emit(Inst::StrConcat { dest, lhs: current, rhs: piece });
                    dest
                }
            });
        };

        for (i, segment) in segments.iter().enumerate() {
            if !segment.is_empty() {
                let id = self.ctx.intern_string(segment);
                let dest = self.new_value(ty);
                self.emit(Inst::SConst { dest, value: id });
                push(self, dest);
            }
            if let Some(inner) = exprs.get(i) {
                let inner_ty = self.expr_type(inner);
                let value = self.lower_expr(inner);
                let piece = self.stringify(value, inner_ty, ty);
                push(self, piece);
            }
        }

        acc.unwrap_or_else(|| {
            let id = self.ctx.intern_string("");
            let dest = self.new_value(ty);
            self.emit(Inst::SConst { dest, value: id });
            dest
        })
    }
}

fn const_int_of(expr: &ast::Expr) -> Option<i64> {
    match expr.kind.as_ref() {
        ExprKind::BoolLiteral(b) => Some(*b as i64),
        _ => eval_const_int(expr),
    }
}

/// Recursive compile-time integer evaluation with wrapping signed
/// semantics, matching what the VM computes at run time.
fn eval_const_int(expr: &ast::Expr) -> Option<i64> {
    match expr.kind.as_ref() {
        ExprKind::IntLiteral(v) => Some(*v),
        ExprKind::Unary { op, operand } => {
            let v = eval_const_int(operand)?;
            match op {
                ast::UnaryOp::Neg => Some(v.wrapping_neg()),
                ast::UnaryOp::BitNot => Some(!v),
                _ => None,
            }
        }
        ExprKind::Binary { op, left, right } => {
            let a = eval_const_int(left)?;
            let b = eval_const_int(right)?;
            apply_int_op(*op, a, b)
        }
        _ => None,
    }
}

fn apply_int_op(op: ast::BinaryOp, a: i64, b: i64) -> Option<i64> {
    use ast::BinaryOp as B;
    match op {
        B::Add => Some(a.wrapping_add(b)),
        B::Sub => Some(a.wrapping_sub(b)),
        B::Mul => Some(a.wrapping_mul(b)),
        // Division by a constant zero is left to the runtime trap.
        B::Div if b != 0 => Some(a.wrapping_div(b)),
        B::Mod if b != 0 => Some(a.wrapping_rem(b)),
        B::BitAnd => Some(a & b),
        B::BitOr => Some(a | b),
        B::BitXor => Some(a ^ b),
        B::Shl => Some(a.wrapping_shl(b as u32)),
        B::Shr => Some(a.wrapping_shr(b as u32)),
        _ => None,
    }
}

/// Names referenced by `block` that are not declared within it.
fn collect_free_vars(block: &ast::Block, declared: &mut Vec<String>, free: &mut Vec<String>) {
    let depth = declared.len();
    for stmt in &block.statements {
        collect_free_vars_stmt(stmt, declared, free);
    }
    declared.truncate(depth);
}

fn collect_free_vars_stmt(stmt: &ast::Stmt, declared: &mut Vec<String>, free: &mut Vec<String>) {
    match &stmt.kind {
        StmtKind::Let(l) => {
            if let Some(init) = &l.initializer {
                collect_free_vars_expr(init, declared, free);
            }
            declared.push(l.name.value.clone());
        }
        StmtKind::Assign { target, value } => {
            collect_free_vars_expr(target, declared, free);
            collect_free_vars_expr(value, declared, free);
        }
        StmtKind::Expr(e) | StmtKind::Defer(e) | StmtKind::Throw(e) => {
            collect_free_vars_expr(e, declared, free)
        }
        StmtKind::Return(Some(e)) => collect_free_vars_expr(e, declared, free),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Decl(_) => {}
        StmtKind::If(i) => {
            collect_free_vars_expr(&i.condition, declared, free);
            collect_free_vars(&i.then_branch, declared, free);
            if let Some(e) = &i.else_branch {
                collect_free_vars_stmt(e, declared, free);
            }
        }
        StmtKind::While { condition, body } => {
            collect_free_vars_expr(condition, declared, free);
            collect_free_vars(body, declared, free);
        }
        StmtKind::For(f) => {
            collect_free_vars_expr(&f.iterable, declared, free);
            declared.push(f.binding.value.clone());
            collect_free_vars(&f.body, declared, free);
            declared.pop();
        }
        StmtKind::Block(b) => collect_free_vars(b, declared, free),
        StmtKind::Switch(s) => {
            collect_free_vars_expr(&s.scrutinee, declared, free);
            for arm in &s.arms {
                let depth = declared.len();
                if let Pattern::Variant { bindings, .. } = &arm.pattern {
                    for b in bindings {
                        declared.push(b.value.clone());
                    }
                }
                collect_free_vars(&arm.body, declared, free);
                declared.truncate(depth);
            }
        }
        StmtKind::Loop(b) => collect_free_vars(b, declared, free),
        StmtKind::TryCatch(tc) => {
            collect_free_vars(&tc.try_block, declared, free);
            declared.push(tc.catch_binding.value.clone());
            collect_free_vars(&tc.catch_block, declared, free);
            declared.pop();
        }
    }
}

fn collect_free_vars_expr(expr: &ast::Expr, declared: &mut Vec<String>, free: &mut Vec<String>) {
    match expr.kind.as_ref() {
        ExprKind::Identifier(name) => {
            if !declared.contains(name) && !free.contains(name) {
                free.push(name.clone());
            }
        }
        ExprKind::Unary { operand, .. } => collect_free_vars_expr(operand, declared, free),
        ExprKind::Binary { left, right, .. } => {
            collect_free_vars_expr(left, declared, free);
            collect_free_vars_expr(right, declared, free);
        }
        ExprKind::Ternary { condition, then_value, else_value } => {
            collect_free_vars_expr(condition, declared, free);
            collect_free_vars_expr(then_value, declared, free);
            collect_free_vars_expr(else_value, declared, free);
        }
        ExprKind::NullCoalesce { value, fallback } => {
            collect_free_vars_expr(value, declared, free);
            collect_free_vars_expr(fallback, declared, free);
        }
        ExprKind::Call { callee, args } => {
            collect_free_vars_expr(callee, declared, free);
            for arg in args {
                collect_free_vars_expr(arg, declared, free);
            }
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            collect_free_vars_expr(receiver, declared, free);
            for arg in args {
                collect_free_vars_expr(arg, declared, free);
            }
        }
        ExprKind::Field { receiver, .. } | ExprKind::OptionalField { receiver, .. } => {
            collect_free_vars_expr(receiver, declared, free)
        }
        ExprKind::Index { receiver, index } | ExprKind::OptionalIndex { receiver, index } => {
            collect_free_vars_expr(receiver, declared, free);
            collect_free_vars_expr(index, declared, free);
        }
        ExprKind::Slice { receiver, start, end } => {
            collect_free_vars_expr(receiver, declared, free);
            collect_free_vars_expr(start, declared, free);
            collect_free_vars_expr(end, declared, free);
        }
        ExprKind::Range { start, end, .. } => {
            collect_free_vars_expr(start, declared, free);
            collect_free_vars_expr(end, declared, free);
        }
        ExprKind::Cast { operand, .. } | ExprKind::TypeTest { operand, .. } => {
            collect_free_vars_expr(operand, declared, free)
        }
        ExprKind::StructInit { fields, .. } => {
            for field in fields {
                collect_free_vars_expr(&field.value, declared, free);
            }
        }
        ExprKind::ArrayInit { elements } => {
            for element in elements {
                collect_free_vars_expr(element, declared, free);
            }
        }
        ExprKind::Lambda { params, body } => {
            let depth = declared.len();
            for p in params {
                declared.push(p.name.value.clone());
            }
            collect_free_vars(body, declared, free);
            declared.truncate(depth);
        }
        ExprKind::InterpolatedString { exprs, .. } => {
            for e in exprs {
                collect_free_vars_expr(e, declared, free);
            }
        }
        ExprKind::VariantInit { args, .. } => {
            for arg in args {
                collect_free_vars_expr(arg, declared, free);
            }
        }
        _ => {}
    }
}

/// Dead-code elimination: drop blocks unreachable from the entry. Handler
/// blocks named by `set_handler` count as reachable.
pub fn remove_unreachable_blocks(func: &mut Function) {
    let block_count = func.blocks.len();
    let mut reachable = vec![false; block_count];
    let mut worklist = vec![0u32];

    while let Some(id) = worklist.pop() {
        if reachable[id as usize] {
            continue;
        }
        reachable[id as usize] = true;
        let block = &func.blocks[id as usize];
        for inst in &block.insts {
            if let Inst::SetHandler { handler } = inst {
                worklist.push(*handler);
            }
        }
        if let Some(term) = block.terminator() {
            worklist.extend(term.successors());
        }
    }

    if reachable.iter().all(|&r| r) {
        return;
    }

    // Remap surviving block ids and rewrite references.
    let mut remap: Vec<Option<BlockId>> = vec![None; block_count];
    let mut next = 0u32;
    for (i, is_reachable) in reachable.iter().enumerate() {
        if *is_reachable {
            remap[i] = Some(next);
            next += 1;
        }
    }

    let map = |id: BlockId, remap: &[Option<BlockId>]| -> BlockId {
        remap[id as usize].expect("reference to unreachable block")
    };

    let mut new_blocks = Vec::with_capacity(next as usize);
    for (i, mut block) in std::mem::take(&mut func.blocks).into_iter().enumerate() {
        if !reachable[i] {
            continue;
        }
        block.id = remap[i].unwrap();
        block.preds.retain(|p| reachable[*p as usize]);
        for pred in &mut block.preds {
            *pred = map(*pred, &remap);
        }
        for inst in &mut block.insts {
            match inst {
                Inst::Jump { target } => *target = map(*target, &remap),
                Inst::BrIf { then_block, else_block, .. } => {
                    *then_block = map(*then_block, &remap);
                    *else_block = map(*else_block, &remap);
                }
                Inst::BrTable { targets, default, .. } => {
                    for (_, block) in targets.iter_mut() {
                        *block = map(*block, &remap);
                    }
                    *default = map(*default, &remap);
                }
                Inst::SetHandler { handler } => *handler = map(*handler, &remap),
                Inst::Phi { args, .. } => {
                    args.retain(|arg| reachable[arg.block as usize]);
                    for arg in args.iter_mut() {
                        arg.block = map(arg.block, &remap);
                    }
                }
                _ => {}
            }
        }
        new_blocks.push(block);
    }
    func.blocks = new_blocks;
}
