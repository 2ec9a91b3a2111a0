//! Bytecode emission
//!
//! Flattens the IR to the register bytecode: phi elimination through
//! per-phi slots with parallel copies in predecessors, linear-scan register
//! allocation, ARC retain/release insertion, and jump patching. Emission
//! invariants (no unresolved jump, call arity matches target arity) are
//! internal compiler errors when violated; the IR dump rides along in the
//! error.

use crate::buffer::CodeBuf;
use crate::image::{ConstPool, DebugLineEntry, Export, Image, Routine};
use crate::opcode::{CmpCode, Opcode, RoutineFlags, MAX_REG_ARGS};
use crate::regalloc::RegAlloc;
use cot_common::{CotError, CotResult};
use cot_ir::{self as ir, BlockId, CondCode, Inst, NativeFn, ValueId};
use cot_typechecker::{TypeDesc, TypeRegistry};
use hashbrown::HashMap;

/// Emit a whole IR module as a bytecode image.
pub fn emit_module(module: &ir::Module, registry: &TypeRegistry) -> CotResult<Image> {
    let mut pool = ConstPool::new();
    let mut routine_index: HashMap<&str, u16> = HashMap::new();
    for (i, func) in module.functions.iter().enumerate() {
        routine_index.insert(&func.name, i as u16);
    }

    let mut code = CodeBuf::new();
    let mut routines = Vec::new();
    let mut exports = Vec::new();
    let mut debug_lines = Vec::new();

    for func in &module.functions {
        ir::verify_function(func)?;

        let start = code.len() as u32;
        let emitter = FuncEmitter::new(module, registry, &routine_index, &mut pool, &mut code);
        let result = emitter.emit(func)?;
        debug_lines.extend(result.debug_lines);

        let name_const = pool.intern_ident(&func.name);
        let mut flags = RoutineFlags::empty();
        if func.is_public {
            flags |= RoutineFlags::PUBLIC;
        }
        if func.name.starts_with("test::") {
            flags |= RoutineFlags::TEST;
        }
        if func.name.contains("::lambda$") {
            flags |= RoutineFlags::CLOSURE;
        }

        routines.push(Routine {
            name_const,
            code_offset: start,
            code_length: code.len() as u32 - start,
            local_count: result.local_count,
            arg_count: func.params.len() as u8,
            flags: flags.bits(),
        });

        let exported = func.is_public || func.name == "main" || func.name.starts_with("test::");
        if exported {
            exports.push(Export {
                name_const,
                routine_idx: routines.len() as u32 - 1,
            });
        }
    }

    log::debug!(
        "emitted {} routines, {} bytes of code, {} pool entries",
        routines.len(),
        code.len(),
        pool.len()
    );

    Ok(Image {
        constants: pool.entries().to_vec(),
        routines,
        code: code.into_bytes(),
        exports,
        debug_lines,
    })
}

/// Linearized instruction stream items.
enum LItem<'f> {
    Start(BlockId),
    I(&'f Inst),
    /// Phi elimination copy: store `src` into `dest`'s phi slot.
    PhiCopy { dest: ValueId, src: ValueId },
}

struct FuncResult {
    local_count: u16,
    debug_lines: Vec<DebugLineEntry>,
}

enum PendingKind {
    I16,
    I32,
}

struct PendingJump {
    /// Byte position of the offset field within the code buffer.
    patch_at: usize,
    /// First byte after the whole offset field; offsets are relative to it.
    base: usize,
    kind: PendingKind,
    target: BlockId,
}

struct FuncEmitter<'a> {
    module: &'a ir::Module,
    registry: &'a TypeRegistry,
    routine_index: &'a HashMap<&'a str, u16>,
    pool: &'a mut ConstPool,
    code: &'a mut CodeBuf,
    ra: RegAlloc,
    /// Alloca value -> local slot.
    alloca_slots: HashMap<ValueId, u16>,
    /// Refcounted alloca slots, released on return.
    owned_slots: Vec<u16>,
    block_offsets: HashMap<BlockId, usize>,
    pending: Vec<PendingJump>,
    debug_lines: Vec<DebugLineEntry>,
}

impl<'a> FuncEmitter<'a> {
    fn new(
        module: &'a ir::Module,
        registry: &'a TypeRegistry,
        routine_index: &'a HashMap<&'a str, u16>,
        pool: &'a mut ConstPool,
        code: &'a mut CodeBuf,
    ) -> Self {
        Self {
            module,
            registry,
            routine_index,
            pool,
            code,
            ra: RegAlloc::new(0),
            alloca_slots: HashMap::new(),
            owned_slots: Vec::new(),
            block_offsets: HashMap::new(),
            pending: Vec::new(),
            debug_lines: Vec::new(),
        }
    }

    fn ice(&self, func: &ir::Function, msg: impl Into<String>) -> CotError {
        CotError::ice_with_dump(msg.into(), func.to_string())
    }

    fn emit(mut self, func: &'a ir::Function) -> CotResult<FuncResult> {
        self.ra = RegAlloc::new(func.params.len() as u16);
        for (i, param) in func.params.iter().enumerate() {
            self.ra.set_home_slot(param.id, i as u16);
        }

        let items = self.linearize(func);

        // Slot pre-pass: allocas and phi destinations get local slots.
        for item in &items {
            if let LItem::I(inst) = item {
                match inst {
                    Inst::Alloca { dest, ty } => {
                        let slot = self.ra.alloc_slot();
                        self.alloca_slots.insert(*dest, slot);
                        if self.registry.is_refcounted(*ty) {
                            self.owned_slots.push(slot);
                        }
                    }
                    Inst::Phi { dest, .. } => {
                        let slot = self.ra.alloc_slot();
                        self.ra.set_home_slot(*dest, slot);
                    }
                    _ => {}
                }
            }
        }

        // Use-distance pre-pass (backward semantics, forward construction:
        // positions ascend, so each list is sorted oldest-first).
        for (pos, item) in items.iter().enumerate() {
            let pos = pos as u32;
            match item {
                LItem::I(inst) => {
                    for used in reg_uses(inst) {
                        self.ra.add_use(used, pos);
                    }
                }
                LItem::PhiCopy { src, .. } => self.ra.add_use(*src, pos),
                LItem::Start(_) => {}
            }
        }

        // Emission pass.
        let mut pos = 0u32;
        let mut i = 0usize;
        while i < items.len() {
            match &items[i] {
                LItem::Start(block) => {
                    self.block_offsets.insert(*block, self.code.len());
                    i += 1;
                    pos += 1;
                }
                LItem::PhiCopy { .. } => {
                    // A run of consecutive copies is one parallel move:
                    // bring every source into a register first, then store.
                    let run_start = i;
                    let mut run = Vec::new();
                    while let Some(LItem::PhiCopy { dest, src }) = items.get(i) {
                        run.push((*dest, *src));
                        i += 1;
                    }
                    let mut loaded = Vec::with_capacity(run.len());
                    for (offset, (dest, src)) in run.iter().enumerate() {
                        let reg = self.ra.ensure_in_reg(*src, self.code)?;
                        self.ra.lock(reg);
                        loaded.push((*dest, *src, reg, run_start + offset));
                    }
                    for (dest, src, reg, at) in loaded {
                        let slot = self
                            .ra
                            .slot_of(dest)
                            .ok_or_else(|| self.ice(func, format!("phi %{} has no slot", dest)))?;
                        self.code.op(Opcode::StoreLocal);
                        self.code.u16(slot);
                        self.code.regs(&[reg]);
                        self.ra.end_use(src, at as u32);
                        // Any stale register copy of the phi value would be
                        // spilled over the slot we just wrote.
                        self.ra.evict_no_spill(dest);
                    }
                    self.ra.unlock_all();
                    pos = i as u32;
                }
                LItem::I(inst) => {
                    self.emit_inst(func, inst, pos)?;
                    self.ra.unlock_all();
                    i += 1;
                    pos += 1;
                }
            }
        }

        // Resolve forward jumps; anything unresolved is an ICE.
        let pending = std::mem::take(&mut self.pending);
        for jump in pending {
            let Some(&target_offset) = self.block_offsets.get(&jump.target) else {
                return Err(self.ice(func, format!("unresolved jump to bb{}", jump.target)));
            };
            let delta = target_offset as i64 - jump.base as i64;
            match jump.kind {
                PendingKind::I16 => {
                    let delta = i16::try_from(delta).map_err(|_| {
                        self.ice(func, format!("jump offset {} exceeds i16 range", delta))
                    })?;
                    self.code.patch_i16(jump.patch_at, delta);
                }
                PendingKind::I32 => {
                    let delta = i32::try_from(delta).map_err(|_| {
                        self.ice(func, format!("jump offset {} exceeds i32 range", delta))
                    })?;
                    self.code.patch_i32(jump.patch_at, delta);
                }
            }
        }

        Ok(FuncResult {
            local_count: self.ra.local_count(),
            debug_lines: std::mem::take(&mut self.debug_lines),
        })
    }

    /// Lay blocks out in order; phis vanish and reappear as parallel copies
    /// at the end of each predecessor.
    fn linearize(&self, func: &'a ir::Function) -> Vec<LItem<'a>> {
        let mut items = Vec::new();
        for block in &func.blocks {
            items.push(LItem::Start(block.id));
            let body_end = block.insts.len().saturating_sub(1);
            for inst in &block.insts[..body_end] {
                if matches!(inst, Inst::Phi { .. }) {
                    continue;
                }
                items.push(LItem::I(inst));
            }
            let Some(terminator) = block.insts.last() else { continue };
            for succ in terminator.successors() {
                for inst in &func.blocks[succ as usize].insts {
                    match inst {
                        Inst::Phi { dest, args } => {
                            if let Some(arg) = args.iter().find(|a| a.block == block.id) {
                                items.push(LItem::PhiCopy { dest: *dest, src: arg.value });
                            }
                        }
                        Inst::DebugLine { .. } => continue,
                        _ => break,
                    }
                }
            }
            items.push(LItem::I(terminator));
        }
        items
    }

    fn is_refcounted(&self, func: &ir::Function, value: ValueId) -> bool {
        let ty = func.value_types[value as usize];
        self.registry.is_refcounted(ty)
    }

    /// Struct-by-value collection payloads go through the StructBox entry
    /// points; pointers and scalars use the plain ones.
    fn is_struct_value(&self, func: &ir::Function, value: ValueId) -> bool {
        let ty = func.value_types[value as usize];
        matches!(self.registry.get(ty), TypeDesc::Struct { .. })
    }

    fn retain_if_needed(&mut self, func: &ir::Function, value: ValueId, reg: u8) {
        if self.is_refcounted(func, value) {
            self.code.op(Opcode::Retain);
            self.code.regs(&[reg]);
        }
    }

    fn operand(&mut self, value: ValueId, _pos: u32) -> CotResult<u8> {
        let reg = self.ra.ensure_in_reg(value, self.code)?;
        self.ra.lock(reg);
        Ok(reg)
    }

    fn finish_uses(&mut self, values: &[ValueId], pos: u32) {
        for value in values {
            self.ra.end_use(*value, pos);
        }
    }

    fn dest_reg(&mut self, value: ValueId, pos: u32) -> CotResult<u8> {
        let reg = self.ra.alloc_dest(value, self.code)?;
        // A value with no uses frees its register immediately.
        self.ra.end_use(value, pos);
        Ok(reg)
    }

    fn three_reg(
        &mut self,
        op: Opcode,
        dest: ValueId,
        lhs: ValueId,
        rhs: ValueId,
        pos: u32,
    ) -> CotResult<()> {
        let a = self.operand(lhs, pos)?;
        let b = self.operand(rhs, pos)?;
        self.finish_uses(&[lhs, rhs], pos);
        let d = self.dest_reg(dest, pos)?;
        self.code.op(op);
        self.code.regs(&[d, a, b]);
        Ok(())
    }

    fn two_reg(&mut self, op: Opcode, dest: ValueId, src: ValueId, pos: u32) -> CotResult<()> {
        let s = self.operand(src, pos)?;
        self.finish_uses(&[src], pos);
        let d = self.dest_reg(dest, pos)?;
        self.code.op(op);
        self.code.regs(&[d, s]);
        Ok(())
    }

    fn jump_to(&mut self, op: Opcode, target: BlockId) {
        self.code.op(op);
        let patch_at = self.code.len();
        match op {
            Opcode::Jmp | Opcode::JmpIf | Opcode::JmpIfNot => {
                self.code.i16(0);
                self.pending.push(PendingJump {
                    patch_at,
                    base: patch_at + 2,
                    kind: PendingKind::I16,
                    target,
                });
            }
            _ => {
                self.code.i32(0);
                self.pending.push(PendingJump {
                    patch_at,
                    base: patch_at + 4,
                    kind: PendingKind::I32,
                    target,
                });
            }
        }
    }

    /// Shared call protocol: spill everything live, stage arguments in
    /// r0.., then invalidate the register file. Extra arguments beyond the
    /// register window travel via PushArg.
    fn stage_args(&mut self, args: &[ValueId], pos: u32) -> CotResult<(u8, u8)> {
        self.ra.spill_all_live(self.code)?;

        let reg_args = args.len().min(MAX_REG_ARGS);
        let stack_args = args.len() - reg_args;

        for arg in &args[reg_args..] {
            let slot = self
                .ra
                .slot_of(*arg)
                .ok_or_else(|| CotError::ice(format!("argument %{} has no slot", arg)))?;
            self.code.op(Opcode::LoadLocal);
            self.code.regs(&[0]);
            self.code.u16(slot);
            self.code.op(Opcode::PushArg);
            self.code.regs(&[0]);
        }

        for (i, arg) in args[..reg_args].iter().enumerate() {
            let slot = self
                .ra
                .slot_of(*arg)
                .ok_or_else(|| CotError::ice(format!("argument %{} has no slot", arg)))?;
            self.code.op(Opcode::LoadLocal);
            self.code.regs(&[i as u8]);
            self.code.u16(slot);
        }

        self.finish_uses(args, pos);
        Ok((reg_args as u8, stack_args as u8))
    }

    fn call_result(&mut self, dest: Option<ir::Value>, pos: u32) -> CotResult<()> {
        self.ra.clear_regs();
        if let Some(dest) = dest {
            let reg = self.dest_reg(dest.id, pos)?;
            self.code.op(Opcode::LoadResult);
            self.code.regs(&[reg]);
        }
        Ok(())
    }

    fn emit_inst(&mut self, func: &ir::Function, inst: &Inst, pos: u32) -> CotResult<()> {
        match inst {
            Inst::IConst { dest, value } => {
                let reg = self.dest_reg(*dest, pos)?;
                if let Ok(small) = i32::try_from(*value) {
                    self.code.op(Opcode::ConstInt);
                    self.code.regs(&[reg]);
                    self.code.i32(small);
                } else {
                    let idx = self.pool.intern_i64(*value);
                    self.code.op(Opcode::ConstPool);
                    self.code.regs(&[reg]);
                    self.code.u32(idx);
                }
            }
            Inst::FConst { dest, value } => {
                let reg = self.dest_reg(*dest, pos)?;
                let idx = self.pool.intern_f64(*value);
                self.code.op(Opcode::ConstPool);
                self.code.regs(&[reg]);
                self.code.u32(idx);
            }
            Inst::SConst { dest, value } => {
                let reg = self.dest_reg(*dest, pos)?;
                let idx = self.pool.intern_str(self.module.string(*value));
                self.code.op(Opcode::ConstStr);
                self.code.regs(&[reg]);
                self.code.u32(idx);
            }
            Inst::BConst { dest, value } => {
                let reg = self.dest_reg(*dest, pos)?;
                self.code.op(if *value { Opcode::ConstTrue } else { Opcode::ConstFalse });
                self.code.regs(&[reg]);
            }
            Inst::NullConst { dest } => {
                let reg = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::ConstNull);
                self.code.regs(&[reg]);
            }

            Inst::IAdd { dest, lhs, rhs } => self.three_reg(Opcode::IAdd, *dest, *lhs, *rhs, pos)?,
            Inst::ISub { dest, lhs, rhs } => self.three_reg(Opcode::ISub, *dest, *lhs, *rhs, pos)?,
            Inst::IMul { dest, lhs, rhs } => self.three_reg(Opcode::IMul, *dest, *lhs, *rhs, pos)?,
            Inst::SDiv { dest, lhs, rhs } => self.three_reg(Opcode::SDiv, *dest, *lhs, *rhs, pos)?,
            Inst::UDiv { dest, lhs, rhs } => self.three_reg(Opcode::UDiv, *dest, *lhs, *rhs, pos)?,
            Inst::SRem { dest, lhs, rhs } => self.three_reg(Opcode::SRem, *dest, *lhs, *rhs, pos)?,
            Inst::URem { dest, lhs, rhs } => self.three_reg(Opcode::URem, *dest, *lhs, *rhs, pos)?,
            Inst::INeg { dest, operand } => self.two_reg(Opcode::INeg, *dest, *operand, pos)?,
            Inst::FAdd { dest, lhs, rhs } => self.three_reg(Opcode::FAdd, *dest, *lhs, *rhs, pos)?,
            Inst::FSub { dest, lhs, rhs } => self.three_reg(Opcode::FSub, *dest, *lhs, *rhs, pos)?,
            Inst::FMul { dest, lhs, rhs } => self.three_reg(Opcode::FMul, *dest, *lhs, *rhs, pos)?,
            Inst::FDiv { dest, lhs, rhs } => self.three_reg(Opcode::FDiv, *dest, *lhs, *rhs, pos)?,
            Inst::FNeg { dest, operand } => self.two_reg(Opcode::FNeg, *dest, *operand, pos)?,

            Inst::BAnd { dest, lhs, rhs } => self.three_reg(Opcode::BAnd, *dest, *lhs, *rhs, pos)?,
            Inst::BOr { dest, lhs, rhs } => self.three_reg(Opcode::BOr, *dest, *lhs, *rhs, pos)?,
            Inst::BXor { dest, lhs, rhs } => self.three_reg(Opcode::BXor, *dest, *lhs, *rhs, pos)?,
            Inst::BNot { dest, operand } => self.two_reg(Opcode::BNot, *dest, *operand, pos)?,
            Inst::Shl { dest, lhs, rhs } => self.three_reg(Opcode::Shl, *dest, *lhs, *rhs, pos)?,
            Inst::AShr { dest, lhs, rhs } => self.three_reg(Opcode::AShr, *dest, *lhs, *rhs, pos)?,
            Inst::LShr { dest, lhs, rhs } => self.three_reg(Opcode::LShr, *dest, *lhs, *rhs, pos)?,

            Inst::ICmp { dest, cc, lhs, rhs } => {
                let op = match cc {
                    CondCode::Eq => Opcode::ICmpEq,
                    CondCode::Ne => Opcode::ICmpNe,
                    CondCode::Lt => Opcode::ICmpLt,
                    CondCode::Le => Opcode::ICmpLe,
                    CondCode::Gt => Opcode::ICmpGt,
                    CondCode::Ge => Opcode::ICmpGe,
                };
                self.three_reg(op, *dest, *lhs, *rhs, pos)?;
            }
            Inst::FCmp { dest, cc, lhs, rhs } => {
                let op = match cc {
                    CondCode::Eq => Opcode::FCmpEq,
                    CondCode::Ne => Opcode::FCmpNe,
                    CondCode::Lt => Opcode::FCmpLt,
                    CondCode::Le => Opcode::FCmpLe,
                    CondCode::Gt => Opcode::FCmpGt,
                    CondCode::Ge => Opcode::FCmpGe,
                };
                self.three_reg(op, *dest, *lhs, *rhs, pos)?;
            }
            Inst::LogNot { dest, operand } => self.two_reg(Opcode::LogNot, *dest, *operand, pos)?,

            Inst::Alloca { .. } => {
                // Slot reserved in the pre-pass; no code.
            }
            Inst::Load { dest, slot } => {
                let local = *self
                    .alloca_slots
                    .get(slot)
                    .ok_or_else(|| self.ice(func, format!("load from non-alloca %{}", slot)))?;
                let reg = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::LoadLocal);
                self.code.regs(&[reg]);
                self.code.u16(local);
            }
            Inst::Store { slot, value } => {
                let local = *self
                    .alloca_slots
                    .get(slot)
                    .ok_or_else(|| self.ice(func, format!("store to non-alloca %{}", slot)))?;
                let reg = self.operand(*value, pos)?;
                // Retain the incoming value; release the previous occupant
                // whenever the slot owns heap values (release of null is a
                // no-op in the runtime).
                if self.is_refcounted(func, *value) {
                    self.code.op(Opcode::Retain);
                    self.code.regs(&[reg]);
                }
                if self.owned_slots.contains(&local) {
                    self.code.op(Opcode::ReleaseLocal);
                    self.code.u16(local);
                }
                self.code.op(Opcode::StoreLocal);
                self.code.u16(local);
                self.code.regs(&[reg]);
                self.finish_uses(&[*value], pos);
            }

            Inst::Jump { target } => {
                self.ra.spill_all_live(self.code)?;
                self.jump_to(Opcode::JmpLong, *target);
            }
            Inst::BrIf { cond, then_block, else_block } => {
                let reg = self.operand(*cond, pos)?;
                self.finish_uses(&[*cond], pos);
                self.ra.spill_all_live(self.code)?;
                self.code.op(Opcode::JmpIf);
                self.code.regs(&[reg]);
                let patch_at = self.code.len();
                self.code.i16(0);
                self.pending.push(PendingJump {
                    patch_at,
                    base: patch_at + 2,
                    kind: PendingKind::I16,
                    target: *then_block,
                });
                self.jump_to(Opcode::JmpLong, *else_block);
            }
            Inst::BrTable { value, targets, default } => {
                let reg = self.operand(*value, pos)?;
                self.finish_uses(&[*value], pos);
                self.ra.spill_all_live(self.code)?;
                self.code.op(Opcode::JmpTable);
                self.code.regs(&[reg]);
                self.code.u16(targets.len() as u16);
                // Offsets in the table are relative to the end of the whole
                // instruction, computed once its size is known.
                let table_at = self.code.len();
                for (case, _) in targets {
                    self.code.i64(*case);
                    self.code.i32(0);
                }
                self.code.i32(0);
                let end = self.code.len();
                for (i, (_, target)) in targets.iter().enumerate() {
                    self.pending.push(PendingJump {
                        patch_at: table_at + i * 12 + 8,
                        base: end,
                        kind: PendingKind::I32,
                        target: *target,
                    });
                }
                self.pending.push(PendingJump {
                    patch_at: end - 4,
                    base: end,
                    kind: PendingKind::I32,
                    target: *default,
                });
            }
            Inst::Ret { value } => {
                match value {
                    Some(value) => {
                        let reg = self.operand(*value, pos)?;
                        // The result outlives the frame.
                        self.retain_if_needed(func, *value, reg);
                        self.release_owned_slots();
                        self.code.op(Opcode::Ret);
                        self.code.regs(&[reg]);
                        self.finish_uses(&[*value], pos);
                    }
                    None => {
                        self.release_owned_slots();
                        self.code.op(Opcode::RetVoid);
                    }
                }
            }

            Inst::Call { dest, callee, args } => {
                let Some(&routine) = self.routine_index.get(callee.as_str()) else {
                    return Err(self.ice(func, format!("call to unknown routine '{}'", callee)));
                };
                let arity = self.module.functions[routine as usize].params.len();
                if args.len() != arity {
                    return Err(self.ice(
                        func,
                        format!(
                            "call to '{}' passes {} argument(s), target takes {}",
                            callee,
                            args.len(),
                            arity
                        ),
                    ));
                }
                let (reg_args, stack_args) = self.stage_args(args, pos)?;
                self.code.op(Opcode::Call);
                self.code.u16(routine);
                self.code.u8((reg_args << 4) | (stack_args & 0x0F));
                if stack_args > 0 {
                    self.code.op(Opcode::PopArgs);
                    self.code.u8(stack_args);
                }
                self.call_result(*dest, pos)?;
            }
            Inst::CallClosure { dest, closure, args } => {
                if args.len() >= MAX_REG_ARGS {
                    return Err(self.ice(func, "closure calls support at most 14 arguments"));
                }
                // Closure staged after its arguments: args in r0.., closure
                // in the register right past them.
                let mut staged = args.to_vec();
                staged.push(*closure);
                self.stage_args(&staged, pos)?;
                let closure_reg = args.len() as u8;
                self.code.op(Opcode::CallClosure);
                self.code.u8((closure_reg << 4) | (args.len() as u8 & 0x0F));
                self.code.u8(0);
                self.call_result(*dest, pos)?;
            }
            Inst::NativeCall { dest, func: native, args } => {
                let (reg_args, stack_args) = self.stage_args(args, pos)?;
                if stack_args > 0 {
                    return Err(self.ice(func, "native calls take register arguments only"));
                }
                self.code.op(Opcode::NativeCall);
                self.code.u16(native.index());
                self.code.u8(reg_args);
                self.call_result(*dest, pos)?;
            }

            Inst::Bitcast { dest, operand } => self.two_reg(Opcode::Bitcast, *dest, *operand, pos)?,
            Inst::Sext { dest, operand } => self.two_reg(Opcode::Sext, *dest, *operand, pos)?,
            Inst::Uext { dest, operand } => self.two_reg(Opcode::Uext, *dest, *operand, pos)?,
            Inst::Trunc { dest, operand } => self.two_reg(Opcode::Trunc, *dest, *operand, pos)?,
            Inst::IntToFloat { dest, operand } => {
                self.two_reg(Opcode::IntToFloat, *dest, *operand, pos)?
            }
            Inst::FloatToInt { dest, operand } => {
                self.two_reg(Opcode::FloatToInt, *dest, *operand, pos)?
            }

            Inst::StrConcat { dest, lhs, rhs } => {
                self.three_reg(Opcode::StrConcat, *dest, *lhs, *rhs, pos)?
            }
            Inst::StrLen { dest, operand } => self.two_reg(Opcode::StrLen, *dest, *operand, pos)?,
            Inst::StrCompare { dest, cc, lhs, rhs } => {
                let a = self.operand(*lhs, pos)?;
                let b = self.operand(*rhs, pos)?;
                self.finish_uses(&[*lhs, *rhs], pos);
                let d = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::StrCompare);
                self.code.regs(&[d, a, b]);
                let cmp = match cc {
                    CondCode::Eq => CmpCode::Eq,
                    CondCode::Ne => CmpCode::Ne,
                    CondCode::Lt => CmpCode::Lt,
                    CondCode::Le => CmpCode::Le,
                    CondCode::Gt => CmpCode::Gt,
                    CondCode::Ge => CmpCode::Ge,
                };
                self.code.u8(cmp.into());
            }
            Inst::StrIndex { dest, operand, index } => {
                self.three_reg(Opcode::StrIndex, *dest, *operand, *index, pos)?
            }
            Inst::StrSlice { dest, operand, start, end } => {
                let s = self.operand(*operand, pos)?;
                let lo = self.operand(*start, pos)?;
                let hi = self.operand(*end, pos)?;
                self.finish_uses(&[*operand, *start, *end], pos);
                let d = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::StrSlice);
                self.code.regs(&[d, s, lo, hi]);
                self.code.u8(0);
            }

            Inst::WrapOptional { dest, operand } => {
                self.two_reg(Opcode::WrapOptional, *dest, *operand, pos)?
            }
            Inst::UnwrapOptional { dest, operand } => {
                self.two_reg(Opcode::UnwrapOptional, *dest, *operand, pos)?
            }
            Inst::IsNull { dest, operand } => self.two_reg(Opcode::IsNull, *dest, *operand, pos)?,

            Inst::ArrayNew { dest, len, .. } => {
                let reg = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::ArrayNew);
                self.code.regs(&[reg]);
                self.code.u32(*len as u32);
            }
            Inst::ArrayLoad { dest, array, index } => {
                self.three_reg(Opcode::ArrayLoad, *dest, *array, *index, pos)?
            }
            Inst::ArrayStore { array, index, value } => {
                let a = self.operand(*array, pos)?;
                let i = self.operand(*index, pos)?;
                let v = self.operand(*value, pos)?;
                self.retain_if_needed(func, *value, v);
                self.code.op(Opcode::ArrayStore);
                self.code.regs(&[a, i, v]);
                self.finish_uses(&[*array, *index, *value], pos);
            }
            Inst::ArrayLen { dest, array } => self.two_reg(Opcode::ArrayLen, *dest, *array, pos)?,
            Inst::SliceNew { dest, base, start, end } => {
                let b = self.operand(*base, pos)?;
                let lo = self.operand(*start, pos)?;
                let hi = self.operand(*end, pos)?;
                self.finish_uses(&[*base, *start, *end], pos);
                let d = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::SliceNew);
                self.code.regs(&[d, b, lo, hi]);
            }

            Inst::ListNew { dest } => {
                let reg = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::ListNew);
                self.code.regs(&[reg]);
            }
            Inst::ListPush { list, value } => {
                let l = self.operand(*list, pos)?;
                let v = self.operand(*value, pos)?;
                self.retain_if_needed(func, *value, v);
                let op = if self.is_struct_value(func, *value) {
                    Opcode::ListPushStruct
                } else {
                    Opcode::ListPush
                };
                self.code.op(op);
                self.code.regs(&[l, v]);
                self.finish_uses(&[*list, *value], pos);
            }
            Inst::ListPop { dest, list } => {
                let op = if self.is_struct_value(func, *dest) {
                    Opcode::ListPopStruct
                } else {
                    Opcode::ListPop
                };
                self.two_reg(op, *dest, *list, pos)?
            }
            Inst::ListGet { dest, list, index } => {
                let op = if self.is_struct_value(func, *dest) {
                    Opcode::ListGetStruct
                } else {
                    Opcode::ListGet
                };
                self.three_reg(op, *dest, *list, *index, pos)?
            }
            Inst::ListSet { list, index, value } => {
                let l = self.operand(*list, pos)?;
                let i = self.operand(*index, pos)?;
                let v = self.operand(*value, pos)?;
                self.retain_if_needed(func, *value, v);
                let op = if self.is_struct_value(func, *value) {
                    Opcode::ListSetStruct
                } else {
                    Opcode::ListSet
                };
                self.code.op(op);
                self.code.regs(&[l, i, v]);
                self.finish_uses(&[*list, *index, *value], pos);
            }
            Inst::ListLen { dest, list } => self.two_reg(Opcode::ListLen, *dest, *list, pos)?,

            Inst::MapNew { dest } => {
                let reg = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::MapNew);
                self.code.regs(&[reg]);
            }
            Inst::MapSet { map, key, value } => {
                let m = self.operand(*map, pos)?;
                let k = self.operand(*key, pos)?;
                let v = self.operand(*value, pos)?;
                self.retain_if_needed(func, *value, v);
                let op = if self.is_struct_value(func, *value) {
                    Opcode::MapSetStruct
                } else {
                    Opcode::MapSet
                };
                self.code.op(op);
                self.code.regs(&[m, k, v]);
                self.finish_uses(&[*map, *key, *value], pos);
            }
            Inst::MapGet { dest, map, key } => {
                let op = if self.is_struct_value(func, *dest) {
                    Opcode::MapGetStruct
                } else {
                    Opcode::MapGet
                };
                self.three_reg(op, *dest, *map, *key, pos)?
            }
            Inst::MapHas { dest, map, key } => {
                self.three_reg(Opcode::MapHas, *dest, *map, *key, pos)?
            }
            Inst::MapDelete { map, key } => {
                let m = self.operand(*map, pos)?;
                let k = self.operand(*key, pos)?;
                self.code.op(Opcode::MapDelete);
                self.code.regs(&[m, k]);
                self.finish_uses(&[*map, *key], pos);
            }
            Inst::MapLen { dest, map } => self.two_reg(Opcode::MapLen, *dest, *map, pos)?,

            Inst::StructNew { dest, fields, .. } => {
                let reg = self.dest_reg(*dest, pos)?;
                self.ra.lock(reg);
                self.code.op(Opcode::RecordNew);
                self.code.regs(&[reg]);
                self.code.u8(fields.len() as u8);
                for (i, field) in fields.iter().enumerate() {
                    let f = self.operand(*field, pos)?;
                    self.retain_if_needed(func, *field, f);
                    self.code.op(Opcode::RecordSet);
                    self.code.regs(&[reg, f]);
                    self.code.u8(i as u8);
                    self.ra.end_use(*field, pos);
                    self.ra.unlock_all();
                    self.ra.lock(reg);
                }
            }
            Inst::StructGet { dest, base, index } => {
                let b = self.operand(*base, pos)?;
                self.finish_uses(&[*base], pos);
                let d = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::RecordGet);
                self.code.regs(&[d, b]);
                self.code.u8(*index as u8);
            }
            Inst::StructSet { base, index, value } => {
                let b = self.operand(*base, pos)?;
                let v = self.operand(*value, pos)?;
                self.retain_if_needed(func, *value, v);
                self.code.op(Opcode::RecordSet);
                self.code.regs(&[b, v]);
                self.code.u8(*index as u8);
                self.finish_uses(&[*base, *value], pos);
            }
            Inst::VariantConstruct { dest, tag, payload, .. } => {
                if payload.len() > 15 {
                    return Err(self.ice(func, "variant payloads support at most 15 values"));
                }
                let mut regs = Vec::with_capacity(payload.len());
                for value in payload {
                    let reg = self.operand(*value, pos)?;
                    self.retain_if_needed(func, *value, reg);
                    regs.push(reg);
                }
                self.finish_uses(payload, pos);
                let d = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::VariantNew);
                self.code.regs(&[d]);
                self.code.u8(*tag as u8);
                self.code.u8(payload.len() as u8);
                self.code.regs(&regs);
            }
            Inst::VariantGetTag { dest, variant } => {
                self.two_reg(Opcode::VariantTag, *dest, *variant, pos)?
            }
            Inst::VariantGetPayload { dest, variant, index } => {
                let v = self.operand(*variant, pos)?;
                self.finish_uses(&[*variant], pos);
                let d = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::VariantPayload);
                self.code.regs(&[d, v]);
                self.code.u8(*index as u8);
            }

            Inst::MakeClosure { dest, function, captures } => {
                let Some(&routine) = self.routine_index.get(function.as_str()) else {
                    return Err(self.ice(func, format!("closure over unknown routine '{}'", function)));
                };
                if captures.len() > 15 {
                    return Err(self.ice(func, "closures support at most 15 captures"));
                }
                let mut regs = Vec::with_capacity(captures.len());
                for capture in captures {
                    let reg = self.operand(*capture, pos)?;
                    self.retain_if_needed(func, *capture, reg);
                    regs.push(reg);
                }
                self.finish_uses(captures, pos);
                let d = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::MakeClosure);
                self.code.regs(&[d]);
                self.code.u16(routine);
                self.code.u8(captures.len() as u8);
                self.code.regs(&regs);
            }

            Inst::SetHandler { handler } => {
                self.ra.spill_all_live(self.code)?;
                self.jump_to(Opcode::SetHandler, *handler);
            }
            Inst::ClearHandler => self.code.op(Opcode::ClearHandler),
            Inst::Throw { value } => {
                let reg = self.operand(*value, pos)?;
                self.finish_uses(&[*value], pos);
                self.code.op(Opcode::Throw);
                self.code.regs(&[reg]);
            }
            Inst::CatchPayload { dest } => {
                let reg = self.dest_reg(*dest, pos)?;
                self.code.op(Opcode::CatchPayload);
                self.code.regs(&[reg]);
            }

            Inst::Phi { .. } => {
                return Err(self.ice(func, "phi survived elimination"));
            }
            Inst::DebugLine { line } => {
                self.debug_lines.push(DebugLineEntry {
                    code_offset: self.code.len() as u32,
                    line: *line,
                });
            }
        }
        Ok(())
    }

    fn release_owned_slots(&mut self) {
        for slot in &self.owned_slots {
            self.code.op(Opcode::ReleaseLocal);
            self.code.u16(*slot);
        }
    }
}

/// Register-read operands of an instruction. Alloca slot references in
/// `Load`/`Store` are local-slot indirections, not register uses.
fn reg_uses(inst: &Inst) -> Vec<ValueId> {
    match inst {
        Inst::Alloca { .. } => vec![],
        Inst::Load { .. } => vec![],
        Inst::Store { value, .. } => vec![*value],
        _ => inst.operands(),
    }
}
