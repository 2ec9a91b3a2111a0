//! SSA intermediate representation
//!
//! A module owns functions, globals and a string pool; each function owns an
//! ordered list of basic blocks; each block owns instructions and its
//! predecessor list. Values are `{id, type_id}` pairs created monotonically
//! per function and never mutated. Every block ends in exactly one
//! terminator; phis appear only at block tops with one incoming value per
//! predecessor.

use cot_typechecker::TypeId;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// SSA value identifier, unique within one function
pub type ValueId = u32;

/// Basic block identifier; also the block's index in `Function::blocks`
pub type BlockId = u32;

/// Index into the module string pool
pub type StrId = u32;

/// An SSA value with its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub id: ValueId,
    pub type_id: TypeId,
}

/// Comparison condition codes shared by `ICmp`, `FCmp` and `StrCompare`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CondCode {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CondCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CondCode::Eq => "eq",
            CondCode::Ne => "ne",
            CondCode::Lt => "lt",
            CondCode::Le => "le",
            CondCode::Gt => "gt",
            CondCode::Ge => "ge",
        };
        write!(f, "{}", s)
    }
}

/// One incoming phi edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiArg {
    pub block: BlockId,
    pub value: ValueId,
}

/// Built-in runtime functions reachable through the native-call opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeFn {
    Println,
    Print,
    IntToString,
    FloatToString,
    BoolToString,
    Assert,
    Panic,
    ProcessArgs,
    ReadFile,
}

impl NativeFn {
    pub fn index(self) -> u16 {
        match self {
            NativeFn::Println => 0,
            NativeFn::Print => 1,
            NativeFn::IntToString => 2,
            NativeFn::FloatToString => 3,
            NativeFn::BoolToString => 4,
            NativeFn::Assert => 5,
            NativeFn::Panic => 6,
            NativeFn::ProcessArgs => 7,
            NativeFn::ReadFile => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NativeFn::Println => "println",
            NativeFn::Print => "print",
            NativeFn::IntToString => "int_to_string",
            NativeFn::FloatToString => "float_to_string",
            NativeFn::BoolToString => "bool_to_string",
            NativeFn::Assert => "assert",
            NativeFn::Panic => "panic",
            NativeFn::ProcessArgs => "process_args",
            NativeFn::ReadFile => "read_file",
        }
    }
}

/// IR instruction set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inst {
    // Constants
    IConst { dest: ValueId, value: i64 },
    FConst { dest: ValueId, value: f64 },
    SConst { dest: ValueId, value: StrId },
    BConst { dest: ValueId, value: bool },
    NullConst { dest: ValueId },

    // Integer arithmetic (wrapping, signed semantics match the VM)
    IAdd { dest: ValueId, lhs: ValueId, rhs: ValueId },
    ISub { dest: ValueId, lhs: ValueId, rhs: ValueId },
    IMul { dest: ValueId, lhs: ValueId, rhs: ValueId },
    SDiv { dest: ValueId, lhs: ValueId, rhs: ValueId },
    UDiv { dest: ValueId, lhs: ValueId, rhs: ValueId },
    SRem { dest: ValueId, lhs: ValueId, rhs: ValueId },
    URem { dest: ValueId, lhs: ValueId, rhs: ValueId },
    INeg { dest: ValueId, operand: ValueId },

    // Float arithmetic
    FAdd { dest: ValueId, lhs: ValueId, rhs: ValueId },
    FSub { dest: ValueId, lhs: ValueId, rhs: ValueId },
    FMul { dest: ValueId, lhs: ValueId, rhs: ValueId },
    FDiv { dest: ValueId, lhs: ValueId, rhs: ValueId },
    FNeg { dest: ValueId, operand: ValueId },

    // Bitwise and shifts
    BAnd { dest: ValueId, lhs: ValueId, rhs: ValueId },
    BOr { dest: ValueId, lhs: ValueId, rhs: ValueId },
    BXor { dest: ValueId, lhs: ValueId, rhs: ValueId },
    BNot { dest: ValueId, operand: ValueId },
    Shl { dest: ValueId, lhs: ValueId, rhs: ValueId },
    AShr { dest: ValueId, lhs: ValueId, rhs: ValueId },
    LShr { dest: ValueId, lhs: ValueId, rhs: ValueId },

    // Comparison and logic
    ICmp { dest: ValueId, cc: CondCode, lhs: ValueId, rhs: ValueId },
    FCmp { dest: ValueId, cc: CondCode, lhs: ValueId, rhs: ValueId },
    LogNot { dest: ValueId, operand: ValueId },

    // Stack slots; `Alloca` reserves a routine-local slot
    Alloca { dest: ValueId, ty: TypeId },
    Load { dest: ValueId, slot: ValueId },
    Store { slot: ValueId, value: ValueId },

    // Control flow (terminators)
    Jump { target: BlockId },
    BrIf { cond: ValueId, then_block: BlockId, else_block: BlockId },
    BrTable { value: ValueId, targets: Vec<(i64, BlockId)>, default: BlockId },
    Ret { value: Option<ValueId> },

    // Calls
    Call { dest: Option<Value>, callee: String, args: Vec<ValueId> },
    CallClosure { dest: Option<Value>, closure: ValueId, args: Vec<ValueId> },
    NativeCall { dest: Option<Value>, func: NativeFn, args: Vec<ValueId> },

    // Conversions
    Bitcast { dest: ValueId, operand: ValueId },
    Sext { dest: ValueId, operand: ValueId },
    Uext { dest: ValueId, operand: ValueId },
    Trunc { dest: ValueId, operand: ValueId },
    IntToFloat { dest: ValueId, operand: ValueId },
    FloatToInt { dest: ValueId, operand: ValueId },

    // Strings
    StrConcat { dest: ValueId, lhs: ValueId, rhs: ValueId },
    StrLen { dest: ValueId, operand: ValueId },
    StrCompare { dest: ValueId, cc: CondCode, lhs: ValueId, rhs: ValueId },
    /// Out-of-range index yields byte value 0 rather than trapping.
    StrIndex { dest: ValueId, operand: ValueId, index: ValueId },
    StrSlice { dest: ValueId, operand: ValueId, start: ValueId, end: ValueId },

    // Optionals
    WrapOptional { dest: ValueId, operand: ValueId },
    UnwrapOptional { dest: ValueId, operand: ValueId },
    IsNull { dest: ValueId, operand: ValueId },

    // Fixed arrays and slices
    ArrayNew { dest: ValueId, element: TypeId, len: u64 },
    ArrayLoad { dest: ValueId, array: ValueId, index: ValueId },
    ArrayStore { array: ValueId, index: ValueId, value: ValueId },
    ArrayLen { dest: ValueId, array: ValueId },
    SliceNew { dest: ValueId, base: ValueId, start: ValueId, end: ValueId },

    // Built-in collections
    ListNew { dest: ValueId },
    ListPush { list: ValueId, value: ValueId },
    ListPop { dest: ValueId, list: ValueId },
    ListGet { dest: ValueId, list: ValueId, index: ValueId },
    ListSet { list: ValueId, index: ValueId, value: ValueId },
    ListLen { dest: ValueId, list: ValueId },
    MapNew { dest: ValueId },
    MapSet { map: ValueId, key: ValueId, value: ValueId },
    MapGet { dest: ValueId, map: ValueId, key: ValueId },
    MapHas { dest: ValueId, map: ValueId, key: ValueId },
    MapDelete { map: ValueId, key: ValueId },
    MapLen { dest: ValueId, map: ValueId },

    // Records (struct values) and sum types
    StructNew { dest: ValueId, ty: TypeId, fields: Vec<ValueId> },
    StructGet { dest: ValueId, base: ValueId, index: u32 },
    StructSet { base: ValueId, index: u32, value: ValueId },
    VariantConstruct { dest: ValueId, ty: TypeId, tag: u32, payload: Vec<ValueId> },
    VariantGetTag { dest: ValueId, variant: ValueId },
    VariantGetPayload { dest: ValueId, variant: ValueId, index: u32 },

    // Closures
    MakeClosure { dest: ValueId, function: String, captures: Vec<ValueId> },

    // Error handling (terminator: Throw)
    SetHandler { handler: BlockId },
    ClearHandler,
    Throw { value: ValueId },
    /// First instruction of a catch block: the thrown value.
    CatchPayload { dest: ValueId },

    // SSA join
    Phi { dest: ValueId, args: SmallVec<[PhiArg; 2]> },

    // Debug info
    DebugLine { line: u32 },
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Jump { .. }
                | Inst::BrIf { .. }
                | Inst::BrTable { .. }
                | Inst::Ret { .. }
                | Inst::Throw { .. }
        )
    }

    /// Blocks this terminator can transfer control to.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Inst::Jump { target } => vec![*target],
            Inst::BrIf { then_block, else_block, .. } => vec![*then_block, *else_block],
            Inst::BrTable { targets, default, .. } => {
                let mut out: Vec<BlockId> = targets.iter().map(|(_, b)| *b).collect();
                out.push(*default);
                out
            }
            _ => vec![],
        }
    }

    /// The value this instruction defines, if any.
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Inst::IConst { dest, .. }
            | Inst::FConst { dest, .. }
            | Inst::SConst { dest, .. }
            | Inst::BConst { dest, .. }
            | Inst::NullConst { dest }
            | Inst::IAdd { dest, .. }
            | Inst::ISub { dest, .. }
            | Inst::IMul { dest, .. }
            | Inst::SDiv { dest, .. }
            | Inst::UDiv { dest, .. }
            | Inst::SRem { dest, .. }
            | Inst::URem { dest, .. }
            | Inst::INeg { dest, .. }
            | Inst::FAdd { dest, .. }
            | Inst::FSub { dest, .. }
            | Inst::FMul { dest, .. }
            | Inst::FDiv { dest, .. }
            | Inst::FNeg { dest, .. }
            | Inst::BAnd { dest, .. }
            | Inst::BOr { dest, .. }
            | Inst::BXor { dest, .. }
            | Inst::BNot { dest, .. }
            | Inst::Shl { dest, .. }
            | Inst::AShr { dest, .. }
            | Inst::LShr { dest, .. }
            | Inst::ICmp { dest, .. }
            | Inst::FCmp { dest, .. }
            | Inst::LogNot { dest, .. }
            | Inst::Alloca { dest, .. }
            | Inst::Load { dest, .. }
            | Inst::Bitcast { dest, .. }
            | Inst::Sext { dest, .. }
            | Inst::Uext { dest, .. }
            | Inst::Trunc { dest, .. }
            | Inst::IntToFloat { dest, .. }
            | Inst::FloatToInt { dest, .. }
            | Inst::StrConcat { dest, .. }
            | Inst::StrLen { dest, .. }
            | Inst::StrCompare { dest, .. }
            | Inst::StrIndex { dest, .. }
            | Inst::StrSlice { dest, .. }
            | Inst::WrapOptional { dest, .. }
            | Inst::UnwrapOptional { dest, .. }
            | Inst::IsNull { dest, .. }
            | Inst::ArrayNew { dest, .. }
            | Inst::ArrayLoad { dest, .. }
            | Inst::ArrayLen { dest, .. }
            | Inst::SliceNew { dest, .. }
            | Inst::ListNew { dest }
            | Inst::ListPop { dest, .. }
            | Inst::ListGet { dest, .. }
            | Inst::ListLen { dest, .. }
            | Inst::MapNew { dest }
            | Inst::MapGet { dest, .. }
            | Inst::MapHas { dest, .. }
            | Inst::MapLen { dest, .. }
            | Inst::StructNew { dest, .. }
            | Inst::StructGet { dest, .. }
            | Inst::VariantConstruct { dest, .. }
            | Inst::VariantGetTag { dest, .. }
            | Inst::VariantGetPayload { dest, .. }
            | Inst::MakeClosure { dest, .. }
            | Inst::CatchPayload { dest }
            | Inst::Phi { dest, .. } => Some(*dest),
            Inst::Call { dest, .. }
            | Inst::CallClosure { dest, .. }
            | Inst::NativeCall { dest, .. } => dest.map(|v| v.id),
            _ => None,
        }
    }

    /// Values this instruction reads.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Inst::IAdd { lhs, rhs, .. }
            | Inst::ISub { lhs, rhs, .. }
            | Inst::IMul { lhs, rhs, .. }
            | Inst::SDiv { lhs, rhs, .. }
            | Inst::UDiv { lhs, rhs, .. }
            | Inst::SRem { lhs, rhs, .. }
            | Inst::URem { lhs, rhs, .. }
            | Inst::FAdd { lhs, rhs, .. }
            | Inst::FSub { lhs, rhs, .. }
            | Inst::FMul { lhs, rhs, .. }
            | Inst::FDiv { lhs, rhs, .. }
            | Inst::BAnd { lhs, rhs, .. }
            | Inst::BOr { lhs, rhs, .. }
            | Inst::BXor { lhs, rhs, .. }
            | Inst::Shl { lhs, rhs, .. }
            | Inst::AShr { lhs, rhs, .. }
            | Inst::LShr { lhs, rhs, .. }
            | Inst::ICmp { lhs, rhs, .. }
            | Inst::FCmp { lhs, rhs, .. }
            | Inst::StrConcat { lhs, rhs, .. }
            | Inst::StrCompare { lhs, rhs, .. } => vec![*lhs, *rhs],
            Inst::INeg { operand, .. }
            | Inst::FNeg { operand, .. }
            | Inst::BNot { operand, .. }
            | Inst::LogNot { operand, .. }
            | Inst::Bitcast { operand, .. }
            | Inst::Sext { operand, .. }
            | Inst::Uext { operand, .. }
            | Inst::Trunc { operand, .. }
            | Inst::IntToFloat { operand, .. }
            | Inst::FloatToInt { operand, .. }
            | Inst::StrLen { operand, .. }
            | Inst::WrapOptional { operand, .. }
            | Inst::UnwrapOptional { operand, .. }
            | Inst::IsNull { operand, .. } => vec![*operand],
            Inst::StrIndex { operand, index, .. } => vec![*operand, *index],
            Inst::StrSlice { operand, start, end, .. } => vec![*operand, *start, *end],
            Inst::Load { slot, .. } => vec![*slot],
            Inst::Store { slot, value } => vec![*slot, *value],
            Inst::BrIf { cond, .. } => vec![*cond],
            Inst::BrTable { value, .. } => vec![*value],
            Inst::Ret { value } => value.iter().copied().collect(),
            Inst::Call { args, .. } => args.clone(),
            Inst::CallClosure { closure, args, .. } => {
                let mut out = vec![*closure];
                out.extend(args.iter().copied());
                out
            }
            Inst::NativeCall { args, .. } => args.clone(),
            Inst::ArrayLoad { array, index, .. } => vec![*array, *index],
            Inst::ArrayStore { array, index, value } => vec![*array, *index, *value],
            Inst::ArrayLen { array, .. } => vec![*array],
            Inst::SliceNew { base, start, end, .. } => vec![*base, *start, *end],
            Inst::ListPush { list, value } => vec![*list, *value],
            Inst::ListPop { list, .. } => vec![*list],
            Inst::ListGet { list, index, .. } => vec![*list, *index],
            Inst::ListSet { list, index, value } => vec![*list, *index, *value],
            Inst::ListLen { list, .. } => vec![*list],
            Inst::MapSet { map, key, value } => vec![*map, *key, *value],
            Inst::MapGet { map, key, .. } => vec![*map, *key],
            Inst::MapHas { map, key, .. } => vec![*map, *key],
            Inst::MapDelete { map, key } => vec![*map, *key],
            Inst::MapLen { map, .. } => vec![*map],
            Inst::StructNew { fields, .. } => fields.clone(),
            Inst::StructGet { base, .. } => vec![*base],
            Inst::StructSet { base, value, .. } => vec![*base, *value],
            Inst::VariantConstruct { payload, .. } => payload.clone(),
            Inst::VariantGetTag { variant, .. } => vec![*variant],
            Inst::VariantGetPayload { variant, .. } => vec![*variant],
            Inst::MakeClosure { captures, .. } => captures.clone(),
            Inst::Throw { value } => vec![*value],
            Inst::Phi { args, .. } => args.iter().map(|a| a.value).collect(),
            _ => vec![],
        }
    }
}

/// IR basic block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub label: String,
    pub insts: Vec<Inst>,
    pub preds: Vec<BlockId>,
}

impl Block {
    pub fn terminator(&self) -> Option<&Inst> {
        self.insts.last().filter(|inst| inst.is_terminator())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }
}

/// IR function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Value>,
    pub return_type: TypeId,
    pub blocks: Vec<Block>,
    /// Type of every value, indexed by `ValueId`; doubles as the counter.
    pub value_types: Vec<TypeId>,
    pub is_public: bool,
}

impl Function {
    pub fn entry(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn value_count(&self) -> u32 {
        self.value_types.len() as u32
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id as usize]
    }
}

/// Module-level constant (top-level `comptime` results land here)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub type_id: TypeId,
    pub value: i64,
}

/// IR module: the narrow waist between the front end and any backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    /// Interned string literals; `SConst` refers into this pool.
    pub strings: Vec<String>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn string(&self, id: StrId) -> &str {
        &self.strings[id as usize]
    }
}

// ---------------------------------------------------------------------
// Text dump
// ---------------------------------------------------------------------

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| format!("%{}", p.id)).collect();
        writeln!(f, "fn {}({}) {{", self.name, params.join(", "))?;
        for block in &self.blocks {
            let preds: Vec<String> = block.preds.iter().map(|p| format!("bb{}", p)).collect();
            if preds.is_empty() {
                writeln!(f, "bb{}:", block.id)?;
            } else {
                writeln!(f, "bb{}(preds: {}):", block.id, preds.join(", "))?;
            }
            for inst in &block.insts {
                writeln!(f, "  {}", inst)?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::IConst { dest, value } => write!(f, "%{} = iconst {}", dest, value),
            Inst::FConst { dest, value } => write!(f, "%{} = fconst {}", dest, value),
            Inst::SConst { dest, value } => write!(f, "%{} = sconst str{}", dest, value),
            Inst::BConst { dest, value } => write!(f, "%{} = bconst {}", dest, value),
            Inst::NullConst { dest } => write!(f, "%{} = null", dest),
            Inst::IAdd { dest, lhs, rhs } => write!(f, "%{} = iadd %{}, %{}", dest, lhs, rhs),
            Inst::ISub { dest, lhs, rhs } => write!(f, "%{} = isub %{}, %{}", dest, lhs, rhs),
            Inst::IMul { dest, lhs, rhs } => write!(f, "%{} = imul %{}, %{}", dest, lhs, rhs),
            Inst::SDiv { dest, lhs, rhs } => write!(f, "%{} = sdiv %{}, %{}", dest, lhs, rhs),
            Inst::UDiv { dest, lhs, rhs } => write!(f, "%{} = udiv %{}, %{}", dest, lhs, rhs),
            Inst::SRem { dest, lhs, rhs } => write!(f, "%{} = srem %{}, %{}", dest, lhs, rhs),
            Inst::URem { dest, lhs, rhs } => write!(f, "%{} = urem %{}, %{}", dest, lhs, rhs),
            Inst::INeg { dest, operand } => write!(f, "%{} = ineg %{}", dest, operand),
            Inst::FAdd { dest, lhs, rhs } => write!(f, "%{} = fadd %{}, %{}", dest, lhs, rhs),
            Inst::FSub { dest, lhs, rhs } => write!(f, "%{} = fsub %{}, %{}", dest, lhs, rhs),
            Inst::FMul { dest, lhs, rhs } => write!(f, "%{} = fmul %{}, %{}", dest, lhs, rhs),
            Inst::FDiv { dest, lhs, rhs } => write!(f, "%{} = fdiv %{}, %{}", dest, lhs, rhs),
            Inst::FNeg { dest, operand } => write!(f, "%{} = fneg %{}", dest, operand),
            Inst::BAnd { dest, lhs, rhs } => write!(f, "%{} = band %{}, %{}", dest, lhs, rhs),
            Inst::BOr { dest, lhs, rhs } => write!(f, "%{} = bor %{}, %{}", dest, lhs, rhs),
            Inst::BXor { dest, lhs, rhs } => write!(f, "%{} = bxor %{}, %{}", dest, lhs, rhs),
            Inst::BNot { dest, operand } => write!(f, "%{} = bnot %{}", dest, operand),
            Inst::Shl { dest, lhs, rhs } => write!(f, "%{} = shl %{}, %{}", dest, lhs, rhs),
            Inst::AShr { dest, lhs, rhs } => write!(f, "%{} = ashr %{}, %{}", dest, lhs, rhs),
            Inst::LShr { dest, lhs, rhs } => write!(f, "%{} = lshr %{}, %{}", dest, lhs, rhs),
            Inst::ICmp { dest, cc, lhs, rhs } => {
                write!(f, "%{} = icmp.{} %{}, %{}", dest, cc, lhs, rhs)
            }
            Inst::FCmp { dest, cc, lhs, rhs } => {
                write!(f, "%{} = fcmp.{} %{}, %{}", dest, cc, lhs, rhs)
            }
            Inst::LogNot { dest, operand } => write!(f, "%{} = log_not %{}", dest, operand),
            Inst::Alloca { dest, ty } => write!(f, "%{} = alloca t{}", dest, ty),
            Inst::Load { dest, slot } => write!(f, "%{} = load %{}", dest, slot),
            Inst::Store { slot, value } => write!(f, "store %{}, %{}", slot, value),
            Inst::Jump { target } => write!(f, "jump bb{}", target),
            Inst::BrIf { cond, then_block, else_block } => {
                write!(f, "br_if %{}, bb{}, bb{}", cond, then_block, else_block)
            }
            Inst::BrTable { value, targets, default } => {
                write!(f, "br_table %{} [", value)?;
                for (i, (case, block)) in targets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> bb{}", case, block)?;
                }
                write!(f, "] default bb{}", default)
            }
            Inst::Ret { value: Some(v) } => write!(f, "ret %{}", v),
            Inst::Ret { value: None } => write!(f, "ret"),
            Inst::Call { dest, callee, args } => {
                if let Some(d) = dest {
                    write!(f, "%{} = ", d.id)?;
                }
                let args: Vec<String> = args.iter().map(|a| format!("%{}", a)).collect();
                write!(f, "call {}({})", callee, args.join(", "))
            }
            Inst::CallClosure { dest, closure, args } => {
                if let Some(d) = dest {
                    write!(f, "%{} = ", d.id)?;
                }
                let args: Vec<String> = args.iter().map(|a| format!("%{}", a)).collect();
                write!(f, "call_closure %{}({})", closure, args.join(", "))
            }
            Inst::NativeCall { dest, func, args } => {
                if let Some(d) = dest {
                    write!(f, "%{} = ", d.id)?;
                }
                let args: Vec<String> = args.iter().map(|a| format!("%{}", a)).collect();
                write!(f, "native {}({})", func.name(), args.join(", "))
            }
            Inst::Bitcast { dest, operand } => write!(f, "%{} = bitcast %{}", dest, operand),
            Inst::Sext { dest, operand } => write!(f, "%{} = sext %{}", dest, operand),
            Inst::Uext { dest, operand } => write!(f, "%{} = uext %{}", dest, operand),
            Inst::Trunc { dest, operand } => write!(f, "%{} = trunc %{}", dest, operand),
            Inst::IntToFloat { dest, operand } => {
                write!(f, "%{} = int_to_float %{}", dest, operand)
            }
            Inst::FloatToInt { dest, operand } => {
                write!(f, "%{} = float_to_int %{}", dest, operand)
            }
            Inst::StrConcat { dest, lhs, rhs } => {
                write!(f, "%{} = str_concat %{}, %{}", dest, lhs, rhs)
            }
            Inst::StrLen { dest, operand } => write!(f, "%{} = str_len %{}", dest, operand),
            Inst::StrCompare { dest, cc, lhs, rhs } => {
                write!(f, "%{} = str_compare.{} %{}, %{}", dest, cc, lhs, rhs)
            }
            Inst::StrIndex { dest, operand, index } => {
                write!(f, "%{} = str_index %{}, %{}", dest, operand, index)
            }
            Inst::StrSlice { dest, operand, start, end } => {
                write!(f, "%{} = str_slice %{}, %{}, %{}", dest, operand, start, end)
            }
            Inst::WrapOptional { dest, operand } => {
                write!(f, "%{} = wrap_optional %{}", dest, operand)
            }
            Inst::UnwrapOptional { dest, operand } => {
                write!(f, "%{} = unwrap_optional %{}", dest, operand)
            }
            Inst::IsNull { dest, operand } => write!(f, "%{} = is_null %{}", dest, operand),
            Inst::ArrayNew { dest, element, len } => {
                write!(f, "%{} = array_new t{}, {}", dest, element, len)
            }
            Inst::ArrayLoad { dest, array, index } => {
                write!(f, "%{} = array_load %{}, %{}", dest, array, index)
            }
            Inst::ArrayStore { array, index, value } => {
                write!(f, "array_store %{}, %{}, %{}", array, index, value)
            }
            Inst::ArrayLen { dest, array } => write!(f, "%{} = array_len %{}", dest, array),
            Inst::SliceNew { dest, base, start, end } => {
                write!(f, "%{} = slice_new %{}, %{}, %{}", dest, base, start, end)
            }
            Inst::ListNew { dest } => write!(f, "%{} = list_new", dest),
            Inst::ListPush { list, value } => write!(f, "list_push %{}, %{}", list, value),
            Inst::ListPop { dest, list } => write!(f, "%{} = list_pop %{}", dest, list),
            Inst::ListGet { dest, list, index } => {
                write!(f, "%{} = list_get %{}, %{}", dest, list, index)
            }
            Inst::ListSet { list, index, value } => {
                write!(f, "list_set %{}, %{}, %{}", list, index, value)
            }
            Inst::ListLen { dest, list } => write!(f, "%{} = list_len %{}", dest, list),
            Inst::MapNew { dest } => write!(f, "%{} = map_new", dest),
            Inst::MapSet { map, key, value } => {
                write!(f, "map_set %{}, %{}, %{}", map, key, value)
            }
            Inst::MapGet { dest, map, key } => {
                write!(f, "%{} = map_get %{}, %{}", dest, map, key)
            }
            Inst::MapHas { dest, map, key } => {
                write!(f, "%{} = map_has %{}, %{}", dest, map, key)
            }
            Inst::MapDelete { map, key } => write!(f, "map_delete %{}, %{}", map, key),
            Inst::MapLen { dest, map } => write!(f, "%{} = map_len %{}", dest, map),
            Inst::StructNew { dest, ty, fields } => {
                let fields: Vec<String> = fields.iter().map(|v| format!("%{}", v)).collect();
                write!(f, "%{} = struct_new t{} {{{}}}", dest, ty, fields.join(", "))
            }
            Inst::StructGet { dest, base, index } => {
                write!(f, "%{} = struct_get %{}, {}", dest, base, index)
            }
            Inst::StructSet { base, index, value } => {
                write!(f, "struct_set %{}, {}, %{}", base, index, value)
            }
            Inst::VariantConstruct { dest, ty, tag, payload } => {
                let payload: Vec<String> = payload.iter().map(|v| format!("%{}", v)).collect();
                write!(f, "%{} = variant t{} tag {} ({})", dest, ty, tag, payload.join(", "))
            }
            Inst::VariantGetTag { dest, variant } => {
                write!(f, "%{} = variant_tag %{}", dest, variant)
            }
            Inst::VariantGetPayload { dest, variant, index } => {
                write!(f, "%{} = variant_payload %{}, {}", dest, variant, index)
            }
            Inst::MakeClosure { dest, function, captures } => {
                let captures: Vec<String> = captures.iter().map(|v| format!("%{}", v)).collect();
                write!(f, "%{} = make_closure {} [{}]", dest, function, captures.join(", "))
            }
            Inst::SetHandler { handler } => write!(f, "set_handler bb{}", handler),
            Inst::ClearHandler => write!(f, "clear_handler"),
            Inst::Throw { value } => write!(f, "throw %{}", value),
            Inst::CatchPayload { dest } => write!(f, "%{} = catch_payload", dest),
            Inst::Phi { dest, args } => {
                write!(f, "%{} = phi ", dest)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[bb{}: %{}]", arg.block, arg.value)?;
                }
                Ok(())
            }
            Inst::DebugLine { line } => write!(f, "debug_line {}", line),
        }
    }
}
