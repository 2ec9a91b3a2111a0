//! Register allocation and bytecode emission for the Cot language
//!
//! Consumes the SSA IR and produces the `.cbo` image: a fixed header,
//! constant pool, routine table, 8-byte-aligned code section, export table
//! and debug-line table, all little-endian.

pub mod buffer;
pub mod emitter;
pub mod image;
pub mod opcode;
pub mod regalloc;

pub use buffer::CodeBuf;
pub use emitter::emit_module;
pub use image::{ConstPool, Constant, DebugLineEntry, Export, Image, Routine};
pub use opcode::{CmpCode, Opcode, RoutineFlags, MAX_REG_ARGS, NUM_REGISTERS, RESULT_REG};
pub use regalloc::RegAlloc;
