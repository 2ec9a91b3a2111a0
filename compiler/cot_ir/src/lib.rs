//! SSA intermediate representation and lowering for the Cot language
//!
//! The IR module is the narrow waist of the compiler: the bytecode emitter
//! and any native backend consume the same tagged instruction interface.

pub mod ir;
pub mod lower;
pub mod verify;

pub use ir::*;
pub use lower::{lower_module, remove_unreachable_blocks, Lowered};
pub use verify::verify_function;
