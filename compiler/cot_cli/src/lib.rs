//! Driver library for the Cot compiler
//!
//! The binary in `main.rs` is a thin wrapper over [`pipeline`]; the
//! pipeline is exposed as a library so integration tests can compile
//! sources without spawning processes.

pub mod pipeline;

pub use pipeline::{compile_source, CompileOutcome, EmitKind};
