//! Shared infrastructure for the Cot compiler
//!
//! Everything the pipeline phases have in common lives here: source
//! positions, diagnostics, the compiler error type, the string interner and
//! the per-compilation source map. None of this is global state; a
//! [`Compilation`] owns the session and is threaded through the phases
//! explicitly so tests can run compilations in isolation.

pub mod diagnostics;
pub mod error;
pub mod interner;
pub mod source;
pub mod span;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{CotError, CotResult};
pub use interner::{Interner, Name};
pub use source::{Compilation, FileId, SourceFile, SourceMap};
pub use span::{Position, Span, Spanned};
