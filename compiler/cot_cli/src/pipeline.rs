//! The compilation pipeline
//!
//! Runs lex -> parse -> check -> lower -> emit for one source file. Each
//! phase's diagnostics accumulate; downstream phases are skipped once any
//! phase reports an error, and the image is only produced on a clean run.

use cot_bytecode::{emit_module, Image};
use cot_common::{Compilation, CotError, CotResult, Diagnostics};
use cot_ir::lower_module;
use cot_lexer::Lexer;
use cot_parser::Parser;
use cot_typechecker::TypeChecker;

/// What the driver may ask the pipeline to dump instead of bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitKind {
    Bytecode,
    Ast,
    Ir,
}

pub struct CompileOutcome {
    pub diagnostics: Diagnostics,
    /// Present only when no error-severity diagnostic was produced.
    pub image: Option<Image>,
    /// Textual dump for `--emit ast` / `--emit ir`.
    pub dump: Option<String>,
}

impl CompileOutcome {
    pub fn succeeded(&self) -> bool {
        !self.diagnostics.has_errors()
    }
}

/// Compile one source buffer. The `Compilation` provides the source map
/// diagnostics render against.
pub fn compile_source(
    compilation: &mut Compilation,
    name: &str,
    source: &str,
    emit: EmitKind,
) -> CotResult<CompileOutcome> {
    let file_id = compilation.sources.add(name, source);
    let mut diagnostics = Diagnostics::new();

    log::debug!("compiling {} ({} bytes)", name, source.len());

    let mut lexer = Lexer::new(source, file_id);
    let tokens = lexer.tokenize();
    diagnostics.extend(lexer.take_diagnostics());

    let mut parser = Parser::new(tokens);
    let module = parser.parse_module();
    diagnostics.extend(parser.take_diagnostics());

    if emit == EmitKind::Ast && !diagnostics.has_errors() {
        let dump = serde_json::to_string_pretty(&module)
            .map_err(|e| CotError::io_error(e.to_string()))?;
        return Ok(CompileOutcome { diagnostics, image: None, dump: Some(dump) });
    }

    let (checked, check_diags) = TypeChecker::new().check_module(&module);
    diagnostics.extend(check_diags);

    // All front-end phases run to completion so every error surfaces, but
    // lowering and emission only see clean input.
    if diagnostics.has_errors() {
        return Ok(CompileOutcome { diagnostics, image: None, dump: None });
    }

    let lowered = lower_module(&module, checked);
    diagnostics.extend(lowered.diagnostics.clone());
    if diagnostics.has_errors() {
        return Ok(CompileOutcome { diagnostics, image: None, dump: None });
    }

    if emit == EmitKind::Ir {
        return Ok(CompileOutcome {
            diagnostics,
            image: None,
            dump: Some(lowered.module.to_string()),
        });
    }

    // An emission failure past a clean front end is an internal compiler
    // error and propagates as such.
    let image = emit_module(&lowered.module, &lowered.registry)?;
    Ok(CompileOutcome { diagnostics, image: Some(image), dump: None })
}
