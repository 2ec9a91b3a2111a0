//! Cot compiler command-line interface
//!
//! `cot build foo.cot` writes `foo.cbo`; `cot check foo.cot` reports
//! diagnostics only. Diagnostics print as `path:line:col: kind: message`;
//! the process exits 0 on success and 1 on any error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cot_cli::{compile_source, EmitKind};
use cot_common::Compilation;
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// The Cot programming language compiler
#[derive(Parser)]
#[command(name = "cot")]
#[command(about = "The Cot programming language compiler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to a bytecode image
    Build {
        /// Source file to compile
        source: PathBuf,

        /// Output path (defaults to the source name with `.cbo`)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit an intermediate artifact instead of bytecode
        #[arg(long, value_parser = ["bytecode", "ast", "ir"], default_value = "bytecode")]
        emit: String,
    },

    /// Check a source file for errors without producing bytecode
    Check {
        /// Source file to check
        source: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let result = match cli.command {
        Commands::Build { source, output, emit } => build(&source, output, &emit),
        Commands::Check { source } => check(&source),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn build(source: &Path, output: Option<PathBuf>, emit: &str) -> Result<bool> {
    let emit = match emit {
        "ast" => EmitKind::Ast,
        "ir" => EmitKind::Ir,
        _ => EmitKind::Bytecode,
    };

    let text = std::fs::read_to_string(source)
        .with_context(|| format!("failed to read {}", source.display()))?;
    let name = source.display().to_string();

    let mut compilation = Compilation::new();
    let outcome = compile_source(&mut compilation, &name, &text, emit)?;

    for diagnostic in &outcome.diagnostics.messages {
        eprintln!("{}", diagnostic.render(&compilation.sources));
    }
    if !outcome.succeeded() {
        return Ok(false);
    }

    if let Some(dump) = outcome.dump {
        println!("{}", dump);
        return Ok(true);
    }

    let image = outcome.image.expect("clean compilation produces an image");
    let out_path = output.unwrap_or_else(|| source.with_extension("cbo"));
    std::fs::write(&out_path, image.to_bytes())
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    info!("wrote {}", out_path.display());
    Ok(true)
}

fn check(source: &Path) -> Result<bool> {
    let text = std::fs::read_to_string(source)
        .with_context(|| format!("failed to read {}", source.display()))?;
    let name = source.display().to_string();

    let mut compilation = Compilation::new();
    let outcome = compile_source(&mut compilation, &name, &text, EmitKind::Bytecode)?;

    for diagnostic in &outcome.diagnostics.messages {
        eprintln!("{}", diagnostic.render(&compilation.sources));
    }
    Ok(outcome.succeeded())
}
