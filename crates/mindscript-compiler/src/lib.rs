//! MindScript Compiler Library
//!
//! Runs the full pipeline (lex -> parse -> analyze -> generate) over one
//! source string. The `msc` binary and the REPL are thin layers over this.

use std::path::{Path, PathBuf};

use mindscript_ast::Program;
use mindscript_codegen::{generate, CodegenError};
use mindscript_parser::{parse, ParseError};
use mindscript_semantic::{Analyzer, SemanticError, SymbolTable};
use mindscript_vm::CompiledProgram;
use thiserror::Error;

pub mod repl;

/// Errors that can occur during compilation
#[derive(Debug, Error)]
pub enum CompileError {
    /// Parse diagnostics, reported as a batch
    #[error("parsing failed with {} error(s)", .0.len())]
    Parse(Vec<ParseError>),

    /// First semantic failure
    #[error(transparent)]
    Semantic(#[from] SemanticError),

    /// Code generation failure
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    /// I/O error reading or writing files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// The outputs of a successful compilation.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub ast: Program,
    pub program: CompiledProgram,
}

/// Compile one source string against a fresh symbol table.
pub fn compile(source: &str) -> CompileResult<Compilation> {
    let mut table = SymbolTable::new();
    compile_with(&mut table, source)
}

/// Compile one source string against a caller-owned symbol table, so
/// declarations persist between programs (the REPL's model).
pub fn compile_with(table: &mut SymbolTable, source: &str) -> CompileResult<Compilation> {
    let (ast, parse_errors) = parse(source);
    if !parse_errors.is_empty() {
        return Err(CompileError::Parse(parse_errors));
    }

    Analyzer::new(table, source).analyze(&ast)?;

    let program = generate(&ast)?;
    Ok(Compilation { ast, program })
}

/// Serialize the AST to pretty-printed JSON (the `build` dump format).
pub fn dump_ast_json(program: &Program) -> serde_json::Result<String> {
    serde_json::to_string_pretty(program)
}

/// Default output path: the input with a trailing `.ms` swapped for `.mind`.
pub fn default_output_path(input: &Path) -> PathBuf {
    if input.extension().map_or(false, |ext| ext == "ms") {
        input.with_extension("mind")
    } else {
        let mut path = input.as_os_str().to_os_string();
        path.push(".mind");
        PathBuf::from(path)
    }
}
