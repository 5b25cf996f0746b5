//! MindScript Compiler
//!
//! Command-line interface for compiling and running MindScript programs.

use ariadne::{Color, Label, Report, ReportKind, Source};
use clap::{Parser, Subcommand};
use mindscript_compiler::{
    compile, default_output_path, dump_ast_json, repl, CompileError,
};
use mindscript_parser::ParseError;
use mindscript_semantic::SemanticError;
use mindscript_vm::Vm;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[command(name = "msc")]
#[command(version = "0.1.0")]
#[command(about = "MindScript compiler", long_about = None)]
struct Cli {
    /// Log level (debug, info, warn, error)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    loglevel: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a MindScript program and execute it once
    Build {
        /// Input file
        #[arg(short, long)]
        input: PathBuf,
        /// Output file (default: the input with `.ms` replaced by `.mind`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Start the MindScript REPL
    Repl,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.loglevel);

    match cli.command {
        Commands::Build { input, output } => build(&input, output.as_deref()),
        Commands::Repl => {
            info!("msc: starting REPL");
            repl::start();
            info!("msc: REPL finished");
            ExitCode::SUCCESS
        }
    }
}

fn init_logging(level: &str) {
    let level = match level {
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn build(input: &Path, output: Option<&Path>) -> ExitCode {
    info!("msc: starting build");

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input));
    info!(input = %input.display(), output = %output.display(), "processing files");

    let source = match fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            error!(error = %e, "error reading input file");
            return ExitCode::FAILURE;
        }
    };

    let filename = input.display().to_string();
    let compilation = match compile(&source) {
        Ok(compilation) => compilation,
        Err(CompileError::Parse(errors)) => {
            for e in &errors {
                report_parse_error(&filename, &source, e);
            }
            return ExitCode::FAILURE;
        }
        Err(CompileError::Semantic(e)) => {
            report_semantic_error(&filename, &source, &e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!(error = %e, "error compiling program");
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new(&compilation.program);
    if let Err(e) = vm.run() {
        error!(error = %e, "runtime error");
        return ExitCode::FAILURE;
    }

    let json = match dump_ast_json(&compilation.ast) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "error dumping program to JSON");
            return ExitCode::FAILURE;
        }
    };

    let dump_path = format!("{}.json", output.display());
    if let Err(e) = fs::write(&dump_path, json) {
        error!(error = %e, path = %dump_path, "error writing JSON dump file");
        return ExitCode::FAILURE;
    }

    info!("msc: build finished");
    ExitCode::SUCCESS
}

/// Report a parse error using ariadne
fn report_parse_error(filename: &str, source: &str, error: &ParseError) {
    let span = error.span();
    Report::build(ReportKind::Error, filename, span.start)
        .with_message("parse error")
        .with_label(
            Label::new((filename, span.start..span.end))
                .with_message(error.to_string())
                .with_color(Color::Red),
        )
        .finish()
        .print((filename, Source::from(source)))
        .unwrap();
}

/// Report a semantic error using ariadne
fn report_semantic_error(filename: &str, source: &str, error: &SemanticError) {
    let span = error.span();
    Report::build(ReportKind::Error, filename, span.start)
        .with_message("semantic error")
        .with_label(
            Label::new((filename, span.start..span.end))
                .with_message(error.to_string())
                .with_color(Color::Red),
        )
        .finish()
        .print((filename, Source::from(source)))
        .unwrap();
}
