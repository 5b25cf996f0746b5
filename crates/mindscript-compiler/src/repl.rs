//! Read-eval-print loop.
//!
//! Each line compiles and runs independently on a fresh VM, but the symbol
//! table is shared so semantic checks see declarations from earlier lines.

use std::io::{self, BufRead, Write};

use mindscript_semantic::SymbolTable;
use mindscript_vm::Vm;
use tracing::error;

use crate::{compile_with, CompileError};

/// Run the REPL until `exit` or end of input.
pub fn start() {
    println!("Welcome to the MindScript REPL!");
    println!("Type 'exit' to quit.");

    let stdin = io::stdin();
    let mut table = SymbolTable::new();
    let mut line = String::new();

    loop {
        print!(">> ");
        io::stdout().flush().ok();

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let input = line.trim();
        if input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let compilation = match compile_with(&mut table, input) {
            Ok(compilation) => compilation,
            Err(CompileError::Parse(errors)) => {
                for e in &errors {
                    error!(error = %e, "parser error");
                }
                continue;
            }
            Err(e) => {
                error!(error = %e, "compile error");
                continue;
            }
        };

        let mut vm = Vm::new(&compilation.program);
        if let Err(e) = vm.run() {
            error!(error = %e, "runtime error");
            continue;
        }

        match vm.last_result() {
            Some(value) => println!("{}", value),
            None => println!("nil"),
        }
    }

    println!("Goodbye!");
}
