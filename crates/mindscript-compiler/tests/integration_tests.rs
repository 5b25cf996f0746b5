//! Integration tests for the MindScript pipeline.
//!
//! These drive lex -> parse -> analyze -> generate -> execute over concrete
//! programs and pin down the observable behavior of each stage boundary.

use mindscript_compiler::{compile, compile_with, CompileError, Compilation};
use mindscript_semantic::{SemanticError, SymbolTable};
use mindscript_vm::{Opcode, RuntimeError, Value, Vm};
use smol_str::SmolStr;

fn compile_ok(source: &str) -> Compilation {
    compile(source).expect("compilation should succeed")
}

fn opcodes(compilation: &Compilation) -> Vec<Opcode> {
    compilation
        .program
        .instructions
        .iter()
        .map(|i| i.opcode)
        .collect()
}

// ============================================================================
// Agent declarations
// ============================================================================

#[test]
fn test_agent_end_to_end() {
    let compilation = compile_ok(
        r#"agent A { goal: "g"; capabilities: ["X"]; behavior { on "e" { log("hi"); } } }"#,
    );

    assert_eq!(
        opcodes(&compilation),
        [
            Opcode::CreateAgent,
            Opcode::PushString,
            Opcode::SetAgentGoal,
            Opcode::PushString,
            Opcode::AddAgentCapability,
            Opcode::CreateEventHandler,
            Opcode::PushString,
            Opcode::SetEventHandlerEvent,
            Opcode::PushString,
            Opcode::Log,
            Opcode::AddAgentEventHandler,
            Opcode::Push,
            Opcode::Halt,
        ]
    );

    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();

    // The handler body ran inline during construction
    assert_eq!(vm.logged(), &[Value::Str("hi".into())]);

    // The registry holds the constructed agent
    let agent_index = compilation.program.symbol_index("A").unwrap();
    let agent = &vm.agents()[&agent_index];
    assert_eq!(agent.goal.as_deref(), Some("g"));
    assert_eq!(agent.capabilities, vec![SmolStr::new("X")]);
    assert_eq!(agent.handlers.len(), 1);
    assert_eq!(agent.handlers[0].event.as_deref(), Some("e"));
}

#[test]
fn test_duplicate_agent_names_rejected() {
    let err = compile("agent A { } agent A { }").unwrap_err();
    match err {
        CompileError::Semantic(e) => {
            assert!(e
                .to_string()
                .contains("variable already declared in this scope"));
        }
        other => panic!("expected semantic error, got {:?}", other),
    }
}

// ============================================================================
// Variables and arithmetic
// ============================================================================

#[test]
fn test_var_product_bytecode_and_clean_halt() {
    let compilation = compile_ok("var x: int = 42 * 7;");

    let rendered: Vec<String> = compilation
        .program
        .instructions
        .iter()
        .map(|i| i.to_string())
        .collect();
    assert_eq!(
        rendered,
        ["Push(42)", "Push(7)", "Mul(0)", "SetLocal(0)", "Halt(0)"]
    );

    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_undeclared_variable_names_line_and_ident() {
    let err = compile("var x: int = y;").unwrap_err();
    match err {
        CompileError::Semantic(e) => {
            let msg = e.to_string();
            assert!(msg.contains("line 1"), "message was: {msg}");
            assert!(msg.contains('y'), "message was: {msg}");
        }
        other => panic!("expected semantic error, got {:?}", other),
    }
}

#[test]
fn test_float_arithmetic_survives_compilation() {
    let compilation = compile_ok("var x: float = 1.5 + 2.25;");
    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();
    // The sum is exact, not truncated to an integer operand
    let slot = compilation.program.symbol_index("x").unwrap();
    assert_eq!(slot, 0);
}

#[test]
fn test_division_by_zero_is_fatal_at_runtime() {
    let compilation = compile_ok("var x: int = 1 / 0;");
    let mut vm = Vm::new(&compilation.program);
    let err = vm.run().unwrap_err();
    assert!(matches!(err, RuntimeError::DivisionByZero));
}

// ============================================================================
// Functions and calls
// ============================================================================

#[test]
fn test_function_call_returns_through_stack() {
    let compilation = compile_ok("function f(a: int): int { return a * 2; } f(3);");

    // The call site compiles to an argument push and a dispatch
    let ops = opcodes(&compilation);
    let call_at = ops.iter().position(|&op| op == Opcode::Call).unwrap();
    assert_eq!(ops[call_at - 1], Opcode::Push);
    assert_eq!(ops[call_at + 1], Opcode::Halt);

    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();
    assert_eq!(vm.last_result(), Some(Value::Int(6)));
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_nested_calls() {
    let compilation = compile_ok(
        r#"
        function double(a: int): int { return a * 2; }
        function quad(a: int): int { return double(double(a)); }
        quad(4);
        "#,
    );
    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();
    assert_eq!(vm.last_result(), Some(Value::Int(16)));
}

#[test]
fn test_agent_function_callable_after_declaration() {
    let compilation = compile_ok(
        r#"agent Calc {
            function triple(n: int): int { return n * 3; }
        }
        triple(5);"#,
    );
    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();
    assert_eq!(vm.last_result(), Some(Value::Int(15)));

    let agent_index = compilation.program.symbol_index("Calc").unwrap();
    let agent = &vm.agents()[&agent_index];
    assert_eq!(agent.functions.len(), 1);
    assert_eq!(agent.functions[0].args, vec![SmolStr::new("n")]);
}

#[test]
fn test_call_arity_checked() {
    let err = compile("function f(a: int): int { return a; } f(1, 2);").unwrap_err();
    assert!(matches!(
        err,
        CompileError::Semantic(SemanticError::ArityMismatch {
            expected: 1,
            got: 2,
            ..
        })
    ));
}

#[test]
fn test_call_argument_types_checked() {
    let err = compile("function f(a: int): int { return a; } f(\"one\");").unwrap_err();
    assert!(matches!(
        err,
        CompileError::Semantic(SemanticError::ArgumentTypeMismatch { .. })
    ));
}

// ============================================================================
// Builtins
// ============================================================================

#[test]
fn test_log_builtin() {
    let compilation = compile_ok("log(\"one\"); log(\"two\");");
    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();
    assert_eq!(
        vm.logged(),
        &[Value::Str("one".into()), Value::Str("two".into())]
    );
    assert_eq!(vm.stack_depth(), 0);
}

#[cfg(unix)]
#[test]
fn test_exec_pushes_combined_output() {
    // The command is the second operand; the first is its argument string
    let compilation = compile_ok("log(exec(\"hello\", \"echo\"));");
    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();
    assert_eq!(vm.logged().len(), 1);
    match &vm.logged()[0] {
        Value::Str(s) => assert_eq!(s.trim(), "hello"),
        other => panic!("expected string output, got {:?}", other),
    }
}

#[cfg(unix)]
#[test]
fn test_syscall_pushes_nothing() {
    let compilation = compile_ok("syscall(\"hello\", \"echo\");");
    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();
    assert_eq!(vm.stack_depth(), 0);
}

#[test]
fn test_spawn_failure_is_not_fatal() {
    let compilation = compile_ok("syscall(\"\", \"definitely-not-a-real-binary\");");
    let mut vm = Vm::new(&compilation.program);
    // The failed spawn is logged and skipped
    vm.run().unwrap();
}

// ============================================================================
// Pipeline properties
// ============================================================================

#[test]
fn test_compilation_is_deterministic() {
    let source = r#"agent A {
        goal: "g";
        behavior { on "e" { var x: int = 1 + 2; } }
        function f(n: int): int { return n * 3; }
    }
    f(2);"#;

    let a = compile_ok(source);
    let b = compile_ok(source);
    assert_eq!(a.program, b.program);

    let mut vm_a = Vm::new(&a.program);
    vm_a.run().unwrap();
    let mut vm_b = Vm::new(&b.program);
    vm_b.run().unwrap();
    assert_eq!(vm_a.last_result(), vm_b.last_result());
}

#[test]
fn test_stack_discipline_without_calls() {
    // One expression-statement result survives; log consumes its operand
    let compilation = compile_ok("var a: int = 1; a + 2; log(\"consumed\");");
    let mut vm = Vm::new(&compilation.program);
    vm.run().unwrap();
    assert_eq!(vm.stack_depth(), 1);
    assert_eq!(vm.call_depth(), 0);
    assert_eq!(vm.last_result(), Some(Value::Int(3)));
}

#[test]
fn test_shared_program_multiple_vms() {
    let compilation = compile_ok("var x: int = 2 + 3;");
    let mut first = Vm::new(&compilation.program);
    let mut second = Vm::new(&compilation.program);
    first.run().unwrap();
    second.run().unwrap();
    assert_eq!(first.stack_depth(), second.stack_depth());
}

// ============================================================================
// Shared symbol table (REPL model)
// ============================================================================

#[test]
fn test_shared_table_keeps_declarations_visible() {
    let mut table = SymbolTable::new();
    compile_with(&mut table, "var x: int = 1;").unwrap();

    // The next program sees `x` during analysis, but each program gets a
    // fresh code generator, so its slot table starts empty and the
    // reference fails at lowering.
    let err = compile_with(&mut table, "var y: int = x;").unwrap_err();
    assert!(matches!(err, CompileError::Codegen(_)));

    // Fresh declarations keep working
    compile_with(&mut table, "var z: int = 3;").unwrap();

    // And a redeclaration of line one's name is still rejected
    let err = compile_with(&mut table, "var x: int = 9;").unwrap_err();
    assert!(matches!(
        err,
        CompileError::Semantic(SemanticError::Redeclaration { .. })
    ));
}

// ============================================================================
// JSON dump
// ============================================================================

#[test]
fn test_ast_dump_round_trips_node_names() {
    let compilation = compile_ok(
        r#"agent A { goal: "g"; behavior { on "e" { log("hi"); } } }"#,
    );
    let json = mindscript_compiler::dump_ast_json(&compilation.ast).unwrap();
    for needle in ["Agent", "goal", "handlers", "span", "\"e\""] {
        assert!(json.contains(needle), "missing {needle} in dump");
    }
}
