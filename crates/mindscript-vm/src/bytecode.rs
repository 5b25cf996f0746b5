//! Instruction set and compiled-program container.

use smol_str::SmolStr;
use std::fmt;

/// VM opcodes. Operand semantics are noted per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Arithmetic: pop two, push one; operand unused
    Add,
    Sub,
    Mul,
    Div,

    // Stack: operand is an integer value or a pool index
    Push,
    Pop,
    PushString,
    PushFloat,

    // Locals: operand is a slot index
    SetLocal,
    GetLocal,

    // Control flow: operand is an instruction address, or a function index
    // for `Call` (resolved through the function address table)
    Jump,
    JumpIfFalse,
    Call,
    Return,
    Halt,

    // Builtins: operand is the argument count
    Log,
    Syscall,
    Exec,

    // Agent construction: operand is an agent/handler/function index
    CreateAgent,
    SetAgentGoal,
    AddAgentCapability,
    CreateEventHandler,
    SetEventHandlerEvent,
    AddAgentEventHandler,
    CreateFunction,
    AddFunctionArgument,
    AddAgentFunction,
}

/// A single VM instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: i64,
}

impl Instruction {
    pub fn new(opcode: Opcode, operand: i64) -> Self {
        Self { opcode, operand }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.opcode, self.operand)
    }
}

/// Append-only constant pool, split into string and float tables.
/// `PushString`/`PushFloat` operands index into their respective table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    strings: Vec<SmolStr>,
    floats: Vec<f64>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its index. Duplicates share an entry.
    pub fn intern_string(&mut self, value: &str) -> i64 {
        if let Some(index) = self.strings.iter().position(|s| s == value) {
            return index as i64;
        }
        self.strings.push(SmolStr::new(value));
        (self.strings.len() - 1) as i64
    }

    /// Add a float constant, returning its index.
    pub fn add_float(&mut self, value: f64) -> i64 {
        if let Some(index) = self.floats.iter().position(|f| f.to_bits() == value.to_bits()) {
            return index as i64;
        }
        self.floats.push(value);
        (self.floats.len() - 1) as i64
    }

    pub fn string(&self, index: i64) -> Option<&SmolStr> {
        usize::try_from(index).ok().and_then(|i| self.strings.get(i))
    }

    pub fn float(&self, index: i64) -> Option<f64> {
        usize::try_from(index).ok().and_then(|i| self.floats.get(i)).copied()
    }

    pub fn strings(&self) -> &[SmolStr] {
        &self.strings
    }

    pub fn floats(&self) -> &[f64] {
        &self.floats
    }
}

/// The immutable output of code generation. Multiple VMs may execute the
/// same compiled program by shared reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledProgram {
    pub instructions: Vec<Instruction>,
    pub pool: ConstantPool,
    /// Function index -> address of the first body instruction
    pub function_addrs: Vec<usize>,
    /// Local slot index -> declared name (debug info, registry lookups)
    pub symbols: Vec<SmolStr>,
}

impl CompiledProgram {
    /// Slot index of a named symbol, if one was assigned.
    pub fn symbol_index(&self, name: &str) -> Option<i64> {
        self.symbols.iter().position(|s| s == name).map(|i| i as i64)
    }
}
