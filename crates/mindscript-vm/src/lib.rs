//! MindScript Virtual Machine
//!
//! A stack machine over the instruction list produced by code generation.
//! The VM owns its operand stack, locals, and call stack exclusively; the
//! compiled program is borrowed read-only, so several VMs can share one.
//!
//! Agent-construction opcodes build a runtime registry of agents, event
//! handlers, and functions that stays inspectable after the run.

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, error, info};

mod bytecode;
mod value;

pub use bytecode::{CompiledProgram, ConstantPool, Instruction, Opcode};
pub use value::Value;

/// Number of local variable slots available to a program.
pub const LOCAL_SLOTS: usize = 256;

/// Runtime errors. All of these terminate execution.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("unsupported operand types for {op}: {left} and {right}")]
    UnsupportedOperands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("type error: {message}")]
    TypeError { message: String },

    #[error("local slot {slot} out of range")]
    InvalidSlot { slot: i64 },

    #[error("read of uninitialized local slot {slot}")]
    UninitializedLocal { slot: i64 },

    #[error("string constant {index} out of range")]
    UnknownStringConstant { index: i64 },

    #[error("float constant {index} out of range")]
    UnknownFloatConstant { index: i64 },

    #[error("unknown function index {index}")]
    UnknownFunction { index: i64 },

    #[error("jump target {target} out of range")]
    InvalidJumpTarget { target: i64 },

    #[error("agent construction error: {message}")]
    AgentConstruction { message: String },
}

/// Result type for VM operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// A constructed agent in the runtime registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentInstance {
    pub goal: Option<SmolStr>,
    pub capabilities: Vec<SmolStr>,
    pub handlers: Vec<HandlerInstance>,
    pub functions: Vec<FunctionInstance>,
}

/// A constructed event handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerInstance {
    pub event: Option<SmolStr>,
}

/// A constructed function: its index and declared argument names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionInstance {
    pub index: i64,
    pub args: Vec<SmolStr>,
}

/// The virtual machine.
pub struct Vm<'p> {
    program: &'p CompiledProgram,
    stack: Vec<Value>,
    locals: Vec<Option<Value>>,
    call_stack: Vec<usize>,
    pc: usize,
    running: bool,

    // Agent registry, keyed by the operand index
    agents: FxHashMap<i64, AgentInstance>,
    pending_handlers: FxHashMap<i64, HandlerInstance>,
    pending_functions: FxHashMap<i64, FunctionInstance>,
    current_handler: Option<i64>,
    current_function: Option<i64>,

    // Values the LOG opcode reported, in order
    logged: Vec<Value>,
}

impl<'p> Vm<'p> {
    pub fn new(program: &'p CompiledProgram) -> Self {
        Self {
            program,
            stack: Vec::new(),
            locals: vec![None; LOCAL_SLOTS],
            call_stack: Vec::new(),
            pc: 0,
            running: true,
            agents: FxHashMap::default(),
            pending_handlers: FxHashMap::default(),
            pending_functions: FxHashMap::default(),
            current_handler: None,
            current_function: None,
            logged: Vec::new(),
        }
    }

    /// Execute until a halt condition: `Halt`, `Return` with an empty call
    /// stack, or running off the end of the instruction list.
    pub fn run(&mut self) -> Result<()> {
        info!("starting VM execution");
        while self.running {
            self.step()?;
        }
        info!("VM execution completed");
        Ok(())
    }

    /// The value left on top of the stack, if any.
    pub fn last_result(&self) -> Option<Value> {
        self.stack.last().cloned()
    }

    /// Current operand stack depth.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Pending return addresses.
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// The agent registry built by this run, keyed by agent index.
    pub fn agents(&self) -> &FxHashMap<i64, AgentInstance> {
        &self.agents
    }

    /// Values reported through the LOG opcode, in order.
    pub fn logged(&self) -> &[Value] {
        &self.logged
    }

    fn step(&mut self) -> Result<()> {
        if self.pc >= self.program.instructions.len() {
            debug!(pc = self.pc, "reached end of instructions");
            self.running = false;
            return Ok(());
        }

        let instr = self.program.instructions[self.pc];
        debug!(pc = self.pc, %instr, "executing instruction");

        match instr.opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                self.binary_op(instr.opcode)?;
            }
            Opcode::Push => {
                self.stack.push(Value::Int(instr.operand));
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::PushString => {
                let value = self
                    .program
                    .pool
                    .string(instr.operand)
                    .cloned()
                    .ok_or(RuntimeError::UnknownStringConstant {
                        index: instr.operand,
                    })?;
                self.stack.push(Value::Str(value));
            }
            Opcode::PushFloat => {
                let value = self.program.pool.float(instr.operand).ok_or(
                    RuntimeError::UnknownFloatConstant {
                        index: instr.operand,
                    },
                )?;
                self.stack.push(Value::Float(value));
            }
            Opcode::SetLocal => {
                let value = self.pop()?;
                let slot = self.slot(instr.operand)?;
                self.locals[slot] = Some(value);
            }
            Opcode::GetLocal => {
                let slot = self.slot(instr.operand)?;
                let value = self.locals[slot]
                    .clone()
                    .ok_or(RuntimeError::UninitializedLocal {
                        slot: instr.operand,
                    })?;
                self.stack.push(value);
            }
            Opcode::Jump => {
                self.pc = self.jump_target(instr.operand)?;
                return Ok(());
            }
            Opcode::JumpIfFalse => {
                let condition = self.pop()?;
                if !condition.is_truthy() {
                    self.pc = self.jump_target(instr.operand)?;
                    return Ok(());
                }
            }
            Opcode::Call => {
                let index = instr.operand;
                let addr = usize::try_from(index)
                    .ok()
                    .and_then(|i| self.program.function_addrs.get(i))
                    .copied()
                    .ok_or(RuntimeError::UnknownFunction { index })?;
                self.call_stack.push(self.pc + 1);
                debug!(return_addr = self.pc + 1, addr, "function call");
                self.pc = addr;
                return Ok(());
            }
            Opcode::Return => {
                match self.call_stack.pop() {
                    Some(addr) => {
                        debug!(return_addr = addr, "function return");
                        self.pc = addr;
                    }
                    None => {
                        info!("return with empty call stack, halting");
                        self.running = false;
                    }
                }
                return Ok(());
            }
            Opcode::Halt => {
                info!("halt instruction encountered");
                self.running = false;
            }
            Opcode::Log => {
                let message = self.pop()?;
                info!(message = %message, "log");
                self.logged.push(message);
            }
            Opcode::Syscall => {
                let command = self.pop_string("syscall command")?;
                let args = self.pop_string("syscall arguments")?;
                self.spawn(&command, &args);
            }
            Opcode::Exec => {
                let command = self.pop_string("exec command")?;
                let args = self.pop_string("exec arguments")?;
                if let Some(output) = self.spawn(&command, &args) {
                    self.stack.push(Value::Str(output));
                }
            }
            Opcode::CreateAgent => {
                debug!(agent = instr.operand, "creating agent");
                self.agents.insert(instr.operand, AgentInstance::default());
            }
            Opcode::SetAgentGoal => {
                let goal = self.pop_string("agent goal")?;
                self.agent_mut(instr.operand)?.goal = Some(goal);
            }
            Opcode::AddAgentCapability => {
                let capability = self.pop_string("agent capability")?;
                self.agent_mut(instr.operand)?.capabilities.push(capability);
            }
            Opcode::CreateEventHandler => {
                debug!(handler = instr.operand, "creating event handler");
                self.pending_handlers
                    .insert(instr.operand, HandlerInstance::default());
                self.current_handler = Some(instr.operand);
            }
            Opcode::SetEventHandlerEvent => {
                let event = self.pop_string("event name")?;
                let handler = self.pending_handlers.get_mut(&instr.operand).ok_or_else(|| {
                    RuntimeError::AgentConstruction {
                        message: format!("no event handler {} under construction", instr.operand),
                    }
                })?;
                handler.event = Some(event);
            }
            Opcode::AddAgentEventHandler => {
                // Attaches the most recently created handler; the handler
                // index is pushed *after* this instruction, so nothing is
                // popped here.
                let index = self.current_handler.take().ok_or_else(|| {
                    RuntimeError::AgentConstruction {
                        message: "no event handler to attach".to_string(),
                    }
                })?;
                let handler = self.pending_handlers.remove(&index).ok_or_else(|| {
                    RuntimeError::AgentConstruction {
                        message: format!("no event handler {} under construction", index),
                    }
                })?;
                debug!(agent = instr.operand, handler = index, "attaching event handler");
                self.agent_mut(instr.operand)?.handlers.push(handler);
            }
            Opcode::CreateFunction => {
                debug!(function = instr.operand, "creating function");
                self.pending_functions.insert(
                    instr.operand,
                    FunctionInstance {
                        index: instr.operand,
                        args: Vec::new(),
                    },
                );
                self.current_function = Some(instr.operand);
            }
            Opcode::AddFunctionArgument => {
                let name = self.pop_string("function argument name")?;
                let function =
                    self.pending_functions
                        .get_mut(&instr.operand)
                        .ok_or_else(|| RuntimeError::AgentConstruction {
                            message: format!("no function {} under construction", instr.operand),
                        })?;
                function.args.push(name);
            }
            Opcode::AddAgentFunction => {
                let index = self.current_function.take().ok_or_else(|| {
                    RuntimeError::AgentConstruction {
                        message: "no function to attach".to_string(),
                    }
                })?;
                let function = self.pending_functions.remove(&index).ok_or_else(|| {
                    RuntimeError::AgentConstruction {
                        message: format!("no function {} under construction", index),
                    }
                })?;
                debug!(agent = instr.operand, function = index, "attaching function");
                self.agent_mut(instr.operand)?.functions.push(function);
            }
        }

        self.pc += 1;
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn pop_string(&mut self, what: &str) -> Result<SmolStr> {
        let value = self.pop()?;
        match value {
            Value::Str(s) => Ok(s),
            other => Err(RuntimeError::TypeError {
                message: format!("{} must be a string, got {}", what, other.type_name()),
            }),
        }
    }

    fn slot(&self, operand: i64) -> Result<usize> {
        usize::try_from(operand)
            .ok()
            .filter(|&slot| slot < self.locals.len())
            .ok_or(RuntimeError::InvalidSlot { slot: operand })
    }

    fn jump_target(&self, operand: i64) -> Result<usize> {
        usize::try_from(operand)
            .ok()
            // Jumping to one past the end is a normal way to fall off and halt
            .filter(|&target| target <= self.program.instructions.len())
            .ok_or(RuntimeError::InvalidJumpTarget { target: operand })
    }

    fn agent_mut(&mut self, index: i64) -> Result<&mut AgentInstance> {
        self.agents
            .get_mut(&index)
            .ok_or_else(|| RuntimeError::AgentConstruction {
                message: format!("no agent {} in the registry", index),
            })
    }

    /// Spawn a host command with whitespace-split arguments and wait for it.
    /// Failures are logged, never fatal. Returns the combined output.
    fn spawn(&self, command: &str, args: &str) -> Option<SmolStr> {
        debug!(command, args, "spawning host command");
        match Command::new(command).args(args.split(' ')).output() {
            Ok(output) => {
                let mut combined = output.stdout;
                combined.extend_from_slice(&output.stderr);
                let text = String::from_utf8_lossy(&combined);
                debug!(output = %text, "host command output");
                Some(SmolStr::new(text))
            }
            Err(e) => {
                error!(command, error = %e, "host command failed");
                None
            }
        }
    }

    fn binary_op(&mut self, opcode: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => self.int_op(opcode, *a, *b)?,
            (Value::Int(a), Value::Float(b)) => Value::Float(self.float_op(opcode, *a as f64, *b)?),
            (Value::Float(a), Value::Int(b)) => Value::Float(self.float_op(opcode, *a, *b as f64)?),
            (Value::Float(a), Value::Float(b)) => Value::Float(self.float_op(opcode, *a, *b)?),
            _ => {
                return Err(RuntimeError::UnsupportedOperands {
                    op: op_name(opcode),
                    left: left.type_name(),
                    right: right.type_name(),
                })
            }
        };

        self.stack.push(result);
        Ok(())
    }

    fn int_op(&self, opcode: Opcode, a: i64, b: i64) -> Result<Value> {
        let result = match opcode {
            Opcode::Add => a.wrapping_add(b),
            Opcode::Sub => a.wrapping_sub(b),
            Opcode::Mul => a.wrapping_mul(b),
            Opcode::Div => {
                if b == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                a / b
            }
            _ => unreachable!("not an arithmetic opcode: {:?}", opcode),
        };
        Ok(Value::Int(result))
    }

    fn float_op(&self, opcode: Opcode, a: f64, b: f64) -> Result<f64> {
        match opcode {
            Opcode::Add => Ok(a + b),
            Opcode::Sub => Ok(a - b),
            Opcode::Mul => Ok(a * b),
            Opcode::Div => {
                if b == 0.0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                Ok(a / b)
            }
            _ => unreachable!("not an arithmetic opcode: {:?}", opcode),
        }
    }
}

fn op_name(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::Add => "addition",
        Opcode::Sub => "subtraction",
        Opcode::Mul => "multiplication",
        Opcode::Div => "division",
        _ => "operation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(instructions: Vec<Instruction>) -> CompiledProgram {
        CompiledProgram {
            instructions,
            ..Default::default()
        }
    }

    fn instr(opcode: Opcode, operand: i64) -> Instruction {
        Instruction::new(opcode, operand)
    }

    fn run(program: &CompiledProgram) -> Vm<'_> {
        let mut vm = Vm::new(program);
        vm.run().expect("program should run cleanly");
        vm
    }

    #[test]
    fn test_integer_arithmetic() {
        let p = program(vec![
            instr(Opcode::Push, 6),
            instr(Opcode::Push, 7),
            instr(Opcode::Mul, 0),
            instr(Opcode::Halt, 0),
        ]);
        let vm = run(&p);
        assert_eq!(vm.last_result(), Some(Value::Int(42)));
    }

    #[test]
    fn test_mixed_arithmetic_widens_to_float() {
        let mut p = program(vec![]);
        let idx = p.pool.add_float(2.5);
        p.instructions = vec![
            instr(Opcode::Push, 4),
            instr(Opcode::PushFloat, idx),
            instr(Opcode::Mul, 0),
            instr(Opcode::Halt, 0),
        ];
        let vm = run(&p);
        assert_eq!(vm.last_result(), Some(Value::Float(10.0)));
    }

    #[test]
    fn test_float_float_arithmetic() {
        let mut p = program(vec![]);
        let a = p.pool.add_float(1.5);
        let b = p.pool.add_float(0.25);
        p.instructions = vec![
            instr(Opcode::PushFloat, a),
            instr(Opcode::PushFloat, b),
            instr(Opcode::Sub, 0),
            instr(Opcode::Halt, 0),
        ];
        let vm = run(&p);
        assert_eq!(vm.last_result(), Some(Value::Float(1.25)));
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        let p = program(vec![
            instr(Opcode::Push, 1),
            instr(Opcode::Push, 0),
            instr(Opcode::Div, 0),
        ]);
        let mut vm = Vm::new(&p);
        let err = vm.run().unwrap_err();
        assert!(matches!(err, RuntimeError::DivisionByZero));
    }

    #[test]
    fn test_stack_underflow_is_fatal() {
        let p = program(vec![instr(Opcode::Push, 1), instr(Opcode::Add, 0)]);
        let mut vm = Vm::new(&p);
        let err = vm.run().unwrap_err();
        assert!(matches!(err, RuntimeError::StackUnderflow));
    }

    #[test]
    fn test_string_arithmetic_is_fatal() {
        let mut p = program(vec![]);
        let s = p.pool.intern_string("x");
        p.instructions = vec![
            instr(Opcode::PushString, s),
            instr(Opcode::Push, 1),
            instr(Opcode::Add, 0),
        ];
        let mut vm = Vm::new(&p);
        let err = vm.run().unwrap_err();
        assert!(matches!(err, RuntimeError::UnsupportedOperands { .. }));
    }

    #[test]
    fn test_locals_round_trip() {
        let p = program(vec![
            instr(Opcode::Push, 99),
            instr(Opcode::SetLocal, 3),
            instr(Opcode::GetLocal, 3),
            instr(Opcode::Halt, 0),
        ]);
        let vm = run(&p);
        assert_eq!(vm.last_result(), Some(Value::Int(99)));
    }

    #[test]
    fn test_uninitialized_local_is_fatal() {
        let p = program(vec![instr(Opcode::GetLocal, 0)]);
        let mut vm = Vm::new(&p);
        let err = vm.run().unwrap_err();
        assert!(matches!(err, RuntimeError::UninitializedLocal { slot: 0 }));
    }

    #[test]
    fn test_falling_off_the_end_halts() {
        let p = program(vec![instr(Opcode::Push, 1)]);
        let vm = run(&p);
        assert_eq!(vm.last_result(), Some(Value::Int(1)));
    }

    #[test]
    fn test_jump_skips_instructions() {
        let p = program(vec![
            instr(Opcode::Jump, 2),
            instr(Opcode::Push, 1),
            instr(Opcode::Push, 2),
            instr(Opcode::Halt, 0),
        ]);
        let vm = run(&p);
        assert_eq!(vm.stack_depth(), 1);
        assert_eq!(vm.last_result(), Some(Value::Int(2)));
    }

    #[test]
    fn test_jump_if_false() {
        let p = program(vec![
            instr(Opcode::Push, 0),
            instr(Opcode::JumpIfFalse, 3),
            instr(Opcode::Push, 111),
            instr(Opcode::Push, 222),
            instr(Opcode::Halt, 0),
        ]);
        let vm = run(&p);
        assert_eq!(vm.last_result(), Some(Value::Int(222)));
        assert_eq!(vm.stack_depth(), 1);
    }

    #[test]
    fn test_call_and_return() {
        // Body at address 3: double the argument already bound to slot 0
        let p = CompiledProgram {
            instructions: vec![
                instr(Opcode::Push, 21),      // argument
                instr(Opcode::Call, 0),       // call function 0
                instr(Opcode::Halt, 0),
                instr(Opcode::SetLocal, 0),   // bind argument
                instr(Opcode::GetLocal, 0),
                instr(Opcode::Push, 2),
                instr(Opcode::Mul, 0),
                instr(Opcode::Return, 0),
            ],
            function_addrs: vec![3],
            ..Default::default()
        };
        let mut vm = Vm::new(&p);
        vm.run().unwrap();
        assert_eq!(vm.last_result(), Some(Value::Int(42)));
        assert_eq!(vm.call_depth(), 0);
    }

    #[test]
    fn test_return_with_empty_call_stack_halts() {
        let p = program(vec![
            instr(Opcode::Push, 5),
            instr(Opcode::Return, 0),
            instr(Opcode::Push, 6),
        ]);
        let vm = run(&p);
        assert_eq!(vm.last_result(), Some(Value::Int(5)));
    }

    #[test]
    fn test_unknown_function_index_is_fatal() {
        let p = program(vec![instr(Opcode::Call, 9)]);
        let mut vm = Vm::new(&p);
        let err = vm.run().unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownFunction { index: 9 }));
    }

    #[test]
    fn test_log_records_value() {
        let mut p = program(vec![]);
        let s = p.pool.intern_string("hi");
        p.instructions = vec![
            instr(Opcode::PushString, s),
            instr(Opcode::Log, 1),
            instr(Opcode::Halt, 0),
        ];
        let vm = run(&p);
        assert_eq!(vm.logged(), &[Value::Str("hi".into())]);
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn test_agent_registry_construction() {
        let mut p = program(vec![]);
        let goal = p.pool.intern_string("observe");
        let cap = p.pool.intern_string("fs");
        let event = p.pool.intern_string("start");
        p.instructions = vec![
            instr(Opcode::CreateAgent, 0),
            instr(Opcode::PushString, goal),
            instr(Opcode::SetAgentGoal, 0),
            instr(Opcode::PushString, cap),
            instr(Opcode::AddAgentCapability, 0),
            instr(Opcode::CreateEventHandler, 1),
            instr(Opcode::PushString, event),
            instr(Opcode::SetEventHandlerEvent, 1),
            instr(Opcode::AddAgentEventHandler, 0),
            instr(Opcode::Push, 1),
            instr(Opcode::Halt, 0),
        ];
        let vm = run(&p);

        let agent = &vm.agents()[&0];
        assert_eq!(agent.goal.as_deref(), Some("observe"));
        assert_eq!(agent.capabilities, vec![SmolStr::new("fs")]);
        assert_eq!(agent.handlers.len(), 1);
        assert_eq!(agent.handlers[0].event.as_deref(), Some("start"));
    }

    #[test]
    fn test_agent_function_attachment() {
        let mut p = program(vec![]);
        let arg = p.pool.intern_string("n");
        p.instructions = vec![
            instr(Opcode::CreateAgent, 0),
            instr(Opcode::CreateFunction, 0),
            instr(Opcode::PushString, arg),
            instr(Opcode::AddFunctionArgument, 0),
            instr(Opcode::AddAgentFunction, 0),
            instr(Opcode::Push, 0),
            instr(Opcode::Halt, 0),
        ];
        let vm = run(&p);

        let agent = &vm.agents()[&0];
        assert_eq!(agent.functions.len(), 1);
        assert_eq!(agent.functions[0].args, vec![SmolStr::new("n")]);
    }

    #[test]
    fn test_goal_for_missing_agent_is_fatal() {
        let mut p = program(vec![]);
        let goal = p.pool.intern_string("g");
        p.instructions = vec![
            instr(Opcode::PushString, goal),
            instr(Opcode::SetAgentGoal, 7),
        ];
        let mut vm = Vm::new(&p);
        let err = vm.run().unwrap_err();
        assert!(matches!(err, RuntimeError::AgentConstruction { .. }));
    }

    #[test]
    fn test_determinism_same_program_same_result() {
        let p = program(vec![
            instr(Opcode::Push, 10),
            instr(Opcode::Push, 4),
            instr(Opcode::Sub, 0),
            instr(Opcode::Halt, 0),
        ]);
        let a = run(&p).last_result();
        let b = run(&p).last_result();
        assert_eq!(a, b);
        assert_eq!(a, Some(Value::Int(6)));
    }
}
