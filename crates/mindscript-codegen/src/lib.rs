//! MindScript Code Generator
//!
//! Lowers the analyzed AST to a flat instruction list plus a constant pool
//! and a function address table. String literals intern into the pool;
//! local slots come from a separate name table assigned in first-seen
//! order, so literal indices and slot indices never collide.

use indexmap::IndexMap;
use mindscript_ast::*;
use mindscript_lexer::Span;
use mindscript_vm::{CompiledProgram, Instruction, Opcode};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use thiserror::Error;
use tracing::debug;

/// Code generation error type. These are fatal: the analyzer normally
/// rules them out, so hitting one means the AST skipped analysis.
#[derive(Debug, Clone, Error)]
pub enum CodegenError {
    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: SmolStr, span: Span },

    #[error("undefined function `{name}`")]
    UndefinedFunction { name: SmolStr, span: Span },
}

impl CodegenError {
    pub fn span(&self) -> Span {
        match self {
            CodegenError::UndefinedVariable { span, .. } => *span,
            CodegenError::UndefinedFunction { span, .. } => *span,
        }
    }
}

/// Result type for code generation.
pub type Result<T> = std::result::Result<T, CodegenError>;

/// Builtin call targets compile to dedicated opcodes instead of `Call`.
fn builtin_opcode(name: &str) -> Option<Opcode> {
    match name {
        "log" => Some(Opcode::Log),
        "syscall" => Some(Opcode::Syscall),
        "exec" => Some(Opcode::Exec),
        _ => None,
    }
}

/// Generate bytecode for a whole program. The terminal `Halt` is appended
/// here.
pub fn generate(program: &Program) -> Result<CompiledProgram> {
    let mut gen = CodeGenerator::new();
    for stmt in &program.statements {
        gen.statement(stmt)?;
    }
    gen.emit(Opcode::Halt, 0);
    Ok(gen.finish())
}

/// Code generator state
pub struct CodeGenerator {
    instructions: Vec<Instruction>,
    pool: mindscript_vm::ConstantPool,
    /// Declared name -> local slot, in first-seen order
    symbols: IndexMap<SmolStr, i64>,
    /// Slot index -> name (anonymous slots get a synthesized one)
    slot_names: Vec<SmolStr>,
    /// Function name -> function index
    functions: FxHashMap<SmolStr, i64>,
    /// Function index -> address of the first body instruction
    function_addrs: Vec<usize>,
    next_symbol: i64,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
            pool: mindscript_vm::ConstantPool::new(),
            symbols: IndexMap::new(),
            slot_names: Vec::new(),
            functions: FxHashMap::default(),
            function_addrs: Vec::new(),
            next_symbol: 0,
        }
    }

    fn finish(self) -> CompiledProgram {
        CompiledProgram {
            instructions: self.instructions,
            pool: self.pool,
            function_addrs: self.function_addrs,
            symbols: self.slot_names,
        }
    }

    fn emit(&mut self, opcode: Opcode, operand: i64) -> usize {
        let at = self.instructions.len();
        debug!(at, ?opcode, operand, "emit");
        self.instructions.push(Instruction::new(opcode, operand));
        at
    }

    /// Slot for a named symbol, assigning the next free one on first sight.
    fn declare_symbol(&mut self, name: &SmolStr) -> i64 {
        if let Some(&slot) = self.symbols.get(name) {
            return slot;
        }
        let slot = self.next_symbol;
        self.next_symbol += 1;
        self.symbols.insert(name.clone(), slot);
        self.slot_names.push(name.clone());
        slot
    }

    /// Fresh index for an anonymous entity (event handlers). Shares the
    /// slot counter so indices stay unique across both kinds.
    fn alloc_index(&mut self, label: &str) -> i64 {
        let index = self.next_symbol;
        self.next_symbol += 1;
        self.slot_names.push(SmolStr::new(format!("{}#{}", label, index)));
        index
    }

    fn declare_function(&mut self, name: &SmolStr) -> i64 {
        if let Some(&index) = self.functions.get(name) {
            return index;
        }
        let index = self.functions.len() as i64;
        self.functions.insert(name.clone(), index);
        index
    }

    fn record_function_addr(&mut self, index: i64, addr: usize) {
        let index = index as usize;
        if index == self.function_addrs.len() {
            self.function_addrs.push(addr);
        } else {
            self.function_addrs[index] = addr;
        }
    }

    fn push_string(&mut self, value: &str) {
        let index = self.pool.intern_string(value);
        self.emit(Opcode::PushString, index);
    }

    fn patch_jump(&mut self, at: usize) {
        self.instructions[at].operand = self.instructions.len() as i64;
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Agent(agent) => self.agent(agent),
            StmtKind::Var(var) => {
                self.expression(&var.value)?;
                let slot = self.declare_symbol(&var.name.name);
                self.emit(Opcode::SetLocal, slot);
                Ok(())
            }
            StmtKind::Function(func) => self.function(func, None),
            StmtKind::Return(ret) => {
                self.expression(&ret.value)?;
                self.emit(Opcode::Return, 0);
                Ok(())
            }
            StmtKind::Expression(expr) => self.expression(&expr.value),
            StmtKind::Block(block) => self.block(block),
        }
    }

    fn block(&mut self, block: &BlockStmt) -> Result<()> {
        for stmt in &block.statements {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn agent(&mut self, agent: &AgentDecl) -> Result<()> {
        let agent_index = self.declare_symbol(&agent.name.name);
        self.emit(Opcode::CreateAgent, agent_index);

        if let Some(goal) = &agent.goal {
            self.push_string(&goal.value);
            self.emit(Opcode::SetAgentGoal, agent_index);
        }

        if let Some(capabilities) = &agent.capabilities {
            for capability in &capabilities.values {
                self.push_string(capability);
                self.emit(Opcode::AddAgentCapability, agent_index);
            }
        }

        for behavior in &agent.behaviors {
            self.behavior(behavior, agent_index)?;
        }

        for func in &agent.functions {
            self.function(func, Some(agent_index))?;
        }

        Ok(())
    }

    fn behavior(&mut self, behavior: &Behavior, agent_index: i64) -> Result<()> {
        for handler in &behavior.handlers {
            let handler_index = self.alloc_index("handler");

            self.emit(Opcode::CreateEventHandler, handler_index);
            self.push_string(&handler.event);
            self.emit(Opcode::SetEventHandlerEvent, handler_index);

            // Handler bodies stay inline: they execute when the agent
            // declaration executes.
            self.block(&handler.body)?;

            self.emit(Opcode::AddAgentEventHandler, agent_index);
            self.emit(Opcode::Push, handler_index);
        }
        Ok(())
    }

    fn function(&mut self, func: &FunctionDecl, owner: Option<i64>) -> Result<()> {
        let func_index = self.declare_function(&func.name.name);

        self.emit(Opcode::CreateFunction, func_index);
        for param in &func.params {
            self.push_string(&param.name.name);
            self.emit(Opcode::AddFunctionArgument, func_index);
        }

        // Skip over the body; it only runs through `Call`.
        let jump_at = self.emit(Opcode::Jump, 0);
        self.record_function_addr(func_index, self.instructions.len());

        // Callers push arguments left to right, so the last parameter is
        // on top of the stack.
        for param in func.params.iter().rev() {
            let slot = self.declare_symbol(&param.name.name);
            self.emit(Opcode::SetLocal, slot);
        }
        self.block(&func.body)?;
        let ends_with_return = matches!(
            func.body.statements.last().map(|s| &s.kind),
            Some(StmtKind::Return(_))
        );
        if !ends_with_return {
            self.emit(Opcode::Return, 0);
        }

        self.patch_jump(jump_at);

        if let Some(agent_index) = owner {
            self.emit(Opcode::AddAgentFunction, agent_index);
            self.emit(Opcode::Push, func_index);
        }
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expression(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Int(value) => {
                self.emit(Opcode::Push, *value);
            }
            ExprKind::Float(value) => {
                let index = self.pool.add_float(*value);
                self.emit(Opcode::PushFloat, index);
            }
            ExprKind::Str(value) => {
                self.push_string(value);
            }
            ExprKind::Bool(value) => {
                self.emit(Opcode::Push, i64::from(*value));
            }
            ExprKind::Ident(name) => {
                let slot = self.symbols.get(name).copied().ok_or_else(|| {
                    CodegenError::UndefinedVariable {
                        name: name.clone(),
                        span: expr.token.span,
                    }
                })?;
                self.emit(Opcode::GetLocal, slot);
            }
            ExprKind::Infix { op, left, right } => {
                self.expression(left)?;
                self.expression(right)?;
                let opcode = match op {
                    InfixOp::Add => Opcode::Add,
                    InfixOp::Sub => Opcode::Sub,
                    InfixOp::Mul => Opcode::Mul,
                    InfixOp::Div => Opcode::Div,
                };
                self.emit(opcode, 0);
            }
            ExprKind::Call { callee, args } => {
                for arg in args {
                    self.expression(arg)?;
                }
                if let Some(opcode) = builtin_opcode(&callee.name) {
                    self.emit(opcode, args.len() as i64);
                } else {
                    let index = self.functions.get(&callee.name).copied().ok_or_else(|| {
                        CodegenError::UndefinedFunction {
                            name: callee.name.clone(),
                            span: callee.token.span,
                        }
                    })?;
                    self.emit(Opcode::Call, index);
                }
            }
        }
        Ok(())
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}
