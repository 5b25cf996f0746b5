//! MindScript Semantic Analyzer
//!
//! Walks the AST once, resolving names against a lexically nested symbol
//! table and checking call signatures and infix operand types. The first
//! failure short-circuits; every error carries the 1-based source line of
//! the offending token.

use mindscript_ast::*;
use mindscript_lexer::{line_at, Span};
use smol_str::SmolStr;
use std::fmt;
use thiserror::Error;

mod table;

pub use table::{FunctionSignature, SymbolTable};

/// A resolved type in the analyzer.
///
/// Extends the declarable type tags with `Void` (builtin returns) and
/// `Agent` (agent names occupy the global variable namespace so duplicate
/// agents collide like any other redeclaration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    Str,
    Bool,
    Void,
    Agent,
}

impl From<TypeTag> for Type {
    fn from(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Int => Type::Int,
            TypeTag::Float => Type::Float,
            TypeTag::Str => Type::Str,
            TypeTag::Bool => Type::Bool,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Int => "int",
            Type::Float => "float",
            Type::Str => "string",
            Type::Bool => "bool",
            Type::Void => "void",
            Type::Agent => "agent",
        };
        f.write_str(name)
    }
}

/// Semantic error type
#[derive(Debug, Clone, Error)]
pub enum SemanticError {
    #[error("line {line}: variable already declared in this scope: `{name}`")]
    Redeclaration {
        name: SmolStr,
        line: usize,
        span: Span,
    },

    #[error("line {line}: function already declared in this scope: `{name}`")]
    FunctionRedeclaration {
        name: SmolStr,
        line: usize,
        span: Span,
    },

    #[error("line {line}: variable not declared: `{name}`")]
    UnknownVariable {
        name: SmolStr,
        line: usize,
        span: Span,
    },

    #[error("line {line}: function `{name}` not declared")]
    UnknownFunction {
        name: SmolStr,
        line: usize,
        span: Span,
    },

    #[error("line {line}: expected {expected} arguments but got {got}")]
    ArityMismatch {
        expected: usize,
        got: usize,
        line: usize,
        span: Span,
    },

    #[error("line {line}: type mismatch for argument {index}: expected {expected} but got {found}")]
    ArgumentTypeMismatch {
        index: usize,
        expected: Type,
        found: Type,
        line: usize,
        span: Span,
    },

    #[error("line {line}: type mismatch in infix expression: {left} and {right}")]
    InfixTypeMismatch {
        left: Type,
        right: Type,
        line: usize,
        span: Span,
    },
}

impl SemanticError {
    pub fn span(&self) -> Span {
        match self {
            SemanticError::Redeclaration { span, .. } => *span,
            SemanticError::FunctionRedeclaration { span, .. } => *span,
            SemanticError::UnknownVariable { span, .. } => *span,
            SemanticError::UnknownFunction { span, .. } => *span,
            SemanticError::ArityMismatch { span, .. } => *span,
            SemanticError::ArgumentTypeMismatch { span, .. } => *span,
            SemanticError::InfixTypeMismatch { span, .. } => *span,
        }
    }
}

/// Result type for analyzer operations
pub type Result<T> = std::result::Result<T, SemanticError>;

/// Single-pass semantic analyzer over one program.
///
/// Borrows the symbol table so a caller (the REPL) can keep declarations
/// alive across programs.
pub struct Analyzer<'a> {
    source: &'a str,
    table: &'a mut SymbolTable,
}

impl<'a> Analyzer<'a> {
    pub fn new(table: &'a mut SymbolTable, source: &'a str) -> Self {
        Self { source, table }
    }

    /// Analyze a whole program. Builtins are (re-)registered in the global
    /// scope first, then every top-level statement is checked in order.
    pub fn analyze(&mut self, program: &Program) -> Result<()> {
        self.table.register_builtins();
        for stmt in &program.statements {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn line_of(&self, token: &Token) -> usize {
        line_at(self.source, token.span.start)
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Agent(agent) => self.agent(agent),
            StmtKind::Var(var) => {
                self.declare_variable(&var.name, var.ty.into())?;
                self.expression(&var.value)
            }
            StmtKind::Function(func) => self.function(func),
            StmtKind::Return(ret) => self.expression(&ret.value),
            StmtKind::Expression(expr) => self.expression(&expr.value),
            StmtKind::Block(block) => self.block(block),
        }
    }

    fn agent(&mut self, agent: &AgentDecl) -> Result<()> {
        self.declare_variable(&agent.name, Type::Agent)?;

        for behavior in &agent.behaviors {
            for handler in &behavior.handlers {
                self.table.push_scope();
                let result = self.block(&handler.body);
                self.table.pop_scope();
                result?;
            }
        }
        for func in &agent.functions {
            self.function(func)?;
        }
        Ok(())
    }

    fn function(&mut self, func: &FunctionDecl) -> Result<()> {
        let signature = FunctionSignature {
            args: func.params.iter().map(|p| p.ty.into()).collect(),
            return_type: func.return_type.into(),
        };
        if !self.table.declare_function(&func.name.name, signature) {
            return Err(SemanticError::FunctionRedeclaration {
                name: func.name.name.clone(),
                line: self.line_of(&func.name.token),
                span: func.name.token.span,
            });
        }

        self.table.push_scope();
        let result = (|| -> Result<()> {
            for param in &func.params {
                self.declare_variable(&param.name, param.ty.into())?;
            }
            self.block(&func.body)
        })();
        self.table.pop_scope();
        result
    }

    fn block(&mut self, block: &BlockStmt) -> Result<()> {
        for stmt in &block.statements {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn declare_variable(&mut self, name: &Ident, ty: Type) -> Result<()> {
        if self.table.declare_variable(&name.name, ty) {
            Ok(())
        } else {
            Err(SemanticError::Redeclaration {
                name: name.name.clone(),
                line: self.line_of(&name.token),
                span: name.token.span,
            })
        }
    }

    fn expression(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Ident(name) => {
                if self.table.variable_type(name).is_none() {
                    return Err(SemanticError::UnknownVariable {
                        name: name.clone(),
                        line: self.line_of(&expr.token),
                        span: expr.token.span,
                    });
                }
                Ok(())
            }
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Bool(_) => Ok(()),
            ExprKind::Infix { left, right, .. } => {
                self.expression(left)?;
                self.expression(right)?;
                // Operand types must agree exactly; numeric widening is a
                // runtime affair, not a checked one.
                let line = self.line_of(&expr.token);
                let left_ty = self.expression_type(left)?;
                let right_ty = self.expression_type(right)?;
                if left_ty != right_ty {
                    return Err(SemanticError::InfixTypeMismatch {
                        left: left_ty,
                        right: right_ty,
                        line,
                        span: expr.token.span,
                    });
                }
                Ok(())
            }
            ExprKind::Call { callee, args } => {
                let line = self.line_of(&expr.token);
                let signature = match self.table.function_signature(&callee.name) {
                    Some(sig) => sig.clone(),
                    None => {
                        return Err(SemanticError::UnknownFunction {
                            name: callee.name.clone(),
                            line,
                            span: callee.token.span,
                        })
                    }
                };
                if signature.args.len() != args.len() {
                    return Err(SemanticError::ArityMismatch {
                        expected: signature.args.len(),
                        got: args.len(),
                        line,
                        span: expr.token.span,
                    });
                }
                for (i, arg) in args.iter().enumerate() {
                    self.expression(arg)?;
                    let found = self.expression_type(arg)?;
                    if signature.args[i] != found {
                        return Err(SemanticError::ArgumentTypeMismatch {
                            index: i + 1,
                            expected: signature.args[i],
                            found,
                            line,
                            span: arg.token.span,
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Infer the type of an expression.
    fn expression_type(&mut self, expr: &Expr) -> Result<Type> {
        match &expr.kind {
            ExprKind::Ident(name) => {
                self.table
                    .variable_type(name)
                    .ok_or_else(|| SemanticError::UnknownVariable {
                        name: name.clone(),
                        line: line_at(self.source, expr.token.span.start),
                        span: expr.token.span,
                    })
            }
            ExprKind::Int(_) => Ok(Type::Int),
            ExprKind::Float(_) => Ok(Type::Float),
            ExprKind::Str(_) => Ok(Type::Str),
            ExprKind::Bool(_) => Ok(Type::Bool),
            ExprKind::Infix { left, right, .. } => {
                let left_ty = self.expression_type(left)?;
                let right_ty = self.expression_type(right)?;
                if left_ty != right_ty {
                    return Err(SemanticError::InfixTypeMismatch {
                        left: left_ty,
                        right: right_ty,
                        line: line_at(self.source, expr.token.span.start),
                        span: expr.token.span,
                    });
                }
                Ok(left_ty)
            }
            ExprKind::Call { callee, .. } => self
                .table
                .function_signature(&callee.name)
                .map(|sig| sig.return_type)
                .ok_or_else(|| SemanticError::UnknownFunction {
                    name: callee.name.clone(),
                    line: line_at(self.source, expr.token.span.start),
                    span: callee.token.span,
                }),
        }
    }
}

/// Analyze a program against a fresh symbol table.
pub fn analyze(source: &str, program: &Program) -> Result<SymbolTable> {
    let mut table = SymbolTable::new();
    Analyzer::new(&mut table, source).analyze(program)?;
    Ok(table)
}
