//! MindScript Abstract Syntax Tree
//!
//! Defines all AST node types for the MindScript language as tagged sum
//! types. Every node carries the token it originated from, so diagnostics
//! and the JSON dump can always point back into the source.

use serde::Serialize;
use std::fmt;

pub use mindscript_lexer::{Span, Token, TokenKind};
pub use smol_str::SmolStr;

/// A complete MindScript program
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    /// Number of top-level agent declarations.
    pub fn agent_count(&self) -> usize {
        self.statements
            .iter()
            .filter(|s| matches!(s.kind, StmtKind::Agent(_)))
            .count()
    }
}

/// A statement with its originating token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stmt {
    pub token: Token,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StmtKind {
    Agent(AgentDecl),
    Var(VarDecl),
    Function(FunctionDecl),
    Return(ReturnStmt),
    Expression(ExpressionStmt),
    Block(BlockStmt),
}

/// Identifier with its originating token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ident {
    pub token: Token,
    pub name: SmolStr,
}

/// `agent NAME { goal ... capabilities ... behavior ... function ... }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentDecl {
    pub name: Ident,
    pub goal: Option<Goal>,
    pub capabilities: Option<Capabilities>,
    pub behaviors: Vec<Behavior>,
    pub functions: Vec<FunctionDecl>,
}

/// `goal: "..."`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Goal {
    pub token: Token,
    pub value: SmolStr,
}

/// `capabilities: ["a", "b", ...]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capabilities {
    pub token: Token,
    pub values: Vec<SmolStr>,
}

/// `behavior { on "evt" { ... } ... }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Behavior {
    pub token: Token,
    pub handlers: Vec<EventHandler>,
}

/// `on "event-name" { ...block... }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventHandler {
    pub token: Token,
    pub event: SmolStr,
    pub body: BlockStmt,
}

/// `function NAME(name: type, ...): type { ...block... }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDecl {
    pub token: Token,
    pub name: Ident,
    pub params: Vec<Param>,
    pub return_type: TypeTag,
    pub body: BlockStmt,
}

/// A single `name: type` function parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: Ident,
    pub ty: TypeTag,
}

/// `var NAME: type = <expr>;`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarDecl {
    pub name: Ident,
    pub ty: TypeTag,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnStmt {
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressionStmt {
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockStmt {
    pub token: Token,
    pub statements: Vec<Stmt>,
}

/// The declared type of a variable, parameter, or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeTag {
    Int,
    Float,
    Str,
    Bool,
}

impl TypeTag {
    /// Map a type-keyword token kind to its tag.
    pub fn from_token_kind(kind: &TokenKind) -> Option<TypeTag> {
        match kind {
            TokenKind::IntType => Some(TypeTag::Int),
            TokenKind::FloatType => Some(TypeTag::Float),
            TokenKind::StringType => Some(TypeTag::Str),
            TokenKind::BoolType => Some(TypeTag::Bool),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Str => "string",
            TypeTag::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// An expression with its originating token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub token: Token,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    /// Reference to a declared variable
    Ident(SmolStr),
    Int(i64),
    Float(f64),
    Str(SmolStr),
    Bool(bool),
    Infix {
        op: InfixOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        callee: Ident,
        args: Vec<Expr>,
    },
}

/// Binary operators recognized in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl InfixOp {
    /// Map an operator token kind to its infix operator.
    pub fn from_token_kind(kind: &TokenKind) -> Option<InfixOp> {
        match kind {
            TokenKind::Plus => Some(InfixOp::Add),
            TokenKind::Minus => Some(InfixOp::Sub),
            TokenKind::Asterisk => Some(InfixOp::Mul),
            TokenKind::Slash => Some(InfixOp::Div),
            _ => None,
        }
    }
}

impl fmt::Display for InfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sym = match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
        };
        f.write_str(sym)
    }
}
