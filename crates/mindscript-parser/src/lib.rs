//! MindScript Parser
//!
//! Recursive descent parser that produces an AST from the token stream,
//! with Pratt-style precedence climbing for expressions.
//!
//! The parser never panics: a failed expectation records a diagnostic and
//! the surrounding production returns `None`, so `parse_program` always
//! yields a (possibly partial) `Program`. Callers must check `errors()`
//! before handing the AST to later stages.

use mindscript_ast::*;
use mindscript_lexer::{Lexer, Span, Token, TokenKind};
use smol_str::SmolStr;
use thiserror::Error;

/// Parser error type. Diagnostics accumulate in source order.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("Expected next token to be {expected}, got {found} instead")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Unexpected token {found} encountered")]
    UnknownStatementStart { found: String, span: Span },

    #[error("Expected an expression, found {found}")]
    InvalidExpression { found: String, span: Span },

    #[error("Invalid integer literal `{literal}`")]
    InvalidIntLiteral { literal: String, span: Span },

    #[error("Invalid float literal `{literal}`")]
    InvalidFloatLiteral { literal: String, span: Span },

    #[error("Call target must be a function name")]
    InvalidCallee { span: Span },

    #[error("Expected a string or `]` in capability list, found {found}")]
    InvalidCapability { found: String, span: Span },

    #[error("Expected `on` or `}}` in behavior block, found {found}")]
    InvalidBehaviorEntry { found: String, span: Span },

    #[error("Expected a type name, got {found} instead")]
    InvalidType { found: String, span: Span },

    #[error("Expected a parameter name, found {found}")]
    InvalidParameter { found: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. } => *span,
            ParseError::UnknownStatementStart { span, .. } => *span,
            ParseError::InvalidExpression { span, .. } => *span,
            ParseError::InvalidIntLiteral { span, .. } => *span,
            ParseError::InvalidFloatLiteral { span, .. } => *span,
            ParseError::InvalidCallee { span } => *span,
            ParseError::InvalidCapability { span, .. } => *span,
            ParseError::InvalidBehaviorEntry { span, .. } => *span,
            ParseError::InvalidType { span, .. } => *span,
            ParseError::InvalidParameter { span, .. } => *span,
        }
    }
}

/// Expression binding strength, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Sum,     // + -
    Product, // * /
    Call,    // f(
}

fn precedence_of(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Asterisk | TokenKind::Slash => Precedence::Product,
        TokenKind::LParen => Precedence::Call,
        _ => Precedence::Lowest,
    }
}

/// Parse source text in one call.
pub fn parse(source: &str) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(source);
    let program = parser.parse_program();
    let errors = parser.into_errors();
    (program, errors)
}

/// Parser state
pub struct Parser<'src> {
    source: &'src str,
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
}

impl<'src> Parser<'src> {
    /// Create a new parser from source code. Lexing happens here;
    /// unrecognized bytes are dropped from the stream.
    pub fn new(source: &'src str) -> Self {
        let (tokens, _lex_errors) = Lexer::new(source).tokenize();
        Self {
            source,
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Parse the entire program, consuming statements until end of input.
    pub fn parse_program(&mut self) -> Program {
        let mut statements = Vec::new();

        while !self.cur_is(&TokenKind::Eof) {
            if let Some(stmt) = self.parse_statement() {
                statements.push(stmt);
            }
            self.next_token();
        }

        Program { statements }
    }

    /// Diagnostics collected so far, in source order.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }

    // ========================================================================
    // Token navigation
    // ========================================================================

    fn cur_token(&self) -> &Token {
        // The Eof token is always last, so clamping makes reads past the
        // end keep returning Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_token(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
    }

    fn next_token(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn cur_is(&self, kind: &TokenKind) -> bool {
        &self.cur_token().kind == kind
    }

    fn peek_is(&self, kind: &TokenKind) -> bool {
        &self.peek_token().kind == kind
    }

    fn peek_precedence(&self) -> Precedence {
        precedence_of(&self.peek_token().kind)
    }

    fn cur_precedence(&self) -> Precedence {
        precedence_of(&self.cur_token().kind)
    }

    fn peek_error(&mut self, expected: &str) {
        let found = self.peek_token();
        self.errors.push(ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: found.kind.to_string(),
            span: found.span,
        });
    }

    /// Advance if the next token has the expected kind; otherwise record a
    /// diagnostic and stay put.
    fn expect_peek(&mut self, expected: TokenKind) -> bool {
        if self.peek_is(&expected) {
            self.next_token();
            true
        } else {
            self.peek_error(&expected.to_string());
            false
        }
    }

    /// Advance onto an identifier token and return it as an `Ident`.
    fn expect_peek_ident(&mut self) -> Option<Ident> {
        if let TokenKind::Ident(name) = &self.peek_token().kind {
            let name = name.clone();
            self.next_token();
            Some(Ident {
                token: self.cur_token().clone(),
                name,
            })
        } else {
            self.peek_error("IDENT");
            None
        }
    }

    /// Advance onto a string-literal token and return its contents.
    fn expect_peek_string(&mut self) -> Option<(Token, SmolStr)> {
        if let TokenKind::Str(value) = &self.peek_token().kind {
            let value = value.clone();
            self.next_token();
            Some((self.cur_token().clone(), value))
        } else {
            self.peek_error("STRING_LIT");
            None
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_statement(&mut self) -> Option<Stmt> {
        match &self.cur_token().kind {
            TokenKind::Agent => self.parse_agent_statement(),
            TokenKind::Var => self.parse_var_statement(),
            TokenKind::Function => {
                let token = self.cur_token().clone();
                let func = self.parse_function_decl()?;
                Some(Stmt {
                    token,
                    kind: StmtKind::Function(func),
                })
            }
            TokenKind::Return => self.parse_return_statement(),
            TokenKind::Ident(_) => self.parse_expression_statement(),
            other => {
                self.errors.push(ParseError::UnknownStatementStart {
                    found: other.to_string(),
                    span: self.cur_token().span,
                });
                None
            }
        }
    }

    /// `agent NAME { goal | capabilities | behavior | function ... }`
    fn parse_agent_statement(&mut self) -> Option<Stmt> {
        let token = self.cur_token().clone();

        let name = self.expect_peek_ident()?;
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }

        let mut goal = None;
        let mut capabilities = None;
        let mut behaviors = Vec::new();
        let mut functions = Vec::new();

        while !self.cur_is(&TokenKind::Eof) {
            self.next_token();
            match &self.cur_token().kind {
                TokenKind::Goal => goal = self.parse_goal(),
                TokenKind::Capabilities => capabilities = self.parse_capabilities(),
                TokenKind::Behavior => {
                    if let Some(behavior) = self.parse_behavior() {
                        behaviors.push(behavior);
                    }
                }
                TokenKind::Function => {
                    if let Some(func) = self.parse_function_decl() {
                        functions.push(func);
                    }
                }
                TokenKind::RBrace => break,
                // Separators between agent entries are not significant
                _ => continue,
            }
        }

        Some(Stmt {
            token,
            kind: StmtKind::Agent(AgentDecl {
                name,
                goal,
                capabilities,
                behaviors,
                functions,
            }),
        })
    }

    /// `goal: "..."`
    fn parse_goal(&mut self) -> Option<Goal> {
        let token = self.cur_token().clone();

        if !self.expect_peek(TokenKind::Colon) {
            return None;
        }
        let (_, value) = self.expect_peek_string()?;

        Some(Goal { token, value })
    }

    /// `capabilities: ["a", "b", ...]`
    fn parse_capabilities(&mut self) -> Option<Capabilities> {
        let token = self.cur_token().clone();

        if !self.expect_peek(TokenKind::Colon) {
            return None;
        }
        if !self.expect_peek(TokenKind::LBracket) {
            return None;
        }

        let mut values = Vec::new();
        loop {
            self.next_token();
            match &self.cur_token().kind {
                TokenKind::Str(value) => values.push(value.clone()),
                TokenKind::Comma => continue,
                TokenKind::RBracket => break,
                other => {
                    self.errors.push(ParseError::InvalidCapability {
                        found: other.to_string(),
                        span: self.cur_token().span,
                    });
                    return None;
                }
            }
        }

        Some(Capabilities { token, values })
    }

    /// `behavior { on "evt" { ... } ... }`
    fn parse_behavior(&mut self) -> Option<Behavior> {
        let token = self.cur_token().clone();

        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }

        let mut handlers = Vec::new();
        loop {
            self.next_token();
            match &self.cur_token().kind {
                TokenKind::On => handlers.push(self.parse_event_handler()?),
                TokenKind::RBrace => break,
                other => {
                    self.errors.push(ParseError::InvalidBehaviorEntry {
                        found: other.to_string(),
                        span: self.cur_token().span,
                    });
                    return None;
                }
            }
        }

        Some(Behavior { token, handlers })
    }

    /// `on "event-name" { ...block... }`
    fn parse_event_handler(&mut self) -> Option<EventHandler> {
        let token = self.cur_token().clone();

        let (_, event) = self.expect_peek_string()?;
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        let body = self.parse_block_statement();

        Some(EventHandler { token, event, body })
    }

    /// `function NAME(name: type, ...): type { ...block... }`
    fn parse_function_decl(&mut self) -> Option<FunctionDecl> {
        let token = self.cur_token().clone();

        let name = self.expect_peek_ident()?;
        if !self.expect_peek(TokenKind::LParen) {
            return None;
        }
        let params = self.parse_function_params()?;
        if !self.expect_peek(TokenKind::Colon) {
            return None;
        }
        let return_type = self.parse_type()?;
        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        let body = self.parse_block_statement();

        Some(FunctionDecl {
            token,
            name,
            params,
            return_type,
            body,
        })
    }

    /// Comma-separated `name: type` list; leaves the cursor on `)`.
    fn parse_function_params(&mut self) -> Option<Vec<Param>> {
        let mut params = Vec::new();

        if self.peek_is(&TokenKind::RParen) {
            self.next_token();
            return Some(params);
        }

        self.next_token();
        loop {
            let name = match &self.cur_token().kind {
                TokenKind::Ident(name) => Ident {
                    token: self.cur_token().clone(),
                    name: name.clone(),
                },
                other => {
                    self.errors.push(ParseError::InvalidParameter {
                        found: other.to_string(),
                        span: self.cur_token().span,
                    });
                    return None;
                }
            };
            if !self.expect_peek(TokenKind::Colon) {
                return None;
            }
            let ty = self.parse_type()?;
            params.push(Param { name, ty });

            if self.peek_is(&TokenKind::Comma) {
                self.next_token();
                self.next_token();
            } else {
                break;
            }
        }

        if !self.expect_peek(TokenKind::RParen) {
            return None;
        }
        Some(params)
    }

    /// Advance onto a type keyword (`int|float|string|bool`).
    fn parse_type(&mut self) -> Option<TypeTag> {
        match TypeTag::from_token_kind(&self.peek_token().kind) {
            Some(tag) => {
                self.next_token();
                Some(tag)
            }
            None => {
                let found = self.peek_token();
                self.errors.push(ParseError::InvalidType {
                    found: found.kind.to_string(),
                    span: found.span,
                });
                None
            }
        }
    }

    /// `var NAME: type = <expr>;`
    fn parse_var_statement(&mut self) -> Option<Stmt> {
        let token = self.cur_token().clone();

        let name = self.expect_peek_ident()?;
        if !self.expect_peek(TokenKind::Colon) {
            return None;
        }
        let ty = self.parse_type()?;
        if !self.expect_peek(TokenKind::Assign) {
            return None;
        }
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;

        if self.peek_is(&TokenKind::Semicolon) {
            self.next_token();
        }

        Some(Stmt {
            token,
            kind: StmtKind::Var(VarDecl { name, ty, value }),
        })
    }

    fn parse_return_statement(&mut self) -> Option<Stmt> {
        let token = self.cur_token().clone();

        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;

        if self.peek_is(&TokenKind::Semicolon) {
            self.next_token();
        }

        Some(Stmt {
            token,
            kind: StmtKind::Return(ReturnStmt { value }),
        })
    }

    fn parse_expression_statement(&mut self) -> Option<Stmt> {
        let token = self.cur_token().clone();

        let value = self.parse_expression(Precedence::Lowest)?;

        if self.peek_is(&TokenKind::Semicolon) {
            self.next_token();
        }

        Some(Stmt {
            token,
            kind: StmtKind::Expression(ExpressionStmt { value }),
        })
    }

    /// Statements between `{` and `}`; the cursor enters on `{` and leaves
    /// on the closing `}` (or end of input).
    fn parse_block_statement(&mut self) -> BlockStmt {
        let token = self.cur_token().clone();
        let mut statements = Vec::new();

        self.next_token();
        while !self.cur_is(&TokenKind::RBrace) && !self.cur_is(&TokenKind::Eof) {
            if let Some(stmt) = self.parse_statement() {
                statements.push(stmt);
            }
            self.next_token();
        }

        BlockStmt { token, statements }
    }

    // ========================================================================
    // Expressions (Pratt)
    // ========================================================================

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expr> {
        let mut left = self.parse_prefix()?;

        while !self.peek_is(&TokenKind::Semicolon) && precedence < self.peek_precedence() {
            left = match &self.peek_token().kind {
                TokenKind::Plus | TokenKind::Minus | TokenKind::Asterisk | TokenKind::Slash => {
                    self.next_token();
                    self.parse_infix_expression(left)?
                }
                TokenKind::LParen => {
                    self.next_token();
                    self.parse_call_expression(left)?
                }
                _ => return Some(left),
            };
        }

        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Expr> {
        let token = self.cur_token().clone();
        let kind = match &token.kind {
            TokenKind::Ident(name) => ExprKind::Ident(name.clone()),
            TokenKind::Int(literal) => match literal.parse::<i64>() {
                Ok(value) => ExprKind::Int(value),
                Err(_) => {
                    self.errors.push(ParseError::InvalidIntLiteral {
                        literal: literal.to_string(),
                        span: token.span,
                    });
                    return None;
                }
            },
            TokenKind::Float(literal) => match literal.parse::<f64>() {
                Ok(value) => ExprKind::Float(value),
                Err(_) => {
                    self.errors.push(ParseError::InvalidFloatLiteral {
                        literal: literal.to_string(),
                        span: token.span,
                    });
                    return None;
                }
            },
            TokenKind::Str(value) => ExprKind::Str(value.clone()),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            other => {
                self.errors.push(ParseError::InvalidExpression {
                    found: other.to_string(),
                    span: token.span,
                });
                return None;
            }
        };
        Some(Expr { token, kind })
    }

    fn parse_infix_expression(&mut self, left: Expr) -> Option<Expr> {
        let token = self.cur_token().clone();
        let op = InfixOp::from_token_kind(&token.kind)?;

        let precedence = self.cur_precedence();
        self.next_token();
        let right = self.parse_expression(precedence)?;

        Some(Expr {
            token,
            kind: ExprKind::Infix {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        })
    }

    fn parse_call_expression(&mut self, callee: Expr) -> Option<Expr> {
        let token = self.cur_token().clone();

        let callee = match callee.kind {
            ExprKind::Ident(name) => Ident {
                token: callee.token,
                name,
            },
            _ => {
                self.errors.push(ParseError::InvalidCallee {
                    span: callee.token.span,
                });
                return None;
            }
        };

        let args = self.parse_expression_list(TokenKind::RParen)?;

        Some(Expr {
            token,
            kind: ExprKind::Call { callee, args },
        })
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Expr>> {
        let mut list = Vec::new();

        if self.peek_is(&end) {
            self.next_token();
            return Some(list);
        }

        self.next_token();
        list.push(self.parse_expression(Precedence::Lowest)?);

        while self.peek_is(&TokenKind::Comma) {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }

        if !self.expect_peek(end) {
            return None;
        }
        Some(list)
    }
}
