//! MindScript Lexer
//!
//! Tokenizes MindScript source code into a flat token stream.
//! Uses the `logos` crate for the token grammar.

use logos::Logos;
use serde::Serialize;
use smol_str::SmolStr;
use std::fmt;
use std::ops::Range;

/// Source span representing a byte range in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}

impl From<Span> for Range<usize> {
    fn from(span: Span) -> Self {
        span.start..span.end
    }
}

/// A token with its kind and source location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The raw text of the token. String literals exclude the quotes.
    pub fn literal(&self) -> &str {
        self.kind.literal()
    }
}

/// Callback to lex string literals: consumes input until the closing quote
/// or end of input. No escape sequences are recognized.
fn string_callback(lex: &mut logos::Lexer<TokenKind>) -> SmolStr {
    let remainder = lex.remainder();
    match remainder.find('"') {
        Some(end) => {
            let content = SmolStr::new(&remainder[..end]);
            lex.bump(end + 1);
            content
        }
        None => {
            // Unterminated string: everything to end of input
            let content = SmolStr::new(remainder);
            lex.bump(remainder.len());
            content
        }
    }
}

/// All token types in the MindScript language.
///
/// The type keywords (`int`, `float`, `string`, `bool`) are distinct kinds
/// from the literal kinds (`Int`, `Float`, `Str`): an annotation position
/// and a value position never share a tag.
#[derive(Logos, Debug, Clone, PartialEq, Serialize)]
#[logos(skip r"[ \t\r\n]+")]
pub enum TokenKind {
    // ========== Keywords ==========
    #[token("agent")]
    Agent,
    #[token("goal")]
    Goal,
    #[token("capabilities")]
    Capabilities,
    #[token("behavior")]
    Behavior,
    #[token("function")]
    Function,
    #[token("on")]
    On,
    #[token("var")]
    Var,
    #[token("return")]
    Return,

    // ========== Type keywords ==========
    #[token("int")]
    IntType,
    #[token("float")]
    FloatType,
    #[token("string")]
    StringType,
    #[token("bool")]
    BoolType,

    // ========== Boolean literals ==========
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ========== Operators ==========
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Asterisk,
    #[token("/")]
    Slash,
    #[token("=")]
    Assign,
    #[token(">")]
    Gt,
    #[token("<")]
    Lt,
    #[token("&")]
    And,
    #[token("|")]
    Or,

    // ========== Delimiters ==========
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,

    // ========== Literals ==========
    /// Float literal: digits, a dot, then optional further digits
    #[regex(r"[0-9]+\.[0-9]*", |lex| SmolStr::new(lex.slice()))]
    Float(SmolStr),

    /// Integer literal: a run of ASCII digits
    #[regex(r"[0-9]+", |lex| SmolStr::new(lex.slice()))]
    Int(SmolStr),

    /// String literal, quotes stripped
    #[token("\"", string_callback)]
    Str(SmolStr),

    /// Identifier: a run of ASCII letters
    #[regex(r"[A-Za-z]+", |lex| SmolStr::new(lex.slice()))]
    Ident(SmolStr),

    // ========== Sentinel ==========
    /// End of input; `tokenize` always appends exactly one
    Eof,
}

impl TokenKind {
    /// The raw text of the token kind.
    pub fn literal(&self) -> &str {
        match self {
            TokenKind::Agent => "agent",
            TokenKind::Goal => "goal",
            TokenKind::Capabilities => "capabilities",
            TokenKind::Behavior => "behavior",
            TokenKind::Function => "function",
            TokenKind::On => "on",
            TokenKind::Var => "var",
            TokenKind::Return => "return",
            TokenKind::IntType => "int",
            TokenKind::FloatType => "float",
            TokenKind::StringType => "string",
            TokenKind::BoolType => "bool",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Asterisk => "*",
            TokenKind::Slash => "/",
            TokenKind::Assign => "=",
            TokenKind::Gt => ">",
            TokenKind::Lt => "<",
            TokenKind::And => "&",
            TokenKind::Or => "|",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::Comma => ",",
            TokenKind::Float(s) => s,
            TokenKind::Int(s) => s,
            TokenKind::Str(s) => s,
            TokenKind::Ident(s) => s,
            TokenKind::Eof => "EOF",
        }
    }

    /// Check if this token kind names a declared type.
    pub fn is_type_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::IntType | TokenKind::FloatType | TokenKind::StringType | TokenKind::BoolType
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Agent => "AGENT",
            TokenKind::Goal => "GOAL",
            TokenKind::Capabilities => "CAPABILITIES",
            TokenKind::Behavior => "BEHAVIOR",
            TokenKind::Function => "FUNCTION",
            TokenKind::On => "ON",
            TokenKind::Var => "VAR",
            TokenKind::Return => "RETURN",
            TokenKind::IntType => "INT",
            TokenKind::FloatType => "FLOAT",
            TokenKind::StringType => "STRING",
            TokenKind::BoolType => "BOOL",
            TokenKind::True => "TRUE",
            TokenKind::False => "FALSE",
            TokenKind::Plus => "PLUS",
            TokenKind::Minus => "MINUS",
            TokenKind::Asterisk => "ASTERISK",
            TokenKind::Slash => "SLASH",
            TokenKind::Assign => "ASSIGN",
            TokenKind::Gt => "GT",
            TokenKind::Lt => "LT",
            TokenKind::And => "AND",
            TokenKind::Or => "OR",
            TokenKind::LBrace => "LBRACE",
            TokenKind::RBrace => "RBRACE",
            TokenKind::LParen => "LPAREN",
            TokenKind::RParen => "RPAREN",
            TokenKind::LBracket => "LBRACKET",
            TokenKind::RBracket => "RBRACKET",
            TokenKind::Colon => "COLON",
            TokenKind::Semicolon => "SEMICOLON",
            TokenKind::Comma => "COMMA",
            TokenKind::Float(_) => "FLOAT_LIT",
            TokenKind::Int(_) => "INT_LIT",
            TokenKind::Str(_) => "STRING_LIT",
            TokenKind::Ident(_) => "IDENT",
            TokenKind::Eof => "EOF",
        };
        f.write_str(name)
    }
}

/// Lexer error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum LexError {
    #[error("unexpected character '{1}' at position {0}")]
    UnexpectedCharacter(usize, char),
}

/// 1-based line number of a byte offset in the source.
pub fn line_at(source: &str, offset: usize) -> usize {
    let offset = offset.min(source.len());
    1 + source[..offset].matches('\n').count()
}

/// 1-based column number of a byte offset in the source.
pub fn column_at(source: &str, offset: usize) -> usize {
    let offset = offset.min(source.len());
    match source[..offset].rfind('\n') {
        Some(nl) => offset - nl,
        None => offset + 1,
    }
}

/// Lexer for MindScript source code
pub struct Lexer<'src> {
    source: &'src str,
    inner: logos::Lexer<'src, TokenKind>,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source code
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            inner: TokenKind::lexer(source),
        }
    }

    /// Get the source code being lexed
    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Tokenize the entire source, appending a terminal `Eof` token.
    ///
    /// Unrecognized bytes never appear in the token stream; each is
    /// recorded as a `LexError` and skipped.
    pub fn tokenize(self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();

        for (result, span) in self.inner.spanned() {
            match result {
                Ok(kind) => tokens.push(Token::new(kind, Span::from(span))),
                Err(_) => {
                    let bad_char = self.source[span.clone()].chars().next().unwrap_or('?');
                    errors.push(LexError::UnexpectedCharacter(span.start, bad_char));
                }
            }
        }

        let end = self.source.len();
        tokens.push(Token::new(TokenKind::Eof, Span::new(end, end)));
        (tokens, errors)
    }
}
