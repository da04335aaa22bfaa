//! The surface AST shape consumed from the (external) parser.
//!
//! The parser itself — lexing, precedence climbing, error recovery — lives
//! outside this crate. This module only defines the stable shape the IR
//! builder consumes, mirrored from §6 of the specification. Expression
//! bodies are not parsed further here; `text` is opaque and carried
//! verbatim into the IR (see `ir::expr::IrExpr`).

use crate::dtype::{Dialect, FpMode};

/// Lexical position of an AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

/// An expression as produced by the surface parser: opaque source text plus
/// its lexical position. Not yet typed — the dtype resolver assigns a type
/// during IR building.
#[derive(Debug, Clone, PartialEq)]
pub struct AstExpr {
    pub text: String,
    pub span: Span,
}

impl AstExpr {
    pub fn new(text: impl Into<String>, span: Span) -> Self {
        AstExpr {
            text: text.into(),
            span,
        }
    }
}

/// One elif arm in the surface AST.
#[derive(Debug, Clone)]
pub struct AstElif {
    pub cond: AstExpr,
    pub block: Vec<AstStmt>,
}

/// A statement as produced by the surface parser. `ExprStmt` and
/// `PrintStmt` only ever appear here — the JIT IR has no representation for
/// either, and the builder unconditionally rejects them.
#[derive(Debug, Clone)]
pub enum AstStmt {
    Assign {
        span: Span,
        name: String,
        value: AstExpr,
    },
    Return {
        span: Span,
        value: AstExpr,
    },
    If {
        span: Span,
        cond: AstExpr,
        then_block: Vec<AstStmt>,
        elifs: Vec<AstElif>,
        else_block: Option<Vec<AstStmt>>,
    },
    For {
        span: Span,
        var: String,
        limit: AstExpr,
        body: Vec<AstStmt>,
    },
    Break {
        span: Span,
        cond: Option<AstExpr>,
    },
    Continue {
        span: Span,
        cond: Option<AstExpr>,
    },
    ExprStmt {
        span: Span,
        expr: AstExpr,
    },
    PrintStmt {
        span: Span,
        call_text: String,
    },
}

impl AstStmt {
    pub fn span(&self) -> Span {
        match self {
            AstStmt::Assign { span, .. }
            | AstStmt::Return { span, .. }
            | AstStmt::If { span, .. }
            | AstStmt::For { span, .. }
            | AstStmt::Break { span, .. }
            | AstStmt::Continue { span, .. }
            | AstStmt::ExprStmt { span, .. }
            | AstStmt::PrintStmt { span, .. } => *span,
        }
    }
}

/// One declared parameter: name only — dtype comes from the host-provided
/// parameter metadata passed alongside the AST, not from the parser.
#[derive(Debug, Clone)]
pub struct AstProgram {
    pub name: Option<String>,
    pub dialect: Dialect,
    pub fp_mode: FpMode,
    pub params: Vec<String>,
    pub block: Vec<AstStmt>,
}
