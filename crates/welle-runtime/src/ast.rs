//! Abstract syntax tree
//!
//! Nodes carry the span of their introducing token so later phases can report
//! `file:line:col` locations without re-lexing.

use crate::span::Span;
use std::fmt;

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// A brace-delimited statement list.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Expression evaluated for its value (and, at top level, echoed by the
    /// REPL).
    Expr(Expr),
    /// `name = value` — binds in the nearest scope already defining `name`,
    /// else in the current scope.
    Assign {
        name: String,
        name_span: Span,
        value: Expr,
    },
    FnDecl(FnDecl),
    Return {
        value: Option<Expr>,
        span: Span,
    },
    If(IfStmt),
    While {
        cond: Expr,
        body: Block,
        span: Span,
    },
    For {
        var: String,
        iterable: Expr,
        body: Block,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    /// `import "spec" as alias`
    Import {
        spec: String,
        alias: String,
        span: Span,
    },
    /// `export <assignment | fn declaration>` (top level only)
    Export(ExportStmt),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
    /// Span of the function's name token.
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub cond: Expr,
    pub then_block: Block,
    pub else_branch: Option<ElseBranch>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    ElseIf(Box<IfStmt>),
    Else(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportStmt {
    pub item: ExportItem,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportItem {
    Assign {
        name: String,
        name_span: Span,
        value: Expr,
    },
    Fn(FnDecl),
}

impl ExportStmt {
    /// Name bound by this export and the span of its name token, as used by
    /// the duplicate-export check.
    pub fn bound_name(&self) -> (&str, Span) {
        match &self.item {
            ExportItem::Assign {
                name, name_span, ..
            } => (name, *name_span),
            ExportItem::Fn(decl) => (&decl.name, decl.span),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int {
        value: i64,
        span: Span,
    },
    Float {
        value: f64,
        span: Span,
    },
    Str {
        value: String,
        span: Span,
    },
    Bool {
        value: bool,
        span: Span,
    },
    Nil {
        span: Span,
    },
    Ident {
        name: String,
        span: Span,
    },
    Prefix {
        op: PrefixOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    /// Short-circuiting `and` / `or`; evaluates to a boolean.
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    /// `target.name` — sugar for indexing with the string `"name"`.
    Member {
        target: Box<Expr>,
        name: String,
        span: Span,
    },
    List {
        elements: Vec<Expr>,
        span: Span,
    },
    Dict {
        pairs: Vec<(Expr, Expr)>,
        span: Span,
    },
    FnExpr {
        params: Vec<String>,
        body: Block,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int { span, .. }
            | Expr::Float { span, .. }
            | Expr::Str { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Nil { span }
            | Expr::Ident { span, .. }
            | Expr::Prefix { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Call { span, .. }
            | Expr::Index { span, .. }
            | Expr::Member { span, .. }
            | Expr::List { span, .. }
            | Expr::Dict { span, .. }
            | Expr::FnExpr { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    /// Arithmetic negation
    Neg,
    /// Logical not (truthiness-based)
    Not,
}

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixOp::Neg => f.write_str("-"),
            PrefixOp::Not => f.write_str("!"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}
