//! Recursive-descent parser
//!
//! Statements are self-delimiting; semicolons are optional separators. Errors
//! are collected rather than fatal: the parser synchronizes to the next
//! statement boundary and keeps going.
//!
//! Structural placement rules are enforced here so both engines see the same
//! static errors: `return` only inside functions, `break`/`continue` only
//! inside loops, `export` only at the top level.

use crate::ast::*;
use crate::lexer::Lexer;
use crate::span::Span;
use crate::token::{Token, TokenKind};
use thiserror::Error;

/// A lex or parse diagnostic.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{span}: {message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Lex and parse a source string.
pub fn parse_source(source: &str) -> Result<Program, Vec<ParseError>> {
    let (tokens, mut errors) = Lexer::new(source).tokenize();
    let (program, parse_errors) = Parser::new(tokens).parse();
    errors.extend(parse_errors);
    if errors.is_empty() {
        Ok(program)
    } else {
        Err(errors)
    }
}

/// Parser state
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
    fn_depth: usize,
    loop_depth: usize,
    block_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
            fn_depth: 0,
            loop_depth: 0,
            block_depth: 0,
        }
    }

    pub fn parse(mut self) -> (Program, Vec<ParseError>) {
        let mut statements = Vec::new();
        while !self.at(TokenKind::Eof) {
            self.skip_semicolons();
            if self.at(TokenKind::Eof) {
                break;
            }
            match self.parse_statement() {
                Some(stmt) => statements.push(stmt),
                None => self.synchronize(),
            }
        }
        (Program { statements }, self.errors)
    }

    // ===== Token access =====

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) {
            Some(self.advance())
        } else {
            let tok = self.current().clone();
            self.error(format!("expected {}, found {}", kind, tok.kind), tok.span);
            None
        }
    }

    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.errors.push(ParseError::new(message, span));
    }

    fn skip_semicolons(&mut self) {
        while self.eat(TokenKind::Semicolon) {}
    }

    /// Skip to the next plausible statement boundary after an error.
    fn synchronize(&mut self) {
        loop {
            match self.current().kind {
                TokenKind::Eof => return,
                TokenKind::Semicolon | TokenKind::RBrace => {
                    self.advance();
                    return;
                }
                TokenKind::Fn
                | TokenKind::Return
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Import
                | TokenKind::Export
                | TokenKind::Break
                | TokenKind::Continue => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ===== Statements =====

    fn parse_statement(&mut self) -> Option<Stmt> {
        match self.current().kind {
            TokenKind::Import => self.parse_import(),
            TokenKind::Export => self.parse_export(),
            TokenKind::Fn if self.peek_kind(1) == TokenKind::Ident => {
                self.parse_fn_decl().map(Stmt::FnDecl)
            }
            TokenKind::Return => self.parse_return(),
            TokenKind::If => self.parse_if().map(Stmt::If),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Break => {
                let tok = self.advance();
                if self.loop_depth == 0 {
                    self.error("break outside of loop", tok.span);
                    return None;
                }
                Some(Stmt::Break { span: tok.span })
            }
            TokenKind::Continue => {
                let tok = self.advance();
                if self.loop_depth == 0 {
                    self.error("continue outside of loop", tok.span);
                    return None;
                }
                Some(Stmt::Continue { span: tok.span })
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_import(&mut self) -> Option<Stmt> {
        let import_tok = self.advance();
        let spec = self.expect(TokenKind::Str)?;
        self.expect(TokenKind::As)?;
        let alias = self.expect(TokenKind::Ident)?;
        Some(Stmt::Import {
            spec: spec.lexeme,
            alias: alias.lexeme,
            span: import_tok.span,
        })
    }

    fn parse_export(&mut self) -> Option<Stmt> {
        let export_tok = self.advance();
        if self.block_depth > 0 || self.fn_depth > 0 {
            self.error("export only allowed at top level", export_tok.span);
            return None;
        }
        let item = match self.current().kind {
            TokenKind::Fn if self.peek_kind(1) == TokenKind::Ident => {
                ExportItem::Fn(self.parse_fn_decl()?)
            }
            TokenKind::Ident if self.peek_kind(1) == TokenKind::Assign => {
                let name = self.advance();
                self.advance(); // '='
                let value = self.parse_expr()?;
                ExportItem::Assign {
                    name: name.lexeme,
                    name_span: name.span,
                    value,
                }
            }
            _ => {
                let tok = self.current().clone();
                self.error(
                    "export expects an assignment or a function declaration",
                    tok.span,
                );
                return None;
            }
        };
        Some(Stmt::Export(ExportStmt {
            item,
            span: export_tok.span,
        }))
    }

    fn parse_fn_decl(&mut self) -> Option<FnDecl> {
        self.advance(); // 'fn'
        let name = self.expect(TokenKind::Ident)?;
        let params = self.parse_params()?;
        let body = self.parse_fn_body()?;
        Some(FnDecl {
            name: name.lexeme,
            params,
            body,
            span: name.span,
        })
    }

    fn parse_params(&mut self) -> Option<Vec<String>> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.at(TokenKind::RParen) {
            let param = self.expect(TokenKind::Ident)?;
            params.push(param.lexeme);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Some(params)
    }

    /// Parse a function body, suspending the enclosing loop context so that
    /// `break` inside a function inside a loop is rejected.
    fn parse_fn_body(&mut self) -> Option<Block> {
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.fn_depth += 1;
        let body = self.parse_block();
        self.fn_depth -= 1;
        self.loop_depth = saved_loops;
        body
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let tok = self.advance();
        if self.fn_depth == 0 {
            self.error("return outside of function", tok.span);
            return None;
        }
        let value = if self.at(TokenKind::Semicolon)
            || self.at(TokenKind::RBrace)
            || self.at(TokenKind::Eof)
        {
            None
        } else {
            Some(self.parse_expr()?)
        };
        Some(Stmt::Return {
            value,
            span: tok.span,
        })
    }

    fn parse_if(&mut self) -> Option<IfStmt> {
        let tok = self.advance();
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_branch = if self.eat(TokenKind::Else) {
            if self.at(TokenKind::If) {
                Some(ElseBranch::ElseIf(Box::new(self.parse_if()?)))
            } else {
                Some(ElseBranch::Else(self.parse_block()?))
            }
        } else {
            None
        };
        Some(IfStmt {
            cond,
            then_block,
            else_branch,
            span: tok.span,
        })
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let tok = self.advance();
        let cond = self.parse_expr()?;
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        Some(Stmt::While {
            cond,
            body: body?,
            span: tok.span,
        })
    }

    fn parse_for(&mut self) -> Option<Stmt> {
        let tok = self.advance();
        let var = self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expr()?;
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        Some(Stmt::For {
            var: var.lexeme,
            iterable,
            body: body?,
            span: tok.span,
        })
    }

    fn parse_block(&mut self) -> Option<Block> {
        let open = self.expect(TokenKind::LBrace)?;
        self.block_depth += 1;
        let mut statements = Vec::new();
        loop {
            self.skip_semicolons();
            if self.at(TokenKind::RBrace) || self.at(TokenKind::Eof) {
                break;
            }
            match self.parse_statement() {
                Some(stmt) => statements.push(stmt),
                None => self.synchronize(),
            }
        }
        self.block_depth -= 1;
        self.expect(TokenKind::RBrace)?;
        Some(Block {
            statements,
            span: open.span,
        })
    }

    fn parse_expr_or_assign(&mut self) -> Option<Stmt> {
        // `name = value` is a statement, not an expression; a lone `=` after
        // any other expression form is an error.
        if self.at(TokenKind::Ident) && self.peek_kind(1) == TokenKind::Assign {
            let name = self.advance();
            self.advance(); // '='
            let value = self.parse_expr()?;
            return Some(Stmt::Assign {
                name: name.lexeme,
                name_span: name.span,
                value,
            });
        }
        let expr = self.parse_expr()?;
        if self.at(TokenKind::Assign) {
            let tok = self.current().clone();
            self.error("invalid assignment target", tok.span);
            return None;
        }
        Some(Stmt::Expr(expr))
    }

    // ===== Expressions (precedence climbing) =====

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Option<Expr> {
        let mut left = self.parse_and()?;
        while self.at(TokenKind::Or) {
            let tok = self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span: tok.span,
            };
        }
        Some(left)
    }

    fn parse_and(&mut self) -> Option<Expr> {
        let mut left = self.parse_equality()?;
        while self.at(TokenKind::And) {
            let tok = self.advance();
            let right = self.parse_equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span: tok.span,
            };
        }
        Some(left)
    }

    fn parse_equality(&mut self) -> Option<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            let tok = self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span: tok.span,
            };
        }
        Some(left)
    }

    fn parse_comparison(&mut self) -> Option<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            let tok = self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span: tok.span,
            };
        }
        Some(left)
    }

    fn parse_term(&mut self) -> Option<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let tok = self.advance();
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span: tok.span,
            };
        }
        Some(left)
    }

    fn parse_factor(&mut self) -> Option<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let tok = self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span: tok.span,
            };
        }
        Some(left)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        let op = match self.current().kind {
            TokenKind::Minus => PrefixOp::Neg,
            TokenKind::Bang => PrefixOp::Not,
            _ => return self.parse_postfix(),
        };
        let tok = self.advance();
        let operand = self.parse_unary()?;
        Some(Expr::Prefix {
            op,
            operand: Box::new(operand),
            span: tok.span,
        })
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current().kind {
                TokenKind::LParen => {
                    let tok = self.advance();
                    let mut args = Vec::new();
                    while !self.at(TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        span: tok.span,
                    };
                }
                TokenKind::LBracket => {
                    let tok = self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                        span: tok.span,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect(TokenKind::Ident)?;
                    expr = Expr::Member {
                        target: Box::new(expr),
                        name: name.lexeme,
                        span: name.span,
                    };
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let tok = self.current().clone();
        match tok.kind {
            TokenKind::Int => {
                self.advance();
                let value = tok
                    .lexeme
                    .parse::<i64>()
                    .expect("lexer validated integer literal");
                Some(Expr::Int {
                    value,
                    span: tok.span,
                })
            }
            TokenKind::Float => {
                self.advance();
                let value = tok
                    .lexeme
                    .parse::<f64>()
                    .expect("lexer validated float literal");
                Some(Expr::Float {
                    value,
                    span: tok.span,
                })
            }
            TokenKind::Str => {
                self.advance();
                Some(Expr::Str {
                    value: tok.lexeme,
                    span: tok.span,
                })
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Some(Expr::Bool {
                    value: tok.kind == TokenKind::True,
                    span: tok.span,
                })
            }
            TokenKind::Nil => {
                self.advance();
                Some(Expr::Nil { span: tok.span })
            }
            TokenKind::Ident => {
                self.advance();
                Some(Expr::Ident {
                    name: tok.lexeme,
                    span: tok.span,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Some(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.at(TokenKind::RBracket) {
                    elements.push(self.parse_expr()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Some(Expr::List {
                    elements,
                    span: tok.span,
                })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                while !self.at(TokenKind::RBrace) {
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::Colon)?;
                    let value = self.parse_expr()?;
                    pairs.push((key, value));
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Some(Expr::Dict {
                    pairs,
                    span: tok.span,
                })
            }
            TokenKind::Fn => {
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_fn_body()?;
                Some(Expr::FnExpr {
                    params,
                    body,
                    span: tok.span,
                })
            }
            _ => {
                self.advance();
                self.error(format!("unexpected {}", tok.kind), tok.span);
                None
            }
        }
    }
}
