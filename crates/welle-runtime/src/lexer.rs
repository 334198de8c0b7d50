//! Lexical analysis
//!
//! Hand-rolled scanner producing a flat token vector. Errors do not abort the
//! scan; the lexer collects them and keeps going so the parser can report as
//! much as possible in one pass.

use crate::parser::ParseError;
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Lexer state
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Scan the whole input. Always returns the tokens produced so far, even
    /// when errors were found, mirroring the parser's collect-and-continue
    /// diagnostics.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<ParseError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();

        loop {
            self.skip_whitespace_and_comments();
            let span = self.span();
            let Some(c) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, "", span));
                break;
            };

            match c {
                '0'..='9' => match self.scan_number() {
                    Ok(tok) => tokens.push(tok),
                    Err(e) => errors.push(e),
                },
                '"' => match self.scan_string() {
                    Ok(tok) => tokens.push(tok),
                    Err(e) => errors.push(e),
                },
                c if is_ident_start(c) => tokens.push(self.scan_ident()),
                _ => match self.scan_operator() {
                    Ok(tok) => tokens.push(tok),
                    Err(e) => errors.push(e),
                },
            }
        }

        (tokens, errors)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_number(&mut self) -> Result<Token, ParseError> {
        let span = self.span();
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // A dot only belongs to the number when a digit follows it, so that
        // `list.len` style member access still lexes after an integer.
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        if is_float {
            if text.parse::<f64>().is_err() {
                return Err(ParseError::new(format!("invalid float literal {text}"), span));
            }
            Ok(Token::new(TokenKind::Float, text, span))
        } else {
            if text.parse::<i64>().is_err() {
                return Err(ParseError::new(
                    format!("integer literal out of range: {text}"),
                    span,
                ));
            }
            Ok(Token::new(TokenKind::Int, text, span))
        }
    }

    fn scan_string(&mut self) -> Result<Token, ParseError> {
        let span = self.span();
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.advance() {
                None => return Err(ParseError::new("unterminated string literal", span)),
                Some('"') => break,
                Some('\\') => {
                    let escape_span = self.span();
                    match self.advance() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('"') => text.push('"'),
                        Some('\\') => text.push('\\'),
                        Some(c) => {
                            return Err(ParseError::new(
                                format!("unknown escape sequence \\{c}"),
                                escape_span,
                            ))
                        }
                        None => return Err(ParseError::new("unterminated string literal", span)),
                    }
                }
                Some(c) => text.push(c),
            }
        }
        Ok(Token::new(TokenKind::Str, text, span))
    }

    fn scan_ident(&mut self) -> Token {
        let span = self.span();
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match TokenKind::keyword(&text) {
            Some(kind) => Token::new(kind, text, span),
            None => Token::new(TokenKind::Ident, text, span),
        }
    }

    fn scan_operator(&mut self) -> Result<Token, ParseError> {
        let span = self.span();
        let c = self.advance().expect("scan_operator called at end of input");
        let two = |lexer: &mut Lexer, kind, text: &str| {
            lexer.advance();
            Ok(Token::new(kind, text, span))
        };
        match c {
            '+' => Ok(Token::new(TokenKind::Plus, "+", span)),
            '-' => Ok(Token::new(TokenKind::Minus, "-", span)),
            '*' => Ok(Token::new(TokenKind::Star, "*", span)),
            '/' => Ok(Token::new(TokenKind::Slash, "/", span)),
            '%' => Ok(Token::new(TokenKind::Percent, "%", span)),
            '=' if self.peek() == Some('=') => two(self, TokenKind::Eq, "=="),
            '=' => Ok(Token::new(TokenKind::Assign, "=", span)),
            '!' if self.peek() == Some('=') => two(self, TokenKind::NotEq, "!="),
            '!' => Ok(Token::new(TokenKind::Bang, "!", span)),
            '<' if self.peek() == Some('=') => two(self, TokenKind::LtEq, "<="),
            '<' => Ok(Token::new(TokenKind::Lt, "<", span)),
            '>' if self.peek() == Some('=') => two(self, TokenKind::GtEq, ">="),
            '>' => Ok(Token::new(TokenKind::Gt, ">", span)),
            '.' => Ok(Token::new(TokenKind::Dot, ".", span)),
            ',' => Ok(Token::new(TokenKind::Comma, ",", span)),
            ':' => Ok(Token::new(TokenKind::Colon, ":", span)),
            ';' => Ok(Token::new(TokenKind::Semicolon, ";", span)),
            '(' => Ok(Token::new(TokenKind::LParen, "(", span)),
            ')' => Ok(Token::new(TokenKind::RParen, ")", span)),
            '[' => Ok(Token::new(TokenKind::LBracket, "[", span)),
            ']' => Ok(Token::new(TokenKind::RBracket, "]", span)),
            '{' => Ok(Token::new(TokenKind::LBrace, "{", span)),
            '}' => Ok(Token::new(TokenKind::RBrace, "}", span)),
            _ => Err(ParseError::new(format!("unexpected character '{c}'"), span)),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
