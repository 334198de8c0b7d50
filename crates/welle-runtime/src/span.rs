//! Source positions for tokens, AST nodes, and diagnostics

use std::fmt;

/// A source location: 1-based line and column.
///
/// Welle error messages quote locations as `file:line:col`; the file part is
/// attached by whoever owns the file path (parser diagnostics are joined by
/// the loader, compile errors carry their origin file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// A placeholder span for synthesized nodes.
    pub fn dummy() -> Self {
        Self { line: 0, column: 0 }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Span::new(3, 14).to_string(), "3:14");
    }
}
