//! REPL session state
//!
//! One compiled world across entries: the session owns the compiler (symbol
//! table + constant pool) and the VM state (globals, module cache, module
//! units), moving the latter in and out of a fresh VM per entry. Errors are
//! per-entry; the session survives them.

use crate::compiler::Compiler;
use crate::limits::OutputWriter;
use crate::module_loader::Loader;
use crate::parser::parse_source;
use crate::value::Value;
use crate::vm::{VmState, VM};
use std::path::Path;

/// Name the REPL's synthetic module goes by.
const REPL_ORIGIN: &str = "<repl>";

pub struct ReplSession {
    compiler: Compiler,
    state: VmState,
    loader: Option<Loader>,
    output: Option<OutputWriter>,
}

impl ReplSession {
    pub fn new() -> Self {
        Self {
            compiler: Compiler::new(Path::new(REPL_ORIGIN)),
            state: VmState::new(),
            loader: None,
            output: None,
        }
    }

    /// Enable imports for the session.
    pub fn with_loader(loader: Loader) -> Self {
        let mut session = Self::new();
        session.loader = Some(loader);
        session
    }

    /// Redirect program output (used by tests).
    pub fn set_output(&mut self, output: OutputWriter) {
        self.output = Some(output);
    }

    /// Drop all definitions and modules.
    pub fn reset(&mut self) {
        self.compiler = Compiler::new(Path::new(REPL_ORIGIN));
        self.state = VmState::new();
    }

    /// Compile and run one entry. Returns the entry's value (the last
    /// popped stack element) or a rendered error.
    pub fn eval_line(&mut self, line: &str) -> Result<Value, String> {
        let program = parse_source(line).map_err(|errors| {
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        })?;
        let bytecode = self.compiler.compile(&program).map_err(|e| e.to_string())?;

        let mut vm = VM::with_state(&bytecode, std::mem::take(&mut self.state));
        if let Some(loader) = &self.loader {
            vm.set_importer(loader.importer());
        }
        if let Some(output) = &self.output {
            vm.set_output(output.clone());
        }
        let result = vm.run();
        self.state = vm.into_state();
        result.map_err(|e| e.to_string())
    }
}

impl Default for ReplSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the input still has unbalanced delimiters and should keep
/// accumulating continuation lines.
pub fn needs_continuation(input: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '/' if chars.peek() == Some(&'/') => {
                // line comment: skip to newline
                for rest in chars.by_ref() {
                    if rest == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth > 0 || in_string
}
