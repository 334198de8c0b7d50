//! Module loading and caching
//!
//! Parses and compiles each module once, caches the bytecode by absolute
//! path, and detects import cycles. The in-flight stack is held while a
//! module's imports are recursively pre-loaded, so a cycle surfaces at
//! compile time with its full chain — before anything lands in the cache.
//! The cache is only populated after compilation succeeds.
//!
//! Error codes: `WM0001` import cycle, `WP0001` parse error.

use crate::ast::{Block, ElseBranch, ExportItem, IfStmt, Program, Stmt};
use crate::bytecode::{Bytecode, Optimizer};
use crate::compiler::{CompileError, Compiler};
use crate::parser::parse_source;
use crate::resolver::{ResolveError, Resolver};
use crate::span::Span;
use crate::vm::Importer;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    #[error("failed to read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
    /// Joined `WP0001` lines, one per diagnostic.
    #[error("{0}")]
    Parse(String),
    #[error("WM0001 import cycle: {chain}")]
    Cycle { chain: String },
    #[error("duplicate export \"{name}\" (first at {file}:{first}, again at {file}:{second})")]
    DuplicateExport {
        name: String,
        file: String,
        first: Span,
        second: Span,
    },
    #[error("{0}")]
    Compile(#[from] CompileError),
}

/// Read and parse a module file. Parse diagnostics are joined into one
/// `WP0001` error.
pub fn read_and_parse(path: &Path) -> Result<Program, LoadError> {
    let source = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_source(&source).map_err(|errors| {
        let mut message = String::new();
        for (i, error) in errors.iter().enumerate() {
            if i > 0 {
                message.push('\n');
            }
            let _ = write!(message, "WP0001 parse error at {}:{error}", path.display());
        }
        LoadError::Parse(message)
    })
}

/// Reject a second top-level export of the same name, quoting both
/// locations.
pub fn check_duplicate_exports(program: &Program, file: &Path) -> Result<(), LoadError> {
    let mut seen: HashMap<&str, Span> = HashMap::new();
    for stmt in &program.statements {
        if let Stmt::Export(export) = stmt {
            let (name, span) = export.bound_name();
            if let Some(first) = seen.get(name) {
                return Err(LoadError::DuplicateExport {
                    name: name.to_string(),
                    file: file.display().to_string(),
                    first: *first,
                    second: span,
                });
            }
            seen.insert(name, span);
        }
    }
    Ok(())
}

/// Render a cycle chain from its first occurrence through the re-entry:
/// `a -> b -> a`.
pub fn format_cycle_chain(in_flight: &[PathBuf], reentry: &Path) -> String {
    let mut chain = String::new();
    for path in in_flight {
        let _ = write!(chain, "{} -> ", path.display());
    }
    let _ = write!(chain, "{}", reentry.display());
    chain
}

/// Every import spec in a program, in evaluation order, including imports
/// nested in blocks and function bodies.
pub fn collect_import_specs(program: &Program) -> Vec<String> {
    let mut specs = Vec::new();
    for stmt in &program.statements {
        collect_stmt(stmt, &mut specs);
    }
    specs
}

fn collect_stmt(stmt: &Stmt, specs: &mut Vec<String>) {
    match stmt {
        Stmt::Import { spec, .. } => specs.push(spec.clone()),
        Stmt::FnDecl(decl) => collect_block(&decl.body, specs),
        Stmt::If(stmt) => collect_if(stmt, specs),
        Stmt::While { body, .. } | Stmt::For { body, .. } => collect_block(body, specs),
        Stmt::Export(export) => {
            if let ExportItem::Fn(decl) = &export.item {
                collect_block(&decl.body, specs);
            }
        }
        _ => {}
    }
}

fn collect_if(stmt: &IfStmt, specs: &mut Vec<String>) {
    collect_block(&stmt.then_block, specs);
    match &stmt.else_branch {
        Some(ElseBranch::ElseIf(inner)) => collect_if(inner, specs),
        Some(ElseBranch::Else(block)) => collect_block(block, specs),
        None => {}
    }
}

fn collect_block(block: &Block, specs: &mut Vec<String>) {
    for stmt in &block.statements {
        collect_stmt(stmt, specs);
    }
}

/// Module loader handle. Clones share one cache and in-flight stack, which
/// is how the VM's importer closure calls back into the loader that built
/// the VM.
#[derive(Clone)]
pub struct Loader {
    state: Arc<Mutex<LoaderState>>,
}

struct LoaderState {
    resolver: Resolver,
    cache: HashMap<PathBuf, Arc<Bytecode>>,
    in_flight: Vec<PathBuf>,
    in_flight_index: HashMap<PathBuf, usize>,
}

impl Loader {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoaderState {
                resolver,
                cache: HashMap::new(),
                in_flight: Vec::new(),
                in_flight_index: HashMap::new(),
            })),
        }
    }

    /// Resolve, parse, and compile a module (once; later loads hit the
    /// cache). Returns the bytecode and the module's absolute path.
    pub fn load_bytecode(
        &self,
        from_file: &Path,
        spec: &str,
        optimize: bool,
    ) -> Result<(Arc<Bytecode>, PathBuf), LoadError> {
        self.state
            .lock()
            .expect("loader poisoned")
            .load(from_file, spec, optimize)
    }

    /// Load an entry file given as a path rather than an import spec.
    pub fn load_entry(
        &self,
        path: &Path,
        optimize: bool,
    ) -> Result<(Arc<Bytecode>, PathBuf), LoadError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        let spec = absolute.display().to_string();
        let from = absolute
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("__entry__");
        self.load_bytecode(&from, &spec, optimize)
    }

    /// The importer closure handed to a VM. Transitively imported modules
    /// always load unoptimized; only the entry module honors the optimize
    /// flag.
    pub fn importer(&self) -> Importer {
        let loader = self.clone();
        Box::new(move |from, spec| {
            loader
                .load_bytecode(from, spec, false)
                .map_err(|e| e.to_string())
        })
    }
}

impl LoaderState {
    fn load(
        &mut self,
        from_file: &Path,
        spec: &str,
        optimize: bool,
    ) -> Result<(Arc<Bytecode>, PathBuf), LoadError> {
        let abs = self.resolver.resolve(from_file, spec)?;

        if let Some(bytecode) = self.cache.get(&abs) {
            return Ok((bytecode.clone(), abs));
        }
        if let Some(&first) = self.in_flight_index.get(&abs) {
            return Err(LoadError::Cycle {
                chain: format_cycle_chain(&self.in_flight[first..], &abs),
            });
        }

        self.in_flight_index.insert(abs.clone(), self.in_flight.len());
        self.in_flight.push(abs.clone());
        let result = self.load_uncached(&abs, optimize);
        self.in_flight.pop();
        self.in_flight_index.remove(&abs);

        let bytecode = Arc::new(result?);
        self.cache.insert(abs.clone(), bytecode.clone());
        Ok((bytecode, abs))
    }

    fn load_uncached(&mut self, abs: &Path, optimize: bool) -> Result<Bytecode, LoadError> {
        let program = read_and_parse(abs)?;
        check_duplicate_exports(&program, abs)?;

        // Pre-load transitive imports while this module is in flight, so
        // cycles are caught here rather than at runtime.
        for spec in collect_import_specs(&program) {
            self.load(abs, &spec, false)?;
        }

        let mut compiler = Compiler::new(abs);
        let mut bytecode = compiler.compile(&program)?;
        if optimize {
            bytecode = Optimizer::with_default_passes().optimize(bytecode);
        }
        Ok(bytecode)
    }
}
