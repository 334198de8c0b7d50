//! Tree-walking evaluator
//!
//! Direct AST evaluation against lexical environments:
//! - a child environment per function call and per block scope
//! - closures capture their defining environment by reference
//! - imports resolve through the module resolver and are memoized per
//!   absolute path; an in-flight stack reports cycles with the same
//!   `WM0001` chain the bytecode loader produces
//! - recursion and memory limits enforced with the same messages as the VM

mod expr;
mod stmt;

use crate::ast::{Program, Stmt};
use crate::env::Environment;
use crate::limits::{EngineCtx, OutputWriter};
use crate::module_loader::{self, LoadError};
use crate::resolver::Resolver;
use crate::value::{ModuleExports, RuntimeError, Value, ValueDict};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Failure running a file: either a static load problem (read, parse,
/// duplicate export) or a runtime error.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{0}")]
    Load(#[from] LoadError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

/// Control-flow signal threaded through statement evaluation.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Flow {
    Normal(Value),
    Break,
    Continue,
    Return(Value),
}

/// Evaluator state
pub struct Runner {
    resolver: Option<Resolver>,
    imports_enabled: bool,
    max_recursion: u64,
    depth: u64,
    pub(super) ctx: EngineCtx,
    /// Memoized modules by absolute path; a module body runs at most once
    /// per runner.
    modules: HashMap<PathBuf, Value>,
    /// Modules currently being evaluated, for cycle reporting.
    loading: Vec<PathBuf>,
    /// File whose imports are being resolved (for relative specs).
    current_file: Option<PathBuf>,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            resolver: None,
            imports_enabled: false,
            max_recursion: 0,
            depth: 0,
            ctx: EngineCtx::new(),
            modules: HashMap::new(),
            loading: Vec::new(),
            current_file: None,
        }
    }

    pub fn set_resolver(&mut self, resolver: Resolver) {
        self.resolver = Some(resolver);
    }

    pub fn enable_imports(&mut self) {
        self.imports_enabled = true;
    }

    /// `0` disables the recursion limit.
    pub fn set_max_recursion(&mut self, limit: u64) {
        self.max_recursion = limit;
    }

    /// `0` disables the memory budget.
    pub fn set_max_memory(&mut self, bytes: u64) {
        self.ctx.meter.set_limit(bytes);
    }

    pub fn set_output(&mut self, output: OutputWriter) {
        self.ctx.output = output;
    }

    /// Evaluate a file and return its final value.
    pub fn run_file(&mut self, path: &Path) -> Result<Value, RunError> {
        let (_, value) = self.run_file_env(path)?;
        Ok(value)
    }

    /// Evaluate a file and return its top-level environment alongside the
    /// final value, for hosts that call back into the program afterwards.
    pub fn run_file_env(&mut self, path: &Path) -> Result<(Environment, Value), RunError> {
        let program = module_loader::read_and_parse(path)?;
        module_loader::check_duplicate_exports(&program, path)?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let saved = std::mem::replace(&mut self.current_file, Some(canonical.clone()));
        // The entry counts as in flight so a cycle back to it reports the
        // chain from the top.
        self.loading.push(canonical);
        let env = Environment::new();
        let result = self.eval_program(&program, &env);
        self.loading.pop();
        self.current_file = saved;
        Ok((env, result?))
    }

    /// Evaluate a parsed program against an environment. The result is the
    /// last expression statement's value, `nil` when there is none.
    pub fn eval_program(
        &mut self,
        program: &Program,
        env: &Environment,
    ) -> Result<Value, RuntimeError> {
        let mut last = Value::Nil;
        for stmt in &program.statements {
            match self.eval_stmt(stmt, env)? {
                Flow::Normal(value) => last = value,
                Flow::Return(value) => return Ok(value),
                Flow::Break | Flow::Continue => {
                    unreachable!("parser rejects break/continue outside loops")
                }
            }
        }
        Ok(last)
    }

    /// Host-initiated call into a program value.
    pub fn call(&mut self, func: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        self.call_value(func, args)
    }

    // ===== Imports =====

    pub(super) fn eval_import(
        &mut self,
        spec: &str,
        alias: &str,
        env: &Environment,
    ) -> Result<(), RuntimeError> {
        if !self.imports_enabled {
            return Err(RuntimeError::Import("imports are disabled".to_string()));
        }
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| RuntimeError::Import("no module resolver configured".to_string()))?;
        let from = self
            .current_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let abs = resolver
            .resolve(&from, spec)
            .map_err(|e| RuntimeError::Import(e.to_string()))?;

        let module = match self.modules.get(&abs) {
            Some(module) => module.clone(),
            None => {
                if let Some(first) = self.loading.iter().position(|p| p == &abs) {
                    let chain =
                        module_loader::format_cycle_chain(&self.loading[first..], &abs);
                    return Err(RuntimeError::Import(
                        LoadError::Cycle { chain }.to_string(),
                    ));
                }
                self.loading.push(abs.clone());
                let result = self.eval_module(&abs);
                self.loading.pop();
                let module = result?;
                self.modules.insert(abs.clone(), module.clone());
                module
            }
        };
        env.define(alias, module);
        Ok(())
    }

    /// Run a module body in a fresh environment and freeze its exports.
    fn eval_module(&mut self, path: &Path) -> Result<Value, RuntimeError> {
        let program =
            module_loader::read_and_parse(path).map_err(|e| RuntimeError::Import(e.to_string()))?;
        module_loader::check_duplicate_exports(&program, path)
            .map_err(|e| RuntimeError::Import(e.to_string()))?;

        let saved = std::mem::replace(&mut self.current_file, Some(path.to_path_buf()));
        let env = Environment::new();
        let result = self.eval_program(&program, &env);
        self.current_file = saved;
        result?;

        let mut exports = ValueDict::new();
        for stmt in &program.statements {
            if let Stmt::Export(export) = stmt {
                let (name, _) = export.bound_name();
                exports.insert(name.to_string(), env.get(name).unwrap_or(Value::Nil));
            }
        }
        let dict = Value::Dict(exports.clone());
        self.ctx.meter.charge(dict.alloc_cost())?;
        let module = Value::Module(Arc::new(ModuleExports {
            path: path.to_path_buf(),
            exports,
        }));
        self.ctx.meter.charge(module.alloc_cost())?;
        Ok(module)
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}
