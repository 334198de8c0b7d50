//! Runtime value representation
//!
//! Shared value representation for the evaluator and the VM.
//! - Ints, floats, bools, nil: immediate values
//! - Strings: heap-allocated, reference-counted, immutable
//! - Lists and dicts: copy-on-write (`Arc` + `Arc::make_mut`), value semantics
//! - Functions: AST body plus captured environment (evaluator)
//! - Closures: compiled function plus captured upvalues (VM)
//! - Modules: frozen export map plus origin path
//!
//! Runtime errors are ordinary `Result` errors; their display strings are the
//! observable error messages, so both engines route through the same
//! constructors to stay word-for-word identical.

use crate::ast::Block;
use crate::env::Environment;
use crate::vm::ModuleUnit;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Copy-on-write list. Cheap to clone (refcount bump); mutation on a shared
/// list clones the inner Vec first.
#[derive(Clone, Debug, Default)]
pub struct ValueList(Arc<Vec<Value>>);

impl ValueList {
    pub fn new() -> Self {
        ValueList(Arc::new(Vec::new()))
    }

    pub fn from_vec(v: Vec<Value>) -> Self {
        ValueList(Arc::new(v))
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn push(&mut self, value: Value) {
        Arc::make_mut(&mut self.0).push(value);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }
}

impl PartialEq for ValueList {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice() == other.0.as_slice()
    }
}

impl From<Vec<Value>> for ValueList {
    fn from(v: Vec<Value>) -> Self {
        ValueList::from_vec(v)
    }
}

impl FromIterator<Value> for ValueList {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        ValueList(Arc::new(iter.into_iter().collect()))
    }
}

/// Copy-on-write string-keyed map. The backing map is unordered; every
/// ordered observation (display, key iteration) sorts first so identical
/// programs produce byte-identical output.
#[derive(Clone, Debug, Default)]
pub struct ValueDict(Arc<HashMap<String, Value>>);

impl ValueDict {
    pub fn new() -> Self {
        ValueDict(Arc::new(HashMap::new()))
    }

    pub fn from_map(m: HashMap<String, Value>) -> Self {
        ValueDict(Arc::new(m))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        Arc::make_mut(&mut self.0).insert(key, value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::collections::hash_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Keys in sorted order, the canonical iteration order for dicts.
    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.0.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl PartialEq for ValueDict {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}

/// A user function for the tree-walking evaluator: parameter names, body, and
/// the environment captured at the definition site.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Block,
    pub env: Environment,
}

/// A compiled function: flat instruction stream plus frame sizing. Lives in
/// the constant pool and only reaches the stack wrapped in a closure.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Vec<u8>,
    pub num_locals: usize,
    pub num_params: usize,
    pub name: Option<String>,
}

/// A compiled function paired with its captured upvalues and the module unit
/// whose constant pool and global slots its instructions address.
#[derive(Debug, Clone)]
pub struct ClosureRef {
    pub func: Arc<CompiledFunction>,
    pub free: Arc<Vec<Value>>,
    pub unit: Arc<ModuleUnit>,
}

/// A module's frozen exports and the file they came from.
#[derive(Debug, Clone)]
pub struct ModuleExports {
    pub path: PathBuf,
    pub exports: ValueDict,
}

/// Runtime value
#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(Arc<String>),
    Bool(bool),
    Nil,
    List(ValueList),
    Dict(ValueDict),
    /// Evaluator function (AST + captured environment)
    Function(Arc<FunctionDef>),
    /// Constant-pool entry backing VM closures
    CompiledFunction(Arc<CompiledFunction>),
    /// VM closure
    Closure(ClosureRef),
    /// Builtin, dispatched through the ordered registry by name
    Builtin(&'static str),
    /// Imported module
    Module(Arc<ModuleExports>),
}

const VALUE_SIZE: usize = std::mem::size_of::<Value>();

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(Arc::new(s.into()))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Value::List(ValueList::from_vec(values))
    }

    /// Type tag used by dispatch and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Nil => "nil",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::CompiledFunction(_) => "function",
            Value::Closure(_) => "function",
            Value::Builtin(_) => "builtin",
            Value::Module(_) => "module",
        }
    }

    /// Human-readable rendering; `print(e)` writes `inspect(e)` plus a
    /// newline.
    pub fn inspect(&self) -> String {
        self.to_string()
    }

    /// Conservative heap footprint charged against the memory budget when
    /// this value is constructed. Immediate values cost nothing.
    pub fn alloc_cost(&self) -> u64 {
        match self {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Nil | Value::Builtin(_) => 0,
            Value::Str(s) => (std::mem::size_of::<String>() + s.len()) as u64,
            Value::List(l) => {
                (std::mem::size_of::<Vec<Value>>() + l.len() * VALUE_SIZE) as u64
            }
            Value::Dict(d) => {
                let entries: u64 = d
                    .iter()
                    .map(|(k, _)| (k.len() + VALUE_SIZE + 24) as u64)
                    .sum();
                48 + entries
            }
            Value::Function(f) => (64 + f.params.len() * 24) as u64,
            Value::CompiledFunction(f) => (32 + f.instructions.len()) as u64,
            Value::Closure(c) => (32 + c.free.len() * VALUE_SIZE) as u64,
            Value::Module(_) => 64,
        }
    }
}

impl PartialEq for Value {
    /// Equality contract: content equality on like kinds, int/float
    /// cross-type by promotion, `false` across incompatible kinds (never an
    /// error). Functions and closures compare by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::CompiledFunction(a), Value::CompiledFunction(b)) => Arc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(&a.func, &b.func),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a.path == b.path,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => {
                // Floats always show a decimal point so they stay
                // distinguishable from ints in output.
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{n:.1}")
                } else {
                    write!(f, "{n}")
                }
            }
            Value::Str(s) => write!(f, "{}", s.as_ref()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Nil => write!(f, "nil"),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Value::Dict(map) => {
                let mut parts = Vec::with_capacity(map.len());
                for key in map.sorted_keys() {
                    let value = map.get(&key).map(|v| v.to_string()).unwrap_or_default();
                    parts.push(format!("{key}: {value}"));
                }
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Function(func) => match &func.name {
                Some(name) => write!(f, "<fn {name}>"),
                None => write!(f, "<fn>"),
            },
            Value::CompiledFunction(func) => match &func.name {
                Some(name) => write!(f, "<fn {name}>"),
                None => write!(f, "<fn>"),
            },
            Value::Closure(c) => match &c.func.name {
                Some(name) => write!(f, "<fn {name}>"),
                None => write!(f, "<fn>"),
            },
            Value::Builtin(name) => write!(f, "<builtin {name}>"),
            Value::Module(m) => write!(f, "<module {}>", m.path.display()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(n) => write!(f, "Float({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Nil => write!(f, "Nil"),
            Value::List(items) => write!(f, "List({:?})", items.as_slice()),
            Value::Dict(map) => {
                write!(f, "Dict(")?;
                let mut first = true;
                for key in map.sorted_keys() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{key:?}: {:?}", map.get(&key).expect("key just listed"))?;
                }
                write!(f, ")")
            }
            Value::Function(func) => write!(f, "Function({:?})", func.name),
            Value::CompiledFunction(func) => write!(f, "CompiledFunction({:?})", func.name),
            Value::Closure(c) => write!(f, "Closure({:?})", c.func.name),
            Value::Builtin(name) => write!(f, "Builtin({name:?})"),
            Value::Module(m) => write!(f, "Module({})", m.path.display()),
        }
    }
}

/// Runtime error shared by both engines.
///
/// Display strings are part of the language's observable behavior; tests
/// match substrings of them, so wording changes are breaking changes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("identifier not found: {0}")]
    IdentifierNotFound(String),
    #[error("type mismatch: {left} {op} {right}")]
    TypeMismatch {
        op: String,
        left: &'static str,
        right: &'static str,
    },
    #[error("unknown operator: {op}{operand}")]
    UnknownPrefixOperator {
        op: String,
        operand: &'static str,
    },
    #[error("not callable: {0}")]
    NotCallable(&'static str),
    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongArity { want: usize, got: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("index operator not supported: {target}[{key}]")]
    BadIndex {
        target: &'static str,
        key: &'static str,
    },
    #[error("unusable as dict key: {0}")]
    BadDictKey(&'static str),
    #[error("cannot iterate: {0}")]
    NotIterable(&'static str),
    #[error("{name}(): {message}")]
    BadBuiltinArg {
        name: &'static str,
        message: String,
    },
    #[error("max recursion depth exceeded ({0})")]
    RecursionLimit(u64),
    #[error("max steps exceeded ({0})")]
    StepLimit(u64),
    #[error("max memory exceeded ({0} bytes)")]
    MemoryLimit(u64),
    #[error("stack overflow")]
    StackOverflow,
    /// Import failure surfaced at runtime; the message already carries its
    /// error code (`WM0001`, `WP0001`, ...).
    #[error("{0}")]
    Import(String),
    /// Internal VM invariant violation (corrupt or truncated instructions).
    #[error("invalid bytecode: {0}")]
    BadBytecode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::Float(1.5).type_name(), "float");
        assert_eq!(Value::str("x").type_name(), "string");
        assert_eq!(Value::Bool(true).type_name(), "bool");
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::list(vec![]).type_name(), "list");
        assert_eq!(Value::Dict(ValueDict::new()).type_name(), "dict");
    }

    #[test]
    fn test_display_numbers() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Int(-5).to_string(), "-5");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
    }

    #[test]
    fn test_display_collections() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::Nil]);
        assert_eq!(list.to_string(), "[1, a, nil]");

        let mut dict = ValueDict::new();
        dict.insert("b".to_string(), Value::Int(2));
        dict.insert("a".to_string(), Value::Int(1));
        assert_eq!(Value::Dict(dict).to_string(), "{a: 1, b: 2}");
    }

    #[test]
    fn test_display_nested_list() {
        let inner = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let outer = Value::list(vec![inner, Value::Int(3)]);
        assert_eq!(outer.to_string(), "[[1, 2], 3]");
    }

    #[test]
    fn test_equality_cross_type_numbers() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Float(1.5));
    }

    #[test]
    fn test_equality_incompatible_kinds_is_false() {
        assert_ne!(Value::Int(0), Value::Nil);
        assert_ne!(Value::str("1"), Value::Int(1));
        assert_ne!(Value::Bool(false), Value::Nil);
    }

    #[test]
    fn test_list_equality_is_structural() {
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::Int(2)]),
            Value::list(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_cow_list_clone_is_independent() {
        let mut a = ValueList::from_vec(vec![Value::Int(1)]);
        let b = a.clone();
        a.push(Value::Int(2));
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_string_alloc_cost_exceeds_tiny_budget() {
        // the smallest observable string already costs more than 10 bytes
        assert!(Value::str("ok").alloc_cost() > 10);
    }

    #[test]
    fn test_limit_error_messages() {
        assert_eq!(
            RuntimeError::MemoryLimit(10).to_string(),
            "max memory exceeded (10 bytes)"
        );
        assert_eq!(
            RuntimeError::RecursionLimit(7).to_string(),
            "max recursion depth exceeded (7)"
        );
        assert_eq!(
            RuntimeError::StepLimit(9).to_string(),
            "max steps exceeded (9)"
        );
    }
}
