//! Builtin functions
//!
//! One ordered registry serves both engines: the compiler refers to builtins
//! by slot (the position in `BUILTINS`), the evaluator by name. Every builtin
//! receives the shared engine context so output capture and memory charging
//! behave identically everywhere.

use crate::limits::EngineCtx;
use crate::ops;
use crate::value::{RuntimeError, Value};

/// A builtin's native implementation.
pub type BuiltinFn = fn(&[Value], &mut EngineCtx) -> Result<Value, RuntimeError>;

/// The builtin registry. Order is part of the compiled-code contract: the
/// `GetBuiltin` operand is an index into this table.
pub const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("print", builtin_print),
    ("len", builtin_len),
    ("str", builtin_str),
    ("type", builtin_type),
    ("push", builtin_push),
    ("first", builtin_first),
    ("last", builtin_last),
    ("rest", builtin_rest),
    ("keys", builtin_keys),
    ("values", builtin_values),
    ("range", builtin_range),
    ("iter", builtin_iter),
];

/// Look up a builtin by name, returning its slot and canonical static name.
pub fn lookup(name: &str) -> Option<(usize, &'static str, BuiltinFn)> {
    BUILTINS
        .iter()
        .enumerate()
        .find(|(_, (n, _))| *n == name)
        .map(|(i, (n, f))| (i, *n, *f))
}

/// Fetch a builtin by slot.
pub fn by_index(index: usize) -> Option<(&'static str, BuiltinFn)> {
    BUILTINS.get(index).map(|(n, f)| (*n, *f))
}

fn arity_error(name: &'static str, expected: &str, got: usize) -> RuntimeError {
    RuntimeError::BadBuiltinArg {
        name,
        message: format!("expected {expected} argument(s), got {got}"),
    }
}

fn arg_error(name: &'static str, expected: &str, actual: &Value) -> RuntimeError {
    RuntimeError::BadBuiltinArg {
        name,
        message: format!("expected {expected}, got {}", actual.type_name()),
    }
}

fn builtin_print(args: &[Value], ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    let rendered: Vec<String> = args.iter().map(Value::inspect).collect();
    ctx.print_line(&rendered.join(" "));
    Ok(Value::Nil)
}

fn builtin_len(args: &[Value], _ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("len", "1", args.len()));
    }
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::Dict(map) => Ok(Value::Int(map.len() as i64)),
        other => Err(arg_error("len", "string, list, or dict", other)),
    }
}

fn builtin_str(args: &[Value], ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("str", "1", args.len()));
    }
    let value = Value::str(args[0].inspect());
    ctx.meter.charge(value.alloc_cost())?;
    Ok(value)
}

fn builtin_type(args: &[Value], ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("type", "1", args.len()));
    }
    let value = Value::str(args[0].type_name());
    ctx.meter.charge(value.alloc_cost())?;
    Ok(value)
}

// Lists are values; push returns the extended list and leaves the argument
// untouched.
fn builtin_push(args: &[Value], ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("push", "2", args.len()));
    }
    match &args[0] {
        Value::List(items) => {
            let mut extended = items.clone();
            extended.push(args[1].clone());
            let value = Value::List(extended);
            ctx.meter.charge(value.alloc_cost())?;
            Ok(value)
        }
        other => Err(arg_error("push", "list", other)),
    }
}

fn builtin_first(args: &[Value], _ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("first", "1", args.len()));
    }
    match &args[0] {
        Value::List(items) => Ok(items.get(0).cloned().unwrap_or(Value::Nil)),
        other => Err(arg_error("first", "list", other)),
    }
}

fn builtin_last(args: &[Value], _ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("last", "1", args.len()));
    }
    match &args[0] {
        Value::List(items) => {
            if items.is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(items.get(items.len() - 1).cloned().unwrap_or(Value::Nil))
            }
        }
        other => Err(arg_error("last", "list", other)),
    }
}

fn builtin_rest(args: &[Value], ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("rest", "1", args.len()));
    }
    match &args[0] {
        Value::List(items) => {
            if items.is_empty() {
                return Ok(Value::Nil);
            }
            ops::build_list(items.as_slice()[1..].to_vec(), &mut ctx.meter)
        }
        other => Err(arg_error("rest", "list", other)),
    }
}

fn builtin_keys(args: &[Value], ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("keys", "1", args.len()));
    }
    match &args[0] {
        Value::Dict(map) => {
            let keys: Vec<Value> = map.sorted_keys().into_iter().map(Value::str).collect();
            for key in &keys {
                ctx.meter.charge(key.alloc_cost())?;
            }
            ops::build_list(keys, &mut ctx.meter)
        }
        Value::Module(m) => {
            let keys: Vec<Value> = m.exports.sorted_keys().into_iter().map(Value::str).collect();
            for key in &keys {
                ctx.meter.charge(key.alloc_cost())?;
            }
            ops::build_list(keys, &mut ctx.meter)
        }
        other => Err(arg_error("keys", "dict", other)),
    }
}

fn builtin_values(args: &[Value], ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("values", "1", args.len()));
    }
    match &args[0] {
        Value::Dict(map) => {
            let values: Vec<Value> = map
                .sorted_keys()
                .into_iter()
                .filter_map(|k| map.get(&k).cloned())
                .collect();
            ops::build_list(values, &mut ctx.meter)
        }
        other => Err(arg_error("values", "dict", other)),
    }
}

/// `range(end)` or `range(start, end)` — half-open integer interval.
fn builtin_range(args: &[Value], ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    let (start, end) = match args {
        [Value::Int(end)] => (0, *end),
        [Value::Int(start), Value::Int(end)] => (*start, *end),
        [other] => return Err(arg_error("range", "int", other)),
        [a, b] => {
            let bad = if matches!(a, Value::Int(_)) { b } else { a };
            return Err(arg_error("range", "int", bad));
        }
        _ => return Err(arity_error("range", "1 or 2", args.len())),
    };
    let items: Vec<Value> = (start..end).map(Value::Int).collect();
    ops::build_list(items, &mut ctx.meter)
}

fn builtin_iter(args: &[Value], ctx: &mut EngineCtx) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("iter", "1", args.len()));
    }
    ops::iteration_items(&args[0], &mut ctx.meter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{buffer_contents, buffer_writer};

    fn ctx() -> EngineCtx {
        EngineCtx::new()
    }

    #[test]
    fn test_registry_order_is_stable() {
        // compiled code indexes into this table; reordering breaks bytecode
        assert_eq!(BUILTINS[0].0, "print");
        assert_eq!(lookup("len").map(|(i, _, _)| i), Some(1));
        assert_eq!(by_index(0).map(|(n, _)| n), Some("print"));
        assert!(lookup("missing").is_none());
    }

    #[test]
    fn test_print_writes_inspect_plus_newline() {
        let (writer, buffer) = buffer_writer();
        let mut ctx = EngineCtx::with_output(writer);
        builtin_print(&[Value::str("ok")], &mut ctx).unwrap();
        builtin_print(&[Value::Int(1), Value::Int(2)], &mut ctx).unwrap();
        assert_eq!(buffer_contents(&buffer), "ok\n1 2\n");
    }

    #[test]
    fn test_len() {
        let mut ctx = ctx();
        assert_eq!(
            builtin_len(&[Value::str("abc")], &mut ctx).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            builtin_len(&[Value::list(vec![Value::Nil])], &mut ctx).unwrap(),
            Value::Int(1)
        );
        let err = builtin_len(&[Value::Int(1)], &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "len(): expected string, list, or dict, got int");
    }

    #[test]
    fn test_push_does_not_mutate_argument() {
        let mut ctx = ctx();
        let original = Value::list(vec![Value::Int(1)]);
        let extended = builtin_push(&[original.clone(), Value::Int(2)], &mut ctx).unwrap();
        assert_eq!(original, Value::list(vec![Value::Int(1)]));
        assert_eq!(extended, Value::list(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_first_last_rest() {
        let mut ctx = ctx();
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(builtin_first(&[list.clone()], &mut ctx).unwrap(), Value::Int(1));
        assert_eq!(builtin_last(&[list.clone()], &mut ctx).unwrap(), Value::Int(3));
        assert_eq!(
            builtin_rest(&[list], &mut ctx).unwrap(),
            Value::list(vec![Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            builtin_first(&[Value::list(vec![])], &mut ctx).unwrap(),
            Value::Nil
        );
        assert_eq!(
            builtin_rest(&[Value::list(vec![])], &mut ctx).unwrap(),
            Value::Nil
        );
    }

    #[test]
    fn test_range() {
        let mut ctx = ctx();
        assert_eq!(
            builtin_range(&[Value::Int(3)], &mut ctx).unwrap(),
            Value::list(vec![Value::Int(0), Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            builtin_range(&[Value::Int(2), Value::Int(4)], &mut ctx).unwrap(),
            Value::list(vec![Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_str_charges_memory() {
        let (writer, _) = buffer_writer();
        let mut ctx = EngineCtx::with_output(writer);
        ctx.meter.set_limit(10);
        let err = builtin_str(&[Value::Int(123456)], &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "max memory exceeded (10 bytes)");
    }

    #[test]
    fn test_wrong_arity_message() {
        let mut ctx = ctx();
        let err = builtin_len(&[], &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "len(): expected 1 argument(s), got 0");
    }
}
