//! Operator semantics shared by both engines
//!
//! The evaluator and the VM must produce identical results and identical
//! error text for every operator, so all operator behavior lives here and
//! both engines call through. Arithmetic mixes ints and floats by promoting
//! to float when either operand is a float; integer arithmetic wraps.

use crate::ast::{BinaryOp, PrefixOp};
use crate::limits::MemoryMeter;
use crate::value::{RuntimeError, Value, ValueDict, ValueList};
use std::collections::HashMap;

/// Only `false` and `nil` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Nil)
}

pub fn binary(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    meter: &mut MemoryMeter,
) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::NotEq => Ok(Value::Bool(left != right)),
        BinaryOp::Add => add(left, right, meter),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, left, right)
        }
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => compare(op, left, right),
    }
}

pub fn prefix(op: PrefixOp, operand: &Value) -> Result<Value, RuntimeError> {
    match op {
        PrefixOp::Not => Ok(Value::Bool(!is_truthy(operand))),
        PrefixOp::Neg => match operand {
            Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
            Value::Float(n) => Ok(Value::Float(-n)),
            other => Err(RuntimeError::UnknownPrefixOperator {
                op: "-".to_string(),
                operand: other.type_name(),
            }),
        },
    }
}

fn add(left: &Value, right: &Value, meter: &mut MemoryMeter) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Str(a), Value::Str(b)) => {
            let value = Value::str(format!("{a}{b}"));
            meter.charge(value.alloc_cost())?;
            Ok(value)
        }
        (Value::List(a), Value::List(b)) => {
            let mut items = a.as_slice().to_vec();
            items.extend_from_slice(b.as_slice());
            let value = Value::list(items);
            meter.charge(value.alloc_cost())?;
            Ok(value)
        }
        _ => Err(mismatch(BinaryOp::Add, left, right)),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_arithmetic(op, *a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_arithmetic(op, *a, *b as f64))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_arithmetic(op, *a, *b))),
        _ => Err(mismatch(op, left, right)),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value, RuntimeError> {
    let result = match op {
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        _ => unreachable!("int_arithmetic called with non-arithmetic operator"),
    };
    Ok(Value::Int(result))
}

// Float division by zero follows IEEE-754 (inf / NaN), no error.
fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => unreachable!("float_arithmetic called with non-arithmetic operator"),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let ordering_holds = match (left, right) {
        (Value::Int(a), Value::Int(b)) => numeric_compare(op, *a as f64, *b as f64),
        (Value::Int(a), Value::Float(b)) => numeric_compare(op, *a as f64, *b),
        (Value::Float(a), Value::Int(b)) => numeric_compare(op, *a, *b as f64),
        (Value::Float(a), Value::Float(b)) => numeric_compare(op, *a, *b),
        (Value::Str(a), Value::Str(b)) => match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Gt => a > b,
            BinaryOp::LtEq => a <= b,
            BinaryOp::GtEq => a >= b,
            _ => unreachable!("compare called with non-comparison operator"),
        },
        _ => return Err(mismatch(op, left, right)),
    };
    Ok(Value::Bool(ordering_holds))
}

fn numeric_compare(op: BinaryOp, a: f64, b: f64) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Gt => a > b,
        BinaryOp::LtEq => a <= b,
        BinaryOp::GtEq => a >= b,
        _ => unreachable!("numeric_compare called with non-comparison operator"),
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        op: op.to_string(),
        left: left.type_name(),
        right: right.type_name(),
    }
}

/// Indexing. Out-of-range list indexes, missing dict keys, and missing
/// module exports yield `nil`; indexing with the wrong key kind is an error.
pub fn index(
    target: &Value,
    key: &Value,
    meter: &mut MemoryMeter,
) -> Result<Value, RuntimeError> {
    match (target, key) {
        (Value::List(items), Value::Int(i)) => {
            if *i < 0 {
                return Ok(Value::Nil);
            }
            Ok(items.get(*i as usize).cloned().unwrap_or(Value::Nil))
        }
        (Value::Dict(map), Value::Str(k)) => {
            Ok(map.get(k.as_str()).cloned().unwrap_or(Value::Nil))
        }
        (Value::Module(m), Value::Str(k)) => {
            Ok(m.exports.get(k.as_str()).cloned().unwrap_or(Value::Nil))
        }
        (Value::Str(s), Value::Int(i)) => {
            if *i < 0 {
                return Ok(Value::Nil);
            }
            match s.chars().nth(*i as usize) {
                Some(c) => {
                    let value = Value::str(c.to_string());
                    meter.charge(value.alloc_cost())?;
                    Ok(value)
                }
                None => Ok(Value::Nil),
            }
        }
        _ => Err(RuntimeError::BadIndex {
            target: target.type_name(),
            key: key.type_name(),
        }),
    }
}

/// Build a list value, charging its allocation.
pub fn build_list(elements: Vec<Value>, meter: &mut MemoryMeter) -> Result<Value, RuntimeError> {
    let value = Value::List(ValueList::from_vec(elements));
    meter.charge(value.alloc_cost())?;
    Ok(value)
}

/// Build a dict value from key/value pairs, charging its allocation. Keys
/// must be strings; a repeated key keeps the last value.
pub fn build_dict(
    pairs: Vec<(Value, Value)>,
    meter: &mut MemoryMeter,
) -> Result<Value, RuntimeError> {
    let mut map = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        match key {
            Value::Str(k) => {
                map.insert(k.as_ref().clone(), value);
            }
            other => return Err(RuntimeError::BadDictKey(other.type_name())),
        }
    }
    let value = Value::Dict(ValueDict::from_map(map));
    meter.charge(value.alloc_cost())?;
    Ok(value)
}

/// The item sequence a `for` loop walks: a list yields its elements, a dict
/// its keys in sorted order, a string its characters. Also backs the `iter`
/// builtin so both engines share one definition.
pub fn iteration_items(
    value: &Value,
    meter: &mut MemoryMeter,
) -> Result<Value, RuntimeError> {
    match value {
        Value::List(_) => Ok(value.clone()),
        Value::Dict(map) => {
            let keys: Vec<Value> = map.sorted_keys().into_iter().map(Value::str).collect();
            for key in &keys {
                meter.charge(key.alloc_cost())?;
            }
            build_list(keys, meter)
        }
        Value::Str(s) => {
            let chars: Vec<Value> = s.chars().map(|c| Value::str(c.to_string())).collect();
            for c in &chars {
                meter.charge(c.alloc_cost())?;
            }
            build_list(chars, meter)
        }
        other => Err(RuntimeError::NotIterable(other.type_name())),
    }
}
