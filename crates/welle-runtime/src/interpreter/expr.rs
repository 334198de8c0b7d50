//! Expression evaluation

use super::{Flow, Runner};
use crate::ast::{Expr, FnDecl, LogicalOp};
use crate::builtins;
use crate::env::Environment;
use crate::ops;
use crate::value::{FunctionDef, RuntimeError, Value};
use std::sync::Arc;

impl Runner {
    pub(super) fn eval_expr(
        &mut self,
        expr: &Expr,
        env: &Environment,
    ) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Int { value, .. } => Ok(Value::Int(*value)),
            Expr::Float { value, .. } => Ok(Value::Float(*value)),
            Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
            Expr::Nil { .. } => Ok(Value::Nil),
            Expr::Str { value, .. } => {
                let value = Value::str(value.clone());
                self.ctx.meter.charge(value.alloc_cost())?;
                Ok(value)
            }
            Expr::Ident { name, .. } => self.resolve_name(name, env),
            Expr::Prefix { op, operand, .. } => {
                let operand = self.eval_expr(operand, env)?;
                ops::prefix(*op, &operand)
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let left = self.eval_expr(left, env)?;
                let right = self.eval_expr(right, env)?;
                ops::binary(*op, &left, &right, &mut self.ctx.meter)
            }
            Expr::Logical {
                op, left, right, ..
            } => {
                let left = self.eval_expr(left, env)?;
                match op {
                    LogicalOp::And => {
                        if !ops::is_truthy(&left) {
                            return Ok(Value::Bool(false));
                        }
                        let right = self.eval_expr(right, env)?;
                        Ok(Value::Bool(ops::is_truthy(&right)))
                    }
                    LogicalOp::Or => {
                        if ops::is_truthy(&left) {
                            return Ok(Value::Bool(true));
                        }
                        let right = self.eval_expr(right, env)?;
                        Ok(Value::Bool(ops::is_truthy(&right)))
                    }
                }
            }
            Expr::Call { callee, args, .. } => {
                let callee = self.eval_expr(callee, env)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_expr(arg, env)?);
                }
                self.call_value(&callee, &evaluated)
            }
            Expr::Index { target, index, .. } => {
                let target = self.eval_expr(target, env)?;
                let index = self.eval_expr(index, env)?;
                ops::index(&target, &index, &mut self.ctx.meter)
            }
            Expr::Member { target, name, .. } => {
                let target = self.eval_expr(target, env)?;
                ops::index(&target, &Value::str(name.clone()), &mut self.ctx.meter)
            }
            Expr::List { elements, .. } => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.eval_expr(element, env)?);
                }
                ops::build_list(values, &mut self.ctx.meter)
            }
            Expr::Dict { pairs, .. } => {
                let mut values = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.eval_expr(key, env)?;
                    let value = self.eval_expr(value, env)?;
                    values.push((key, value));
                }
                ops::build_dict(values, &mut self.ctx.meter)
            }
            Expr::FnExpr { params, body, .. } => {
                self.make_function(None, params.clone(), body.clone(), env)
            }
        }
    }

    fn resolve_name(&mut self, name: &str, env: &Environment) -> Result<Value, RuntimeError> {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        if let Some((_, canonical, _)) = builtins::lookup(name) {
            return Ok(Value::Builtin(canonical));
        }
        Err(RuntimeError::IdentifierNotFound(name.to_string()))
    }

    pub(super) fn make_function(
        &mut self,
        name: Option<String>,
        params: Vec<String>,
        body: crate::ast::Block,
        env: &Environment,
    ) -> Result<Value, RuntimeError> {
        let value = Value::Function(Arc::new(FunctionDef {
            name,
            params,
            body,
            env: env.clone(),
        }));
        self.ctx.meter.charge(value.alloc_cost())?;
        Ok(value)
    }

    pub(super) fn declare_function(
        &mut self,
        decl: &FnDecl,
        env: &Environment,
    ) -> Result<(), RuntimeError> {
        let value = self.make_function(
            Some(decl.name.clone()),
            decl.params.clone(),
            decl.body.clone(),
            env,
        )?;
        env.define(decl.name.clone(), value);
        Ok(())
    }

    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(func) => {
                if args.len() != func.params.len() {
                    return Err(RuntimeError::WrongArity {
                        want: func.params.len(),
                        got: args.len(),
                    });
                }
                if self.max_recursion > 0 && self.depth + 1 > self.max_recursion {
                    return Err(RuntimeError::RecursionLimit(self.max_recursion));
                }
                self.depth += 1;
                let result = self.apply_function(func, args);
                self.depth -= 1;
                result
            }
            Value::Builtin(name) => {
                let (_, _, native) = builtins::lookup(name)
                    .ok_or_else(|| RuntimeError::IdentifierNotFound(name.to_string()))?;
                native(args, &mut self.ctx)
            }
            other => Err(RuntimeError::NotCallable(other.type_name())),
        }
    }

    fn apply_function(
        &mut self,
        func: &FunctionDef,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let scope = Environment::enclosed(&func.env);
        for (param, arg) in func.params.iter().zip(args) {
            scope.define(param.clone(), arg.clone());
        }
        match self.eval_block(&func.body, &scope)? {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
            Flow::Break | Flow::Continue => {
                unreachable!("parser rejects break/continue outside loops")
            }
        }
    }
}
