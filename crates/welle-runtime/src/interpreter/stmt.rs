//! Statement evaluation

use super::{Flow, Runner};
use crate::ast::{Block, ElseBranch, ExportItem, IfStmt, Stmt};
use crate::env::Environment;
use crate::ops;
use crate::value::{RuntimeError, Value, ValueList};

impl Runner {
    pub(super) fn eval_stmt(
        &mut self,
        stmt: &Stmt,
        env: &Environment,
    ) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Expr(expr) => {
                let value = self.eval_expr(expr, env)?;
                Ok(Flow::Normal(value))
            }
            Stmt::Assign { name, value, .. } => {
                let value = self.eval_expr(value, env)?;
                env.set(name, value);
                Ok(Flow::Normal(Value::Nil))
            }
            Stmt::FnDecl(decl) => {
                self.declare_function(decl, env)?;
                Ok(Flow::Normal(Value::Nil))
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If(stmt) => self.eval_if(stmt, env),
            Stmt::While { cond, body, .. } => {
                loop {
                    let decided = self.eval_expr(cond, env)?;
                    if !ops::is_truthy(&decided) {
                        break;
                    }
                    let scope = Environment::enclosed(env);
                    match self.eval_block(body, &scope)? {
                        Flow::Normal(_) => {}
                        Flow::Break => break,
                        Flow::Continue => continue,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(Value::Nil))
            }
            Stmt::For {
                var, iterable, body, ..
            } => {
                let iterable = self.eval_expr(iterable, env)?;
                let items = ops::iteration_items(&iterable, &mut self.ctx.meter)?;
                let items = match items {
                    Value::List(items) => items,
                    _ => ValueList::new(),
                };
                for item in items.iter() {
                    let scope = Environment::enclosed(env);
                    scope.define(var.clone(), item.clone());
                    match self.eval_block(body, &scope)? {
                        Flow::Normal(_) => {}
                        Flow::Break => break,
                        Flow::Continue => continue,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(Value::Nil))
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Import { spec, alias, .. } => {
                self.eval_import(spec, alias, env)?;
                Ok(Flow::Normal(Value::Nil))
            }
            Stmt::Export(export) => {
                match &export.item {
                    ExportItem::Assign { name, value, .. } => {
                        let value = self.eval_expr(value, env)?;
                        env.set(name, value);
                    }
                    ExportItem::Fn(decl) => self.declare_function(decl, env)?,
                }
                Ok(Flow::Normal(Value::Nil))
            }
        }
    }

    fn eval_if(&mut self, stmt: &IfStmt, env: &Environment) -> Result<Flow, RuntimeError> {
        let cond = self.eval_expr(&stmt.cond, env)?;
        if ops::is_truthy(&cond) {
            let scope = Environment::enclosed(env);
            let flow = self.eval_block(&stmt.then_block, &scope)?;
            return Ok(if_flow(flow));
        }
        match &stmt.else_branch {
            Some(ElseBranch::ElseIf(inner)) => self.eval_if(inner, env),
            Some(ElseBranch::Else(block)) => {
                let scope = Environment::enclosed(env);
                let flow = self.eval_block(block, &scope)?;
                Ok(if_flow(flow))
            }
            None => Ok(Flow::Normal(Value::Nil)),
        }
    }

    /// Evaluate a block's statements against the given scope. The block's
    /// value is its last expression statement's value.
    pub(super) fn eval_block(
        &mut self,
        block: &Block,
        env: &Environment,
    ) -> Result<Flow, RuntimeError> {
        let mut last = Value::Nil;
        for stmt in &block.statements {
            match self.eval_stmt(stmt, env)? {
                Flow::Normal(value) => last = value,
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal(last))
    }
}

/// Branches are statements: control-flow signals propagate, plain values do
/// not escape the `if`.
fn if_flow(flow: Flow) -> Flow {
    match flow {
        Flow::Normal(_) => Flow::Normal(Value::Nil),
        other => other,
    }
}
