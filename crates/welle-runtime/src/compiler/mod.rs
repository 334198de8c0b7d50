//! AST to bytecode compiler
//!
//! Single pass. Expressions leave their result on the stack; statements leave
//! nothing. Function bodies compile in nested scopes with their own
//! instruction buffers; the symbol table tracks global/local/free/builtin
//! bindings and upvalue capture. Jumps are absolute and forward jumps are
//! patched once their target is known.

mod symbol;

pub use symbol::{Symbol, SymbolScope, SymbolTable};

use crate::ast::*;
use crate::builtins;
use crate::bytecode::{write_u16, Bytecode, Opcode};
use crate::span::Span;
use crate::value::{CompiledFunction, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A compile failure, located as `file:line:col`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{file}:{span}: {message}")]
pub struct CompileError {
    pub file: String,
    pub span: Span,
    pub message: String,
}

#[derive(Default)]
struct Scope {
    instructions: Vec<u8>,
}

/// Pending jumps inside a loop body; patched when the loop's layout is known.
struct LoopCtx {
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
}

/// Compiler state
///
/// A compiler can run multiple programs in sequence against the same symbol
/// table and constant pool; the REPL leans on this to keep one compiled
/// world across entries.
pub struct Compiler {
    origin: PathBuf,
    file: String,
    symbols: SymbolTable,
    constants: Vec<Value>,
    scopes: Vec<Scope>,
    loops: Vec<LoopCtx>,
    exports: Vec<(String, u16)>,
    next_hidden: usize,
}

impl Compiler {
    pub fn new(origin: &Path) -> Self {
        Self {
            origin: origin.to_path_buf(),
            file: origin.display().to_string(),
            symbols: SymbolTable::new(),
            constants: Vec::new(),
            scopes: vec![Scope::default()],
            loops: Vec::new(),
            exports: Vec::new(),
            next_hidden: 0,
        }
    }

    /// Compile a program. Pure: the same AST always yields byte-identical
    /// bytecode.
    pub fn compile(&mut self, program: &Program) -> Result<Bytecode, CompileError> {
        self.unwind_scopes();
        self.scopes = vec![Scope::default()];
        self.loops.clear();
        self.exports.clear();

        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }

        let main = self.scopes.pop().unwrap_or_default();
        self.scopes = vec![Scope::default()];
        Ok(Bytecode {
            instructions: main.instructions,
            constants: self.constants.clone(),
            num_globals: self.symbols.num_definitions,
            exports: self.exports.clone(),
            origin: self.origin.clone(),
        })
    }

    /// Pop any function scopes left behind by an earlier failed compile.
    fn unwind_scopes(&mut self) {
        while !self.symbols.is_global() {
            let table = std::mem::take(&mut self.symbols);
            let (_, _, outer) = table.into_parts();
            self.symbols = outer.expect("non-global table has an outer scope");
        }
    }

    // ===== Emission =====

    fn current(&mut self) -> &mut Vec<u8> {
        &mut self
            .scopes
            .last_mut()
            .expect("compiler scope stack is never empty")
            .instructions
    }

    fn current_offset(&self) -> usize {
        self.scopes
            .last()
            .expect("compiler scope stack is never empty")
            .instructions
            .len()
    }

    fn emit(&mut self, op: Opcode) {
        self.current().push(op as u8);
    }

    fn emit_u16(&mut self, op: Opcode, operand: u16) {
        let ins = self.current();
        ins.push(op as u8);
        ins.push((operand >> 8) as u8);
        ins.push((operand & 0xFF) as u8);
    }

    /// Emit a jump with a placeholder target; returns the operand position
    /// for patching.
    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit(op);
        let pos = self.current_offset();
        let ins = self.current();
        ins.push(0xFF);
        ins.push(0xFF);
        pos
    }

    fn jump_target(&self, offset: usize, span: Span) -> Result<u16, CompileError> {
        u16::try_from(offset).map_err(|_| self.error("function too large", span))
    }

    fn patch_jump(&mut self, operand_pos: usize, target: usize, span: Span) -> Result<(), CompileError> {
        let target = self.jump_target(target, span)?;
        write_u16(self.current(), operand_pos, target);
        Ok(())
    }

    fn patch_jump_here(&mut self, operand_pos: usize, span: Span) -> Result<(), CompileError> {
        let here = self.current_offset();
        self.patch_jump(operand_pos, here, span)
    }

    fn add_constant(&mut self, value: Value, span: Span) -> Result<u16, CompileError> {
        if self.constants.len() >= u16::MAX as usize {
            return Err(self.error("too many constants", span));
        }
        self.constants.push(value);
        Ok((self.constants.len() - 1) as u16)
    }

    fn error(&self, message: impl Into<String>, span: Span) -> CompileError {
        CompileError {
            file: self.file.clone(),
            span,
            message: message.into(),
        }
    }

    // ===== Symbols =====

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit_u16(Opcode::GetGlobal, symbol.index),
            SymbolScope::Local => self.emit_u16(Opcode::GetLocal, symbol.index),
            SymbolScope::Free => self.emit_u16(Opcode::GetFree, symbol.index),
            SymbolScope::Builtin => self.emit_u16(Opcode::GetBuiltin, symbol.index),
        }
    }

    fn store_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit_u16(Opcode::SetGlobal, symbol.index),
            SymbolScope::Local => self.emit_u16(Opcode::SetLocal, symbol.index),
            SymbolScope::Free | SymbolScope::Builtin => {
                unreachable!("assignments always target a global or local slot")
            }
        }
    }

    /// Resolve an assignment target: the nearest global or local of the
    /// current function, else a fresh binding in the current scope. There is
    /// no store-upvalue instruction, so a name that only resolves through an
    /// enclosing function shadows instead.
    fn assign_symbol(&mut self, name: &str) -> Symbol {
        match self.symbols.resolve(name) {
            Some(sym) if matches!(sym.scope, SymbolScope::Global | SymbolScope::Local) => sym,
            _ => self.symbols.define(name),
        }
    }

    fn hidden_name(&mut self, stem: &str) -> String {
        let name = format!("__{stem}_{}", self.next_hidden);
        self.next_hidden += 1;
        name
    }

    // ===== Statements =====

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop);
                Ok(())
            }
            Stmt::Assign { name, value, .. } => {
                self.compile_expr(value)?;
                let symbol = self.assign_symbol(name);
                self.store_symbol(&symbol);
                Ok(())
            }
            Stmt::FnDecl(decl) => {
                // Defined before the body compiles so global recursion
                // resolves.
                let symbol = self.symbols.define(&decl.name);
                self.compile_function(
                    Some(decl.name.clone()),
                    &decl.params,
                    &decl.body,
                    decl.span,
                )?;
                self.store_symbol(&symbol);
                Ok(())
            }
            Stmt::Return { value, .. } => {
                match value {
                    Some(expr) => {
                        self.compile_expr(expr)?;
                        self.emit(Opcode::ReturnValue);
                    }
                    None => self.emit(Opcode::Return),
                }
                Ok(())
            }
            Stmt::If(stmt) => self.compile_if(stmt),
            Stmt::While { cond, body, span } => self.compile_while(cond, body, *span),
            Stmt::For {
                var,
                iterable,
                body,
                span,
            } => self.compile_for(var, iterable, body, *span),
            Stmt::Break { span } => {
                let jump = self.emit_jump(Opcode::Jump);
                match self.loops.last_mut() {
                    Some(ctx) => {
                        ctx.break_jumps.push(jump);
                        Ok(())
                    }
                    None => Err(self.error("break outside of loop", *span)),
                }
            }
            Stmt::Continue { span } => {
                let jump = self.emit_jump(Opcode::Jump);
                match self.loops.last_mut() {
                    Some(ctx) => {
                        ctx.continue_jumps.push(jump);
                        Ok(())
                    }
                    None => Err(self.error("continue outside of loop", *span)),
                }
            }
            Stmt::Import { spec, alias, span } => {
                let index = self.add_constant(Value::str(spec.clone()), *span)?;
                self.emit_u16(Opcode::Import, index);
                let symbol = self.symbols.define(alias);
                self.store_symbol(&symbol);
                Ok(())
            }
            Stmt::Export(export) => self.compile_export(export),
        }
    }

    fn compile_export(&mut self, export: &ExportStmt) -> Result<(), CompileError> {
        if !self.symbols.is_global() {
            return Err(self.error("export only allowed at top level", export.span));
        }
        match &export.item {
            ExportItem::Assign { name, value, .. } => {
                self.compile_expr(value)?;
                let symbol = self.assign_symbol(name);
                self.exports.push((name.clone(), symbol.index));
                self.store_symbol(&symbol);
            }
            ExportItem::Fn(decl) => {
                let symbol = self.symbols.define(&decl.name);
                self.exports.push((decl.name.clone(), symbol.index));
                self.compile_function(
                    Some(decl.name.clone()),
                    &decl.params,
                    &decl.body,
                    decl.span,
                )?;
                self.store_symbol(&symbol);
            }
        }
        Ok(())
    }

    fn compile_if(&mut self, stmt: &IfStmt) -> Result<(), CompileError> {
        self.compile_expr(&stmt.cond)?;
        let skip_then = self.emit_jump(Opcode::JumpIfFalse);
        self.compile_block(&stmt.then_block)?;

        match &stmt.else_branch {
            None => self.patch_jump_here(skip_then, stmt.span)?,
            Some(branch) => {
                let skip_else = self.emit_jump(Opcode::Jump);
                self.patch_jump_here(skip_then, stmt.span)?;
                match branch {
                    ElseBranch::ElseIf(inner) => self.compile_if(inner)?,
                    ElseBranch::Else(block) => self.compile_block(block)?,
                }
                self.patch_jump_here(skip_else, stmt.span)?;
            }
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block, span: Span) -> Result<(), CompileError> {
        let start = self.current_offset();
        self.compile_expr(cond)?;
        let exit = self.emit_jump(Opcode::JumpIfFalse);

        self.loops.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
        });
        self.compile_block(body)?;
        let ctx = self.loops.pop().expect("loop context pushed above");

        let back = self.jump_target(start, span)?;
        self.emit_u16(Opcode::Jump, back);
        self.patch_jump_here(exit, span)?;
        let end = self.current_offset();
        for jump in ctx.break_jumps {
            self.patch_jump(jump, end, span)?;
        }
        for jump in ctx.continue_jumps {
            self.patch_jump(jump, start, span)?;
        }
        Ok(())
    }

    /// `for x in e` lowers onto the shared `iter`/`len` builtins and an index
    /// counter, so both engines iterate identically:
    ///
    /// ```text
    /// __it = iter(e); __i = 0
    /// while __i < len(__it) { x = __it[__i]; <body>; __i = __i + 1 }
    /// ```
    fn compile_for(
        &mut self,
        var: &str,
        iterable: &Expr,
        body: &Block,
        span: Span,
    ) -> Result<(), CompileError> {
        let (iter_slot, _, _) =
            builtins::lookup("iter").expect("iter is a registered builtin");
        let (len_slot, _, _) = builtins::lookup("len").expect("len is a registered builtin");

        // __it = iter(e)
        self.emit_u16(Opcode::GetBuiltin, iter_slot as u16);
        self.compile_expr(iterable)?;
        self.emit(Opcode::Call);
        self.current().push(1);
        let items_name = self.hidden_name("for_items");
        let items = self.symbols.define(&items_name);
        self.store_symbol(&items);

        // __i = 0
        let zero = self.add_constant(Value::Int(0), span)?;
        self.emit_u16(Opcode::Constant, zero);
        let index_name = self.hidden_name("for_index");
        let index = self.symbols.define(&index_name);
        self.store_symbol(&index);

        let loop_var = self.symbols.define(var);

        // while __i < len(__it)
        let start = self.current_offset();
        self.load_symbol(&index);
        self.emit_u16(Opcode::GetBuiltin, len_slot as u16);
        self.load_symbol(&items);
        self.emit(Opcode::Call);
        self.current().push(1);
        self.emit(Opcode::Less);
        let exit = self.emit_jump(Opcode::JumpIfFalse);

        // x = __it[__i]
        self.load_symbol(&items);
        self.load_symbol(&index);
        self.emit(Opcode::Index);
        self.store_symbol(&loop_var);

        self.loops.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
        });
        self.compile_block(body)?;
        let ctx = self.loops.pop().expect("loop context pushed above");

        // __i = __i + 1
        let increment = self.current_offset();
        self.load_symbol(&index);
        let one = self.add_constant(Value::Int(1), span)?;
        self.emit_u16(Opcode::Constant, one);
        self.emit(Opcode::Add);
        self.store_symbol(&index);

        let back = self.jump_target(start, span)?;
        self.emit_u16(Opcode::Jump, back);
        self.patch_jump_here(exit, span)?;
        let end = self.current_offset();
        for jump in ctx.break_jumps {
            self.patch_jump(jump, end, span)?;
        }
        for jump in ctx.continue_jumps {
            self.patch_jump(jump, increment, span)?;
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stmt in &block.statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    // ===== Functions =====

    fn compile_function(
        &mut self,
        name: Option<String>,
        params: &[String],
        body: &Block,
        span: Span,
    ) -> Result<(), CompileError> {
        self.symbols = SymbolTable::enclosed(std::mem::take(&mut self.symbols));
        self.scopes.push(Scope::default());
        for param in params {
            self.symbols.define(param);
        }

        // The body returns its trailing expression, nil otherwise.
        match body.statements.split_last() {
            None => self.emit(Opcode::Return),
            Some((last, init)) => {
                for stmt in init {
                    self.compile_stmt(stmt)?;
                }
                match last {
                    Stmt::Expr(expr) => {
                        self.compile_expr(expr)?;
                        self.emit(Opcode::ReturnValue);
                    }
                    Stmt::Return { .. } => self.compile_stmt(last)?,
                    other => {
                        self.compile_stmt(other)?;
                        self.emit(Opcode::Return);
                    }
                }
            }
        }

        let scope = self.scopes.pop().expect("function scope pushed above");
        let table = std::mem::take(&mut self.symbols);
        let (free, num_locals, outer) = table.into_parts();
        self.symbols = outer.expect("function scope has an enclosing scope");

        if free.len() > u8::MAX as usize {
            return Err(self.error("too many captured variables", span));
        }

        let func = CompiledFunction {
            instructions: scope.instructions,
            num_locals: num_locals as usize,
            num_params: params.len(),
            name,
        };
        let index = self.add_constant(Value::CompiledFunction(Arc::new(func)), span)?;
        for symbol in &free {
            self.load_symbol(symbol);
        }
        self.emit(Opcode::Closure);
        let count = free.len() as u8;
        let ins = self.current();
        ins.push((index >> 8) as u8);
        ins.push((index & 0xFF) as u8);
        ins.push(count);
        Ok(())
    }

    // ===== Expressions =====

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Int { value, span } => {
                let index = self.add_constant(Value::Int(*value), *span)?;
                self.emit_u16(Opcode::Constant, index);
                Ok(())
            }
            Expr::Float { value, span } => {
                let index = self.add_constant(Value::Float(*value), *span)?;
                self.emit_u16(Opcode::Constant, index);
                Ok(())
            }
            Expr::Str { value, span } => {
                let index = self.add_constant(Value::str(value.clone()), *span)?;
                self.emit_u16(Opcode::Constant, index);
                Ok(())
            }
            Expr::Bool { value, .. } => {
                self.emit(if *value { Opcode::True } else { Opcode::False });
                Ok(())
            }
            Expr::Nil { .. } => {
                self.emit(Opcode::Nil);
                Ok(())
            }
            Expr::Ident { name, span } => {
                let symbol = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| self.error(format!("identifier not found: {name}"), *span))?;
                self.load_symbol(&symbol);
                Ok(())
            }
            Expr::Prefix { op, operand, .. } => {
                self.compile_expr(operand)?;
                self.emit(match op {
                    PrefixOp::Neg => Opcode::Minus,
                    PrefixOp::Not => Opcode::Bang,
                });
                Ok(())
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                match op {
                    BinaryOp::Add => self.emit(Opcode::Add),
                    BinaryOp::Sub => self.emit(Opcode::Sub),
                    BinaryOp::Mul => self.emit(Opcode::Mul),
                    BinaryOp::Div => self.emit(Opcode::Div),
                    BinaryOp::Mod => self.emit(Opcode::Mod),
                    BinaryOp::Eq => self.emit(Opcode::Equal),
                    BinaryOp::NotEq => self.emit(Opcode::NotEqual),
                    BinaryOp::Lt => self.emit(Opcode::Less),
                    BinaryOp::Gt => self.emit(Opcode::Greater),
                    // a <= b  is  !(a > b);  a >= b  is  !(a < b)
                    BinaryOp::LtEq => {
                        self.emit(Opcode::Greater);
                        self.emit(Opcode::Bang);
                    }
                    BinaryOp::GtEq => {
                        self.emit(Opcode::Less);
                        self.emit(Opcode::Bang);
                    }
                }
                Ok(())
            }
            Expr::Logical {
                op,
                left,
                right,
                span,
            } => self.compile_logical(*op, left, right, *span),
            Expr::Call { callee, args, span } => {
                self.compile_expr(callee)?;
                if args.len() > u8::MAX as usize {
                    return Err(self.error("too many call arguments", *span));
                }
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(Opcode::Call);
                let count = args.len() as u8;
                self.current().push(count);
                Ok(())
            }
            Expr::Index { target, index, .. } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit(Opcode::Index);
                Ok(())
            }
            Expr::Member { target, name, span } => {
                self.compile_expr(target)?;
                let index = self.add_constant(Value::str(name.clone()), *span)?;
                self.emit_u16(Opcode::Constant, index);
                self.emit(Opcode::Index);
                Ok(())
            }
            Expr::List { elements, span } => {
                if elements.len() > u16::MAX as usize {
                    return Err(self.error("list literal too large", *span));
                }
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit_u16(Opcode::List, elements.len() as u16);
                Ok(())
            }
            Expr::Dict { pairs, span } => {
                if pairs.len() * 2 > u16::MAX as usize {
                    return Err(self.error("dict literal too large", *span));
                }
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit_u16(Opcode::Dict, (pairs.len() * 2) as u16);
                Ok(())
            }
            Expr::FnExpr { params, body, span } => {
                self.compile_function(None, params, body, *span)
            }
        }
    }

    /// `and`/`or` lower to jump chains over `True`/`False`, evaluating to a
    /// boolean and skipping the right operand when the left decides.
    fn compile_logical(
        &mut self,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
        span: Span,
    ) -> Result<(), CompileError> {
        match op {
            LogicalOp::And => {
                self.compile_expr(left)?;
                let left_false = self.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(right)?;
                let right_false = self.emit_jump(Opcode::JumpIfFalse);
                self.emit(Opcode::True);
                let done = self.emit_jump(Opcode::Jump);
                self.patch_jump_here(left_false, span)?;
                self.patch_jump_here(right_false, span)?;
                self.emit(Opcode::False);
                self.patch_jump_here(done, span)?;
            }
            LogicalOp::Or => {
                self.compile_expr(left)?;
                let try_right = self.emit_jump(Opcode::JumpIfFalse);
                self.emit(Opcode::True);
                let done_left = self.emit_jump(Opcode::Jump);
                self.patch_jump_here(try_right, span)?;
                self.compile_expr(right)?;
                let right_false = self.emit_jump(Opcode::JumpIfFalse);
                self.emit(Opcode::True);
                let done_right = self.emit_jump(Opcode::Jump);
                self.patch_jump_here(right_false, span)?;
                self.emit(Opcode::False);
                self.patch_jump_here(done_left, span)?;
                self.patch_jump_here(done_right, span)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::disassemble;
    use crate::parser::parse_source;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Bytecode {
        let program = parse_source(source).expect("parse failed");
        Compiler::new(Path::new("test.wll"))
            .compile(&program)
            .expect("compile failed")
    }

    fn compile_err(source: &str) -> CompileError {
        let program = parse_source(source).expect("parse failed");
        Compiler::new(Path::new("test.wll"))
            .compile(&program)
            .expect_err("expected compile error")
    }

    #[test]
    fn test_constant_arithmetic() {
        let code = compile("1 + 2");
        assert_eq!(
            code.instructions,
            vec![
                Opcode::Constant as u8,
                0,
                0,
                Opcode::Constant as u8,
                0,
                1,
                Opcode::Add as u8,
                Opcode::Pop as u8,
            ]
        );
        assert_eq!(code.constants, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_compile_is_pure() {
        let program = parse_source("x = 1\nfn f(a) { return a + x }\nf(2)").unwrap();
        let a = Compiler::new(Path::new("p.wll")).compile(&program).unwrap();
        let b = Compiler::new(Path::new("p.wll")).compile(&program).unwrap();
        assert_eq!(a.instructions, b.instructions);
        assert_eq!(a.constants.len(), b.constants.len());
    }

    #[test]
    fn test_global_assignment_slots() {
        let code = compile("x = 1\ny = 2\nx");
        let text = disassemble(&code);
        assert!(text.contains("SetGlobal 0"));
        assert!(text.contains("SetGlobal 1"));
        assert!(text.contains("GetGlobal 0"));
        assert_eq!(code.num_globals, 2);
    }

    #[test]
    fn test_if_jumps_are_patched_forward() {
        let code = compile("if true { 10 } else { 20 }\n30");
        // True, JumpIfFalse -> else, 10, Pop, Jump -> end, 20, Pop, end: 30 Pop
        let text = disassemble(&code);
        assert!(text.contains("0000 True"));
        assert!(text.contains("0001 JumpIfFalse 11"));
        assert!(text.contains("0008 Jump 15"));
    }

    #[test]
    fn test_unresolved_identifier_is_a_compile_error() {
        let err = compile_err("ghost");
        assert!(err.to_string().contains("identifier not found: ghost"));
        assert!(err.to_string().starts_with("test.wll:1:1"));
    }

    #[test]
    fn test_function_literal_and_locals() {
        let code = compile("fn add(a, b) { return a + b }");
        let func = code
            .constants
            .iter()
            .find_map(|c| match c {
                Value::CompiledFunction(f) => Some(f.clone()),
                _ => None,
            })
            .expect("function constant");
        assert_eq!(func.num_params, 2);
        assert_eq!(func.num_locals, 2);
        assert_eq!(
            func.instructions,
            vec![
                Opcode::GetLocal as u8,
                0,
                0,
                Opcode::GetLocal as u8,
                0,
                1,
                Opcode::Add as u8,
                Opcode::ReturnValue as u8,
            ]
        );
    }

    #[test]
    fn test_implicit_return_of_trailing_expression() {
        let code = compile("fn f() { 41 + 1 }");
        let func = code
            .constants
            .iter()
            .find_map(|c| match c {
                Value::CompiledFunction(f) => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            *func.instructions.last().unwrap(),
            Opcode::ReturnValue as u8
        );

        let code = compile("fn g() { x = 1 }");
        let func = code
            .constants
            .iter()
            .find_map(|c| match c {
                Value::CompiledFunction(f) => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(*func.instructions.last().unwrap(), Opcode::Return as u8);
    }

    #[test]
    fn test_closure_captures_free_variable() {
        let code = compile("fn outer(n) { return fn(x) { return x + n } }");
        // the inner function reads its parameter and one upvalue
        let inner = code
            .constants
            .iter()
            .find_map(|c| match c {
                Value::CompiledFunction(f) if f.num_params == 1 && f.name.is_none() => {
                    Some(f.clone())
                }
                _ => None,
            })
            .expect("inner function constant");
        assert!(inner
            .instructions
            .windows(3)
            .any(|w| w[0] == Opcode::GetFree as u8 && w[2] == 0));

        // the outer function loads the captured local before Closure
        let outer = code
            .constants
            .iter()
            .find_map(|c| match c {
                Value::CompiledFunction(f) if f.name.as_deref() == Some("outer") => {
                    Some(f.clone())
                }
                _ => None,
            })
            .expect("outer function constant");
        let closure_at = outer
            .instructions
            .iter()
            .position(|&b| b == Opcode::Closure as u8)
            .expect("closure emission");
        assert_eq!(outer.instructions[closure_at + 3], 1); // one upvalue
        assert_eq!(outer.instructions[closure_at - 3], Opcode::GetLocal as u8);
    }

    #[test]
    fn test_builtin_call_uses_registry_slot() {
        let code = compile("print(1)");
        let text = disassemble(&code);
        assert!(text.contains("GetBuiltin 0"));
        assert!(text.contains("Call 1"));
    }

    #[test]
    fn test_lteq_compiles_to_negated_greater() {
        let code = compile("1 <= 2");
        assert_eq!(
            &code.instructions[6..8],
            &[Opcode::Greater as u8, Opcode::Bang as u8]
        );
        let code = compile("1 >= 2");
        assert_eq!(
            &code.instructions[6..8],
            &[Opcode::Less as u8, Opcode::Bang as u8]
        );
    }

    #[test]
    fn test_export_records_slots() {
        let code = compile("export x = 1\nexport fn f() { return x }\ny = 3");
        assert_eq!(
            code.exports,
            vec![("x".to_string(), 0), ("f".to_string(), 1)]
        );
    }

    #[test]
    fn test_import_emits_spec_constant_and_binding() {
        let code = compile("import \"std:math\" as math\nmath");
        let text = disassemble(&code);
        assert!(text.contains("Import 0 (\"std:math\")"));
        assert!(text.contains("SetGlobal 0"));
    }

    #[test]
    fn test_while_loop_shape() {
        let code = compile("i = 0\nwhile i < 3 { i = i + 1 }");
        let text = disassemble(&code);
        // the loop jumps back to the condition at offset 6
        assert!(text.contains("Jump 6"));
    }

    #[test]
    fn test_assignment_to_captured_name_shadows() {
        // no store-upvalue instruction exists; the inner assignment defines
        // a fresh local
        let code = compile("fn outer() { c = 0\nreturn fn() { c = 1\nreturn c } }");
        let inner = code
            .constants
            .iter()
            .find_map(|c| match c {
                Value::CompiledFunction(f) if f.name.is_none() && f.num_params == 0 => {
                    Some(f.clone())
                }
                _ => None,
            })
            .expect("inner function constant");
        assert!(inner
            .instructions
            .windows(3)
            .any(|w| w[0] == Opcode::SetLocal as u8));
    }
}
