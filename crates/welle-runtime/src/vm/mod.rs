//! Stack-based virtual machine
//!
//! Executes bytecode with a fixed-capacity operand stack shared across call
//! frames, a single globals vector partitioned between modules by base
//! offset, and a module cache keyed by absolute path. Imports go through an
//! injected importer closure that calls back into the module loader.

mod frame;

pub use frame::Frame;

use crate::ast::{BinaryOp, PrefixOp};
use crate::builtins;
use crate::bytecode::{Bytecode, Opcode};
use crate::limits::{EngineCtx, OutputWriter};
use crate::ops;
use crate::value::{
    ClosureRef, CompiledFunction, ModuleExports, RuntimeError, Value, ValueDict,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Operand stack capacity.
pub const STACK_SIZE: usize = 2048;
/// Total global slots shared by the entry module and everything it imports.
pub const GLOBALS_SIZE: usize = 65536;
/// Global slots reserved for the entry module. REPL entries keep extending
/// the entry module's global space, so imported modules allocate above this
/// watermark.
pub const ENTRY_GLOBALS_RESERVE: usize = 8192;

/// Resolves an import spec for the VM, returning compiled bytecode and the
/// module's absolute path. Failures are surfaced as runtime import errors
/// with their message text intact.
pub type Importer =
    Box<dyn FnMut(&Path, &str) -> Result<(Arc<Bytecode>, PathBuf), String> + Send>;

/// Per-module execution context: the module's constant pool, origin file,
/// and its slice of the shared globals vector.
#[derive(Debug)]
pub struct ModuleUnit {
    pub constants: Vec<Value>,
    pub origin: PathBuf,
    pub globals_base: usize,
    pub num_globals: usize,
    pub exports: Vec<(String, u16)>,
}

/// VM state that outlives a single run; the REPL threads this through
/// successive entries.
pub struct VmState {
    pub globals: Vec<Value>,
    module_cache: HashMap<PathBuf, Value>,
    units: HashMap<PathBuf, Arc<ModuleUnit>>,
    next_global_base: usize,
}

impl VmState {
    pub fn new() -> Self {
        Self {
            globals: vec![Value::Nil; GLOBALS_SIZE],
            module_cache: HashMap::new(),
            units: HashMap::new(),
            next_global_base: ENTRY_GLOBALS_RESERVE,
        }
    }
}

impl Default for VmState {
    fn default() -> Self {
        Self::new()
    }
}

/// Virtual machine
pub struct VM {
    stack: Vec<Value>,
    /// Stack pointer: the next free slot. `stack[sp]` is the most recently
    /// popped value.
    sp: usize,
    frames: Vec<Frame>,
    state: VmState,
    importer: Option<Importer>,
    max_recursion: u64,
    max_steps: u64,
    steps: u64,
    ctx: EngineCtx,
}

impl VM {
    /// A VM ready to run `bytecode` as its entry module.
    pub fn new(bytecode: &Bytecode) -> Self {
        Self::with_state(bytecode, VmState::new())
    }

    /// A VM reusing globals, module cache, and module units from an earlier
    /// run. The entry module always occupies the reserved low global slots.
    pub fn with_state(bytecode: &Bytecode, mut state: VmState) -> Self {
        let unit = Arc::new(ModuleUnit {
            constants: bytecode.constants.clone(),
            origin: bytecode.origin.clone(),
            globals_base: 0,
            num_globals: bytecode.num_globals as usize,
            exports: bytecode.exports.clone(),
        });
        state.units.insert(bytecode.origin.clone(), unit.clone());

        let main = ClosureRef {
            func: Arc::new(CompiledFunction {
                instructions: bytecode.instructions.clone(),
                num_locals: 0,
                num_params: 0,
                name: None,
            }),
            free: Arc::new(Vec::new()),
            unit,
        };

        Self {
            stack: vec![Value::Nil; STACK_SIZE],
            sp: 0,
            frames: vec![Frame::new(main, 0, false)],
            state,
            importer: None,
            max_recursion: 0,
            max_steps: 0,
            steps: 0,
            ctx: EngineCtx::new(),
        }
    }

    pub fn set_importer(&mut self, importer: Importer) {
        self.importer = Some(importer);
    }

    /// `0` disables the recursion limit.
    pub fn set_max_recursion(&mut self, limit: u64) {
        self.max_recursion = limit;
    }

    /// `0` disables the step limit.
    pub fn set_max_steps(&mut self, limit: u64) {
        self.max_steps = limit;
    }

    /// `0` disables the memory budget.
    pub fn set_max_memory(&mut self, bytes: u64) {
        self.ctx.meter.set_limit(bytes);
    }

    pub fn set_output(&mut self, output: OutputWriter) {
        self.ctx.output = output;
    }

    /// Recover the persistent state for the next REPL entry.
    pub fn into_state(self) -> VmState {
        self.state
    }

    /// The slot just above the live stack: the value most recently popped.
    /// The REPL echoes this after each entry.
    pub fn last_popped_stack_elem(&self) -> Value {
        self.stack[self.sp].clone()
    }

    /// Run to completion. Returns the last popped value.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            self.steps += 1;
            if self.max_steps > 0 && self.steps > self.max_steps {
                return Err(RuntimeError::StepLimit(self.max_steps));
            }

            let at_end = {
                let frame = self.current_frame();
                frame.ip >= frame.closure.func.instructions.len()
            };
            if at_end {
                if self.frames.len() == 1 {
                    break;
                }
                // A module body (or malformed function) ran off its stream:
                // behave like Return.
                self.finish_frame(Value::Nil)?;
                continue;
            }

            let op = self.read_opcode()?;
            match op {
                // ===== Constants =====
                Opcode::Constant => {
                    let index = self.read_u16() as usize;
                    let value = self.constant(index)?;
                    self.ctx.meter.charge(value.alloc_cost())?;
                    self.push(value)?;
                }
                Opcode::Nil => self.push(Value::Nil)?,
                Opcode::True => self.push(Value::Bool(true))?,
                Opcode::False => self.push(Value::Bool(false))?,

                // ===== Arithmetic =====
                Opcode::Add => self.binary(BinaryOp::Add)?,
                Opcode::Sub => self.binary(BinaryOp::Sub)?,
                Opcode::Mul => self.binary(BinaryOp::Mul)?,
                Opcode::Div => self.binary(BinaryOp::Div)?,
                Opcode::Mod => self.binary(BinaryOp::Mod)?,

                // ===== Comparison =====
                Opcode::Equal => self.binary(BinaryOp::Eq)?,
                Opcode::NotEqual => self.binary(BinaryOp::NotEq)?,
                Opcode::Less => self.binary(BinaryOp::Lt)?,
                Opcode::Greater => self.binary(BinaryOp::Gt)?,

                // ===== Prefix =====
                Opcode::Minus => {
                    let operand = self.pop()?;
                    let value = ops::prefix(PrefixOp::Neg, &operand)?;
                    self.push(value)?;
                }
                Opcode::Bang => {
                    let operand = self.pop()?;
                    let value = ops::prefix(PrefixOp::Not, &operand)?;
                    self.push(value)?;
                }

                // ===== Control flow =====
                Opcode::Jump => {
                    let target = self.read_u16() as usize;
                    self.current_frame_mut().ip = target;
                }
                Opcode::JumpIfFalse => {
                    let target = self.read_u16() as usize;
                    let cond = self.pop()?;
                    if !ops::is_truthy(&cond) {
                        self.current_frame_mut().ip = target;
                    }
                }

                // ===== Variables =====
                Opcode::GetGlobal => {
                    let slot = self.read_u16() as usize;
                    let base = self.current_frame().closure.unit.globals_base;
                    let value = self.state.globals[base + slot].clone();
                    self.push(value)?;
                }
                Opcode::SetGlobal => {
                    let slot = self.read_u16() as usize;
                    let base = self.current_frame().closure.unit.globals_base;
                    let value = self.pop()?;
                    self.state.globals[base + slot] = value;
                }
                Opcode::GetLocal => {
                    let slot = self.read_u16() as usize;
                    let base = self.current_frame().base;
                    let value = self.stack[base + slot].clone();
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let slot = self.read_u16() as usize;
                    let base = self.current_frame().base;
                    let value = self.pop()?;
                    self.stack[base + slot] = value;
                }
                Opcode::GetBuiltin => {
                    let slot = self.read_u16() as usize;
                    let (name, _) = builtins::by_index(slot).ok_or_else(|| {
                        RuntimeError::BadBytecode(format!("unknown builtin slot {slot}"))
                    })?;
                    self.push(Value::Builtin(name))?;
                }
                Opcode::GetFree => {
                    let slot = self.read_u16() as usize;
                    let value = self.current_frame().closure.free[slot].clone();
                    self.push(value)?;
                }

                // ===== Functions =====
                Opcode::Closure => {
                    let index = self.read_u16() as usize;
                    let count = self.read_u8() as usize;
                    self.make_closure(index, count)?;
                }
                Opcode::Call => {
                    let argc = self.read_u8() as usize;
                    self.call(argc)?;
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    if self.frames.len() == 1 {
                        return Err(RuntimeError::BadBytecode(
                            "return outside of a function frame".to_string(),
                        ));
                    }
                    self.finish_frame(value)?;
                }
                Opcode::Return => {
                    if self.frames.len() == 1 {
                        return Err(RuntimeError::BadBytecode(
                            "return outside of a function frame".to_string(),
                        ));
                    }
                    self.finish_frame(Value::Nil)?;
                }

                // ===== Collections =====
                Opcode::List => {
                    let count = self.read_u16() as usize;
                    let elements = self.take_top(count)?;
                    let value = ops::build_list(elements, &mut self.ctx.meter)?;
                    self.push(value)?;
                }
                Opcode::Dict => {
                    let count = self.read_u16() as usize;
                    let mut flat = self.take_top(count)?;
                    let mut pairs = Vec::with_capacity(count / 2);
                    for _ in 0..count / 2 {
                        let value = flat.pop().expect("take_top returned count values");
                        let key = flat.pop().expect("take_top returned count values");
                        pairs.push((key, value));
                    }
                    pairs.reverse();
                    let value = ops::build_dict(pairs, &mut self.ctx.meter)?;
                    self.push(value)?;
                }
                Opcode::Index => {
                    let key = self.pop()?;
                    let target = self.pop()?;
                    let value = ops::index(&target, &key, &mut self.ctx.meter)?;
                    self.push(value)?;
                }

                // ===== Stack =====
                Opcode::Pop => {
                    self.pop()?;
                }

                // ===== Modules =====
                Opcode::Import => {
                    let index = self.read_u16() as usize;
                    self.import(index)?;
                }
            }
        }
        Ok(self.last_popped_stack_elem())
    }

    // ===== Dispatch helpers =====

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("frame stack is never empty")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack is never empty")
    }

    fn read_opcode(&mut self) -> Result<Opcode, RuntimeError> {
        let frame = self.current_frame_mut();
        let byte = frame.closure.func.instructions[frame.ip];
        frame.ip += 1;
        Opcode::try_from(byte)
            .map_err(|b| RuntimeError::BadBytecode(format!("unknown opcode 0x{b:02X}")))
    }

    fn read_u8(&mut self) -> u8 {
        let frame = self.current_frame_mut();
        let byte = frame.closure.func.instructions[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.current_frame_mut();
        let ins = &frame.closure.func.instructions;
        let value = ((ins[frame.ip] as u16) << 8) | ins[frame.ip + 1] as u16;
        frame.ip += 2;
        value
    }

    fn constant(&self, index: usize) -> Result<Value, RuntimeError> {
        self.current_frame()
            .closure
            .unit
            .constants
            .get(index)
            .cloned()
            .ok_or_else(|| RuntimeError::BadBytecode(format!("constant {index} out of range")))
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        if self.sp == 0 {
            return Err(RuntimeError::BadBytecode("stack underflow".to_string()));
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    /// Remove and return the top `count` values in pushed order.
    fn take_top(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        if self.sp < count {
            return Err(RuntimeError::BadBytecode("stack underflow".to_string()));
        }
        let values = self.stack[self.sp - count..self.sp].to_vec();
        self.sp -= count;
        Ok(values)
    }

    fn binary(&mut self, op: BinaryOp) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let value = ops::binary(op, &left, &right, &mut self.ctx.meter)?;
        self.push(value)
    }

    // ===== Calls and returns =====

    fn make_closure(&mut self, index: usize, count: usize) -> Result<(), RuntimeError> {
        let constant = self.constant(index)?;
        let func = match constant {
            Value::CompiledFunction(func) => func,
            other => {
                return Err(RuntimeError::BadBytecode(format!(
                    "closure over non-function constant ({})",
                    other.type_name()
                )))
            }
        };
        let free = self.take_top(count)?;
        let closure = Value::Closure(ClosureRef {
            func,
            free: Arc::new(free),
            unit: self.current_frame().closure.unit.clone(),
        });
        self.ctx.meter.charge(closure.alloc_cost())?;
        self.push(closure)
    }

    fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
        if self.sp < argc + 1 {
            return Err(RuntimeError::BadBytecode("stack underflow".to_string()));
        }
        let callee = self.stack[self.sp - 1 - argc].clone();
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::Builtin(name) => self.call_builtin(name, argc),
            other => Err(RuntimeError::NotCallable(other.type_name())),
        }
    }

    fn call_closure(&mut self, closure: ClosureRef, argc: usize) -> Result<(), RuntimeError> {
        if argc != closure.func.num_params {
            return Err(RuntimeError::WrongArity {
                want: closure.func.num_params,
                got: argc,
            });
        }
        self.check_recursion()?;
        let base = self.sp - argc;
        let new_sp = base + closure.func.num_locals;
        if new_sp > STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        // Non-parameter locals start as nil; stale stack slots must not leak
        // into a fresh frame.
        for slot in &mut self.stack[base + argc..new_sp] {
            *slot = Value::Nil;
        }
        self.sp = new_sp;
        self.frames.push(Frame::new(closure, base, false));
        Ok(())
    }

    fn call_builtin(&mut self, name: &'static str, argc: usize) -> Result<(), RuntimeError> {
        let (_, _, native) = builtins::lookup(name)
            .ok_or_else(|| RuntimeError::BadBytecode(format!("unknown builtin {name}")))?;
        let args = self.take_top(argc)?;
        self.pop()?; // the builtin value itself
        let result = native(&args, &mut self.ctx)?;
        self.push(result)
    }

    fn check_recursion(&self) -> Result<(), RuntimeError> {
        if self.max_recursion > 0 && self.frames.len() as u64 > self.max_recursion {
            return Err(RuntimeError::RecursionLimit(self.max_recursion));
        }
        Ok(())
    }

    /// Unwind the top frame. Ordinary frames push `value`; import frames
    /// freeze and push their module's exports instead.
    fn finish_frame(&mut self, value: Value) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().expect("finish_frame requires a frame");
        self.sp = if frame.base == 0 { 0 } else { frame.base - 1 };
        if frame.is_import {
            let module = self.freeze_module(&frame.closure.unit)?;
            self.state
                .module_cache
                .insert(frame.closure.unit.origin.clone(), module.clone());
            self.push(module)
        } else {
            self.push(value)
        }
    }

    fn freeze_module(&mut self, unit: &ModuleUnit) -> Result<Value, RuntimeError> {
        let mut exports = ValueDict::new();
        for (name, slot) in &unit.exports {
            let value = self.state.globals[unit.globals_base + *slot as usize].clone();
            exports.insert(name.clone(), value);
        }
        let dict = Value::Dict(exports.clone());
        self.ctx.meter.charge(dict.alloc_cost())?;
        let module = Value::Module(Arc::new(ModuleExports {
            path: unit.origin.clone(),
            exports,
        }));
        self.ctx.meter.charge(module.alloc_cost())?;
        Ok(module)
    }

    // ===== Imports =====

    fn import(&mut self, index: usize) -> Result<(), RuntimeError> {
        let spec = match self.constant(index)? {
            Value::Str(s) => s.as_ref().clone(),
            other => {
                return Err(RuntimeError::BadBytecode(format!(
                    "import spec must be a string constant ({})",
                    other.type_name()
                )))
            }
        };
        let from = self.current_frame().closure.unit.origin.clone();
        let importer = self
            .importer
            .as_mut()
            .ok_or_else(|| RuntimeError::Import("imports are disabled".to_string()))?;
        let (bytecode, abs) = importer(&from, &spec).map_err(RuntimeError::Import)?;

        if let Some(module) = self.state.module_cache.get(&abs) {
            let module = module.clone();
            return self.push(module);
        }

        self.check_recursion()?;
        let unit = self.unit_for(&bytecode, &abs)?;
        let closure = ClosureRef {
            func: Arc::new(CompiledFunction {
                instructions: bytecode.instructions.clone(),
                num_locals: 0,
                num_params: 0,
                name: None,
            }),
            free: Arc::new(Vec::new()),
            unit,
        };
        self.push(Value::Closure(closure.clone()))?;
        let base = self.sp;
        self.frames.push(Frame::new(closure, base, true));
        Ok(())
    }

    /// Fetch or allocate the module unit for `abs`, claiming a region of the
    /// shared globals vector on first use.
    fn unit_for(
        &mut self,
        bytecode: &Bytecode,
        abs: &Path,
    ) -> Result<Arc<ModuleUnit>, RuntimeError> {
        if let Some(unit) = self.state.units.get(abs) {
            return Ok(unit.clone());
        }
        let base = self.state.next_global_base;
        let num_globals = bytecode.num_globals as usize;
        if base + num_globals > GLOBALS_SIZE {
            return Err(RuntimeError::Import(format!(
                "globals capacity exceeded loading {}",
                abs.display()
            )));
        }
        self.state.next_global_base = base + num_globals;
        let unit = Arc::new(ModuleUnit {
            constants: bytecode.constants.clone(),
            origin: abs.to_path_buf(),
            globals_base: base,
            num_globals,
            exports: bytecode.exports.clone(),
        });
        self.state.units.insert(abs.to_path_buf(), unit.clone());
        Ok(unit)
    }
}
