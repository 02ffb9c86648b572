//! A small stack interpreter for code units.
//!
//! Executes instrumented code inline on the calling thread, firing
//! call/line/return/exception events through the instrumentation
//! registry when the thread is in callback-trace mode.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::error::RuntimeError;
use crate::frame::Frame;
use crate::runtime::FunctionTable;
use crate::thread::ThreadId;
use crate::trace::{ContextEntry, InstrumentationRegistry, TraceEventKind, TraceMode};
use crate::value::Value;

use super::code::{CodeUnit, Instr};
use super::opcode::{CompareOp, Opcode};

/// Default instruction budget; exceeded budgets abort execution.
pub const DEFAULT_BUDGET: u64 = 1_000_000;

/// Interpreter state: globals, observable output, and optional
/// instrumentation plumbing.
pub struct Interpreter {
    globals: FxHashMap<SmolStr, Value>,
    output: Vec<Value>,
    instrumentation: Option<(Arc<InstrumentationRegistry>, ThreadId)>,
    functions: Option<Arc<FunctionTable>>,
    budget: u64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create an uninstrumented interpreter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            globals: FxHashMap::default(),
            output: Vec::new(),
            instrumentation: None,
            functions: None,
            budget: DEFAULT_BUDGET,
        }
    }

    /// Attach the instrumentation registry; events are tagged with
    /// `thread`.
    #[must_use]
    pub fn with_instrumentation(
        mut self,
        registry: Arc<InstrumentationRegistry>,
        thread: ThreadId,
    ) -> Self {
        self.instrumentation = Some((registry, thread));
        self
    }

    /// Attach a function table for `Call` resolution.
    #[must_use]
    pub fn with_functions(mut self, functions: Arc<FunctionTable>) -> Self {
        self.functions = Some(functions);
        self
    }

    /// Values emitted by `Emit` instructions, in order.
    #[must_use]
    pub fn output(&self) -> &[Value] {
        &self.output
    }

    /// Set a global binding.
    pub fn set_global(&mut self, name: impl Into<SmolStr>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Execute a code unit as the entry frame.
    pub fn run(&mut self, code: &Arc<CodeUnit>, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.call(code, args, 0)
    }

    fn trace(&self, frame: &Frame, kind: TraceEventKind) {
        if let Some((registry, thread)) = &self.instrumentation {
            registry.dispatch(*thread, frame, kind);
        }
    }

    /// Run one call, bracketed by a saved tracing context so hooks that
    /// unwind across this boundary can restore the caller's view.
    fn call(
        &mut self,
        code: &Arc<CodeUnit>,
        args: Vec<Value>,
        depth: u32,
    ) -> Result<Value, RuntimeError> {
        if let Some((registry, thread)) = &self.instrumentation {
            registry.push_context(
                *thread,
                ContextEntry {
                    tracing_file: registry.thread_mode(*thread) == TraceMode::CallbackTrace,
                    file: code.file.clone(),
                    last_line: code.lines.first().map_or(0, |entry| entry.line),
                },
            );
        }
        let result = self.call_inner(code, args, depth);
        if let Some((registry, thread)) = &self.instrumentation {
            let _ = registry.pop_context(*thread);
        }
        result
    }

    fn call_inner(
        &mut self,
        code: &Arc<CodeUnit>,
        args: Vec<Value>,
        depth: u32,
    ) -> Result<Value, RuntimeError> {
        let instrs = code.instructions()?;
        let mut index_of: FxHashMap<usize, usize> = FxHashMap::default();
        for (idx, instr) in instrs.iter().enumerate() {
            index_of.insert(instr.offset, idx);
        }
        let line_starts: FxHashMap<usize, u32> = code
            .lines
            .iter()
            .map(|entry| (entry.offset, entry.line))
            .collect();

        let mut frame = Frame::new(Arc::clone(code), args, depth);
        self.trace(&frame, TraceEventKind::Call);

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0_usize;
        while pc < instrs.len() {
            let instr = instrs[pc];
            frame.lasti = instr.offset;
            if let Some(&line) = line_starts.get(&instr.offset) {
                frame.line = line;
                self.trace(&frame, TraceEventKind::Line(line));
            }
            if self.budget == 0 {
                return Err(RuntimeError::BudgetExhausted);
            }
            self.budget -= 1;

            match self.execute(&instr, code, &mut frame, &mut stack, depth)? {
                Flow::Next => pc += 1,
                Flow::JumpTo(target) => {
                    let Some(&idx) = index_of.get(&target) else {
                        let err = RuntimeError::InvalidJump(target as u32);
                        self.trace(&frame, TraceEventKind::Exception);
                        return Err(err);
                    };
                    pc = idx;
                }
                Flow::Return(value) => {
                    self.trace(&frame, TraceEventKind::Return);
                    return Ok(value);
                }
            }
        }

        // Falling off the end returns nil, like an implicit return.
        self.trace(&frame, TraceEventKind::Return);
        Ok(Value::Nil)
    }

    fn execute(
        &mut self,
        instr: &Instr,
        code: &Arc<CodeUnit>,
        frame: &mut Frame,
        stack: &mut Vec<Value>,
        depth: u32,
    ) -> Result<Flow, RuntimeError> {
        let result = self.execute_inner(instr, code, frame, stack, depth);
        if result.is_err() {
            self.trace(frame, TraceEventKind::Exception);
        }
        result
    }

    #[allow(clippy::too_many_lines)]
    fn execute_inner(
        &mut self,
        instr: &Instr,
        code: &Arc<CodeUnit>,
        frame: &mut Frame,
        stack: &mut Vec<Value>,
        depth: u32,
    ) -> Result<Flow, RuntimeError> {
        let operand = instr.operand;
        match instr.opcode {
            Opcode::Nop | Opcode::ExtendedOperand => {}
            Opcode::Pop => {
                pop(stack, instr.offset)?;
            }
            Opcode::Return => {
                let value = pop(stack, instr.offset)?;
                return Ok(Flow::Return(value));
            }
            Opcode::LoadConst => {
                let value = code
                    .consts
                    .get(operand as usize)
                    .ok_or(RuntimeError::InvalidConst(operand))?
                    .clone();
                stack.push(value);
            }
            Opcode::LoadLocal => {
                let slot = frame
                    .locals
                    .get(operand as usize)
                    .ok_or(RuntimeError::InvalidLocal(operand))?;
                let name = || {
                    code.locals
                        .get(operand as usize)
                        .cloned()
                        .unwrap_or_default()
                };
                let value = slot
                    .clone()
                    .ok_or_else(|| RuntimeError::UnboundLocal(name()))?;
                stack.push(value);
            }
            Opcode::StoreLocal => {
                let value = pop(stack, instr.offset)?;
                let slot = frame
                    .locals
                    .get_mut(operand as usize)
                    .ok_or(RuntimeError::InvalidLocal(operand))?;
                *slot = Some(value);
            }
            Opcode::LoadGlobal => {
                let name = code
                    .names
                    .get(operand as usize)
                    .ok_or(RuntimeError::InvalidName(operand))?;
                let value = self
                    .globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RuntimeError::UndefinedName(name.clone()))?;
                stack.push(value);
            }
            Opcode::StoreGlobal => {
                let name = code
                    .names
                    .get(operand as usize)
                    .ok_or(RuntimeError::InvalidName(operand))?
                    .clone();
                let value = pop(stack, instr.offset)?;
                self.globals.insert(name, value);
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul => {
                let rhs = pop(stack, instr.offset)?;
                let lhs = pop(stack, instr.offset)?;
                stack.push(binary_op(instr.opcode, &lhs, &rhs)?);
            }
            Opcode::Compare => {
                let rhs = pop(stack, instr.offset)?;
                let lhs = pop(stack, instr.offset)?;
                stack.push(Value::Bool(compare(
                    CompareOp::from_operand(operand),
                    &lhs,
                    &rhs,
                )?));
            }
            Opcode::Emit => {
                let value = pop(stack, instr.offset)?;
                self.output.push(value);
            }
            Opcode::Jump => {
                return Ok(Flow::JumpTo(operand as usize));
            }
            Opcode::JumpIfFalse => {
                let condition = pop(stack, instr.offset)?;
                if !condition.is_truthy() {
                    return Ok(Flow::JumpTo(operand as usize));
                }
            }
            Opcode::Call => {
                let name = code
                    .names
                    .get(operand as usize)
                    .ok_or(RuntimeError::InvalidName(operand))?
                    .clone();
                let callee = self
                    .functions
                    .as_ref()
                    .and_then(|table| table.lookup(&name))
                    .ok_or_else(|| RuntimeError::UndefinedName(name))?;
                let mut args = Vec::with_capacity(usize::from(callee.arg_count));
                for _ in 0..callee.arg_count {
                    args.push(pop(stack, instr.offset)?);
                }
                args.reverse();
                let result = self.call(&callee, args, depth + 1)?;
                stack.push(result);
            }
        }
        Ok(Flow::Next)
    }
}

enum Flow {
    Next,
    JumpTo(usize),
    Return(Value),
}

fn pop(stack: &mut Vec<Value>, offset: usize) -> Result<Value, RuntimeError> {
    stack.pop().ok_or(RuntimeError::StackUnderflow(offset))
}

fn binary_op(opcode: Opcode, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(match opcode {
            Opcode::Add => Value::Int(a.wrapping_add(*b)),
            Opcode::Sub => Value::Int(a.wrapping_sub(*b)),
            _ => Value::Int(a.wrapping_mul(*b)),
        }),
        (Value::Float(a), Value::Float(b)) => Ok(match opcode {
            Opcode::Add => Value::Float(a + b),
            Opcode::Sub => Value::Float(a - b),
            _ => Value::Float(a * b),
        }),
        (Value::Str(a), Value::Str(b)) if opcode == Opcode::Add => {
            Ok(Value::Str(format!("{a}{b}")))
        }
        _ => Err(RuntimeError::TypeMismatch),
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match op {
        CompareOp::Eq => Ok(ordering == Some(Ordering::Equal)),
        CompareOp::Ne => Ok(ordering != Some(Ordering::Equal)),
        _ => {
            let ordering = ordering.ok_or(RuntimeError::TypeMismatch)?;
            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Eq | CompareOp::Ne => unreachable!(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeBuilder;

    #[test]
    fn arithmetic_and_emit() {
        let mut b = CodeBuilder::new("sum", "sum.vg");
        let a = b.constant(Value::Int(2));
        let c = b.constant(Value::Int(40));
        b.op_at(1, Opcode::LoadConst, a);
        b.op(Opcode::LoadConst, c);
        b.op(Opcode::Add, 0);
        b.op_at(2, Opcode::Emit, 0);
        let nil = b.constant(Value::Nil);
        b.op_at(3, Opcode::LoadConst, nil);
        b.op(Opcode::Return, 0);
        let code = Arc::new(b.build());

        let mut interp = Interpreter::new();
        let result = interp.run(&code, Vec::new()).unwrap();
        assert_eq!(result, Value::Nil);
        assert_eq!(interp.output(), &[Value::Int(42)]);
    }

    #[test]
    fn jump_if_false_skips() {
        let mut b = CodeBuilder::new("skip", "skip.vg");
        let done = b.label();
        let f = b.constant(Value::Bool(false));
        let marker = b.constant(Value::Int(1));
        b.op_at(1, Opcode::LoadConst, f);
        b.jump_op(Opcode::JumpIfFalse, done);
        b.op_at(2, Opcode::LoadConst, marker);
        b.op(Opcode::Emit, 0);
        b.bind(done);
        let nil = b.constant(Value::Nil);
        b.op_at(3, Opcode::LoadConst, nil);
        b.op(Opcode::Return, 0);
        let code = Arc::new(b.build());

        let mut interp = Interpreter::new();
        interp.run(&code, Vec::new()).unwrap();
        assert!(interp.output().is_empty());
    }

    #[test]
    fn unbound_local_is_an_error() {
        let mut b = CodeBuilder::new("bad", "bad.vg");
        let slot = b.local("x");
        b.op_at(1, Opcode::LoadLocal, slot);
        b.op(Opcode::Return, 0);
        let code = Arc::new(b.build());

        let mut interp = Interpreter::new();
        assert_eq!(
            interp.run(&code, Vec::new()),
            Err(RuntimeError::UnboundLocal("x".into()))
        );
    }
}
