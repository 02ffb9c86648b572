//! Compiled code units and instruction stream decoding.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use smol_str::SmolStr;

use crate::error::RuntimeError;
use crate::value::Value;

use super::opcode::{Opcode, INSTR_SIZE};

/// One line-table entry: the instruction unit at which `line` begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// Instruction unit index (not byte offset).
    pub offset: usize,
    /// One-based source line.
    pub line: u32,
}

/// An immutable compiled function body.
///
/// Code units are never mutated after construction; the patcher builds
/// a replacement unit and swaps it in the [`FunctionTable`].
///
/// [`FunctionTable`]: crate::runtime::FunctionTable
#[derive(Debug, Clone, PartialEq)]
pub struct CodeUnit {
    /// Function name.
    pub name: SmolStr,
    /// Dotted qualified name, unique within the process.
    pub qualname: SmolStr,
    /// Source file the unit was compiled from.
    pub file: SmolStr,
    /// Number of leading locals that are arguments.
    pub arg_count: u16,
    /// Compiler flags, preserved verbatim by the patcher.
    pub flags: u32,
    /// Instruction stream, two bytes per unit (opcode, operand).
    pub code: Vec<u8>,
    /// Constants table.
    pub consts: Vec<Value>,
    /// Global/attribute names table.
    pub names: Vec<SmolStr>,
    /// Local-variable table, arguments first.
    pub locals: Vec<SmolStr>,
    /// Line table, ascending by offset.
    pub lines: Vec<LineEntry>,
}

/// A decoded instruction, including any extended-operand prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    /// Unit index of the first prefix (or of the opcode when unprefixed).
    pub offset: usize,
    pub opcode: Opcode,
    /// Operand with prefix bits folded in.
    pub operand: u32,
    /// Width in units, prefixes included.
    pub width: usize,
}

/// Number of units (prefixes included) needed to encode `operand`.
#[must_use]
pub fn encoded_width(operand: u32) -> usize {
    match operand {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// Append one instruction to `buf`, emitting extended-operand prefixes
/// as needed.
pub fn encode_instr(buf: &mut Vec<u8>, opcode: Opcode, operand: u32) {
    let width = encoded_width(operand);
    for shift in (1..width).rev() {
        buf.push(super::opcode::EXTENDED_OPERAND);
        buf.push(((operand >> (8 * shift)) & 0xFF) as u8);
    }
    buf.push(opcode.as_raw());
    buf.push((operand & 0xFF) as u8);
}

impl CodeUnit {
    /// Total instruction units in the stream.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.code.len() / INSTR_SIZE
    }

    /// Decode the full instruction stream, folding prefixes.
    pub fn instructions(&self) -> Result<Vec<Instr>, RuntimeError> {
        decode_stream(&self.code)
    }

    /// Source line mapped to the instruction unit at `offset`, if any.
    #[must_use]
    pub fn line_for_offset(&self, offset: usize) -> Option<u32> {
        let mut current = None;
        for entry in &self.lines {
            if entry.offset > offset {
                break;
            }
            current = Some(entry.line);
        }
        current
    }

    /// Unit offset at which `line` begins, if the line is mapped.
    #[must_use]
    pub fn first_offset_of_line(&self, line: u32) -> Option<usize> {
        self.lines
            .iter()
            .find(|entry| entry.line == line)
            .map(|entry| entry.offset)
    }

    /// The set of lines present in the mapping.
    #[must_use]
    pub fn mapped_lines(&self) -> BTreeSet<u32> {
        self.lines.iter().map(|entry| entry.line).collect()
    }

    /// All jump-target unit offsets in the stream.
    pub fn jump_targets(&self) -> Result<BTreeSet<usize>, RuntimeError> {
        let mut targets = BTreeSet::new();
        for instr in self.instructions()? {
            if instr.opcode.is_jump() {
                targets.insert(instr.operand as usize);
            }
        }
        Ok(targets)
    }
}

/// Decode a raw stream into instructions.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instr>, RuntimeError> {
    if code.len() % INSTR_SIZE != 0 {
        return Err(RuntimeError::TruncatedInstruction(code.len()));
    }
    let mut instrs = Vec::with_capacity(code.len() / INSTR_SIZE);
    let mut unit = 0;
    let total = code.len() / INSTR_SIZE;
    while unit < total {
        let start = unit;
        let mut operand: u32 = 0;
        let mut width = 0;
        loop {
            let opcode_byte = code[unit * INSTR_SIZE];
            let arg = code[unit * INSTR_SIZE + 1];
            let opcode = Opcode::from_raw(opcode_byte)?;
            width += 1;
            unit += 1;
            if opcode == Opcode::ExtendedOperand {
                operand = (operand << 8) | u32::from(arg);
                if unit >= total {
                    return Err(RuntimeError::TruncatedInstruction(unit * INSTR_SIZE));
                }
                continue;
            }
            operand = (operand << 8) | u32::from(arg);
            instrs.push(Instr {
                offset: start,
                opcode,
                operand,
                width,
            });
            break;
        }
    }
    Ok(instrs)
}

/// Builder for code units, used by tests and by patch fragments.
///
/// Jump targets are expressed as labels; assembly iterates until the
/// prefix widths implied by the label offsets are stable.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    name: SmolStr,
    file: SmolStr,
    arg_count: u16,
    ops: Vec<BuildOp>,
    consts: Vec<Value>,
    names: Vec<SmolStr>,
    locals: Vec<SmolStr>,
    labels: usize,
}

#[derive(Debug, Clone, Copy)]
enum BuildOperand {
    Value(u32),
    Label(usize),
}

#[derive(Debug, Clone, Copy)]
struct BuildOp {
    opcode: Opcode,
    operand: BuildOperand,
    line: Option<u32>,
    label: Option<usize>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(name: impl Into<SmolStr>, file: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            ..Self::default()
        }
    }

    /// Declare an argument local. Arguments must precede other locals.
    pub fn arg(&mut self, name: impl Into<SmolStr>) -> u32 {
        debug_assert_eq!(self.locals.len(), usize::from(self.arg_count));
        self.arg_count += 1;
        self.local(name)
    }

    /// Intern a constant, returning its table index.
    pub fn constant(&mut self, value: Value) -> u32 {
        if let Some(idx) = self.consts.iter().position(|existing| *existing == value) {
            return idx as u32;
        }
        self.consts.push(value);
        (self.consts.len() - 1) as u32
    }

    /// Intern a global name, returning its table index.
    pub fn name(&mut self, name: impl Into<SmolStr>) -> u32 {
        let name = name.into();
        if let Some(idx) = self.names.iter().position(|existing| *existing == name) {
            return idx as u32;
        }
        self.names.push(name);
        (self.names.len() - 1) as u32
    }

    /// Declare a local slot, returning its index.
    pub fn local(&mut self, name: impl Into<SmolStr>) -> u32 {
        let name = name.into();
        if let Some(idx) = self.locals.iter().position(|existing| *existing == name) {
            return idx as u32;
        }
        self.locals.push(name);
        (self.locals.len() - 1) as u32
    }

    /// Pre-size the local table with synthetic slots (overflow tests).
    pub fn pad_locals(&mut self, count: usize) {
        for i in self.locals.len()..count {
            self.locals.push(SmolStr::new(format!("_pad{i}")));
        }
    }

    /// Allocate a jump label.
    pub fn label(&mut self) -> usize {
        self.labels += 1;
        self.labels - 1
    }

    /// Bind a label to the next emitted instruction.
    pub fn bind(&mut self, label: usize) {
        self.ops.push(BuildOp {
            opcode: Opcode::Nop,
            operand: BuildOperand::Value(0),
            line: None,
            label: Some(label),
        });
    }

    /// Emit an instruction attributed to `line`.
    pub fn op_at(&mut self, line: u32, opcode: Opcode, operand: u32) {
        self.ops.push(BuildOp {
            opcode,
            operand: BuildOperand::Value(operand),
            line: Some(line),
            label: None,
        });
    }

    /// Emit an instruction continuing the previous line.
    pub fn op(&mut self, opcode: Opcode, operand: u32) {
        self.ops.push(BuildOp {
            opcode,
            operand: BuildOperand::Value(operand),
            line: None,
            label: None,
        });
    }

    /// Emit a jump to `label`.
    pub fn jump_op(&mut self, opcode: Opcode, label: usize) {
        debug_assert!(opcode.is_jump());
        self.ops.push(BuildOp {
            opcode,
            operand: BuildOperand::Label(label),
            line: None,
            label: None,
        });
    }

    /// Assemble into a code unit.
    #[must_use]
    pub fn build(self) -> CodeUnit {
        // Width assignment iterates because widening one jump encoding
        // can push a later label past an operand-size boundary.
        let real_ops: Vec<&BuildOp> = self.ops.iter().filter(|op| op.label.is_none()).collect();
        let mut widths = vec![1_usize; real_ops.len()];
        loop {
            let label_offsets = label_offsets(&self.ops, &widths);
            let mut changed = false;
            for (idx, op) in real_ops.iter().enumerate() {
                let operand = match op.operand {
                    BuildOperand::Value(v) => v,
                    BuildOperand::Label(l) => label_offsets[l],
                };
                let needed = encoded_width(operand);
                if needed > widths[idx] {
                    widths[idx] = needed;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let label_offsets = label_offsets(&self.ops, &widths);
        let mut code = Vec::new();
        let mut lines = Vec::new();
        let mut offset = 0_usize;
        let mut real_idx = 0_usize;
        for op in &self.ops {
            if op.label.is_some() {
                continue;
            }
            if let Some(line) = op.line {
                lines.push(LineEntry { offset, line });
            }
            let operand = match op.operand {
                BuildOperand::Value(v) => v,
                BuildOperand::Label(l) => label_offsets[l],
            };
            encode_instr(&mut code, op.opcode, operand);
            offset += widths[real_idx];
            real_idx += 1;
        }

        CodeUnit {
            name: self.name.clone(),
            qualname: self.name,
            file: self.file,
            arg_count: self.arg_count,
            flags: 0,
            code,
            consts: self.consts,
            names: self.names,
            locals: self.locals,
            lines,
        }
    }
}

fn label_offsets(ops: &[BuildOp], widths: &[usize]) -> Vec<u32> {
    let label_count = ops.iter().filter_map(|op| op.label).max().map_or(0, |m| m + 1);
    let mut offsets = vec![0_u32; label_count];
    let mut offset = 0_usize;
    let mut real_idx = 0_usize;
    for op in ops {
        if let Some(label) = op.label {
            offsets[label] = offset as u32;
        } else {
            offset += widths[real_idx];
            real_idx += 1;
        }
    }
    offsets
}
