//! Live code patching: splice an instrumentation fragment into a code
//! unit ahead of a chosen source line.
//!
//! Patching never mutates the input unit. On success the caller swaps
//! the replacement into the function table; on failure the original
//! stays in force.

use smol_str::SmolStr;
use thiserror::Error;

use crate::error::RuntimeError;

use super::code::{encode_instr, encoded_width, CodeUnit, Instr, LineEntry};
use super::opcode::{Opcode, OperandKind};

/// Upper bound on relocation fixed-point iterations. Widths only ever
/// grow and max out at four units, so a genuine stream converges long
/// before this.
pub const RELOCATION_ITERATION_CAP: usize = 64;

/// Reasons a patch attempt is rejected. The target unit is never
/// modified on any of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// No instruction starts at the requested line.
    #[error("no instruction starts at line {0}")]
    NoInstructionAtLine(u32),

    /// The named function is not defined in the function table.
    #[error("unknown function '{0}'")]
    UnknownFunction(SmolStr),

    /// Target or fragment stream failed to decode.
    #[error("malformed instruction stream: {0}")]
    Malformed(#[from] RuntimeError),

    /// A table reference was out of range before or after relocation.
    #[error("{table} index {index} out of range in '{unit}'")]
    IndexOutOfRange {
        /// Which table the reference addresses.
        table: &'static str,
        /// The offending operand value.
        index: u32,
        /// Name of the unit carrying the reference.
        unit: SmolStr,
    },

    /// A jump operand does not land on an instruction boundary.
    #[error("jump target {target} is not an instruction boundary in '{unit}'")]
    BadJumpTarget {
        /// The offending target offset, in units.
        target: u32,
        /// Name of the unit carrying the jump.
        unit: SmolStr,
    },

    /// The width-assignment loop failed to stabilize within the cap.
    #[error("jump relocation did not converge")]
    RelocationDiverged,
}

/// An instruction pending re-assembly. Jump operands are symbolic
/// indices into the combined list so relocation falls out of the final
/// offset assignment.
#[derive(Debug, Clone, Copy)]
struct SymInstr {
    opcode: Opcode,
    operand: SymOperand,
    line: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
enum SymOperand {
    Fixed(u32),
    Target(usize),
}

/// Build a replacement for `target` that executes `fragment` before
/// the first instruction of `before_line`.
///
/// The fragment's constant, name, and local references are relocated
/// past the target's tables, and the tables are concatenated, so no
/// existing slot is renumbered. A trailing `Return` in the fragment is
/// rewritten into a jump onto the displaced original instruction, so a
/// fragment whose condition declines to act falls through into the
/// original stream. Fragment instructions are attributed to
/// `before_line`, keeping the patched line table a subset of the
/// original's lines.
pub fn patch_before_line(
    target: &CodeUnit,
    fragment: &CodeUnit,
    before_line: u32,
) -> Result<CodeUnit, PatchError> {
    let insert_at = target
        .first_offset_of_line(before_line)
        .ok_or(PatchError::NoInstructionAtLine(before_line))?;

    let target_instrs = target.instructions()?;
    let fragment_instrs = fragment.instructions()?;

    let split_idx = target_instrs
        .iter()
        .position(|instr| instr.offset == insert_at)
        .ok_or(PatchError::NoInstructionAtLine(before_line))?;

    // A trailing return expands into Pop + Jump, keeping the operand
    // stack balanced when control re-enters the original stream.
    let has_trailing_return = fragment_instrs
        .last()
        .is_some_and(|instr| instr.opcode == Opcode::Return);
    let frag_emitted = fragment_instrs.len() + usize::from(has_trailing_return);
    // Index of the displaced original instruction in the combined list;
    // a fragment's trailing return jumps here.
    let resume_idx = split_idx + frag_emitted;

    let mut combined: Vec<SymInstr> = Vec::with_capacity(target_instrs.len() + frag_emitted);

    for (idx, instr) in target_instrs.iter().enumerate() {
        combined.push(SymInstr {
            opcode: instr.opcode,
            operand: target_operand(target, &target_instrs, instr, split_idx, frag_emitted)?,
            line: target_line(target, instr),
        });
        if idx + 1 == split_idx {
            push_fragment(
                &mut combined,
                target,
                fragment,
                &fragment_instrs,
                split_idx,
                resume_idx,
                before_line,
            )?;
        }
    }
    if split_idx == 0 {
        // Insertion at the very top: fragment precedes everything.
        let mut head = Vec::with_capacity(combined.len() + frag_emitted);
        push_fragment(
            &mut head,
            target,
            fragment,
            &fragment_instrs,
            split_idx,
            resume_idx,
            before_line,
        )?;
        head.append(&mut combined);
        combined = head;
    }

    let (code, lines) = assemble(&combined)?;

    let mut consts = target.consts.clone();
    consts.extend(fragment.consts.iter().cloned());
    let mut names = target.names.clone();
    names.extend(fragment.names.iter().cloned());
    let mut locals = target.locals.clone();
    locals.extend(fragment.locals.iter().cloned());

    Ok(CodeUnit {
        name: target.name.clone(),
        qualname: target.qualname.clone(),
        file: target.file.clone(),
        arg_count: target.arg_count,
        flags: target.flags,
        code,
        consts,
        names,
        locals,
        lines,
    })
}

/// Symbolic operand for a target-stream instruction. Jumps become
/// indices into the combined list, accounting for the insertion.
fn target_operand(
    target: &CodeUnit,
    target_instrs: &[Instr],
    instr: &Instr,
    split_idx: usize,
    frag_emitted: usize,
) -> Result<SymOperand, PatchError> {
    if !instr.opcode.is_jump() {
        return Ok(SymOperand::Fixed(instr.operand));
    }
    let dest = target_instrs
        .iter()
        .position(|candidate| candidate.offset == instr.operand as usize)
        .ok_or(PatchError::BadJumpTarget {
            target: instr.operand,
            unit: target.name.clone(),
        })?;
    let combined_idx = if dest >= split_idx {
        dest + frag_emitted
    } else {
        dest
    };
    Ok(SymOperand::Target(combined_idx))
}

fn target_line(target: &CodeUnit, instr: &Instr) -> Option<u32> {
    target
        .lines
        .iter()
        .find(|entry| entry.offset == instr.offset)
        .map(|entry| entry.line)
}

/// Append the relocated fragment to the combined list.
fn push_fragment(
    combined: &mut Vec<SymInstr>,
    target: &CodeUnit,
    fragment: &CodeUnit,
    fragment_instrs: &[Instr],
    split_idx: usize,
    resume_idx: usize,
    before_line: u32,
) -> Result<(), PatchError> {
    for (idx, instr) in fragment_instrs.iter().enumerate() {
        let trailing_return =
            instr.opcode == Opcode::Return && idx + 1 == fragment_instrs.len();
        if trailing_return {
            // Discard the would-be return value, then rejoin the
            // displaced original instruction.
            combined.push(SymInstr {
                opcode: Opcode::Pop,
                operand: SymOperand::Fixed(0),
                line: (idx == 0).then_some(before_line),
            });
            combined.push(SymInstr {
                opcode: Opcode::Jump,
                operand: SymOperand::Target(resume_idx),
                line: None,
            });
            break;
        }
        combined.push(SymInstr {
            opcode: instr.opcode,
            operand: relocate_fragment_operand(
                target,
                fragment,
                fragment_instrs,
                instr,
                split_idx,
            )?,
            // One entry at the fragment head keeps the whole fragment on
            // a line the original already maps.
            line: (idx == 0).then_some(before_line),
        });
    }
    Ok(())
}

fn relocate_fragment_operand(
    target: &CodeUnit,
    fragment: &CodeUnit,
    fragment_instrs: &[Instr],
    instr: &Instr,
    split_idx: usize,
) -> Result<SymOperand, PatchError> {
    let out_of_range = |table: &'static str| PatchError::IndexOutOfRange {
        table,
        index: instr.operand,
        unit: fragment.name.clone(),
    };
    let relocated = match instr.opcode.operand_kind() {
        OperandKind::ConstIndex => {
            if instr.operand as usize >= fragment.consts.len() {
                return Err(out_of_range("constant"));
            }
            instr.operand + target.consts.len() as u32
        }
        OperandKind::NameIndex => {
            if instr.operand as usize >= fragment.names.len() {
                return Err(out_of_range("name"));
            }
            instr.operand + target.names.len() as u32
        }
        OperandKind::LocalSlot => {
            if instr.operand as usize >= fragment.locals.len() {
                return Err(out_of_range("local"));
            }
            instr.operand + target.locals.len() as u32
        }
        OperandKind::JumpTarget => {
            let dest = fragment_instrs
                .iter()
                .position(|candidate| candidate.offset == instr.operand as usize)
                .ok_or(PatchError::BadJumpTarget {
                    target: instr.operand,
                    unit: fragment.name.clone(),
                })?;
            return Ok(SymOperand::Target(split_idx + dest));
        }
        OperandKind::None | OperandKind::Immediate => instr.operand,
    };
    Ok(SymOperand::Fixed(relocated))
}

/// Assign encoding widths by fixed-point iteration, then emit bytes.
///
/// Widening one jump's prefix chain shifts every later offset, which
/// can widen further jumps; widths are monotone so the loop converges,
/// and the cap turns a logic error into a clean failure instead of a
/// spin.
fn assemble(combined: &[SymInstr]) -> Result<(Vec<u8>, Vec<LineEntry>), PatchError> {
    let mut widths = vec![1_usize; combined.len()];
    let mut iterations = 0;
    loop {
        iterations += 1;
        if iterations > RELOCATION_ITERATION_CAP {
            return Err(PatchError::RelocationDiverged);
        }
        let offsets = offsets_for(&widths);
        let mut changed = false;
        for (idx, instr) in combined.iter().enumerate() {
            let operand = resolve(instr.operand, &offsets);
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

    let offsets = offsets_for(&widths);
    let mut code = Vec::new();
    let mut lines = Vec::new();
    for (idx, instr) in combined.iter().enumerate() {
        if let Some(line) = instr.line {
            lines.push(LineEntry {
                offset: offsets[idx],
                line,
            });
        }
        encode_instr(&mut code, instr.opcode, resolve(instr.operand, &offsets) );
    }
    Ok((code, lines))
}

fn offsets_for(widths: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(widths.len());
    let mut offset = 0;
    for width in widths {
        offsets.push(offset);
        offset += width;
    }
    offsets
}

fn resolve(operand: SymOperand, offsets: &[usize]) -> u32 {
    match operand {
        SymOperand::Fixed(v) => v,
        SymOperand::Target(idx) => offsets[idx] as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeBuilder;
    use crate::value::Value;

    fn counting_unit() -> CodeUnit {
        let mut b = CodeBuilder::new("count", "count.vg");
        let one = b.constant(Value::Int(1));
        b.op_at(1, Opcode::LoadConst, one);
        b.op_at(2, Opcode::Emit, 0);
        let nil = b.constant(Value::Nil);
        b.op_at(3, Opcode::LoadConst, nil);
        b.op(Opcode::Return, 0);
        b.build()
    }

    fn noop_fragment() -> CodeUnit {
        let mut b = CodeBuilder::new("frag", "frag.vg");
        let nil = b.constant(Value::Nil);
        b.op_at(1, Opcode::LoadConst, nil);
        b.op(Opcode::Return, 0);
        b.build()
    }

    #[test]
    fn unmapped_line_is_rejected() {
        let target = counting_unit();
        let err = patch_before_line(&target, &noop_fragment(), 99).unwrap_err();
        assert_eq!(err, PatchError::NoInstructionAtLine(99));
    }

    #[test]
    fn line_table_stays_within_original_lines() {
        let target = counting_unit();
        let patched = patch_before_line(&target, &noop_fragment(), 2).unwrap();
        let original_lines = target.mapped_lines();
        assert!(patched
            .mapped_lines()
            .iter()
            .all(|line| original_lines.contains(line)));
    }

    #[test]
    fn existing_locals_keep_their_slots() {
        let mut b = CodeBuilder::new("with_locals", "l.vg");
        let x = b.local("x");
        let one = b.constant(Value::Int(1));
        b.op_at(1, Opcode::LoadConst, one);
        b.op(Opcode::StoreLocal, x);
        b.op_at(2, Opcode::LoadLocal, x);
        b.op(Opcode::Return, 0);
        let target = b.build();

        let mut f = CodeBuilder::new("frag", "frag.vg");
        let scratch = f.local("scratch");
        let two = f.constant(Value::Int(2));
        f.op_at(1, Opcode::LoadConst, two);
        f.op(Opcode::StoreLocal, scratch);
        let nil = f.constant(Value::Nil);
        f.op_at(1, Opcode::LoadConst, nil);
        f.op(Opcode::Return, 0);
        let fragment = f.build();

        let patched = patch_before_line(&target, &fragment, 2).unwrap();
        assert_eq!(patched.locals[..target.locals.len()], target.locals[..]);
        assert!(patched.locals.len() >= target.locals.len());
        // The fragment's store lands in the relocated slot.
        let store = patched
            .instructions()
            .unwrap()
            .into_iter()
            .filter(|i| i.opcode == Opcode::StoreLocal)
            .nth(1)
            .unwrap();
        assert_eq!(store.operand as usize, target.locals.len());
    }

    #[test]
    fn relocation_cap_turns_runaway_widening_into_an_error() {
        // Staged jumps whose operands each cross the one-byte boundary
        // only after the previous jump widens, so every pass widens
        // exactly one instruction and the loop cannot settle in time.
        let mut staged = Vec::new();
        for k in 0..72 {
            staged.push(SymInstr {
                opcode: Opcode::Jump,
                operand: SymOperand::Target(0x100 - k),
                line: None,
            });
        }
        while staged.len() <= 0x100 {
            staged.push(SymInstr {
                opcode: Opcode::Pop,
                operand: SymOperand::Fixed(0),
                line: None,
            });
        }
        let err = assemble(&staged).unwrap_err();
        assert_eq!(err, PatchError::RelocationDiverged);
    }
}
