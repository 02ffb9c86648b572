use std::sync::Arc;

use vigil_runtime::bytecode::{
    patch_before_line, CodeBuilder, CodeUnit, CompareOp, Interpreter, Opcode, PatchError,
};
use vigil_runtime::value::Value;

/// `i = 0; while i < 3 { emit i; i = i + 1 }` with the loop body on
/// line 3, so an insertion there sits between two jumps.
fn counting_loop() -> CodeUnit {
    let mut b = CodeBuilder::new("count", "count.vg");
    let i = b.local("i");
    let zero = b.constant(Value::Int(0));
    let one = b.constant(Value::Int(1));
    let three = b.constant(Value::Int(3));
    let nil = b.constant(Value::Nil);
    let top = b.label();
    let end = b.label();

    b.op_at(1, Opcode::LoadConst, zero);
    b.op(Opcode::StoreLocal, i);
    b.bind(top);
    b.op_at(2, Opcode::LoadLocal, i);
    b.op(Opcode::LoadConst, three);
    b.op(Opcode::Compare, CompareOp::Lt as u32);
    b.jump_op(Opcode::JumpIfFalse, end);
    b.op_at(3, Opcode::LoadLocal, i);
    b.op(Opcode::Emit, 0);
    b.op(Opcode::LoadLocal, i);
    b.op(Opcode::LoadConst, one);
    b.op(Opcode::Add, 0);
    b.op(Opcode::StoreLocal, i);
    b.jump_op(Opcode::Jump, top);
    b.bind(end);
    b.op_at(4, Opcode::LoadConst, nil);
    b.op(Opcode::Return, 0);
    b.build()
}

/// Fragment guarded by a constant condition; emits a marker when the
/// condition holds, otherwise does nothing observable.
fn guarded_fragment(condition: bool) -> CodeUnit {
    let mut b = CodeBuilder::new("frag", "frag.vg");
    let cond = b.constant(Value::Bool(condition));
    let marker = b.constant(Value::Int(99));
    let nil = b.constant(Value::Nil);
    let skip = b.label();

    b.op_at(1, Opcode::LoadConst, cond);
    b.jump_op(Opcode::JumpIfFalse, skip);
    b.op(Opcode::LoadConst, marker);
    b.op(Opcode::Emit, 0);
    b.bind(skip);
    b.op(Opcode::LoadConst, nil);
    b.op(Opcode::Return, 0);
    b.build()
}

fn run(unit: &CodeUnit) -> Vec<Value> {
    let unit = Arc::new(unit.clone());
    let mut interp = Interpreter::new();
    interp.run(&unit, Vec::new()).unwrap();
    interp.output().to_vec()
}

#[test]
fn false_condition_output_is_identical_to_unpatched() {
    let target = counting_loop();
    let patched = patch_before_line(&target, &guarded_fragment(false), 3).unwrap();
    assert_eq!(run(&patched), run(&target));
}

#[test]
fn true_condition_fires_once_per_loop_iteration() {
    let target = counting_loop();
    let patched = patch_before_line(&target, &guarded_fragment(true), 3).unwrap();
    assert_eq!(
        run(&patched),
        vec![
            Value::Int(99),
            Value::Int(0),
            Value::Int(99),
            Value::Int(1),
            Value::Int(99),
            Value::Int(2),
        ]
    );
}

#[test]
fn patched_line_table_introduces_no_new_lines() {
    let target = counting_loop();
    let patched = patch_before_line(&target, &guarded_fragment(true), 3).unwrap();
    let original = target.mapped_lines();
    assert!(patched
        .mapped_lines()
        .iter()
        .all(|line| original.contains(line)));
}

#[test]
fn relocated_local_past_256_gets_an_extended_operand() {
    let mut b = CodeBuilder::new("wide", "wide.vg");
    b.pad_locals(300);
    let x = b.local("x");
    let seven = b.constant(Value::Int(7));
    let nil = b.constant(Value::Nil);
    b.op_at(1, Opcode::LoadConst, seven);
    b.op(Opcode::StoreLocal, x);
    b.op_at(2, Opcode::LoadLocal, x);
    b.op(Opcode::Emit, 0);
    b.op_at(3, Opcode::LoadConst, nil);
    b.op(Opcode::Return, 0);
    let target = b.build();

    let mut f = CodeBuilder::new("frag", "frag.vg");
    let scratch = f.local("scratch");
    let mark = f.constant(Value::Int(42));
    let nil = f.constant(Value::Nil);
    f.op_at(1, Opcode::LoadConst, mark);
    f.op(Opcode::StoreLocal, scratch);
    f.op(Opcode::LoadLocal, scratch);
    f.op(Opcode::Emit, 0);
    f.op(Opcode::LoadConst, nil);
    f.op(Opcode::Return, 0);
    let fragment = f.build();

    let patched = patch_before_line(&target, &fragment, 2).unwrap();

    // The fragment's scratch slot relocates past the 301 existing
    // locals, which no longer fits one operand byte.
    let store = patched
        .instructions()
        .unwrap()
        .into_iter()
        .find(|i| i.opcode == Opcode::StoreLocal && i.operand as usize == target.locals.len())
        .unwrap();
    assert!(store.width >= 2);

    assert_eq!(run(&patched), vec![Value::Int(42), Value::Int(7)]);
    assert_eq!(run(&target), vec![Value::Int(7)]);
}

#[test]
fn unmapped_line_fails_without_touching_the_target() {
    let target = counting_loop();
    let before = target.clone();
    let err = patch_before_line(&target, &guarded_fragment(false), 9).unwrap_err();
    assert_eq!(err, PatchError::NoInstructionAtLine(9));
    assert_eq!(target, before);
}

#[test]
fn argument_counts_and_flags_survive_patching() {
    let mut b = CodeBuilder::new("echo", "echo.vg");
    let n = b.arg("n");
    b.op_at(1, Opcode::LoadLocal, n);
    b.op(Opcode::Emit, 0);
    let nil = b.constant(Value::Nil);
    b.op_at(2, Opcode::LoadConst, nil);
    b.op(Opcode::Return, 0);
    let target = b.build();

    let patched = patch_before_line(&target, &guarded_fragment(false), 2).unwrap();
    assert_eq!(patched.arg_count, target.arg_count);
    assert_eq!(patched.flags, target.flags);
    assert_eq!(patched.qualname, target.qualname);

    let unit = Arc::new(patched);
    let mut interp = Interpreter::new();
    interp.run(&unit, vec![Value::Int(5)]).unwrap();
    assert_eq!(interp.output(), &[Value::Int(5)]);
}
