use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vigil_runtime::breakpoint::{BreakpointSpot, BreakpointTable, HitPolicy};
use vigil_runtime::bytecode::{CodeBuilder, Opcode};
use vigil_runtime::control::{StepKind, StopReason, SuspendControl};
use vigil_runtime::frame::Frame;
use vigil_runtime::thread::ThreadId;
use vigil_runtime::trace::{DebuggerHook, HookHandle, TraceEventKind};
use vigil_runtime::value::Value;

fn frame_for(file: &str) -> Frame {
    let mut b = CodeBuilder::new("work", file);
    let nil = b.constant(Value::Nil);
    b.op_at(1, Opcode::LoadConst, nil);
    b.op(Opcode::Return, 0);
    Frame::new(Arc::new(b.build()), Vec::new(), 0)
}

#[test]
fn two_threads_suspend_and_resume_independently() {
    let control = SuspendControl::new();
    let breakpoints = Arc::new(BreakpointTable::new());
    breakpoints.add(
        BreakpointSpot::Line {
            file: "a.vg".into(),
            line: 1,
        },
        None,
        HitPolicy::Normal,
    );
    breakpoints.add(
        BreakpointSpot::Line {
            file: "b.vg".into(),
            line: 1,
        },
        None,
        HitPolicy::Normal,
    );
    let hook = HookHandle::new(DebuggerHook::new(control.clone(), Arc::clone(&breakpoints)));

    let (stop_tx, stop_rx) = channel();
    control.set_stop_channel(stop_tx);

    let t1 = ThreadId(1);
    let t2 = ThreadId(2);
    let (done1_tx, done1_rx) = channel();
    let (done2_tx, done2_rx) = channel();

    let h1 = {
        let hook = hook.clone();
        thread::spawn(move || {
            let _ = hook.on_event(t1, &frame_for("a.vg"), TraceEventKind::Line(1));
            done1_tx.send(()).unwrap();
        })
    };
    let h2 = {
        let hook = hook.clone();
        thread::spawn(move || {
            let _ = hook.on_event(t2, &frame_for("b.vg"), TraceEventKind::Line(1));
            done2_tx.send(()).unwrap();
        })
    };

    let first = stop_rx.recv_timeout(Duration::from_millis(500)).unwrap();
    let second = stop_rx.recv_timeout(Duration::from_millis(500)).unwrap();
    assert!(matches!(first.reason, StopReason::Breakpoint(_)));
    assert!(matches!(second.reason, StopReason::Breakpoint(_)));
    assert_eq!(control.suspended_threads().len(), 2);

    control.resume(t1);
    done1_rx.recv_timeout(Duration::from_millis(500)).unwrap();
    assert!(!control.is_suspended(t1));
    assert!(control.is_suspended(t2));
    assert!(done2_rx.recv_timeout(Duration::from_millis(100)).is_err());

    control.resume(t2);
    done2_rx.recv_timeout(Duration::from_millis(500)).unwrap();

    h1.join().unwrap();
    h2.join().unwrap();
}

#[test]
fn function_breakpoints_fire_at_their_offset() {
    let control = SuspendControl::new();
    let breakpoints = Arc::new(BreakpointTable::new());
    let id = breakpoints.add(
        BreakpointSpot::Function {
            qualname: "work".into(),
            offset: 0,
        },
        None,
        HitPolicy::Normal,
    );
    let hook = HookHandle::new(DebuggerHook::new(control.clone(), Arc::clone(&breakpoints)));

    let (stop_tx, stop_rx) = channel();
    control.set_stop_channel(stop_tx);

    let t = ThreadId(1);
    let handle = {
        let hook = hook.clone();
        thread::spawn(move || {
            let _ = hook.on_event(t, &frame_for("w.vg"), TraceEventKind::Line(1));
        })
    };

    let notice = stop_rx.recv_timeout(Duration::from_millis(500)).unwrap();
    assert!(matches!(notice.reason, StopReason::Breakpoint(b) if b == id));

    control.resume(t);
    handle.join().unwrap();
}

#[test]
fn step_over_ignores_deeper_frames() {
    let control = SuspendControl::new();
    let t = ThreadId(1);
    control.arm_step(t, StepKind::Over, 1);
    assert!(!control.step_complete(t, 2));
    assert!(control.step_complete(t, 1));
    // Completion consumes the armed step.
    assert!(!control.step_complete(t, 1));
}

#[test]
fn step_out_completes_in_the_caller() {
    let control = SuspendControl::new();
    let t = ThreadId(1);
    control.arm_step(t, StepKind::Out, 2);
    assert!(!control.step_complete(t, 2));
    assert!(control.step_complete(t, 1));
}

#[test]
fn step_into_stops_at_any_depth() {
    let control = SuspendControl::new();
    let t = ThreadId(1);
    control.arm_step(t, StepKind::Into, 0);
    assert!(control.step_complete(t, 3));
}

#[test]
fn pause_all_pauses_each_thread_exactly_once() {
    let control = SuspendControl::new();
    control.request_pause_all();
    assert!(control.take_pause(ThreadId(1)));
    assert!(!control.take_pause(ThreadId(1)));
    assert!(control.take_pause(ThreadId(2)));

    control.resume_all();
    assert!(!control.take_pause(ThreadId(3)));
}

#[test]
fn terminated_control_never_blocks() {
    let control = SuspendControl::new();
    let t = ThreadId(1);
    control.terminate();
    // Returns immediately instead of waiting for a resume.
    control.suspend_here(t, &frame_for("a.vg"), StopReason::Pause);
    assert!(!control.is_suspended(t));
}
