//! Command dispatch: interprets incoming frames and drives the
//! runtime's controller, breakpoint table, patcher, and renderer.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::{debug, warn};

use vigil_runtime::breakpoint::{BreakpointSpot, HitPolicy};
use vigil_runtime::bytecode::{CodeBuilder, Opcode};
use vigil_runtime::control::{StepKind, StopNotice};
use vigil_runtime::eval::evaluate_condition;
use vigil_runtime::frame::Frame;
use vigil_runtime::thread::ThreadId;
use vigil_runtime::trace::{ControllerState, DebuggerHook, HookHandle};
use vigil_runtime::value::Value;

use crate::commands::{self, command_name};
use crate::payload::{children_dump, frame_dump, render_var, suspend_payload};
use crate::render::Renderer;
use crate::session::{Session, SessionState, Strategy};
use crate::wire::{escape_field, WireMessage};

/// Qualified name of the helper function injected code calls into.
const TRAP_QUALNAME: &str = "vigil.trap";

/// Interprets protocol commands for one session.
///
/// Every request is answered with a frame echoing the request's
/// sequence id; daemon-originated notifications carry fresh even ids.
/// Failures are answered with an error frame and never tear down the
/// connection.
pub struct Dispatcher {
    session: Arc<Session>,
    renderer: Renderer,
    hook: HookHandle,
    /// Frames captured at suspension, per thread; dropped on resume.
    stopped: Mutex<FxHashMap<ThreadId, Frame>>,
    /// Threads already announced to the client.
    announced: Mutex<FxHashSet<ThreadId>>,
}

impl Dispatcher {
    /// Create a dispatcher and its session-lifetime hook.
    #[must_use]
    pub fn new(session: Arc<Session>) -> Self {
        let runtime = Arc::clone(session.runtime());
        let hook = HookHandle::new(DebuggerHook::new(
            runtime.control().clone(),
            Arc::clone(runtime.breakpoints()),
        ));
        ensure_trap(&session);
        Self {
            session,
            renderer: Renderer::new(),
            hook,
            stopped: Mutex::new(FxHashMap::default()),
            announced: Mutex::new(FxHashSet::default()),
        }
    }

    /// Override the rendered-display length bound.
    #[must_use]
    pub fn with_render_limit(mut self, max_length: usize) -> Self {
        self.renderer = Renderer::new().with_max_length(max_length);
        self
    }

    /// The session driven by this dispatcher.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Handle one decoded frame, producing the frames to send back.
    pub fn handle(&self, msg: &WireMessage) -> Vec<WireMessage> {
        debug!(command = command_name(msg.command), seq = msg.seq, "dispatch");
        match msg.command {
            commands::CMD_VERSION => self.on_version(msg),
            commands::CMD_RUN => self.on_run(msg),
            commands::CMD_LIST_THREADS => self.on_list_threads(msg),
            commands::CMD_SET_BREAK => self.on_set_break(msg),
            commands::CMD_REMOVE_BREAK => self.on_remove_break(msg),
            commands::CMD_THREAD_SUSPEND => self.on_suspend(msg),
            commands::CMD_THREAD_RUN => self.on_resume(msg),
            commands::CMD_STEP_INTO => self.on_step(msg, StepKind::Into),
            commands::CMD_STEP_OVER => self.on_step(msg, StepKind::Over),
            commands::CMD_STEP_RETURN => self.on_step(msg, StepKind::Out),
            commands::CMD_GET_FRAME => self.on_get_frame(msg),
            commands::CMD_GET_VARIABLE => self.on_get_variable(msg),
            commands::CMD_EVALUATE => self.on_evaluate(msg),
            commands::CMD_SET_NEXT_STATEMENT => self.on_set_next_statement(msg),
            commands::CMD_ADD_EXCEPTION_BREAK => self.on_exception_break(msg, true),
            commands::CMD_REMOVE_EXCEPTION_BREAK => self.on_exception_break(msg, false),
            other if commands::is_known(other) => vec![self.error(
                msg.seq,
                &format!("unsupported command {other} ({})", command_name(other)),
            )],
            other => vec![self.error(msg.seq, &format!("unknown command id {other}"))],
        }
    }

    /// Record a suspension and build its notification frames. A thread
    /// stopping for the first time is announced before it is reported
    /// suspended.
    pub fn on_stop(&self, notice: &StopNotice) -> Vec<WireMessage> {
        let mut frames = Vec::with_capacity(2);
        if self.announced.lock().insert(notice.thread) {
            let name = self
                .session
                .runtime()
                .threads()
                .record(notice.thread)
                .map(|record| record.name.to_string())
                .unwrap_or_default();
            frames.push(self.thread_created(notice.thread, &name));
        }
        self.stopped
            .lock()
            .insert(notice.thread, notice.frame.clone());
        self.session.set_state(SessionState::Suspended);
        frames.push(WireMessage::new(
            commands::CMD_THREAD_SUSPEND,
            self.session.next_seq(),
            suspend_payload(&self.renderer, notice),
        ));
        frames
    }

    /// Notification frame for a newly observed thread.
    #[must_use]
    pub fn thread_created(&self, thread: ThreadId, name: &str) -> WireMessage {
        self.session.runtime().controller().observe_thread(thread);
        WireMessage::from_fields(
            commands::CMD_THREAD_CREATE,
            self.session.next_seq(),
            &[&thread.to_string(), name],
        )
    }

    /// Notification frame for an exited thread.
    #[must_use]
    pub fn thread_exited(&self, thread: ThreadId) -> WireMessage {
        self.session
            .runtime()
            .instrumentation()
            .remove_thread_state(thread);
        self.stopped.lock().remove(&thread);
        self.announced.lock().remove(&thread);
        WireMessage::from_fields(
            commands::CMD_THREAD_KILL,
            self.session.next_seq(),
            &[&thread.to_string()],
        )
    }

    fn on_version(&self, msg: &WireMessage) -> Vec<WireMessage> {
        vec![WireMessage::from_fields(
            commands::CMD_VERSION,
            msg.seq,
            &[env!("CARGO_PKG_VERSION")],
        )]
    }

    fn on_run(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let runtime = self.session.runtime();
        if runtime.controller().state() == ControllerState::Untraced {
            let owner = runtime
                .threads()
                .registered()
                .first()
                .copied()
                .unwrap_or(ThreadId(0));
            if let Err(err) = runtime.controller().enable(self.hook.clone(), owner) {
                return vec![self.error(msg.seq, &format!("cannot enable tracing: {err}"))];
            }
            // A capability gap here degrades to thread-local tracing;
            // the reply still succeeds.
            if let Err(err) = runtime.controller().enable_all() {
                warn!(%err, "all-thread installation unavailable");
            }
        }
        runtime.control().resume_all();
        self.stopped.lock().clear();
        self.session.set_state(SessionState::Running);
        vec![self.ok(msg.seq, "")]
    }

    fn on_list_threads(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let runtime = self.session.runtime();
        let lines = runtime
            .threads()
            .registered()
            .into_iter()
            .filter_map(|id| runtime.threads().record(id))
            .map(|record| format!("{} {}", record.id, record.name))
            .collect::<Vec<_>>()
            .join("\n");
        vec![WireMessage::new(
            commands::CMD_LIST_THREADS,
            msg.seq,
            escape_field(&lines),
        )]
    }

    fn on_set_break(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let fields = msg.fields();
        let [kind, target, position, condition] = fields.as_slice() else {
            return vec![self.error(msg.seq, "set-break expects 4 fields")];
        };
        let condition: Option<SmolStr> = match condition.as_str() {
            "" | "None" => None,
            text => Some(text.into()),
        };
        let spot = match kind.as_str() {
            "line" => {
                let Ok(line) = position.parse::<u32>() else {
                    return vec![self.error(msg.seq, "set-break line is not a number")];
                };
                BreakpointSpot::Line {
                    file: target.as_str().into(),
                    line,
                }
            }
            "function" | "termination" => {
                let Ok(offset) = position.parse::<usize>() else {
                    return vec![self.error(msg.seq, "set-break offset is not a number")];
                };
                BreakpointSpot::Function {
                    qualname: target.as_str().into(),
                    offset,
                }
            }
            other => {
                return vec![self.error(msg.seq, &format!("unknown breakpoint kind '{other}'"))]
            }
        };
        let policy = match kind.as_str() {
            "termination" => HitPolicy::OnTermination,
            _ if condition.is_some() => HitPolicy::Conditional,
            _ => HitPolicy::Normal,
        };

        let id = self
            .session
            .runtime()
            .breakpoints()
            .add(spot, condition, policy);
        self.apply_strategy();
        vec![self.ok(msg.seq, &id.to_string())]
    }

    fn on_remove_break(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let fields = msg.fields();
        let id = match fields.first().map(|f| f.parse::<u32>()) {
            Some(Ok(id)) => id,
            _ => return vec![self.error(msg.seq, "remove-break expects a breakpoint id")],
        };
        if !self.session.runtime().breakpoints().remove(id) {
            return vec![self.error(msg.seq, &format!("no breakpoint {id}"))];
        }
        self.apply_strategy();
        vec![self.ok(msg.seq, "")]
    }

    fn on_suspend(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let control = self.session.runtime().control();
        match msg.fields().first().map(String::as_str) {
            Some("*") => control.request_pause_all(),
            Some(field) => match parse_thread(field) {
                Some(thread) => control.request_pause(thread),
                None => return vec![self.error(msg.seq, "bad thread id")],
            },
            None => return vec![self.error(msg.seq, "thread-suspend expects a thread id")],
        }
        vec![self.ok(msg.seq, "")]
    }

    fn on_resume(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let control = self.session.runtime().control();
        match msg.fields().first().map(String::as_str) {
            Some("*") => {
                control.resume_all();
                self.stopped.lock().clear();
            }
            Some(field) => match parse_thread(field) {
                Some(thread) => {
                    control.resume(thread);
                    self.stopped.lock().remove(&thread);
                }
                None => return vec![self.error(msg.seq, "bad thread id")],
            },
            None => return vec![self.error(msg.seq, "thread-run expects a thread id")],
        }
        if control.suspended_threads().is_empty() {
            self.session.set_state(SessionState::Running);
        }
        vec![self.ok(msg.seq, "")]
    }

    fn on_step(&self, msg: &WireMessage, kind: StepKind) -> Vec<WireMessage> {
        let Some(thread) = msg.fields().first().and_then(|f| parse_thread(f)) else {
            return vec![self.error(msg.seq, "step expects a thread id")];
        };
        let depth = match self.stopped.lock().get(&thread) {
            Some(frame) => frame.depth,
            None => return vec![self.error(msg.seq, &format!("{thread} is not suspended"))],
        };
        let control = self.session.runtime().control();
        control.arm_step(thread, kind, depth);
        // Steps only complete under per-line callbacks; leave patched
        // mode before letting the thread go.
        self.apply_strategy();
        control.resume(thread);
        self.stopped.lock().remove(&thread);
        vec![self.ok(msg.seq, "")]
    }

    fn on_exception_break(&self, msg: &WireMessage, enabled: bool) -> Vec<WireMessage> {
        self.session
            .runtime()
            .control()
            .set_break_on_exception(enabled);
        self.apply_strategy();
        vec![self.ok(msg.seq, "")]
    }

    fn on_get_frame(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let Some(thread) = msg.fields().first().and_then(|f| parse_thread(f)) else {
            return vec![self.error(msg.seq, "get-frame expects a thread id")];
        };
        let stopped = self.stopped.lock();
        let Some(frame) = stopped.get(&thread) else {
            return vec![self.error(msg.seq, &format!("{thread} is not suspended"))];
        };
        vec![WireMessage::new(
            commands::CMD_GET_FRAME,
            msg.seq,
            frame_dump(&self.renderer, frame),
        )]
    }

    fn on_get_variable(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let fields = msg.fields();
        let Some(thread) = fields.first().and_then(|f| parse_thread(f)) else {
            return vec![self.error(msg.seq, "get-variable expects a thread id")];
        };
        let Some(name) = fields.get(1) else {
            return vec![self.error(msg.seq, "get-variable expects a variable name")];
        };
        let stopped = self.stopped.lock();
        let Some(frame) = stopped.get(&thread) else {
            return vec![self.error(msg.seq, &format!("{thread} is not suspended"))];
        };
        let Some(mut value) = frame.local(name).cloned() else {
            return vec![self.error(msg.seq, &format!("no local '{name}'"))];
        };
        // Remaining fields walk container children one level at a time.
        for segment in &fields[2..] {
            let Some((_, child)) = self
                .renderer
                .children(&value)
                .into_iter()
                .find(|(child_name, _)| child_name == segment)
            else {
                return vec![self.error(msg.seq, &format!("no child '{segment}'"))];
            };
            value = child;
        }
        vec![WireMessage::new(
            commands::CMD_GET_VARIABLE,
            msg.seq,
            children_dump(&self.renderer, &value),
        )]
    }

    fn on_evaluate(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let fields = msg.fields();
        let Some(thread) = fields.first().and_then(|f| parse_thread(f)) else {
            return vec![self.error(msg.seq, "evaluate expects a thread id")];
        };
        let Some(expr) = fields.get(1) else {
            return vec![self.error(msg.seq, "evaluate expects an expression")];
        };
        let stopped = self.stopped.lock();
        let Some(frame) = stopped.get(&thread) else {
            return vec![self.error(msg.seq, &format!("{thread} is not suspended"))];
        };
        // Evaluation failure is informational, not an error frame: the
        // client shows "value unavailable" next to the expression.
        let markup = match evaluate_condition(expr, frame) {
            Ok(result) => render_var(&self.renderer, expr, &Value::Bool(result)),
            Err(err) => {
                let mut rendered = self.renderer.render(&Value::Str(err.to_string()));
                rendered.is_error_on_eval = true;
                crate::payload::var_markup(expr, &rendered)
            }
        };
        vec![WireMessage::new(
            commands::CMD_EVALUATE,
            msg.seq,
            escape_field(&markup),
        )]
    }

    fn on_set_next_statement(&self, msg: &WireMessage) -> Vec<WireMessage> {
        let fields = msg.fields();
        let [qualname, line] = fields.as_slice() else {
            return vec![self.error(msg.seq, "set-next-statement expects 2 fields")];
        };
        let Ok(line) = line.parse::<u32>() else {
            return vec![self.error(msg.seq, "set-next-statement line is not a number")];
        };

        let fragment = trap_fragment();
        let outcome = self
            .session
            .runtime()
            .functions()
            .patch(qualname, &fragment, line);
        let payload = match outcome {
            Ok(()) => "ok".to_string(),
            // Not an error frame: the client shows the notice and the
            // session keeps running with the original code.
            Err(err) => {
                debug!(%err, qualname = qualname.as_str(), line, "patch rejected");
                format!("cannot set next statement here: {err}")
            }
        };
        vec![WireMessage::from_fields(
            commands::CMD_SET_NEXT_STATEMENT,
            msg.seq,
            &[&payload],
        )]
    }

    /// Re-run the strategy selector and move started threads between
    /// callback tracing and patched-code mode when the choice changed.
    fn apply_strategy(&self) {
        let before = self.session.strategy();
        let after = self.session.reselect_strategy();
        if after == before {
            return;
        }
        let runtime = self.session.runtime();
        if runtime.controller().state() == ControllerState::Untraced {
            return;
        }
        for thread in runtime.threads().registered() {
            if !runtime.instrumentation().started(thread) {
                continue;
            }
            let moved = match after {
                Strategy::PatchedCode => runtime.controller().enter_patched_mode(thread),
                Strategy::CallbackTrace => runtime.controller().leave_patched_mode(thread),
            };
            if let Err(err) = moved {
                debug!(%thread, %err, "strategy transition skipped");
            }
        }
    }

    fn ok(&self, seq: i64, payload: &str) -> WireMessage {
        WireMessage::from_fields(commands::CMD_RETURN, seq, &[payload])
    }

    fn error(&self, seq: i64, message: &str) -> WireMessage {
        warn!(message, "command failed");
        WireMessage::from_fields(commands::CMD_ERROR, seq, &[message])
    }
}

/// Parse `t3` or plain `3`.
fn parse_thread(field: &str) -> Option<ThreadId> {
    field
        .strip_prefix('t')
        .unwrap_or(field)
        .parse::<u64>()
        .ok()
        .map(ThreadId)
}

/// Define the trap helper once per session.
fn ensure_trap(session: &Arc<Session>) {
    let functions = session.runtime().functions();
    if functions.lookup(TRAP_QUALNAME).is_some() {
        return;
    }
    let mut b = CodeBuilder::new(TRAP_QUALNAME, "<vigil>");
    let nil = b.constant(Value::Nil);
    b.op_at(1, Opcode::LoadConst, nil);
    b.op(Opcode::Return, 0);
    functions.define(Arc::new(b.build()));
}

/// Fragment that calls the trap helper and falls back into the
/// original stream.
fn trap_fragment() -> vigil_runtime::bytecode::CodeUnit {
    let mut b = CodeBuilder::new("vigil.trap.site", "<vigil>");
    let trap = b.name(TRAP_QUALNAME);
    let nil = b.constant(Value::Nil);
    b.op_at(1, Opcode::Call, trap);
    b.op(Opcode::Pop, 0);
    b.op(Opcode::LoadConst, nil);
    b.op(Opcode::Return, 0);
    b.build()
}
