//! The debugger's execution-event hook.

use std::sync::Arc;

use tracing::debug;

use crate::breakpoint::BreakpointTable;
use crate::control::{StopReason, SuspendControl};
use crate::eval::evaluate_condition;
use crate::frame::Frame;
use crate::thread::ThreadId;

use super::event::{HookAction, TraceEventKind, TraceHook};

/// The hook installed by a debug session: checks pauses, breakpoints
/// and steps on line events, and suspends the calling thread inline.
///
/// One instance lives for the whole session; its [`HookHandle`]
/// identity is what the registry re-asserts on every dispatch.
///
/// [`HookHandle`]: super::event::HookHandle
pub struct DebuggerHook {
    control: SuspendControl,
    breakpoints: Arc<BreakpointTable>,
}

impl DebuggerHook {
    /// Create a hook over the session's suspend control and table.
    #[must_use]
    pub fn new(control: SuspendControl, breakpoints: Arc<BreakpointTable>) -> Self {
        Self {
            control,
            breakpoints,
        }
    }

    fn stop_reason_for_line(&self, thread: ThreadId, frame: &Frame, line: u32) -> Option<StopReason> {
        if self.control.take_pause(thread) {
            return Some(StopReason::Pause);
        }
        // Function breakpoints bind to a unit offset; they are checked
        // at the same line-event boundary as line breakpoints.
        let candidates = self
            .breakpoints
            .matching_line(&frame.code.file, line)
            .into_iter()
            .chain(
                self.breakpoints
                    .matching_offset(&frame.code.qualname, frame.lasti),
            );
        for bp in candidates {
            let hit = match &bp.condition {
                None => true,
                Some(expr) => match evaluate_condition(expr, frame) {
                    Ok(hit) => hit,
                    Err(err) => {
                        // A broken condition must not lose the stop.
                        debug!(breakpoint = bp.id, %err, "condition failed; treating as hit");
                        true
                    }
                },
            };
            if hit {
                return Some(StopReason::Breakpoint(bp.id));
            }
        }
        if self.control.step_complete(thread, frame.depth) {
            return Some(StopReason::Step);
        }
        None
    }
}

impl TraceHook for DebuggerHook {
    fn on_event(&self, thread: ThreadId, frame: &Frame, kind: TraceEventKind) -> HookAction {
        match kind {
            TraceEventKind::Line(line) => {
                if let Some(reason) = self.stop_reason_for_line(thread, frame, line) {
                    self.control.suspend_here(thread, frame, reason);
                }
            }
            TraceEventKind::Return => {
                if frame.depth == 0 {
                    if let Some(bp) = self
                        .breakpoints
                        .matching_termination(&frame.code.qualname)
                        .first()
                    {
                        self.control
                            .suspend_here(thread, frame, StopReason::Breakpoint(bp.id));
                    }
                }
            }
            TraceEventKind::Exception => {
                if self.control.break_on_exception() {
                    self.control
                        .suspend_here(thread, frame, StopReason::Exception);
                }
            }
            TraceEventKind::Call => {}
        }
        HookAction::Keep
    }

    fn describe(&self) -> &str {
        "vigil debugger"
    }
}
