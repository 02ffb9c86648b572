//! Per-thread suspend/resume control.
//!
//! Application threads that hit a breakpoint block cooperatively here
//! until a resume command arrives; suspension is per-thread and one
//! thread's suspend never blocks another.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::breakpoint::BreakpointId;
use crate::frame::Frame;
use crate::thread::ThreadId;

/// Why a thread suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A breakpoint fired.
    Breakpoint(BreakpointId),
    /// A step operation completed.
    Step,
    /// An explicit pause request.
    Pause,
    /// An unhandled error reached the hook.
    Exception,
}

/// Notification emitted when a thread suspends.
#[derive(Debug, Clone)]
pub struct StopNotice {
    /// The suspended thread.
    pub thread: ThreadId,
    /// Why it suspended.
    pub reason: StopReason,
    /// The frame it suspended in.
    pub frame: Frame,
}

/// Step granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Stop at the next line, regardless of call depth.
    Into,
    /// Stop at the next line at or above the starting depth.
    Over,
    /// Stop once control returns below the starting depth.
    Out,
}

#[derive(Debug, Clone, Copy)]
struct StepState {
    kind: StepKind,
    target_depth: u32,
}

#[derive(Debug, Default)]
struct SuspendState {
    suspended: FxHashSet<ThreadId>,
    resume: FxHashSet<ThreadId>,
    pause_requests: FxHashSet<ThreadId>,
    pause_all: bool,
    paused_by_all: FxHashSet<ThreadId>,
    steps: FxHashMap<ThreadId, StepState>,
    break_on_exception: bool,
    terminated: bool,
    stop_tx: Option<Sender<StopNotice>>,
}

/// Shared suspend/resume state. Cloning shares the state.
#[derive(Clone, Default)]
pub struct SuspendControl {
    state: Arc<(Mutex<SuspendState>, Condvar)>,
}

impl SuspendControl {
    /// Create a control with no pending requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the channel suspend notifications are sent on.
    pub fn set_stop_channel(&self, tx: Sender<StopNotice>) {
        let (lock, _) = &*self.state;
        lock.lock().expect("suspend state poisoned").stop_tx = Some(tx);
    }

    /// Request that one thread pause at its next line event.
    pub fn request_pause(&self, thread: ThreadId) {
        let (lock, _) = &*self.state;
        lock.lock()
            .expect("suspend state poisoned")
            .pause_requests
            .insert(thread);
    }

    /// Request that every thread pause at its next line event.
    pub fn request_pause_all(&self) {
        let (lock, _) = &*self.state;
        lock.lock().expect("suspend state poisoned").pause_all = true;
    }

    /// Enable or disable suspending on unhandled errors.
    pub fn set_break_on_exception(&self, enabled: bool) {
        let (lock, _) = &*self.state;
        lock.lock()
            .expect("suspend state poisoned")
            .break_on_exception = enabled;
    }

    /// Whether unhandled errors suspend.
    #[must_use]
    pub fn break_on_exception(&self) -> bool {
        let (lock, _) = &*self.state;
        lock.lock()
            .expect("suspend state poisoned")
            .break_on_exception
    }

    /// Arm a step operation for a thread currently suspended at
    /// `current_depth`.
    pub fn arm_step(&self, thread: ThreadId, kind: StepKind, current_depth: u32) {
        let target_depth = match kind {
            StepKind::Into | StepKind::Over => current_depth,
            StepKind::Out => current_depth.saturating_sub(1),
        };
        let (lock, _) = &*self.state;
        lock.lock()
            .expect("suspend state poisoned")
            .steps
            .insert(thread, StepState { kind, target_depth });
    }

    /// Whether any thread has an armed, unconsumed step. Steps need
    /// per-line callbacks, so this feeds strategy selection.
    #[must_use]
    pub fn any_step_armed(&self) -> bool {
        let (lock, _) = &*self.state;
        !lock
            .lock()
            .expect("suspend state poisoned")
            .steps
            .is_empty()
    }

    /// Consume a pending pause request for `thread`, if any.
    #[must_use]
    pub fn take_pause(&self, thread: ThreadId) -> bool {
        let (lock, _) = &*self.state;
        let mut state = lock.lock().expect("suspend state poisoned");
        if state.pause_all && state.paused_by_all.insert(thread) {
            return true;
        }
        state.pause_requests.remove(&thread)
    }

    /// Whether an armed step for `thread` completes at `depth`.
    /// Consumes the step state when it does.
    #[must_use]
    pub fn step_complete(&self, thread: ThreadId, depth: u32) -> bool {
        let (lock, _) = &*self.state;
        let mut state = lock.lock().expect("suspend state poisoned");
        let Some(step) = state.steps.get(&thread).copied() else {
            return false;
        };
        let done = match step.kind {
            StepKind::Into => true,
            StepKind::Over => depth <= step.target_depth,
            StepKind::Out => depth <= step.target_depth,
        };
        if done {
            state.steps.remove(&thread);
        }
        done
    }

    /// Block the calling thread until a resume arrives.
    ///
    /// Emits a [`StopNotice`] first, then waits on the condition
    /// variable. Other threads are unaffected.
    pub fn suspend_here(&self, thread: ThreadId, frame: &Frame, reason: StopReason) {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock().expect("suspend state poisoned");
        if state.terminated {
            return;
        }
        state.suspended.insert(thread);
        if let Some(tx) = &state.stop_tx {
            let _ = tx.send(StopNotice {
                thread,
                reason,
                frame: frame.clone(),
            });
        }
        debug!(%thread, ?reason, "thread suspended");
        while !state.resume.remove(&thread) && !state.terminated {
            state = cvar.wait(state).expect("suspend state poisoned");
        }
        state.suspended.remove(&thread);
        debug!(%thread, "thread resumed");
    }

    /// Resume one suspended thread.
    pub fn resume(&self, thread: ThreadId) {
        let (lock, cvar) = &*self.state;
        lock.lock()
            .expect("suspend state poisoned")
            .resume
            .insert(thread);
        cvar.notify_all();
    }

    /// Resume every suspended thread and drop any pending pause-all.
    pub fn resume_all(&self) {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock().expect("suspend state poisoned");
        state.pause_all = false;
        state.paused_by_all.clear();
        let suspended: Vec<ThreadId> = state.suspended.iter().copied().collect();
        state.resume.extend(suspended);
        cvar.notify_all();
    }

    /// Whether a thread is currently suspended.
    #[must_use]
    pub fn is_suspended(&self, thread: ThreadId) -> bool {
        let (lock, _) = &*self.state;
        lock.lock()
            .expect("suspend state poisoned")
            .suspended
            .contains(&thread)
    }

    /// Ids of all currently suspended threads.
    #[must_use]
    pub fn suspended_threads(&self) -> Vec<ThreadId> {
        let (lock, _) = &*self.state;
        let mut ids: Vec<ThreadId> = lock
            .lock()
            .expect("suspend state poisoned")
            .suspended
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Wake every waiter and refuse further suspensions.
    pub fn terminate(&self) {
        let (lock, cvar) = &*self.state;
        lock.lock().expect("suspend state poisoned").terminated = true;
        cvar.notify_all();
    }

    /// Test helper: wait until `thread` reports suspended.
    pub fn wait_suspended(&self, thread: ThreadId, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.is_suspended(thread) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl std::fmt::Debug for SuspendControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendControl").finish_non_exhaustive()
    }
}
