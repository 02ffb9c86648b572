//! Session state and instrumentation strategy selection.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use vigil_runtime::Runtime;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Connection established, version handshake pending.
    #[default]
    Connecting,
    /// Target executing; breakpoints armed.
    Running,
    /// At least one thread suspended.
    Suspended,
    /// Connection closed or target exited.
    Terminated,
}

/// The two cooperating instrumentation strategies.
///
/// Callback tracing is cheap to set up and pays per line; patched code
/// is costly to set up and near-free to run. The selector switches
/// live based on whether any active breakpoint carries a condition, by
/// the reasoning that conditional stops need per-hit evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Per-line callback tracing.
    #[default]
    CallbackTrace,
    /// Rewritten code units carry the instrumentation.
    PatchedCode,
}

/// One remote-debugging connection's state: lifecycle, daemon-side
/// sequence allocation, and the active strategy.
pub struct Session {
    runtime: Arc<Runtime>,
    state: Mutex<SessionState>,
    strategy: Mutex<Strategy>,
    /// Daemon-originated sequence ids are even; requests from the
    /// debugger are odd and echoed, never allocated here.
    daemon_seq: AtomicI64,
}

impl Session {
    /// Create a session at connection establishment.
    #[must_use]
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            state: Mutex::new(SessionState::Connecting),
            strategy: Mutex::new(Strategy::CallbackTrace),
            daemon_seq: AtomicI64::new(0),
        }
    }

    /// The shared runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to a new lifecycle state. Terminated is absorbing.
    pub fn set_state(&self, to: SessionState) {
        let mut state = self.state.lock();
        if *state == SessionState::Terminated {
            return;
        }
        if *state != to {
            info!(from = ?*state, to = ?to, "session state change");
            *state = to;
        }
    }

    /// Allocate the next daemon-originated (even) sequence id.
    #[must_use]
    pub fn next_seq(&self) -> i64 {
        self.daemon_seq.fetch_add(2, Ordering::Relaxed) + 2
    }

    /// Currently active strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        *self.strategy.lock()
    }

    /// Re-select the strategy from the current breakpoint table and
    /// stepping state. Patched code can only serve unconditional
    /// breakpoints; conditions, armed steps, and exception breaks all
    /// need per-line callbacks.
    ///
    /// A transition to the already-active strategy is a no-op; only a
    /// real switch touches per-thread trace modes.
    pub fn reselect_strategy(&self) -> Strategy {
        let needs_callbacks = self.runtime.breakpoints().any_conditional()
            || self.runtime.control().any_step_armed()
            || self.runtime.control().break_on_exception();
        let wanted = if !needs_callbacks && self.runtime.breakpoints().count() > 0 {
            Strategy::PatchedCode
        } else {
            Strategy::CallbackTrace
        };

        let mut active = self.strategy.lock();
        if *active == wanted {
            return wanted;
        }
        info!(from = ?*active, to = ?wanted, "instrumentation strategy switch");
        *active = wanted;
        wanted
    }
}
