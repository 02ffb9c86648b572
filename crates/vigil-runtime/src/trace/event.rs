//! Execution events and the hook contract.

use std::fmt;
use std::sync::Arc;

use crate::frame::Frame;
use crate::thread::ThreadId;

/// Execution events delivered to the active hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEventKind {
    /// A new frame was entered.
    Call,
    /// Execution reached the first instruction of a source line.
    Line(u32),
    /// The current frame is about to return.
    Return,
    /// An error is propagating out of the current instruction.
    Exception,
}

/// What the hook asks the runtime to do after an event.
///
/// The underlying callback contract requires the hook to keep
/// reporting its own identity; anything other than [`Keep`] removes
/// instrumentation from the frame.
///
/// [`Keep`]: HookAction::Keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Stay installed for subsequent events.
    Keep,
    /// De-instrument: the runtime stops delivering events on this thread.
    Detach,
}

/// A process-wide execution-event hook.
///
/// Implementations are dispatched inline on whichever application
/// thread triggered the event, so they must be `Send + Sync` and must
/// not assume any particular thread.
pub trait TraceHook: Send + Sync {
    /// Handle one execution event.
    fn on_event(&self, thread: ThreadId, frame: &Frame, kind: TraceEventKind) -> HookAction;

    /// Short name used in conflict warnings.
    fn describe(&self) -> &str {
        "anonymous hook"
    }
}

/// A shared, identity-bearing handle to a hook.
///
/// Identity is the allocation, not the value: the same handle must be
/// (re)installed on every return path so nested tooling cannot
/// silently detach the debugger. Construct one handle per logical hook
/// and clone it.
#[derive(Clone)]
pub struct HookHandle(Arc<dyn TraceHook>);

impl HookHandle {
    /// Wrap a hook into a stable-identity handle.
    pub fn new(hook: impl TraceHook + 'static) -> Self {
        Self(Arc::new(hook))
    }

    /// Whether two handles refer to the same hook instance.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Dispatch an event to the hook.
    #[must_use]
    pub fn on_event(&self, thread: ThreadId, frame: &Frame, kind: TraceEventKind) -> HookAction {
        self.0.on_event(thread, frame, kind)
    }

    /// The hook's display name.
    #[must_use]
    pub fn describe(&self) -> &str {
        self.0.describe()
    }
}

impl fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HookHandle").field(&self.0.describe()).finish()
    }
}
