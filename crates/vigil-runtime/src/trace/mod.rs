//! Execution-event instrumentation: hooks, the process-wide registry,
//! the trace controller, and cross-thread installation.

mod controller;
mod event;
mod hook;
mod installer;
mod registry;

pub use controller::{Capabilities, ControllerState, TraceController};
pub use event::{HookAction, HookHandle, TraceEventKind, TraceHook};
pub use hook::DebuggerHook;
pub use installer::{CrossThreadInstaller, HookBridge, InProcessBridge, InstallOutcome,
    UnsupportedBridge, DEFAULT_BOOTSTRAP_TIMEOUT};
pub use registry::{ContextEntry, InstrumentationRegistry, ThreadTraceState, TraceMode};

use thiserror::Error;

/// Trace controller and registry errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TraceError {
    /// Illegal per-thread mode transition.
    #[error("invalid trace mode transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Mode before the attempted transition.
        from: TraceMode,
        /// Requested mode.
        to: TraceMode,
    },

    /// `enable` called while already tracing.
    #[error("tracing already enabled")]
    AlreadyEnabled,

    /// An operation that requires active tracing was called untraced.
    #[error("tracing not enabled")]
    NotEnabled,
}

/// Capability gaps reported by the cross-thread installer. Never
/// fatal: callers continue with degraded, thread-local instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CapabilityGap {
    /// The platform or runtime version lacks the native helper.
    #[error("cross-thread installation not supported on this platform")]
    NotSupported,

    /// The per-thread bootstrap task did not complete in time.
    #[error("bootstrap task on OS thread {0} timed out")]
    BootstrapTimeout(u64),
}
