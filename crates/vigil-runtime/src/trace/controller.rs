//! The trace controller: install/remove the callback hook and keep
//! single-thread vs. all-thread installation consistent.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::frame::Frame;
use crate::thread::ThreadId;

use super::event::{HookAction, HookHandle, TraceEventKind, TraceHook};
use super::installer::{CrossThreadInstaller, InstallOutcome};
use super::registry::{InstrumentationRegistry, TraceMode};
use super::TraceError;

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    /// No hook installed.
    #[default]
    Untraced,
    /// Hook installed on the enabling thread only.
    TracedLocal,
    /// Hook installed across all known threads.
    TracedProcessWide,
}

/// Capability flags surfaced to the session. Absence of a capability
/// is a reported gap, never a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// False when all-thread installation degraded to "only newly
    /// created threads are observed".
    pub all_thread_install: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            all_thread_install: true,
        }
    }
}

/// Wrapper keeping the debugger hook outermost. Any previously active
/// hook (an external profiler's, say) is invoked first, then the
/// debugger's; the wrapper's handle identity is what stays installed
/// on every return path.
struct OutermostHook {
    inner: HookHandle,
    prior: Option<HookHandle>,
}

impl TraceHook for OutermostHook {
    fn on_event(&self, thread: ThreadId, frame: &Frame, kind: TraceEventKind) -> HookAction {
        if let Some(prior) = &self.prior {
            // The prior hook's disposition applies to itself only; it
            // cannot detach the debugger.
            let _ = prior.on_event(thread, frame, kind);
        }
        self.inner.on_event(thread, frame, kind)
    }

    fn describe(&self) -> &str {
        self.inner.describe()
    }
}

#[derive(Default)]
struct ControllerInner {
    state: ControllerState,
    owner: Option<ThreadId>,
    wrapped: Option<HookHandle>,
    prior: Option<HookHandle>,
    capabilities: Capabilities,
}

/// Owns instrumentation strategy transitions for one session.
pub struct TraceController {
    registry: Arc<InstrumentationRegistry>,
    installer: CrossThreadInstaller,
    inner: Mutex<ControllerInner>,
}

impl TraceController {
    /// Create a controller over an injected registry and installer.
    #[must_use]
    pub fn new(registry: Arc<InstrumentationRegistry>, installer: CrossThreadInstaller) -> Self {
        Self {
            registry,
            installer,
            inner: Mutex::new(ControllerInner::default()),
        }
    }

    /// Current controller state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.inner.lock().state
    }

    /// Current capability flags.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.inner.lock().capabilities
    }

    /// `Untraced -> TracedLocal`: install `hook` on `owner` only.
    ///
    /// Any previously active hook is recorded and wrapped so the new
    /// hook is the outermost one; `disable` restores it by identity.
    pub fn enable(&self, hook: HookHandle, owner: ThreadId) -> Result<(), TraceError> {
        let mut inner = self.inner.lock();
        if inner.state != ControllerState::Untraced {
            return Err(TraceError::AlreadyEnabled);
        }

        let prior = self.registry.installed();
        let wrapped = HookHandle::new(OutermostHook {
            inner: hook,
            prior: prior.clone(),
        });
        self.registry.install(wrapped.clone());
        self.registry
            .set_thread_mode(owner, TraceMode::CallbackTrace)?;
        self.registry.mark_started(owner);

        inner.state = ControllerState::TracedLocal;
        inner.owner = Some(owner);
        inner.wrapped = Some(wrapped);
        inner.prior = prior;
        info!(%owner, "tracing enabled (thread-local)");
        Ok(())
    }

    /// `TracedLocal -> TracedProcessWide` via the cross-thread
    /// installer.
    ///
    /// When the native helper is unavailable this degrades explicitly:
    /// the capability flag is cleared and only newly created threads
    /// are observed from here on. Never a silent success.
    pub fn enable_all(&self) -> Result<InstallOutcome, TraceError> {
        let wrapped = {
            let inner = self.inner.lock();
            if inner.state != ControllerState::TracedLocal {
                return Err(TraceError::NotEnabled);
            }
            inner.wrapped.clone().ok_or(TraceError::NotEnabled)?
        };

        let outcome = self.installer.install_on_all_threads(&wrapped);

        let mut inner = self.inner.lock();
        inner.state = ControllerState::TracedProcessWide;
        if outcome == InstallOutcome::NotSupported {
            inner.capabilities.all_thread_install = false;
            self.registry.warn_once(
                "install-all-unsupported",
                "all-thread installation unavailable; only newly created threads are observed",
            );
        }
        info!(?outcome, "tracing enabled (process-wide)");
        Ok(outcome)
    }

    /// Observe a newly created thread; under process-wide tracing it
    /// starts in callback mode.
    pub fn observe_thread(&self, thread: ThreadId) {
        let process_wide = self.inner.lock().state == ControllerState::TracedProcessWide;
        if process_wide {
            let _ = self.registry.set_thread_mode(thread, TraceMode::CallbackTrace);
            self.registry.mark_started(thread);
        }
    }

    /// Any state `-> Untraced`, restoring the prior hook by identity.
    ///
    /// When called from a thread other than the enabling one, actual
    /// detachment is deferred: a stopping flag is set and removal runs
    /// inside the next callback invocation on the owning thread, so
    /// the hook is never unregistered mid-call.
    pub fn disable(&self, caller: ThreadId) {
        let mut inner = self.inner.lock();
        if inner.state == ControllerState::Untraced {
            return;
        }
        let owner = inner.owner.take();
        let prior = inner.prior.take();
        inner.wrapped = None;
        inner.state = ControllerState::Untraced;
        drop(inner);

        match owner {
            Some(owner) if owner != caller => {
                self.registry.defer_detach(owner, prior);
                info!(%owner, %caller, "hook removal deferred to owning thread");
            }
            _ => {
                self.registry.uninstall(prior);
                self.registry.clear_thread_states();
                info!("tracing disabled");
            }
        }
    }

    /// Enter the transient patched-code mode for one thread.
    pub fn enter_patched_mode(&self, thread: ThreadId) -> Result<(), TraceError> {
        self.registry.set_thread_mode(thread, TraceMode::PatchedCode)
    }

    /// Revert a thread from patched-code mode to callback tracing.
    pub fn leave_patched_mode(&self, thread: ThreadId) -> Result<(), TraceError> {
        self.registry
            .set_thread_mode(thread, TraceMode::CallbackTrace)
    }
}
