//! Process-wide instrumentation state.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::frame::Frame;
use crate::thread::ThreadId;

use super::event::{HookAction, HookHandle, TraceEventKind};
use super::TraceError;

/// Per-thread instrumentation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMode {
    /// No events delivered.
    #[default]
    Disabled,
    /// Per-line callback tracing.
    CallbackTrace,
    /// Instrumentation lives in patched code units; the callback is
    /// bypassed. Always transient: entered for one temporary single
    /// step, then reverted to callback tracing.
    PatchedCode,
}

/// One saved tracing context, pushed when execution crosses an
/// instrumentation boundary and popped to restore it when unwinding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    /// Whether the file was being traced when the context was saved.
    pub tracing_file: bool,
    /// File name of the frame.
    pub file: SmolStr,
    /// Last line observed in the frame.
    pub last_line: u32,
}

/// Per-thread trace record, created lazily on first observation and
/// destroyed on thread termination or global trace disablement.
#[derive(Debug, Default)]
pub struct ThreadTraceState {
    mode: TraceMode,
    context: Vec<ContextEntry>,
    started: bool,
    /// Runtime-version workaround: per-thread "instrumentation active"
    /// counter that must be bumped before cross-thread installation.
    bootstrap_hits: u32,
}

#[derive(Debug)]
struct PendingDetach {
    owner: ThreadId,
    restore: Option<HookHandle>,
}

/// Owner of the process-wide "active hook" slot and the per-thread
/// trace states.
///
/// Exactly one hook is active at any instant. The slot is guarded by a
/// lock only during install/uninstall transitions; dispatch reads may
/// observe a stale enabled flag for at most the duration of one
/// transition.
#[derive(Default)]
pub struct InstrumentationRegistry {
    enabled: AtomicBool,
    stopping: AtomicBool,
    active: RwLock<Option<HookHandle>>,
    pending_detach: Mutex<Option<PendingDetach>>,
    threads: Mutex<FxHashMap<ThreadId, ThreadTraceState>>,
    warned: Mutex<FxHashSet<String>>,
}

impl InstrumentationRegistry {
    /// Create an empty registry. One is created at session start and
    /// torn down at session end.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `hook` as the process-wide active hook, returning the
    /// previously active one (e.g. an external profiler's).
    pub fn install(&self, hook: HookHandle) -> Option<HookHandle> {
        let mut slot = self.active.write();
        let prior = slot.replace(hook);
        self.enabled.store(true, Ordering::Release);
        prior
    }

    /// Remove the active hook, optionally restoring a prior one.
    pub fn uninstall(&self, restore: Option<HookHandle>) -> Option<HookHandle> {
        let mut slot = self.active.write();
        self.enabled.store(restore.is_some(), Ordering::Release);
        self.stopping.store(false, Ordering::Release);
        match restore {
            Some(prior) => slot.replace(prior),
            None => slot.take(),
        }
    }

    /// The currently active hook, if any.
    #[must_use]
    pub fn installed(&self) -> Option<HookHandle> {
        self.active.read().clone()
    }

    /// Request deferred detachment: removal happens inside the next
    /// callback invocation on `owner`, to avoid unregistering mid-call
    /// from a foreign thread.
    pub fn defer_detach(&self, owner: ThreadId, restore: Option<HookHandle>) {
        *self.pending_detach.lock() = Some(PendingDetach { owner, restore });
        self.stopping.store(true, Ordering::Release);
    }

    /// Whether a deferred detach is pending.
    #[must_use]
    pub fn stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Deliver an execution event to the active hook.
    ///
    /// This is the fast path: it takes no lock when tracing is off and
    /// only read-locks the hook slot otherwise.
    pub fn dispatch(&self, thread: ThreadId, frame: &Frame, kind: TraceEventKind) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        if self.stopping.load(Ordering::Acquire) && self.finish_detach(thread) {
            return;
        }
        if self.thread_mode(thread) != TraceMode::CallbackTrace {
            return;
        }
        let Some(hook) = self.installed() else {
            return;
        };

        let action = hook.on_event(thread, frame, kind);

        // The callback contract requires the same identity back on
        // every return path; re-assert it in case a conflicting tool
        // swapped the slot during the call.
        match self.installed() {
            Some(current) if current.same_identity(&hook) => {}
            Some(current) => {
                self.warn_once(
                    &format!("hook-conflict:{}", current.describe()),
                    &format!(
                        "conflicting hook '{}' installed while '{}' is active; reinstalling",
                        current.describe(),
                        hook.describe()
                    ),
                );
                self.install(hook.clone());
            }
            None => {
                self.install(hook.clone());
            }
        }

        if action == HookAction::Detach {
            let _ = self.set_thread_mode(thread, TraceMode::Disabled);
        }
    }

    /// Complete a deferred detach if `thread` is the owning thread.
    /// Returns true when detachment happened.
    fn finish_detach(&self, thread: ThreadId) -> bool {
        let mut pending = self.pending_detach.lock();
        match pending.as_ref() {
            Some(detach) if detach.owner == thread => {
                let restore = pending.take().and_then(|d| d.restore);
                drop(pending);
                self.uninstall(restore);
                self.clear_thread_states();
                debug!(%thread, "deferred hook detach completed");
                true
            }
            _ => false,
        }
    }

    /// Current mode for a thread (lazily `Disabled`).
    #[must_use]
    pub fn thread_mode(&self, thread: ThreadId) -> TraceMode {
        self.threads
            .lock()
            .get(&thread)
            .map_or(TraceMode::Disabled, |state| state.mode)
    }

    /// Transition a thread's mode, enforcing the legal transitions
    /// `disabled -> callback-trace -> (disabled | patched-code) ->
    /// callback-trace`.
    pub fn set_thread_mode(&self, thread: ThreadId, to: TraceMode) -> Result<(), TraceError> {
        let mut threads = self.threads.lock();
        let state = threads.entry(thread).or_default();
        let from = state.mode;
        let legal = matches!(
            (from, to),
            (TraceMode::Disabled, TraceMode::CallbackTrace)
                | (TraceMode::CallbackTrace, TraceMode::Disabled)
                | (TraceMode::CallbackTrace, TraceMode::PatchedCode)
                | (TraceMode::PatchedCode, TraceMode::CallbackTrace)
        ) || from == to;
        if !legal {
            return Err(TraceError::InvalidTransition { from, to });
        }
        state.mode = to;
        Ok(())
    }

    /// Mark a thread's tracing as started.
    pub fn mark_started(&self, thread: ThreadId) {
        self.threads.lock().entry(thread).or_default().started = true;
    }

    /// Whether a thread's tracing has started.
    #[must_use]
    pub fn started(&self, thread: ThreadId) -> bool {
        self.threads
            .lock()
            .get(&thread)
            .is_some_and(|state| state.started)
    }

    /// Save a tracing context before crossing an instrumentation
    /// boundary.
    pub fn push_context(&self, thread: ThreadId, entry: ContextEntry) {
        self.threads
            .lock()
            .entry(thread)
            .or_default()
            .context
            .push(entry);
    }

    /// Restore the most recently saved context while unwinding.
    #[must_use]
    pub fn pop_context(&self, thread: ThreadId) -> Option<ContextEntry> {
        self.threads.lock().get_mut(&thread)?.context.pop()
    }

    /// Bump the per-thread "instrumentation active" counter.
    pub fn note_bootstrap(&self, thread: ThreadId) {
        let mut threads = self.threads.lock();
        let state = threads.entry(thread).or_default();
        state.bootstrap_hits = state.bootstrap_hits.saturating_add(1);
    }

    /// How many times the bootstrap fragment has run on a thread.
    #[must_use]
    pub fn bootstrap_hits(&self, thread: ThreadId) -> u32 {
        self.threads
            .lock()
            .get(&thread)
            .map_or(0, |state| state.bootstrap_hits)
    }

    /// Destroy a thread's trace state on termination.
    pub fn remove_thread_state(&self, thread: ThreadId) {
        self.threads.lock().remove(&thread);
    }

    /// Destroy all per-thread state on global disablement.
    pub fn clear_thread_states(&self) {
        self.threads.lock().clear();
    }

    /// Emit a warning once per deduplication key.
    pub fn warn_once(&self, key: &str, message: &str) {
        let mut warned = self.warned.lock();
        if warned.insert(key.to_string()) {
            warn!("{message}");
        }
    }

    /// Number of distinct warnings emitted so far.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warned.lock().len()
    }
}

impl std::fmt::Debug for InstrumentationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationRegistry")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("stopping", &self.stopping.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
