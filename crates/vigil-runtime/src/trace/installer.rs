//! Cross-thread hook installation.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::thread::ThreadRegistry;

use super::event::HookHandle;
use super::registry::{InstrumentationRegistry, TraceMode};
use super::CapabilityGap;

/// Default bound on the per-thread bootstrap wait. The bundled design
/// this replaces waited unboundedly; expiry here is treated as a
/// capability gap for that thread, not a hang.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of a cross-thread installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Installation ran; some threads may have been skipped.
    Installed {
        /// Threads the hook was installed on.
        installed: usize,
        /// Threads skipped (exited mid-enumeration, bootstrap timeout,
        /// or per-thread attach failure).
        skipped: usize,
    },
    /// The native helper is unavailable; nothing was attempted.
    NotSupported,
}

/// The small native helper the installer delegates unsafe cross-thread
/// work to, keyed by external thread id.
///
/// `enumerate_os_threads` is the runtime's lowest-level thread
/// enumeration; unlike the higher-level thread registry it also sees
/// externally created threads.
pub trait HookBridge: Send + Sync {
    /// Whether the helper exists on this platform/runtime version.
    fn supported(&self) -> bool {
        true
    }

    /// Snapshot every live external thread id.
    fn enumerate_os_threads(&self) -> Vec<u64>;

    /// Run a bootstrap task on the target thread, blocking until it
    /// completes or `timeout` expires.
    fn run_bootstrap(
        &self,
        os_id: u64,
        task: Box<dyn FnOnce() + Send>,
        timeout: Duration,
    ) -> Result<(), CapabilityGap>;

    /// Attach the active hook to the target thread.
    fn attach_hook(&self, os_id: u64) -> Result<(), CapabilityGap>;
}

/// Bridge used when the runtime hosts its own threads: enumeration and
/// attachment go through the in-process thread registry.
#[derive(Debug)]
pub struct InProcessBridge {
    threads: Arc<ThreadRegistry>,
}

impl InProcessBridge {
    /// Create a bridge over the runtime's own thread registry.
    #[must_use]
    pub fn new(threads: Arc<ThreadRegistry>) -> Self {
        Self { threads }
    }
}

impl HookBridge for InProcessBridge {
    fn enumerate_os_threads(&self) -> Vec<u64> {
        self.threads
            .enumerate()
            .into_iter()
            .filter_map(|id| self.threads.record(id))
            .filter(|record| record.alive)
            .map(|record| record.os_id)
            .collect()
    }

    fn run_bootstrap(
        &self,
        _os_id: u64,
        task: Box<dyn FnOnce() + Send>,
        _timeout: Duration,
    ) -> Result<(), CapabilityGap> {
        // In-process threads share the registry's memory; the bump is
        // immediately visible without a remote task.
        task();
        Ok(())
    }

    fn attach_hook(&self, _os_id: u64) -> Result<(), CapabilityGap> {
        Ok(())
    }
}

/// Bridge for platforms without the native helper. Every operation
/// reports the gap instead of raising.
#[derive(Debug, Default)]
pub struct UnsupportedBridge;

impl HookBridge for UnsupportedBridge {
    fn supported(&self) -> bool {
        false
    }

    fn enumerate_os_threads(&self) -> Vec<u64> {
        Vec::new()
    }

    fn run_bootstrap(
        &self,
        _os_id: u64,
        _task: Box<dyn FnOnce() + Send>,
        _timeout: Duration,
    ) -> Result<(), CapabilityGap> {
        Err(CapabilityGap::NotSupported)
    }

    fn attach_hook(&self, _os_id: u64) -> Result<(), CapabilityGap> {
        Err(CapabilityGap::NotSupported)
    }
}

/// Retrofits the active hook onto already-running threads.
pub struct CrossThreadInstaller {
    registry: Arc<InstrumentationRegistry>,
    threads: Arc<ThreadRegistry>,
    bridge: Arc<dyn HookBridge>,
    bootstrap_timeout: Duration,
}

impl CrossThreadInstaller {
    /// Create an installer over a registry, thread registry and bridge.
    #[must_use]
    pub fn new(
        registry: Arc<InstrumentationRegistry>,
        threads: Arc<ThreadRegistry>,
        bridge: Arc<dyn HookBridge>,
    ) -> Self {
        Self {
            registry,
            threads,
            bridge,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }

    /// Override the bootstrap wait bound.
    #[must_use]
    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    /// Install `hook` on every live thread.
    ///
    /// Operates on a snapshot of thread ids taken once; a thread that
    /// exits mid-enumeration is skipped, not fatal. Threads created
    /// after the snapshot are not guaranteed inclusion.
    pub fn install_on_all_threads(&self, hook: &HookHandle) -> InstallOutcome {
        if !self.bridge.supported() {
            return InstallOutcome::NotSupported;
        }

        // Make sure the process-wide slot holds the hook being spread.
        match self.registry.installed() {
            Some(active) if active.same_identity(hook) => {}
            _ => {
                self.registry.install(hook.clone());
            }
        }

        let snapshot = self.bridge.enumerate_os_threads();
        let mut installed = 0_usize;
        let mut skipped = 0_usize;

        for os_id in snapshot {
            // Synthesize a shadow record for enumerated threads the
            // higher-level registry never saw.
            let id = self
                .threads
                .by_os_id(os_id)
                .unwrap_or_else(|| self.threads.announce_external(os_id));
            match self.threads.record(id) {
                Some(record) if record.alive => {}
                _ => {
                    skipped += 1;
                    continue;
                }
            }

            // On runtime versions where the "instrumentation active"
            // counter is per-call, bump it on the target thread first
            // and block (bounded) until the bump lands.
            let registry = Arc::clone(&self.registry);
            let bump = Box::new(move || registry.note_bootstrap(id));
            if let Err(gap) = self.bridge.run_bootstrap(os_id, bump, self.bootstrap_timeout) {
                self.registry.warn_once(
                    &format!("bootstrap:{os_id}"),
                    &format!("skipping thread {os_id}: {gap}"),
                );
                skipped += 1;
                continue;
            }

            if let Err(gap) = self.bridge.attach_hook(os_id) {
                self.registry.warn_once(
                    &format!("attach:{os_id}"),
                    &format!("skipping thread {os_id}: {gap}"),
                );
                skipped += 1;
                continue;
            }

            if self
                .registry
                .set_thread_mode(id, TraceMode::CallbackTrace)
                .is_err()
            {
                skipped += 1;
                continue;
            }
            self.registry.mark_started(id);
            installed += 1;
        }

        debug!(installed, skipped, "cross-thread install finished");
        InstallOutcome::Installed { installed, skipped }
    }
}
