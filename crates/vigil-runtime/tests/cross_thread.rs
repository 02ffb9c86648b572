use std::sync::Arc;
use std::time::Duration;

use vigil_runtime::frame::Frame;
use vigil_runtime::thread::{ThreadId, ThreadRegistry};
use vigil_runtime::trace::{
    CapabilityGap, CrossThreadInstaller, HookAction, HookBridge, HookHandle,
    InstrumentationRegistry, InstallOutcome, TraceController, TraceEventKind, TraceHook,
    TraceMode, UnsupportedBridge,
};

struct NullHook;

impl TraceHook for NullHook {
    fn on_event(&self, _thread: ThreadId, _frame: &Frame, _kind: TraceEventKind) -> HookAction {
        HookAction::Keep
    }
}

/// Bridge with a scripted enumeration and optional bootstrap failures.
struct ScriptedBridge {
    os_ids: Vec<u64>,
    timeout_on: Option<u64>,
}

impl HookBridge for ScriptedBridge {
    fn enumerate_os_threads(&self) -> Vec<u64> {
        self.os_ids.clone()
    }

    fn run_bootstrap(
        &self,
        os_id: u64,
        task: Box<dyn FnOnce() + Send>,
        _timeout: Duration,
    ) -> Result<(), CapabilityGap> {
        if self.timeout_on == Some(os_id) {
            return Err(CapabilityGap::BootstrapTimeout(os_id));
        }
        task();
        Ok(())
    }

    fn attach_hook(&self, _os_id: u64) -> Result<(), CapabilityGap> {
        Ok(())
    }
}

fn installer_with(
    bridge: Arc<dyn HookBridge>,
) -> (Arc<InstrumentationRegistry>, Arc<ThreadRegistry>, CrossThreadInstaller) {
    let registry = Arc::new(InstrumentationRegistry::new());
    let threads = Arc::new(ThreadRegistry::new());
    let installer =
        CrossThreadInstaller::new(Arc::clone(&registry), Arc::clone(&threads), bridge);
    (registry, threads, installer)
}

#[test]
fn shadow_record_is_synthesized_for_unregistered_threads() {
    let bridge = Arc::new(ScriptedBridge {
        os_ids: vec![7777],
        timeout_on: None,
    });
    let (registry, threads, installer) = installer_with(bridge);

    let outcome = installer.install_on_all_threads(&HookHandle::new(NullHook));
    assert_eq!(
        outcome,
        InstallOutcome::Installed {
            installed: 1,
            skipped: 0
        }
    );

    let id = threads.by_os_id(7777).unwrap();
    let record = threads.record(id).unwrap();
    assert!(record.shadow);
    assert_eq!(registry.thread_mode(id), TraceMode::CallbackTrace);
    assert!(registry.started(id));
}

#[test]
fn bootstrap_counter_is_bumped_before_attach() {
    let bridge = Arc::new(ScriptedBridge {
        os_ids: vec![11],
        timeout_on: None,
    });
    let (registry, threads, installer) = installer_with(bridge);
    let worker = threads.register("worker", 11);

    installer.install_on_all_threads(&HookHandle::new(NullHook));
    assert_eq!(registry.bootstrap_hits(worker), 1);
}

#[test]
fn exited_threads_are_skipped_not_fatal() {
    let bridge = Arc::new(ScriptedBridge {
        os_ids: vec![5],
        timeout_on: None,
    });
    let (_registry, threads, installer) = installer_with(bridge);
    let worker = threads.register("worker", 5);
    threads.mark_exited(worker);

    let outcome = installer.install_on_all_threads(&HookHandle::new(NullHook));
    assert_eq!(
        outcome,
        InstallOutcome::Installed {
            installed: 0,
            skipped: 1
        }
    );
}

#[test]
fn bootstrap_timeout_skips_only_that_thread() {
    let bridge = Arc::new(ScriptedBridge {
        os_ids: vec![1, 2],
        timeout_on: Some(1),
    });
    let (registry, threads, installer) = installer_with(bridge);
    let slow = threads.register("slow", 1);
    let fast = threads.register("fast", 2);

    let outcome = installer.install_on_all_threads(&HookHandle::new(NullHook));
    assert_eq!(
        outcome,
        InstallOutcome::Installed {
            installed: 1,
            skipped: 1
        }
    );
    assert_eq!(registry.thread_mode(slow), TraceMode::Disabled);
    assert_eq!(registry.thread_mode(fast), TraceMode::CallbackTrace);
    assert_eq!(registry.warning_count(), 1);
}

#[test]
fn missing_native_helper_is_a_capability_gap() {
    let (registry, _threads, installer) = installer_with(Arc::new(UnsupportedBridge));
    let outcome = installer.install_on_all_threads(&HookHandle::new(NullHook));
    assert_eq!(outcome, InstallOutcome::NotSupported);
    // Nothing was attempted, so nothing was installed either.
    assert!(registry.installed().is_none());
}

#[test]
fn controller_degrades_capabilities_on_unsupported_helper() {
    let registry = Arc::new(InstrumentationRegistry::new());
    let threads = Arc::new(ThreadRegistry::new());
    let installer = CrossThreadInstaller::new(
        Arc::clone(&registry),
        threads,
        Arc::new(UnsupportedBridge),
    );
    let controller = TraceController::new(Arc::clone(&registry), installer);

    let owner = ThreadId(1);
    controller.enable(HookHandle::new(NullHook), owner).unwrap();
    let outcome = controller.enable_all().unwrap();
    assert_eq!(outcome, InstallOutcome::NotSupported);
    assert!(!controller.capabilities().all_thread_install);
    // Local tracing keeps working for the enabling thread.
    assert_eq!(registry.thread_mode(owner), TraceMode::CallbackTrace);
}
