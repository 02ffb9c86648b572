use std::sync::Arc;

use vigil_runtime::bytecode::{CodeBuilder, Opcode};
use vigil_runtime::frame::Frame;
use vigil_runtime::thread::{ThreadId, ThreadRegistry};
use vigil_runtime::trace::{
    ControllerState, CrossThreadInstaller, HookAction, HookHandle, InProcessBridge,
    InstrumentationRegistry, TraceController, TraceError, TraceEventKind, TraceHook, TraceMode,
};
use vigil_runtime::value::Value;

struct NullHook;

impl TraceHook for NullHook {
    fn on_event(&self, _thread: ThreadId, _frame: &Frame, _kind: TraceEventKind) -> HookAction {
        HookAction::Keep
    }

    fn describe(&self) -> &str {
        "null"
    }
}

/// Hook that simulates a rogue tool swapping the active slot during
/// every callback.
struct SwappingHook {
    registry: Arc<InstrumentationRegistry>,
    rogue: HookHandle,
}

impl TraceHook for SwappingHook {
    fn on_event(&self, _thread: ThreadId, _frame: &Frame, _kind: TraceEventKind) -> HookAction {
        self.registry.install(self.rogue.clone());
        HookAction::Keep
    }

    fn describe(&self) -> &str {
        "swapping"
    }
}

fn setup() -> (Arc<InstrumentationRegistry>, TraceController) {
    let registry = Arc::new(InstrumentationRegistry::new());
    let threads = Arc::new(ThreadRegistry::new());
    let bridge = Arc::new(InProcessBridge::new(Arc::clone(&threads)));
    let installer = CrossThreadInstaller::new(Arc::clone(&registry), threads, bridge);
    let controller = TraceController::new(Arc::clone(&registry), installer);
    (registry, controller)
}

fn dummy_frame() -> Frame {
    let mut b = CodeBuilder::new("noop", "noop.vg");
    let nil = b.constant(Value::Nil);
    b.op_at(1, Opcode::LoadConst, nil);
    b.op(Opcode::Return, 0);
    Frame::new(Arc::new(b.build()), Vec::new(), 0)
}

#[test]
fn disable_restores_prior_hook_by_identity() {
    let (registry, controller) = setup();
    let prior = HookHandle::new(NullHook);
    registry.install(prior.clone());

    let owner = ThreadId(1);
    controller.enable(HookHandle::new(NullHook), owner).unwrap();
    assert_eq!(controller.state(), ControllerState::TracedLocal);
    assert!(!registry.installed().unwrap().same_identity(&prior));

    controller.disable(owner);
    assert_eq!(controller.state(), ControllerState::Untraced);
    assert!(registry.installed().unwrap().same_identity(&prior));
}

#[test]
fn foreign_thread_disable_is_deferred_to_the_owner() {
    let (registry, controller) = setup();
    let owner = ThreadId(1);
    let other = ThreadId(2);
    controller.enable(HookHandle::new(NullHook), owner).unwrap();

    controller.disable(other);
    assert!(registry.stopping());
    assert!(registry.installed().is_some());

    // An event on a non-owning thread must not complete the detach.
    registry.dispatch(other, &dummy_frame(), TraceEventKind::Line(1));
    assert!(registry.stopping());
    assert!(registry.installed().is_some());

    // The next event on the owning thread does.
    registry.dispatch(owner, &dummy_frame(), TraceEventKind::Line(1));
    assert!(!registry.stopping());
    assert!(registry.installed().is_none());
}

#[test]
fn conflicting_hook_is_reasserted_and_warned_once() {
    let (registry, controller) = setup();
    let owner = ThreadId(1);
    let swapping = HookHandle::new(SwappingHook {
        registry: Arc::clone(&registry),
        rogue: HookHandle::new(NullHook),
    });
    controller.enable(swapping, owner).unwrap();
    let wrapped = registry.installed().unwrap();

    registry.dispatch(owner, &dummy_frame(), TraceEventKind::Line(1));
    assert!(registry.installed().unwrap().same_identity(&wrapped));
    assert_eq!(registry.warning_count(), 1);

    registry.dispatch(owner, &dummy_frame(), TraceEventKind::Line(2));
    assert!(registry.installed().unwrap().same_identity(&wrapped));
    assert_eq!(registry.warning_count(), 1);
}

#[test]
fn enable_twice_is_rejected() {
    let (_registry, controller) = setup();
    controller
        .enable(HookHandle::new(NullHook), ThreadId(1))
        .unwrap();
    assert_eq!(
        controller.enable(HookHandle::new(NullHook), ThreadId(1)),
        Err(TraceError::AlreadyEnabled)
    );
}

#[test]
fn enable_all_requires_local_tracing_first() {
    let (_registry, controller) = setup();
    assert_eq!(controller.enable_all(), Err(TraceError::NotEnabled));
}

#[test]
fn thread_mode_transitions_are_enforced() {
    let (registry, _controller) = setup();
    let t = ThreadId(7);

    assert!(registry
        .set_thread_mode(t, TraceMode::PatchedCode)
        .is_err());
    registry.set_thread_mode(t, TraceMode::CallbackTrace).unwrap();
    registry.set_thread_mode(t, TraceMode::PatchedCode).unwrap();
    assert!(registry.set_thread_mode(t, TraceMode::Disabled).is_err());
    registry.set_thread_mode(t, TraceMode::CallbackTrace).unwrap();
    registry.set_thread_mode(t, TraceMode::Disabled).unwrap();
}

#[test]
fn new_threads_are_observed_under_process_wide_tracing() {
    let (registry, controller) = setup();
    let owner = ThreadId(1);
    controller.enable(HookHandle::new(NullHook), owner).unwrap();
    controller.enable_all().unwrap();
    assert_eq!(controller.state(), ControllerState::TracedProcessWide);

    let late = ThreadId(9);
    controller.observe_thread(late);
    assert_eq!(registry.thread_mode(late), TraceMode::CallbackTrace);
    assert!(registry.started(late));
}
