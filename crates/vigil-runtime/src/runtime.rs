//! Process-wide runtime state shared between the interpreter and the
//! debug layer.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::breakpoint::BreakpointTable;
use crate::bytecode::{patch_before_line, CodeUnit, PatchError};
use crate::control::SuspendControl;
use crate::thread::ThreadRegistry;
use crate::trace::{
    CrossThreadInstaller, HookBridge, InProcessBridge, InstrumentationRegistry, TraceController,
};

/// Process-wide map from qualified function name to its current code
/// unit. Calls resolve through here at call time, so a replacement
/// swapped in by the patcher is picked up on the next invocation.
#[derive(Debug, Default)]
pub struct FunctionTable {
    units: RwLock<FxHashMap<SmolStr, Arc<CodeUnit>>>,
}

impl FunctionTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit under its qualified name, replacing any prior
    /// definition.
    pub fn define(&self, unit: Arc<CodeUnit>) {
        self.units.write().insert(unit.qualname.clone(), unit);
    }

    /// Current unit for `qualname`, if defined.
    #[must_use]
    pub fn lookup(&self, qualname: &str) -> Option<Arc<CodeUnit>> {
        self.units.read().get(qualname).cloned()
    }

    /// Patch the named function in place of its next invocation.
    ///
    /// On failure the table is untouched and callers keep executing the
    /// original unit.
    pub fn patch(
        &self,
        qualname: &str,
        fragment: &CodeUnit,
        before_line: u32,
    ) -> Result<(), PatchError> {
        let original = {
            let units = self.units.read();
            units.get(qualname).cloned()
        };
        let Some(original) = original else {
            return Err(PatchError::UnknownFunction(qualname.into()));
        };
        let patched = Arc::new(patch_before_line(&original, fragment, before_line)?);
        self.units.write().insert(patched.qualname.clone(), patched);
        Ok(())
    }

    /// Qualified names of all defined functions, sorted.
    #[must_use]
    pub fn qualnames(&self) -> Vec<SmolStr> {
        let mut names: Vec<SmolStr> = self.units.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

/// The shared runtime: thread registry, instrumentation, suspension,
/// breakpoints, and function definitions. One per process; handed to
/// each debug session as an `Arc`.
pub struct Runtime {
    threads: Arc<ThreadRegistry>,
    instrumentation: Arc<InstrumentationRegistry>,
    control: SuspendControl,
    breakpoints: Arc<BreakpointTable>,
    controller: TraceController,
    functions: Arc<FunctionTable>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Build a runtime whose cross-thread installer bridges to threads
    /// registered in this process.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bootstrap_timeout(crate::trace::DEFAULT_BOOTSTRAP_TIMEOUT)
    }

    /// Like [`Runtime::new`] with an explicit per-thread bootstrap
    /// timeout for the installer.
    #[must_use]
    pub fn with_bootstrap_timeout(timeout: std::time::Duration) -> Self {
        Self::build(None, timeout)
    }

    /// Like [`Runtime::new`] with a caller-supplied hook bridge.
    /// Used where the native helper is absent or stubbed out.
    #[must_use]
    pub fn with_bridge(bridge: Arc<dyn HookBridge>) -> Self {
        Self::build(Some(bridge), crate::trace::DEFAULT_BOOTSTRAP_TIMEOUT)
    }

    fn build(bridge: Option<Arc<dyn HookBridge>>, timeout: std::time::Duration) -> Self {
        let threads = Arc::new(ThreadRegistry::new());
        let instrumentation = Arc::new(InstrumentationRegistry::new());
        let bridge =
            bridge.unwrap_or_else(|| Arc::new(InProcessBridge::new(Arc::clone(&threads))));
        let installer = CrossThreadInstaller::new(
            Arc::clone(&instrumentation),
            Arc::clone(&threads),
            bridge,
        )
        .with_bootstrap_timeout(timeout);
        let controller = TraceController::new(Arc::clone(&instrumentation), installer);
        Self {
            threads,
            instrumentation,
            control: SuspendControl::new(),
            breakpoints: Arc::new(BreakpointTable::new()),
            controller,
            functions: Arc::new(FunctionTable::new()),
        }
    }

    /// Thread registry.
    #[must_use]
    pub fn threads(&self) -> &Arc<ThreadRegistry> {
        &self.threads
    }

    /// Instrumentation registry.
    #[must_use]
    pub fn instrumentation(&self) -> &Arc<InstrumentationRegistry> {
        &self.instrumentation
    }

    /// Suspend/resume control surface.
    #[must_use]
    pub fn control(&self) -> &SuspendControl {
        &self.control
    }

    /// Breakpoint table.
    #[must_use]
    pub fn breakpoints(&self) -> &Arc<BreakpointTable> {
        &self.breakpoints
    }

    /// Trace controller.
    #[must_use]
    pub fn controller(&self) -> &TraceController {
        &self.controller
    }

    /// Function table.
    #[must_use]
    pub fn functions(&self) -> &Arc<FunctionTable> {
        &self.functions
    }
}
