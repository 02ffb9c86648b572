//! Call frames observed by instrumentation hooks.

use std::sync::Arc;

use smol_str::SmolStr;

use crate::bytecode::CodeUnit;
use crate::value::Value;

/// One active call's execution context, as exposed to hooks and frame
/// dumps. Locals are slot-indexed against the code unit's local table;
/// unassigned slots are `None`.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The code unit being executed.
    pub code: Arc<CodeUnit>,
    /// Current source line.
    pub line: u32,
    /// Unit offset of the instruction about to execute.
    pub lasti: usize,
    /// Local slot values.
    pub locals: Vec<Option<Value>>,
    /// Zero-based call depth (entry frame is 0).
    pub depth: u32,
}

impl Frame {
    /// Create a frame for `code` with arguments bound to the leading
    /// local slots.
    #[must_use]
    pub fn new(code: Arc<CodeUnit>, args: Vec<Value>, depth: u32) -> Self {
        let mut locals = vec![None; code.locals.len()];
        for (slot, arg) in args.into_iter().enumerate().take(code.locals.len()) {
            locals[slot] = Some(arg);
        }
        let line = code.lines.first().map_or(0, |entry| entry.line);
        Self {
            code,
            line,
            lasti: 0,
            locals,
            depth,
        }
    }

    /// Look up a local by name.
    #[must_use]
    pub fn local(&self, name: &str) -> Option<&Value> {
        let slot = self.code.locals.iter().position(|n| n == name)?;
        self.locals.get(slot)?.as_ref()
    }

    /// Assigned locals as `(name, value)` pairs, in slot order.
    #[must_use]
    pub fn named_locals(&self) -> Vec<(SmolStr, Value)> {
        self.code
            .locals
            .iter()
            .zip(&self.locals)
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
            .collect()
    }
}
