//! Breakpoint definitions and the session-wide table.

use parking_lot::Mutex;
use smol_str::SmolStr;

/// Breakpoint identifier, allocated by the table.
pub type BreakpointId = u32;

/// Where a breakpoint binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointSpot {
    /// A source file and one-based line.
    Line {
        /// Source file name.
        file: SmolStr,
        /// One-based line.
        line: u32,
    },
    /// A function and an instruction-unit offset within it.
    Function {
        /// Dotted qualified function name.
        qualname: SmolStr,
        /// Unit offset within the function.
        offset: usize,
    },
}

/// When a breakpoint fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitPolicy {
    /// Fire on every hit.
    #[default]
    Normal,
    /// Fire only when the condition evaluates truthy.
    Conditional,
    /// Fire when the bound frame is about to terminate.
    OnTermination,
}

/// One registered breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Table-allocated id.
    pub id: BreakpointId,
    /// Binding location.
    pub spot: BreakpointSpot,
    /// Optional condition expression text.
    pub condition: Option<SmolStr>,
    /// Hit policy.
    pub policy: HitPolicy,
}

#[derive(Debug, Default)]
struct TableInner {
    breakpoints: Vec<Breakpoint>,
    next_id: BreakpointId,
}

/// Session-wide breakpoint registry, consulted from the hook on every
/// line event.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    inner: Mutex<TableInner>,
}

impl BreakpointTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breakpoint, returning its id.
    pub fn add(
        &self,
        spot: BreakpointSpot,
        condition: Option<SmolStr>,
        policy: HitPolicy,
    ) -> BreakpointId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.breakpoints.push(Breakpoint {
            id,
            spot,
            condition,
            policy,
        });
        id
    }

    /// Remove a breakpoint by id. Returns whether it existed.
    pub fn remove(&self, id: BreakpointId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.breakpoints.len();
        inner.breakpoints.retain(|bp| bp.id != id);
        inner.breakpoints.len() != before
    }

    /// Breakpoints bound to `file:line`, excluding on-termination ones.
    #[must_use]
    pub fn matching_line(&self, file: &str, line: u32) -> Vec<Breakpoint> {
        self.inner
            .lock()
            .breakpoints
            .iter()
            .filter(|bp| bp.policy != HitPolicy::OnTermination)
            .filter(|bp| {
                matches!(&bp.spot, BreakpointSpot::Line { file: f, line: l }
                    if f == file && *l == line)
            })
            .cloned()
            .collect()
    }

    /// Function breakpoints bound to `qualname` at `offset`, excluding
    /// on-termination ones.
    #[must_use]
    pub fn matching_offset(&self, qualname: &str, offset: usize) -> Vec<Breakpoint> {
        self.inner
            .lock()
            .breakpoints
            .iter()
            .filter(|bp| bp.policy != HitPolicy::OnTermination)
            .filter(|bp| {
                matches!(&bp.spot, BreakpointSpot::Function { qualname: q, offset: o }
                    if q == qualname && *o == offset)
            })
            .cloned()
            .collect()
    }

    /// On-termination breakpoints bound to a function.
    #[must_use]
    pub fn matching_termination(&self, qualname: &str) -> Vec<Breakpoint> {
        self.inner
            .lock()
            .breakpoints
            .iter()
            .filter(|bp| bp.policy == HitPolicy::OnTermination)
            .filter(|bp| {
                matches!(&bp.spot, BreakpointSpot::Function { qualname: q, .. } if q == qualname)
            })
            .cloned()
            .collect()
    }

    /// Whether any breakpoint needs per-line condition evaluation.
    /// Drives the session's strategy selection.
    #[must_use]
    pub fn any_conditional(&self) -> bool {
        self.inner
            .lock()
            .breakpoints
            .iter()
            .any(|bp| bp.condition.is_some() || bp.policy == HitPolicy::Conditional)
    }

    /// Snapshot of all registered breakpoints.
    #[must_use]
    pub fn all(&self) -> Vec<Breakpoint> {
        self.inner.lock().breakpoints.clone()
    }

    /// Number of registered breakpoints.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().breakpoints.len()
    }

    /// Drop every breakpoint.
    pub fn clear(&self) {
        self.inner.lock().breakpoints.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_match_remove() {
        let table = BreakpointTable::new();
        let id = table.add(
            BreakpointSpot::Line {
                file: "app.vg".into(),
                line: 3,
            },
            None,
            HitPolicy::Normal,
        );
        assert_eq!(table.matching_line("app.vg", 3).len(), 1);
        assert!(table.matching_line("app.vg", 4).is_empty());
        assert!(table.remove(id));
        assert!(!table.remove(id));
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn conditional_detection() {
        let table = BreakpointTable::new();
        assert!(!table.any_conditional());
        table.add(
            BreakpointSpot::Line {
                file: "app.vg".into(),
                line: 7,
            },
            Some("x > 3".into()),
            HitPolicy::Conditional,
        );
        assert!(table.any_conditional());
    }
}
