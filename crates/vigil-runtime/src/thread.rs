//! Thread records and low-level enumeration.

#![allow(missing_docs)]

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

/// Runtime-internal thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Bookkeeping record for one thread.
///
/// Records for threads the runtime did not create itself are
/// synthesized as shadow records carrying the real external id.
#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub id: ThreadId,
    /// External (OS-level) thread identifier.
    pub os_id: u64,
    pub name: SmolStr,
    /// True when this record was synthesized for an externally created
    /// thread rather than registered by the runtime.
    pub shadow: bool,
    pub alive: bool,
}

#[derive(Debug, Default)]
struct RegistryInner {
    records: FxHashMap<ThreadId, ThreadRecord>,
    by_os: FxHashMap<u64, ThreadId>,
    next_id: u64,
}

/// Registry of every thread the runtime knows about.
///
/// Two views exist. `registered()` is the higher-level registry of
/// threads started through the runtime; it misses externally created
/// threads. `enumerate()` is the lowest-level enumeration and covers
/// every live thread that has ever been announced, shadows included.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    inner: RwLock<RegistryInner>,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runtime-started thread.
    pub fn register(&self, name: impl Into<SmolStr>, os_id: u64) -> ThreadId {
        self.insert(name.into(), os_id, false)
    }

    /// Announce that an externally created thread exists. Returns its
    /// record id, synthesizing a shadow record on first sight.
    pub fn announce_external(&self, os_id: u64) -> ThreadId {
        if let Some(id) = self.inner.read().by_os.get(&os_id) {
            return *id;
        }
        self.insert(SmolStr::new(format!("external-{os_id}")), os_id, true)
    }

    fn insert(&self, name: SmolStr, os_id: u64, shadow: bool) -> ThreadId {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_os.get(&os_id) {
            return *existing;
        }
        inner.next_id += 1;
        let id = ThreadId(inner.next_id);
        inner.by_os.insert(os_id, id);
        inner.records.insert(
            id,
            ThreadRecord {
                id,
                os_id,
                name,
                shadow,
                alive: true,
            },
        );
        id
    }

    /// Mark a thread as terminated. Its record is retained for late
    /// lookups but excluded from enumeration.
    pub fn mark_exited(&self, id: ThreadId) {
        if let Some(record) = self.inner.write().records.get_mut(&id) {
            record.alive = false;
        }
    }

    /// Lowest-level enumeration: every live thread, shadows included.
    #[must_use]
    pub fn enumerate(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self
            .inner
            .read()
            .records
            .values()
            .filter(|record| record.alive)
            .map(|record| record.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Higher-level registry view: live threads the runtime started.
    #[must_use]
    pub fn registered(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self
            .inner
            .read()
            .records
            .values()
            .filter(|record| record.alive && !record.shadow)
            .map(|record| record.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Fetch a thread record by id.
    #[must_use]
    pub fn record(&self, id: ThreadId) -> Option<ThreadRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    /// Resolve an external id to a record id, if announced.
    #[must_use]
    pub fn by_os_id(&self, os_id: u64) -> Option<ThreadId> {
        self.inner.read().by_os.get(&os_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_records_cover_external_threads() {
        let registry = ThreadRegistry::new();
        let own = registry.register("main", 100);
        let foreign = registry.announce_external(200);

        assert_eq!(registry.registered(), vec![own]);
        assert_eq!(registry.enumerate(), vec![own, foreign]);
        assert!(registry.record(foreign).unwrap().shadow);
        assert_eq!(registry.record(foreign).unwrap().os_id, 200);
    }

    #[test]
    fn exited_threads_drop_out_of_enumeration() {
        let registry = ThreadRegistry::new();
        let a = registry.register("a", 1);
        let b = registry.register("b", 2);
        registry.mark_exited(a);
        assert_eq!(registry.enumerate(), vec![b]);
        assert!(registry.record(a).is_some());
    }
}
