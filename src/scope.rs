//! Scope Registry and Change Counter (SPEC_FULL.md §4.1, §4.2).
//!
//! Grounded on `dnscontroller.go`'s `DNSControllerScope` and
//! `recordChange`. The Go source gives a scope a `parent
//! *DNSController` back-reference so `Replace` can ring the counter;
//! SPEC_FULL.md §9 flags this as a pointer cycle to redesign. Here a
//! `Scope` is handed an injected `notify: Arc<ChangeCounter>` at
//! construction instead of a back-reference to the registry or
//! controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::AresError;
use crate::record::Record;

/// Monotonically increasing counter, ticked on every mutation across
/// every scope. A hint, not an equality oracle: the snapshotter only
/// ever compares counter values, never record contents, per
/// SPEC_FULL.md §9's "counter-monotonicity-only promotion" note.
#[derive(Default)]
pub struct ChangeCounter(AtomicU64);

impl ChangeCounter {
    pub fn new() -> Arc<ChangeCounter> {
        Arc::new(ChangeCounter(AtomicU64::new(0)))
    }

    pub fn tick(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn load(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A named bag of records owned by exactly one producer.
///
/// Each scope mediates its own mutation under its own lock, so
/// producers on independent threads never contend with each other
/// (SPEC_FULL.md §5). The registry's lock only guards creation and
/// whole-registry iteration (the snapshot pass).
pub struct Scope {
    name: String,
    ready: AtomicBool,
    records: Mutex<HashMap<String, Vec<Record>>>,
    notify: Arc<ChangeCounter>,
}

impl Scope {
    fn new(name: impl Into<String>, notify: Arc<ChangeCounter>) -> Arc<Scope> {
        Arc::new(Scope {
            name: name.into(),
            ready: AtomicBool::new(false),
            records: Mutex::new(HashMap::new()),
            notify,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Idempotent false→true transition. Does not itself tick the
    /// change counter; a producer typically calls `replace` separately
    /// once it has something to publish.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Replace the records published under `record_name`. An empty
    /// `records` deletes the entry. Always ticks the change counter,
    /// even when `records` is byte-identical to what's already there —
    /// the counter is a hint that re-verification may be needed, not a
    /// claim that anything actually changed.
    pub fn replace(&self, record_name: impl Into<String>, records: Vec<Record>) {
        let mut guard = self.records.lock().expect("scope record lock poisoned");
        let record_name = record_name.into();
        if records.is_empty() {
            guard.remove(&record_name);
        } else {
            guard.insert(record_name, records);
        }
        drop(guard);
        self.notify.tick();
    }

    /// Snapshot helper: iterate every record currently published by
    /// this scope. Called only while the registry lock is held, so the
    /// view is internally consistent with the `changeCount` read that
    /// preceded it.
    pub(crate) fn for_each_record(&self, mut f: impl FnMut(&Record)) {
        let guard = self.records.lock().expect("scope record lock poisoned");
        for records in guard.values() {
            for record in records {
                f(record);
            }
        }
    }
}

/// Process-wide map of named scopes. Entries are created by
/// `create_scope` and never removed for the process lifetime.
#[derive(Default)]
pub struct ScopeRegistry {
    scopes: RwLock<HashMap<String, Arc<Scope>>>,
    change_counter: Arc<ChangeCounter>,
}

impl ScopeRegistry {
    pub fn new(change_counter: Arc<ChangeCounter>) -> Arc<ScopeRegistry> {
        Arc::new(ScopeRegistry {
            scopes: RwLock::new(HashMap::new()),
            change_counter,
        })
    }

    /// Atomically inserts a new scope; fails if the name already
    /// exists, since a duplicate scope would require turning `Ready`
    /// into a counter rather than a bool.
    pub fn create_scope(&self, name: impl Into<String>) -> Result<Arc<Scope>, AresError> {
        let name = name.into();
        let mut guard = self.scopes.write().expect("scope registry lock poisoned");
        if guard.contains_key(&name) {
            return Err(AresError::Config(format!("duplicate scope: {:?}", name)));
        }
        let scope = Scope::new(name.clone(), self.change_counter.clone());
        guard.insert(name, scope.clone());
        Ok(scope)
    }

    pub fn change_counter(&self) -> &Arc<ChangeCounter> {
        &self.change_counter
    }

    /// True only if every registered scope has completed its initial
    /// sync. Iteration happens under the registry read lock so this is
    /// consistent with whatever `changeCount` the caller read just
    /// before.
    pub(crate) fn all_ready(&self) -> bool {
        let guard = self.scopes.read().expect("scope registry lock poisoned");
        guard.values().all(|s| s.is_ready())
    }

    pub(crate) fn for_each_scope(&self, mut f: impl FnMut(&Scope)) {
        let guard = self.scopes.read().expect("scope registry lock poisoned");
        for scope in guard.values() {
            f(scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordType;

    #[test]
    fn duplicate_scope_name_is_rejected() {
        let registry = ScopeRegistry::new(ChangeCounter::new());
        registry.create_scope("a").unwrap();
        let err = registry.create_scope("a").unwrap_err();
        assert!(matches!(err, AresError::Config(_)));
    }

    #[test]
    fn replace_always_ticks_even_for_identical_records() {
        let counter = ChangeCounter::new();
        let registry = ScopeRegistry::new(counter.clone());
        let scope = registry.create_scope("svc").unwrap();
        scope.replace("web", vec![Record::new("web.ex.com.", RecordType::A, "10.0.0.1")]);
        let after_first = counter.load();
        scope.replace("web", vec![Record::new("web.ex.com.", RecordType::A, "10.0.0.1")]);
        assert!(counter.load() > after_first);
    }

    #[test]
    fn empty_replace_deletes_entry() {
        let registry = ScopeRegistry::new(ChangeCounter::new());
        let scope = registry.create_scope("svc").unwrap();
        scope.replace("web", vec![Record::new("web.ex.com.", RecordType::A, "10.0.0.1")]);
        scope.replace("web", vec![]);
        let mut seen = 0;
        scope.for_each_record(|_| seen += 1);
        assert_eq!(seen, 0);
    }

    #[test]
    fn registry_not_ready_until_every_scope_marked() {
        let registry = ScopeRegistry::new(ChangeCounter::new());
        let a = registry.create_scope("a").unwrap();
        let b = registry.create_scope("b").unwrap();
        assert!(!registry.all_ready());
        a.mark_ready();
        assert!(!registry.all_ready());
        b.mark_ready();
        assert!(registry.all_ready());
    }
}
