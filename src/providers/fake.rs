//! In-memory `DnsProvider` used by reconciliation-loop and zone-resolver
//! tests (SPEC_FULL.md §4.10, §8). Not compiled into the binary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::providers::{ChangesetApply, Changeset, DnsProvider, RecordSetsBackend, ResourceRecordSet, ZoneHandle, ZonesBackend};

/// A zone handle with no backing store; used only to exercise zone
/// selection logic (`zone.rs` tests) without a full provider.
pub struct FakeZoneHandle {
    name: String,
    id: u64,
}

impl FakeZoneHandle {
    pub fn new(name: String, id: u64) -> FakeZoneHandle {
        FakeZoneHandle { name, id }
    }
}

impl ZoneHandle for FakeZoneHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn resource_record_sets(&self) -> Option<Box<dyn RecordSetsBackend>> {
        None
    }
}

/// A complete in-memory provider: zones hold a shared record-set
/// store so the reconciliation loop's update/delete paths and
/// `ZoneMap::build`'s listing can be exercised end to end.
pub struct FakeProvider {
    zones: Mutex<HashMap<String, Arc<Mutex<Vec<ResourceRecordSet>>>>>,
    /// Remaining forced-failure count per zone name, consumed one at a
    /// time by `FakeChangeset::apply`. Used to exercise the partial-
    /// failure scenario (spec.md §8 scenario 7) without a real provider.
    /// Shared (not re-cloned) across `zones()` calls so a decrement made
    /// during one reconciliation cycle is still visible on the next.
    fail_next_apply: Arc<Mutex<HashMap<String, u32>>>,
}

impl FakeProvider {
    pub fn new() -> Arc<FakeProvider> {
        Arc::new(FakeProvider { zones: Mutex::new(HashMap::new()), fail_next_apply: Arc::new(Mutex::new(HashMap::new())) })
    }

    pub fn add_zone(&self, name: &str) {
        self.zones
            .lock()
            .unwrap()
            .entry(crate::record::ensure_dot_suffix(name))
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())));
    }

    /// Make the next `n` `apply()` calls against `zone_name` fail with a
    /// `ProviderError::Apply` before mutating the store.
    pub fn fail_next_applies(&self, zone_name: &str, n: u32) {
        self.fail_next_apply.lock().unwrap().insert(crate::record::ensure_dot_suffix(zone_name), n);
    }

    /// Test helper: read back every record set currently stored for a
    /// zone, for assertions.
    pub fn records_in(&self, zone_name: &str) -> Vec<ResourceRecordSet> {
        let guard = self.zones.lock().unwrap();
        guard
            .get(&crate::record::ensure_dot_suffix(zone_name))
            .map(|store| store.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

impl DnsProvider for FakeProvider {
    fn zones(&self) -> Option<Arc<dyn ZonesBackend>> {
        Some(Arc::new(FakeZonesBackend { provider: self.clone_store(), fail_next_apply: self.fail_next_apply.clone() }))
    }
}

impl FakeProvider {
    fn clone_store(&self) -> HashMap<String, Arc<Mutex<Vec<ResourceRecordSet>>>> {
        self.zones.lock().unwrap().clone()
    }
}

struct FakeZonesBackend {
    provider: HashMap<String, Arc<Mutex<Vec<ResourceRecordSet>>>>,
    fail_next_apply: Arc<Mutex<HashMap<String, u32>>>,
}

#[async_trait]
impl ZonesBackend for FakeZonesBackend {
    async fn list(&self) -> Result<Vec<Arc<dyn ZoneHandle>>, ProviderError> {
        Ok(self
            .provider
            .iter()
            .map(|(name, store)| {
                Arc::new(FakeZoneWithRecords {
                    name: name.clone(),
                    store: store.clone(),
                    fail_next_apply: self.fail_next_apply.clone(),
                }) as Arc<dyn ZoneHandle>
            })
            .collect())
    }
}

struct FakeZoneWithRecords {
    name: String,
    store: Arc<Mutex<Vec<ResourceRecordSet>>>,
    fail_next_apply: Arc<Mutex<HashMap<String, u32>>>,
}

impl ZoneHandle for FakeZoneWithRecords {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn resource_record_sets(&self) -> Option<Box<dyn RecordSetsBackend>> {
        Some(Box::new(FakeRecordSetsBackend {
            name: self.name.clone(),
            store: self.store.clone(),
            fail_next_apply: self.fail_next_apply.clone(),
        }))
    }
}

struct FakeRecordSetsBackend {
    name: String,
    store: Arc<Mutex<Vec<ResourceRecordSet>>>,
    fail_next_apply: Arc<Mutex<HashMap<String, u32>>>,
}

#[async_trait]
impl RecordSetsBackend for FakeRecordSetsBackend {
    async fn list(&self) -> Result<Vec<ResourceRecordSet>, ProviderError> {
        Ok(self.store.lock().unwrap().clone())
    }

    fn start_changeset(&self) -> Box<dyn ChangesetApply> {
        Box::new(FakeChangeset {
            name: self.name.clone(),
            store: self.store.clone(),
            fail_next_apply: self.fail_next_apply.clone(),
            adds: Vec::new(),
            removes: Vec::new(),
        })
    }
}

struct FakeChangeset {
    name: String,
    store: Arc<Mutex<Vec<ResourceRecordSet>>>,
    fail_next_apply: Arc<Mutex<HashMap<String, u32>>>,
    adds: Vec<ResourceRecordSet>,
    removes: Vec<ResourceRecordSet>,
}

impl Changeset for FakeChangeset {
    fn add(&mut self, rrset: ResourceRecordSet) {
        self.adds.push(rrset);
    }

    fn remove(&mut self, rrset: ResourceRecordSet) {
        self.removes.push(rrset);
    }
}

#[async_trait]
impl ChangesetApply for FakeChangeset {
    async fn apply(self: Box<Self>) -> Result<(), ProviderError> {
        let mut fails = self.fail_next_apply.lock().unwrap();
        if let Some(remaining) = fails.get_mut(&self.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::Apply { zone: self.name.clone(), reason: "injected test failure".to_string() });
            }
        }
        drop(fails);

        let mut guard = self.store.lock().unwrap();
        guard.retain(|rr| !self.removes.contains(rr));
        guard.extend(self.adds);
        Ok(())
    }
}
