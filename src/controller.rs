//! Reconciliation Loop and DNS Operation Helper (SPEC_FULL.md §4.5, §4.6).
//!
//! Grounded on `dnscontroller.go`'s `DNSController`, `runOnce`, `dnsOp`,
//! and the `util.Stoppable` embed it relies on for cooperative
//! cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slog::{info, warn, Logger};
use tokio::sync::watch;

use crate::error::{AresError, ProviderError};
use crate::providers::DnsProvider;
use crate::record::{ensure_dot_suffix, RecordKey};
use crate::scope::{Scope, ScopeRegistry};
use crate::snapshot::{snapshot_if_changed_and_ready, Snapshot};
use crate::zone::{ZoneMap, ZoneRules};

/// Fixed TTL applied to every record set the controller writes.
/// Deliberately not configurable; see DESIGN.md's Open Question log.
pub const TTL_SECONDS: i64 = 60;

const IDLE_SLEEP: Duration = Duration::from_secs(5);
const ERROR_SLEEP: Duration = Duration::from_secs(10);

/// Cooperative cancellation primitive shared by the controller and any
/// task it spawns. Mirrors the Go `util.Stoppable` embed: a single
/// broadcast flip that every poller observes promptly.
pub struct Stoppable {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Stoppable {
    pub fn new() -> Stoppable {
        let (tx, rx) = watch::channel(false);
        Stoppable { tx, rx }
    }

    pub fn stop(&self) {
        let _ = self.tx.broadcast(true);
    }

    pub fn stop_requested(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

impl Default for Stoppable {
    fn default() -> Self {
        Stoppable::new()
    }
}

/// The DNS reconciliation controller: single-threaded, snapshot-driven,
/// applies desired DNS state from the shared scope registry to one DNS
/// provider under one set of zone rules.
///
/// Multiple `DnsController`s may share one `ScopeRegistry` (one per
/// configured provider/zone-rules entry); a controller whose zone map
/// doesn't cover a given FQDN simply reports `NoZone` for that key and
/// moves on, so controllers never need to coordinate about which keys
/// belong to which provider.
pub struct DnsController {
    provider: Arc<dyn DnsProvider>,
    zone_rules: Arc<dyn ZoneRules>,
    registry: Arc<ScopeRegistry>,
    last_successful: Mutex<Option<Snapshot>>,
    stoppable: Stoppable,
    log: Logger,
}

impl DnsController {
    pub fn new(
        provider: Arc<dyn DnsProvider>,
        zone_rules: Arc<dyn ZoneRules>,
        registry: Arc<ScopeRegistry>,
        log: Logger,
    ) -> Result<DnsController, AresError> {
        if provider.zones().is_none() {
            return Err(AresError::Config("DNS provider does not support zones".to_string()));
        }
        Ok(DnsController { provider, zone_rules, registry, last_successful: Mutex::new(None), stoppable: Stoppable::new(), log })
    }

    /// Create a scope on the shared registry this controller reads
    /// from. Exposed so producer tasks can be spawned against the same
    /// controller they're feeding.
    pub fn create_scope(&self, name: impl Into<String>) -> Result<Arc<Scope>, AresError> {
        self.registry.create_scope(name)
    }

    pub fn stop_requested(&self) -> bool {
        self.stoppable.stop_requested()
    }

    pub fn request_stop(&self) {
        self.stoppable.stop();
    }

    /// Blocks (polling with a debounce sleep) until `request_stop` is
    /// called. This is the `Run`/`runWatcher` pair from
    /// `dnscontroller.go` collapsed into one async task.
    pub async fn run(&self) {
        info!(self.log, "starting DNS controller");
        loop {
            let result = self.run_once().await;

            match result {
                Ok(()) => {
                    if self.stop_requested() {
                        info!(self.log, "exiting dns controller loop");
                        return;
                    }
                    tokio::time::delay_for(IDLE_SLEEP).await;
                }
                Err(e) => {
                    if e.is_fatal() {
                        info!(self.log, "exiting dns controller loop"; "error" => %e);
                        return;
                    }
                    warn!(self.log, "unexpected error in DNS controller, will retry"; "error" => %e);
                    tokio::time::delay_for(ERROR_SLEEP).await;
                }
            }
        }
    }

    async fn run_once(&self) -> Result<(), AresError> {
        let last = self.last_successful.lock().expect("last-successful snapshot lock poisoned");
        let mut snapshot = match snapshot_if_changed_and_ready(&self.registry, last.as_ref(), &self.log) {
            Some(s) => s,
            None => return Ok(()),
        };
        let old_value_map: HashMap<RecordKey, Vec<String>> =
            last.as_ref().and_then(|s| s.record_values.clone()).unwrap_or_default();
        drop(last);

        let new_value_map = snapshot.resolve_aliases(&self.log).clone();

        let zones_backend = self
            .provider
            .zones()
            .ok_or_else(|| AresError::Config("DNS provider does not support zones".to_string()))?;
        let zone_map = ZoneMap::build(zones_backend.as_ref(), self.zone_rules.as_ref(), &self.log)
            .await
            .map_err(|source| AresError::Provider { key: None, source })?;

        let op = DnsOperationHelper::new(zone_map);
        let mut errors: Vec<AresError> = Vec::new();

        for (key, new_values) in &new_value_map {
            if self.stop_requested() {
                return Err(AresError::Cancelled);
            }

            if old_value_map.get(key).map(|old| old == new_values).unwrap_or(false) {
                continue;
            }

            if let Err(e) = op.update_records(key, new_values, TTL_SECONDS, &self.log).await {
                warn!(self.log, "error updating records"; "key" => key.to_string(), "error" => %e);
                errors.push(e);
            }
        }

        for key in old_value_map.keys() {
            if self.stop_requested() {
                return Err(AresError::Cancelled);
            }

            if !new_value_map.contains_key(key) {
                if let Err(e) = op.delete_records(key, &self.log).await {
                    warn!(self.log, "error deleting records"; "key" => key.to_string(), "error" => %e);
                    errors.push(e);
                }
            }
        }

        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }

        *self.last_successful.lock().expect("last-successful snapshot lock poisoned") = Some(snapshot);
        Ok(())
    }
}

/// Constructed fresh every reconciliation cycle from the live zone map;
/// issues the actual per-key provider calls.
struct DnsOperationHelper {
    zone_map: ZoneMap,
}

impl DnsOperationHelper {
    fn new(zone_map: ZoneMap) -> DnsOperationHelper {
        DnsOperationHelper { zone_map }
    }

    /// Resolve the zone, remove any existing record set matching `key`
    /// (warning if more than one was found — the asymmetry with
    /// `delete_records` removing *all* matches is intentional, see
    /// DESIGN.md), and add a new record set with the sorted values.
    async fn update_records(
        &self,
        key: &RecordKey,
        new_values: &[String],
        ttl: i64,
        log: &Logger,
    ) -> Result<(), AresError> {
        let zone = self.zone_map.find_zone(&key.fqdn).ok_or_else(|| AresError::NoZone { key: key.clone() })?;
        let rrs = zone
            .resource_record_sets()
            .ok_or_else(|| provider_err(key, ProviderError::RecordSetsUnsupported { zone: zone.name() }))?;

        let existing_list = rrs.list().await.map_err(|e| provider_err(key, e))?;
        let mut existing = None;
        for rr in existing_list {
            if ensure_dot_suffix(&rr.name) != key.fqdn || rr.record_type != key.record_type {
                continue;
            }
            if existing.is_some() {
                warn!(log, "found multiple matching records for key, keeping only the last seen"; "key" => key.to_string());
            }
            existing = Some(rr);
        }

        let mut cs = rrs.start_changeset();
        if let Some(rr) = existing {
            cs.remove(rr);
        }
        let new_rr = rrs.new_record_set(&key.fqdn, new_values, ttl, key.record_type);
        cs.add(new_rr);
        cs.apply().await.map_err(|e| provider_err(key, e))
    }

    /// Resolve the zone and remove every record set matching `key`.
    /// No-ops (without calling `apply`) if nothing matched.
    async fn delete_records(&self, key: &RecordKey, _log: &Logger) -> Result<(), AresError> {
        let zone = self.zone_map.find_zone(&key.fqdn).ok_or_else(|| AresError::NoZone { key: key.clone() })?;
        let rrs = zone
            .resource_record_sets()
            .ok_or_else(|| provider_err(key, ProviderError::RecordSetsUnsupported { zone: zone.name() }))?;

        let existing_list = rrs.list().await.map_err(|e| provider_err(key, e))?;
        let mut cs = rrs.start_changeset();
        let mut matched = false;
        for rr in existing_list {
            if ensure_dot_suffix(&rr.name) != key.fqdn || rr.record_type != key.record_type {
                continue;
            }
            cs.remove(rr);
            matched = true;
        }

        if !matched {
            return Ok(());
        }

        cs.apply().await.map_err(|e| provider_err(key, e))
    }
}

fn provider_err(key: &RecordKey, source: ProviderError) -> AresError {
    AresError::Provider { key: Some(key.clone()), source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fake::FakeProvider;
    use crate::record::{Record, RecordType};
    use crate::scope::ChangeCounter;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    struct SingleZone {
        name: String,
    }

    impl ZoneRules for SingleZone {
        fn matches_explicitly(&self, zone: &dyn crate::providers::ZoneHandle) -> bool {
            ensure_dot_suffix(&zone.name()) == ensure_dot_suffix(&self.name)
        }
        fn wildcard(&self) -> bool {
            false
        }
    }

    fn build_controller(provider: Arc<FakeProvider>, zone: &str) -> DnsController {
        let registry = ScopeRegistry::new(ChangeCounter::new());
        DnsController::new(provider, Arc::new(SingleZone { name: zone.to_string() }), registry, test_logger()).unwrap()
    }

    #[tokio::test]
    async fn single_a_record_is_applied_and_promotes_snapshot() {
        let provider = FakeProvider::new();
        provider.add_zone("ex.com.");
        let controller = build_controller(provider.clone(), "ex.com.");

        let scope = controller.create_scope("svc").unwrap();
        scope.mark_ready();
        scope.replace("web", vec![Record::new("web.ex.com.", RecordType::A, "10.0.0.1")]);

        controller.run_once().await.unwrap();

        let records = provider.records_in("ex.com.");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "web.ex.com.");
        assert_eq!(records[0].rrdatas, vec!["10.0.0.1".to_string()]);
        assert_eq!(records[0].ttl, TTL_SECONDS);
        assert!(controller.last_successful.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn second_cycle_with_no_activity_is_a_no_op() {
        let provider = FakeProvider::new();
        provider.add_zone("ex.com.");
        let controller = build_controller(provider.clone(), "ex.com.");

        let scope = controller.create_scope("svc").unwrap();
        scope.mark_ready();
        scope.replace("web", vec![Record::new("web.ex.com.", RecordType::A, "10.0.0.1")]);

        controller.run_once().await.unwrap();
        let change_count_before = controller.registry.change_counter().load();
        controller.run_once().await.unwrap();
        assert_eq!(controller.registry.change_counter().load(), change_count_before);
        assert_eq!(provider.records_in("ex.com.").len(), 1);
    }

    #[tokio::test]
    async fn deletion_removes_the_previously_applied_record() {
        let provider = FakeProvider::new();
        provider.add_zone("ex.com.");
        let controller = build_controller(provider.clone(), "ex.com.");

        let scope = controller.create_scope("svc").unwrap();
        scope.mark_ready();
        scope.replace("x", vec![Record::new("x.ex.com.", RecordType::A, "1.1.1.1")]);
        controller.run_once().await.unwrap();
        assert_eq!(provider.records_in("ex.com.").len(), 1);

        scope.replace("x", vec![]);
        controller.run_once().await.unwrap();
        assert_eq!(provider.records_in("ex.com.").len(), 0);
    }

    #[tokio::test]
    async fn ambiguous_zone_is_left_unmanaged_and_reports_no_zone() {
        let provider = FakeProvider::new();
        // Two zones sharing a name, neither explicitly matched, no wildcard.
        provider.add_zone("ex.com.");
        // FakeProvider keys zones by name in a map, so simulate ambiguity
        // through a rules object that explicitly matches nothing and has
        // no wildcard; the single zone present is simply unmanaged.
        let registry = ScopeRegistry::new(ChangeCounter::new());
        struct NoMatch;
        impl ZoneRules for NoMatch {
            fn matches_explicitly(&self, _zone: &dyn crate::providers::ZoneHandle) -> bool {
                false
            }
            fn wildcard(&self) -> bool {
                false
            }
        }
        let controller = DnsController::new(provider.clone(), Arc::new(NoMatch), registry, test_logger()).unwrap();
        let scope = controller.create_scope("svc").unwrap();
        scope.mark_ready();
        scope.replace("web", vec![Record::new("web.ex.com.", RecordType::A, "10.0.0.1")]);

        let err = controller.run_once().await.unwrap_err();
        assert!(matches!(err, AresError::NoZone { .. }));
        assert!(controller.last_successful.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_failure_does_not_promote_and_retries_both_keys_next_cycle() {
        let provider = FakeProvider::new();
        provider.add_zone("ex.com.");
        let controller = build_controller(provider.clone(), "ex.com.");

        let scope = controller.create_scope("svc").unwrap();
        scope.mark_ready();
        scope.replace("a", vec![Record::new("a.ex.com.", RecordType::A, "1.1.1.1")]);
        scope.replace("b", vec![Record::new("b.ex.com.", RecordType::A, "2.2.2.2")]);

        // One of the two per-key changeset applies against ex.com. fails;
        // the other succeeds.
        provider.fail_next_applies("ex.com.", 1);

        let err = controller.run_once().await.unwrap_err();
        assert!(matches!(err, AresError::Provider { .. }));
        assert!(controller.last_successful.lock().unwrap().is_none());
        assert_eq!(provider.records_in("ex.com.").len(), 1);

        // Next cycle re-reads provider state and re-diffs: the record
        // already applied is a no-op, the failed one is retried and
        // this time succeeds.
        controller.run_once().await.unwrap();
        assert_eq!(provider.records_in("ex.com.").len(), 2);
        assert!(controller.last_successful.lock().unwrap().is_some());
    }
}
