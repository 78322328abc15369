//! Snapshotter and alias resolution (SPEC_FULL.md §4.2, §4.3).
//!
//! Grounded on `dnscontroller.go`'s `snapshotIfChangedAndReady` (the
//! readiness-gated, counter-compared snapshot pass) and the
//! alias-expansion block at the top of `runOnce`.

use std::collections::HashMap;

use slog::{info, Logger};

use crate::record::{Record, RecordKey, RecordType};
use crate::scope::ScopeRegistry;

/// A point-in-time aggregation of every scope's records, split into
/// directly-emitted records and alias-target records indexed by FQDN.
/// Immutable after construction.
pub struct Snapshot {
    pub change_count: u64,
    pub records: Vec<Record>,
    pub alias_targets: HashMap<String, Vec<Record>>,
    /// Resolved, sorted, deduplicated values per key, set by
    /// `resolve_aliases` once the snapshot has been built. `None` until
    /// then; a promoted snapshot always carries this forward as the
    /// next cycle's baseline (SPEC_FULL.md §4.5 step 3).
    pub record_values: Option<HashMap<RecordKey, Vec<String>>>,
}

/// Returns a snapshot only if the change counter has moved since the
/// last successful snapshot and every registered scope is ready.
/// Otherwise the caller should sleep and retry; this is never treated
/// as an error.
///
/// The counter is read before iterating scopes, and iteration happens
/// under the registry's scope-enumeration lock, so the returned
/// snapshot's `change_count` always corresponds to a view at least as
/// fresh as what was observed.
pub fn snapshot_if_changed_and_ready(
    registry: &ScopeRegistry,
    last_successful: Option<&Snapshot>,
    log: &Logger,
) -> Option<Snapshot> {
    let change_count = registry.change_counter().load();

    if let Some(last) = last_successful {
        if change_count == last.change_count {
            return None;
        }
    }

    if !registry.all_ready() {
        info!(log, "scope registry not yet ready; skipping this cycle");
        return None;
    }

    let mut records = Vec::new();
    let mut alias_targets: HashMap<String, Vec<Record>> = HashMap::new();

    registry.for_each_scope(|scope| {
        scope.for_each_record(|record| {
            if record.is_alias_target() {
                alias_targets.entry(record.fqdn.clone()).or_default().push(record.clone());
            } else {
                records.push(record.clone());
            }
        });
    });

    Some(Snapshot { change_count, records, alias_targets, record_values: None })
}

impl Snapshot {
    /// Resolve `Alias` records against this snapshot's alias targets,
    /// then sort and dedup each key's values. One level of indirection
    /// only: if an alias's target FQDN has no alias-target records (or
    /// only records that are themselves aliases — aliases are never
    /// indexed as targets), the alias contributes nothing. Populates
    /// and returns `self.record_values`.
    pub fn resolve_aliases(&mut self, log: &Logger) -> &HashMap<RecordKey, Vec<String>> {
        let mut value_map: HashMap<RecordKey, Vec<String>> = HashMap::new();

        for record in &self.records {
            if record.record_type == RecordType::Alias {
                match self.alias_targets.get(&record.value) {
                    Some(targets) if !targets.is_empty() => {
                        for target in targets {
                            let key = RecordKey { record_type: target.record_type, fqdn: record.fqdn.clone() };
                            value_map.entry(key).or_default().push(target.value.clone());
                        }
                    }
                    _ => {
                        info!(
                            log,
                            "alias target has no records, alias contributes nothing this cycle";
                            "alias_fqdn" => record.fqdn.clone(),
                            "target" => record.value.clone(),
                        );
                    }
                }
                continue;
            }

            let key = RecordKey { record_type: record.record_type, fqdn: record.fqdn.clone() };
            value_map.entry(key).or_default().push(record.value.clone());
        }

        for values in value_map.values_mut() {
            values.sort();
            values.dedup();
        }

        self.record_values = Some(value_map);
        self.record_values.as_ref().unwrap()
    }
}
