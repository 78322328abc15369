//! Zone Resolver (SPEC_FULL.md §4.4).
//!
//! Grounded on `dnscontroller.go`'s `newDNSOp` (zone-map construction)
//! and `findZone` (longest-suffix lookup). Built fresh every
//! reconciliation cycle from a `ListZones` call, so zone additions or
//! removals on the provider side are picked up without a restart.

use std::collections::HashMap;
use std::sync::Arc;

use slog::{warn, Logger};

use crate::error::ProviderError;
use crate::providers::ZoneHandle;
use crate::record::ensure_dot_suffix;

/// A single configured entry's zone-admission rules.
pub trait ZoneRules: Send + Sync {
    /// True if this zone is explicitly claimed by this entry (e.g. by
    /// provider-specific zone ID or an explicit name list).
    fn matches_explicitly(&self, zone: &dyn ZoneHandle) -> bool;

    /// When no zone for a given name is explicitly claimed by any
    /// entry, admit every same-named zone as managed.
    fn wildcard(&self) -> bool;
}

/// Immutable mapping from dot-suffixed zone name to a provider zone
/// handle, built once per reconciliation cycle.
pub struct ZoneMap {
    zones: HashMap<String, Arc<dyn ZoneHandle>>,
}

impl ZoneMap {
    /// Build the map: list every zone from the provider, group by
    /// dot-suffixed name, then per name pick the zone admitted by
    /// `rules`. Ambiguous names (more than one explicit match, or more
    /// than one zone sharing a name under a wildcard) are logged and
    /// left unmanaged for this cycle rather than guessed at.
    pub async fn build(
        zones_provider: &dyn crate::providers::ZonesBackend,
        rules: &dyn ZoneRules,
        log: &Logger,
    ) -> Result<ZoneMap, ProviderError> {
        let zones = zones_provider
            .list()
            .await
            .map_err(|e| ProviderError::ListZones(e.to_string()))?;

        let mut by_name: HashMap<String, Vec<Arc<dyn ZoneHandle>>> = HashMap::new();
        for zone in zones {
            let name = ensure_dot_suffix(&zone.name());
            by_name.entry(name).or_default().push(zone);
        }

        let mut resolved = HashMap::new();
        for (name, candidates) in by_name {
            let mut matches: Vec<&Arc<dyn ZoneHandle>> = candidates
                .iter()
                .filter(|z| rules.matches_explicitly(z.as_ref()))
                .collect();

            if matches.is_empty() && rules.wildcard() {
                matches = candidates.iter().collect();
            }

            match matches.len() {
                0 => continue,
                1 => {
                    resolved.insert(name, matches[0].clone());
                }
                _ => {
                    warn!(
                        log,
                        "found multiple zones for name, won't manage zone this cycle";
                        "zone" => name.clone(),
                    );
                }
            }
        }

        Ok(ZoneMap { zones: resolved })
    }

    /// Longest-suffix match: start with the full dot-suffixed FQDN, and
    /// if it's not a managed zone name, strip the leading label and
    /// retry. Returns `None` once no dots remain.
    pub fn find_zone(&self, fqdn: &str) -> Option<Arc<dyn ZoneHandle>> {
        let mut zone_name = ensure_dot_suffix(fqdn);
        loop {
            if let Some(zone) = self.zones.get(&zone_name) {
                return Some(zone.clone());
            }
            match zone_name.find('.') {
                Some(dot) => zone_name = zone_name[dot + 1..].to_string(),
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fake::FakeZoneHandle;

    struct AllowAll {
        explicit: Vec<String>,
        wildcard: bool,
    }

    impl ZoneRules for AllowAll {
        fn matches_explicitly(&self, zone: &dyn ZoneHandle) -> bool {
            self.explicit.iter().any(|n| ensure_dot_suffix(n) == ensure_dot_suffix(&zone.name()))
        }
        fn wildcard(&self) -> bool {
            self.wildcard
        }
    }

    fn zone_map_of(names: &[&str], rules: &AllowAll) -> ZoneMap {
        let mut zones: HashMap<String, Arc<dyn ZoneHandle>> = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            let dotted = ensure_dot_suffix(name);
            let handle: Arc<dyn ZoneHandle> = Arc::new(FakeZoneHandle::new(name.to_string(), i as u64));
            if rules.matches_explicitly(handle.as_ref()) || (rules.wildcard() && names.iter().filter(|n| ensure_dot_suffix(n) == dotted).count() == 1) {
                zones.insert(dotted, handle);
            }
        }
        ZoneMap { zones }
    }

    #[test]
    fn longest_suffix_match_picks_the_most_specific_zone() {
        let rules = AllowAll { explicit: vec!["ex.com".into(), "sub.ex.com".into()], wildcard: false };
        let map = zone_map_of(&["ex.com", "sub.ex.com"], &rules);
        let zone = map.find_zone("web.sub.ex.com.").unwrap();
        assert_eq!(ensure_dot_suffix(&zone.name()), "sub.ex.com.");
    }

    #[test]
    fn falls_back_to_parent_zone_when_no_exact_match() {
        let rules = AllowAll { explicit: vec!["ex.com".into()], wildcard: false };
        let map = zone_map_of(&["ex.com"], &rules);
        let zone = map.find_zone("web.ex.com.").unwrap();
        assert_eq!(ensure_dot_suffix(&zone.name()), "ex.com.");
    }

    #[test]
    fn no_dots_left_means_no_zone() {
        let rules = AllowAll { explicit: vec!["ex.com".into()], wildcard: false };
        let map = zone_map_of(&["ex.com"], &rules);
        assert!(map.find_zone("localhost").is_none());
    }
}
