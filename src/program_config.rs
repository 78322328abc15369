// vim:set et sw=4 ts=4 foldmethod=marker:

//! One entry per configured provider (SPEC_FULL.md §4.7). An entry both
//! configures a `DnsProvider` and supplies the `ZoneRules` its
//! `DnsController` uses; `selector` stays a producer-side concern (it
//! gates which CRD Records get published under this entry's scopes,
//! not which zones get managed).

// imports {{{
use serde::{Deserialize, Serialize};

use crate::providers::ProviderConfig;
use crate::record::ensure_dot_suffix;
use crate::zone::ZoneRules;
// }}}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all(serialize = "camelCase", deserialize = "camelCase"))]
pub struct AresConfig {
    pub selector: Vec<String>,

    #[serde(flatten)]
    pub provider: ProviderConfig,

    /// Zone names this entry explicitly claims, regardless of what the
    /// provider account otherwise exposes them as.
    #[serde(default)]
    pub explicit_zones: Vec<String>,

    /// Admit every zone name the provider exposes that no entry
    /// explicitly claims.
    #[serde(default)]
    pub wildcard: bool,
}

impl AresConfig {
    /// Iterate over Selectors and ensure that a given item matches at least
    /// one of the Selectors. The Selector syntax must be a raw string, not
    /// something like a regex pattern. To match subdomains under example.com
    /// but not example.com itself, use the selector ".example.com", then have
    /// a Selector for another AresConfig (further down the chain) that matches
    /// "example.com".
    pub fn matches_selector(&self, item: &str) -> bool {
        self.selector.iter().any(|x| item.ends_with(x.as_str()))
    }
}

impl ZoneRules for AresConfig {
    fn matches_explicitly(&self, zone: &dyn crate::providers::ZoneHandle) -> bool {
        self.explicit_zones.iter().any(|name| ensure_dot_suffix(name) == ensure_dot_suffix(&zone.name()))
    }

    fn wildcard(&self) -> bool {
        self.wildcard
    }
}
