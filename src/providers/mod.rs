// vim:set et sw=4 ts=4 foldmethod=marker:

//! DNS provider capability boundary (SPEC_FULL.md §2, §6).
//!
//! Modeled closely on the Go `dnsprovider` interfaces referenced from
//! `dnscontroller.go`: a provider exposes `Zones`, a zone exposes
//! `ResourceRecordSets`, and resource record sets expose a changeset
//! that batches add/remove operations and applies them atomically.
//! Dynamic dispatch (trait objects, not an enum of variants) is used
//! throughout per SPEC_FULL.md §9's "dynamic dispatch to provider"
//! note, since new providers beyond the built-in Cloudflare adapter
//! should be addable without touching the reconciliation core.

// {{{ imports
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
// }}}

#[macro_export]
macro_rules! reqwest_client_builder {
    () => {
        reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
    };
}

pub mod cloudflare;

#[cfg(test)]
pub mod fake;

use crate::error::ProviderError;
use crate::record::RecordType;

/// A DNS record set as returned by, or submitted to, a provider. This
/// is the provider-facing shape; the reconciliation core works in
/// terms of `record::RecordKey` and sorted value lists, and only
/// crosses into `ResourceRecordSet` at the adapter boundary
/// (`DnsOperationHelper`, see `controller.rs`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRecordSet {
    pub name: String,
    pub record_type: RecordType,
    pub rrdatas: Vec<String>,
    pub ttl: i64,
}

/// A batch of add/remove operations applied atomically to one zone.
pub trait Changeset: Send {
    fn add(&mut self, rrset: ResourceRecordSet);
    fn remove(&mut self, rrset: ResourceRecordSet);
}

/// Consumes a `Changeset`'s accumulated operations. Split from
/// `Changeset` itself so `Box<dyn Changeset>` stays object-safe while
/// `apply` can still be `async`.
#[async_trait]
pub trait ChangesetApply: Changeset {
    async fn apply(self: Box<Self>) -> Result<(), ProviderError>;
}

/// Capability exposed by a zone that supports resource record sets.
#[async_trait]
pub trait RecordSetsBackend: Send + Sync {
    async fn list(&self) -> Result<Vec<ResourceRecordSet>, ProviderError>;

    fn start_changeset(&self) -> Box<dyn ChangesetApply>;

    fn new_record_set(
        &self,
        fqdn: &str,
        values: &[String],
        ttl: i64,
        record_type: RecordType,
    ) -> ResourceRecordSet {
        ResourceRecordSet {
            name: fqdn.to_string(),
            record_type,
            rrdatas: values.to_vec(),
            ttl,
        }
    }
}

/// A single provider zone. `name()` may or may not carry a trailing
/// dot; every caller normalizes with `record::ensure_dot_suffix`
/// before comparing.
pub trait ZoneHandle: Send + Sync {
    fn name(&self) -> String;

    /// `None` when this zone doesn't support resource record sets at
    /// all (distinct from supporting them but having none).
    fn resource_record_sets(&self) -> Option<Box<dyn RecordSetsBackend>>;
}

/// Zone discovery, the top-level capability handed to the zone
/// resolver each reconciliation cycle.
#[async_trait]
pub trait ZonesBackend: Send + Sync {
    async fn list(&self) -> Result<Vec<std::sync::Arc<dyn ZoneHandle>>, ProviderError>;
}

/// The DNS provider as a whole. `zones()` returns `None` when the
/// provider doesn't support zone discovery at all, mirroring the Go
/// `provider.Zones() (Zones, bool)` signature.
pub trait DnsProvider: Send + Sync {
    fn zones(&self) -> Option<std::sync::Arc<dyn ZonesBackend>>;
}

use cloudflare::CloudFlareConfig as CloudFlare;

trait_enum::trait_enum! {
    #[derive(Clone, Serialize, Deserialize, Debug)]
    #[serde(tag="provider", content="providerOptions")]
    pub enum ProviderConfig: DnsProvider {
        #[serde(rename="cloudflare")]
        CloudFlare,
    }
}
