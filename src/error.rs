//! Structured error taxonomy for the reconciliation core.
//!
//! The CRD-watch plumbing and `main` continue to use `anyhow::Result`
//! for ad hoc propagation, matching the rest of the binary. The
//! reconciliation loop and its collaborators use `AresError` so the
//! retry shell (`controller::DnsController::run`) can distinguish a
//! fatal stop request from a transient provider hiccup without
//! inspecting message text.

use thiserror::Error;

use crate::record::RecordKey;

/// Failures from the DNS provider adapter: listing zones, listing
/// record sets, or applying a changeset.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider does not support resource record sets for zone {zone}")]
    RecordSetsUnsupported { zone: String },

    #[error("error listing zones: {0}")]
    ListZones(String),

    #[error("error listing resource records for zone {zone}: {reason}")]
    ListRecordSets { zone: String, reason: String },

    #[error("error applying changeset to zone {zone}: {reason}")]
    Apply { zone: String, reason: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Top-level error categories named in the design's error taxonomy.
#[derive(Error, Debug)]
pub enum AresError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no managed zone found for {key:?}")]
    NoZone { key: RecordKey },

    #[error("provider error for {key:?}: {source}")]
    Provider {
        key: Option<RecordKey>,
        #[source]
        source: ProviderError,
    },

    #[error("stop requested")]
    Cancelled,
}

impl AresError {
    /// True when no other cycle-local information should be attached;
    /// used by the retry shell to pick the longer back-off.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AresError::Cancelled)
    }
}
