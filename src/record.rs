//! Record data model (SPEC_FULL.md §3).

use serde::{Deserialize, Serialize};

/// The DNS record types the controller understands. Unlike the original
/// ARES `providers::util::RecordType`, this enum is closed to exactly
/// the types the reconciliation core can reason about; a provider
/// adapter that encounters anything else (e.g. `MX`, `TXT`, `NS`) skips
/// it rather than guessing, since those types are never written by
/// `DnsOperationHelper` and so never need to round-trip through here.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    Alias,
}

impl RecordType {
    /// The string form used on the wire with DNS providers (Alias is
    /// never emitted to a provider; see `Record::alias_target`).
    pub fn as_provider_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::Alias => "ALIAS",
        }
    }

    pub fn from_provider_str(s: &str) -> Option<RecordType> {
        match s {
            "A" => Some(RecordType::A),
            "AAAA" => Some(RecordType::AAAA),
            "CNAME" => Some(RecordType::CNAME),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_provider_str())
    }
}

/// An immutable DNS record as published by a producer into a `Scope`.
///
/// Invariant: a record with `record_type == Alias` never has
/// `alias_target == true`, and a record with `alias_target == true` is
/// never of type `Alias`. Both are enforced at construction rather than
/// by convention, since the snapshotter trusts this invariant to decide
/// whether a record is an alias-target (consumed by indirection) or an
/// emission.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Record {
    pub fqdn: String,
    pub record_type: RecordType,
    pub value: String,
    alias_target: bool,
}

impl Record {
    /// Build a plain, directly-emitted record.
    pub fn new(fqdn: impl Into<String>, record_type: RecordType, value: impl Into<String>) -> Record {
        Record {
            fqdn: fqdn.into(),
            record_type,
            value: value.into(),
            alias_target: false,
        }
    }

    /// Build a record flagged as an alias target: not itself emitted,
    /// but indexable by FQDN when resolving an `Alias` record elsewhere
    /// in the same snapshot.
    ///
    /// # Panics
    ///
    /// Panics if `record_type` is `Alias` — an alias target cannot
    /// itself be an alias (chained aliases are unsupported, see
    /// SPEC_FULL.md §4.3).
    pub fn alias_target(fqdn: impl Into<String>, record_type: RecordType, value: impl Into<String>) -> Record {
        assert!(
            record_type != RecordType::Alias,
            "an alias-target record cannot itself be of type Alias"
        );
        Record {
            fqdn: fqdn.into(),
            record_type,
            value: value.into(),
            alias_target: true,
        }
    }

    /// Build an `Alias` record naming `target` as the FQDN to resolve
    /// against alias-target records in the same snapshot.
    pub fn alias(fqdn: impl Into<String>, target: impl Into<String>) -> Record {
        Record {
            fqdn: fqdn.into(),
            record_type: RecordType::Alias,
            value: target.into(),
            alias_target: false,
        }
    }

    pub fn is_alias_target(&self) -> bool {
        self.alias_target
    }
}

/// `{RecordType, FQDN}` — the unit of DNS identity the controller
/// manages (SPEC_FULL.md §3, "Record Key").
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct RecordKey {
    pub record_type: RecordType,
    pub fqdn: String,
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.record_type, self.fqdn)
    }
}

/// Normalize a DNS name to a trailing-dot form. Every zone name and
/// FQDN comparison in this crate goes through this function first, per
/// SPEC_FULL.md §4.4's normalization invariant.
pub fn ensure_dot_suffix(s: &str) -> String {
    if s.ends_with('.') {
        s.to_string()
    } else {
        format!("{}.", s)
    }
}
