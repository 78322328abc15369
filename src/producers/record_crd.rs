//! The Record custom resource definition (SPEC_FULL.md §4.7).
//!
//! Grounded on the teacher's `record_spec.rs` `RecordSpec`/kube-derive
//! setup; the collector trait it used to carry (`RecordValueCollector`)
//! now lives on `crate::producers` instead, redirected to publish into
//! a `Scope` rather than calling a provider directly.

use kube_derive::CustomResource;
use serde::{Deserialize, Serialize};

use crate::producers::pod_selector::PodSelector;
use crate::record::RecordType;

trait_enum::trait_enum! {
    #[derive(Clone, Serialize, Deserialize, Debug)]
    pub enum RecordValueFrom: crate::producers::RecordValueCollector {
        #[serde(rename = "podSelector")]
        PodSelector,
    }
}

#[derive(CustomResource, Clone, Deserialize, Serialize, Debug)]
#[kube(group = "syntixi.io", version = "v1alpha1", namespaced)]
pub struct RecordSpec {
    pub fqdn: String,
    pub ttl: u32,
    #[serde(rename = "type")]
    pub type_: RecordType,
    pub value: Option<Vec<String>>,
    #[serde(rename = "valueFrom")]
    pub value_from: Option<RecordValueFrom>,
}
