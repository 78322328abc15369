//! `PodSelector`: publish the external IPs of every Node currently
//! running a matching Pod (SPEC_FULL.md §4.7).
//!
//! Grounded on the teacher's `record_spec.rs` `PodSelector`. The label
//! matching and Node IP lookup are unchanged; `sync`/`watch_values` are
//! redirected to publish into a `Scope` instead of diffing value lists
//! and calling the provider directly.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::{select, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::{Api, ListParams, ObjectMeta, WatchEvent},
    Client,
};
use serde::{Deserialize, Serialize};
use slog::{info, Logger};

use crate::producers::{record_crd, to_records, RecordValueCollector};
use crate::record::RecordType;
use crate::scope::Scope;

type LabelMap = std::collections::HashMap<String, String>;

#[derive(Clone, Serialize, Deserialize, Debug)]
enum ExpressionOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct Expression {
    pub key: String,
    operator: ExpressionOperator,
    values: Vec<String>,
}

impl Expression {
    /// Match values based on requirements outlined
    /// [here](https://kubernetes.io/docs/concepts/overview/working-with-objects/labels).
    fn match_value(&self, input: Option<&String>) -> bool {
        match &self.operator {
            ExpressionOperator::In => input.map(|x| self.values.contains(x)).unwrap_or(false),
            ExpressionOperator::NotIn => input.map(|x| !self.values.contains(x)).unwrap_or(false),
            ExpressionOperator::Exists => input.is_some(),
            ExpressionOperator::DoesNotExist => input.is_none(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PodSelector {
    #[serde(rename = "matchLabels")]
    match_labels: Option<LabelMap>,
    #[serde(rename = "matchExpressions")]
    match_expressions: Option<Vec<Expression>>,
}

#[async_trait::async_trait]
impl RecordValueCollector for PodSelector {
    /// Push `matchLabels` down to the Kubernetes API; `matchExpressions`
    /// still has to be evaluated client-side in `get_values`.
    fn get_list_parameters(&self) -> ListParams {
        let mut list_params = ListParams::default();
        if let Some(match_labels) = &self.match_labels {
            for (label, value) in match_labels {
                list_params = list_params.labels(format!("{}={}", label, value).as_str());
            }
        }
        list_params
    }

    /// Query the external IPs of Nodes running Pods matching this
    /// selector. A Node that hosts more than one matching Pod is only
    /// queried once.
    async fn get_values(&self, meta: &ObjectMeta) -> Result<Vec<String>> {
        let list_params = self.get_list_parameters();

        let pods: Api<Pod> = Api::namespaced(
            Client::try_default().await?,
            meta.namespace.as_ref().ok_or_else(|| anyhow!("missing meta.namespace"))?.as_str(),
        );
        let nodes: Api<Node> = Api::all(Client::try_default().await?);

        let mut ips: Vec<String> = Vec::new();
        let mut node_names: Vec<String> = Vec::new();

        'outer: for pod in pods.list(&list_params).await? {
            let pod_labels = pod.metadata.labels.ok_or_else(|| anyhow!("unable to get pod.metadata.labels"))?;
            if let Some(match_expressions) = &self.match_expressions {
                for expr in match_expressions {
                    if !expr.match_value(pod_labels.get(&expr.key)) {
                        continue 'outer;
                    }
                }
            }

            let node_name = pod.spec.and_then(|spec| spec.node_name).ok_or_else(|| anyhow!("unable to get pod.spec.node_name"))?;
            if node_names.contains(&node_name) {
                continue;
            }
            let node = nodes.get(&node_name).await?;
            node_names.push(node_name);

            let node_addresses = node.status.and_then(|status| status.addresses).ok_or_else(|| anyhow!("unable to get node.status.addresses"))?;
            for node_ip in node_addresses.iter().filter(|addr| addr.type_ == "ExternalIP") {
                if !ips.contains(&node_ip.address) {
                    ips.push(node_ip.address.clone());
                }
            }
        }

        Ok(ips)
    }

    /// Watch Pods (to notice Nodes gaining or losing a matching Pod) and
    /// this selector's own Record (to notice deletion), republishing
    /// the full value set on every relevant event.
    async fn watch_values(
        &self,
        meta: ObjectMeta,
        fqdn: String,
        record_type: RecordType,
        scope: Arc<Scope>,
        record_name: String,
        pod_namespace: String,
        log: Logger,
    ) -> Result<()> {
        let record_namespace = meta.namespace.clone().ok_or_else(|| anyhow!("missing record.meta.namespace"))?;
        let records: Api<record_crd::Record> = Api::namespaced(Client::try_default().await?, &record_namespace);
        let mut record_watcher = records.watch(&ListParams::default(), "0").await?.boxed().fuse();

        let list_params = self.get_list_parameters();
        let pods: Api<Pod> = Api::namespaced(Client::try_default().await?, &pod_namespace);
        let mut pod_watcher = pods.watch(&list_params, "0").await?.boxed().fuse();

        loop {
            select! {
                pod_event = pod_watcher.try_next() => {
                    match pod_event? {
                        Some(WatchEvent::Added(_)) | Some(WatchEvent::Deleted(_)) => {
                            let values = self.get_values(&meta).await?;
                            scope.replace(record_name.as_str(), to_records(&fqdn, record_type, values));
                        }
                        Some(WatchEvent::Modified(_)) | Some(WatchEvent::Bookmark(_)) => {}
                        Some(WatchEvent::Error(e)) => return Err(e.into()),
                        None => return Err(anyhow!("pod watch stream ended")),
                    }
                },
                record_event = record_watcher.try_next() => {
                    match record_event? {
                        Some(WatchEvent::Deleted(deleted)) if deleted.metadata.uid == meta.uid => {
                            info!(log, "record deleted, clearing scope entry"; "fqdn" => fqdn.clone());
                            scope.replace(record_name.as_str(), vec![]);
                            return Ok(());
                        }
                        Some(WatchEvent::Error(e)) => return Err(e.into()),
                        _ => {}
                    }
                },
            }
        }
    }
}
