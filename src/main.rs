#![warn(clippy::all, clippy::pedantic)]
#![warn(missing_docs)]

// vim:set et sw=4 ts=4 foldmethod=marker:

// starting doc {{{
//! ARES: Automatic REcord System.
//!
//! A Kubernetes-native DNS reconciliation controller meant to run in
//! parallel with External DNS. Desired state comes from one or more
//! producers (Kubernetes CRDs today); every producer publishes into a
//! named `Scope` on a shared registry, and a `DnsController` per
//! configured provider diffs the registry against the provider's
//! actual records once per cycle.
//!
//! Configuration is managed through the ares-secret Secret, typically in the
//! default namespace. This may change in the future to default to the
//! namespace that ARES is deployed in.
//!
//! ## Configuration
//!
//! A configuration file should look like this:
//!
//! ```yaml
//! - selector:
//!   - syntixi.io
//!   provider: cloudflare
//!   providerOptions:
//!     apiToken: ***
//!   explicitZones:
//!   - syntixi.io
//!   wildcard: false
//! ```
//!
//! The corresponding Secret can look like:
//!
//! ```yaml
//! apiVersion: v1
//! kind: Secret
//! metadata:
//!   name: ares-secret
//! stringData:
//! - selector:
//!   - syntixi.io
//!   provider: cloudflare
//!   providerOptions:
//!     apiToken: ***
//! ```
//!
//! If you want to control multiple domain zones across multiple different
//! providers, you can add another element into the default array and
//! configure another provider there. Each entry runs its own
//! `DnsController` over the same shared scope registry.
//!
//! ## Custom Resource Definitions
//!
//! ARES watches over the syntixi.io/v1alpha1/Record CustomResourceDefinition
//! to know which domain names to add, remove, or modify. An example resource
//! is below.
//!
//! ```yaml
//! apiVersion: syntixi.io/v1alpha1
//! kind: Record
//! metadata:
//!   name: example
//! spec:
//!   fqdn: example.syntixi.io
//!   ttl: 100
//!   type: CNAME
//!   value:
//!   - syntixi.io
//! ```
//!
//! For addresses that can change, such as Nodes that Pods may be running on,
//! it is recommended to instead use a valueFrom selector, such as the
//! PodSelector. The example below includes a Pod and a Record that points to
//! the Node the Pod is running on, with a Selector similar to that in the
//! Kubernetes
//! [documentation](https://kubernetes.io/docs/concepts/overview/working-with-objects/labels/).
//!
//! This should not be used for inbound traffic (for that, you should use a
//! LoadBalancer Service or an Ingress record, with external-dns). This is,
//! however, useful for making SPF records point to an outbound mail record,
//! where the mail can be sent from one of many Nodes.
//!
//! ```yaml
//! apiVersion: v1
//! kind: Pod
//! metadata:
//!   name: nginx-hello-world
//!   app: nginx
//! spec:
//!   containers:
//!   - name: nginx
//!     image: nginxdemos/hello
//! ---
//! apiVersion: syntixi.io/v1alpha1
//! kind: Record
//! metadata:
//!   name: example-selector
//! spec:
//!   fqdn: selector.syntixi.io
//!   ttl: 1
//!   valueFrom:
//!     podSelector:
//!       matchLabels:
//!         app: nginx
//! ```
// }}}

// imports {{{
use clap::Clap;

use std::sync::Arc;

use slog::{debug, error, info, o, Drain, Logger};

use anyhow::{anyhow, Result};

use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams},
    Client,
};

mod cli;
mod controller;
mod error;
mod producers;
mod program_config;
mod providers;
mod record;
mod scope;
mod snapshot;
mod zone;

use controller::DnsController;
use producers::record_crd;
use program_config::AresConfig;
use providers::DnsProvider;
use scope::{ChangeCounter, ScopeRegistry};
use zone::ZoneRules;
// }}}

#[tokio::main]
async fn main() -> Result<()> {
    let opts: cli::Opts = cli::Opts::parse();
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let root_logger = slog::Logger::root(
        drain,
        o!("secret" => opts.secret.clone(),
           "secret_key" => opts.secret_key.clone(),
           "secret_namespace" => opts.secret_namespace.clone()),
    );
    let client = Client::try_default().await?;

    info!(root_logger, "Loading configuration from Secret");
    let secrets: Api<Secret> = Api::namespaced(client, opts.secret_namespace.as_str());
    let secret = secrets.get(opts.secret.as_str()).await?;
    let config_data = secret.data.ok_or_else(|| anyhow!("Unable to get data from Secret"))?;
    let config_content = config_data.get(opts.secret_key.as_str()).ok_or_else(|| anyhow!("Unable to get key from Secret"))?.clone().0;

    debug!(root_logger, "Configuration loaded from Secret");
    let config: Vec<Arc<AresConfig>> = serde_yaml::from_str::<Vec<_>>(std::str::from_utf8(&config_content[..])?)?
        .into_iter()
        .map(Arc::new)
        .collect();

    let records: Api<record_crd::Record> = Api::all(Client::try_default().await?);
    let record_list: Vec<Arc<record_crd::Record>> =
        records.list(&ListParams::default()).await?.items.into_iter().map(Arc::new).collect();

    let scope_registry = ScopeRegistry::new(ChangeCounter::new());
    let mut handles = vec![];

    // TODO watch over config and reload when changes are made
    for ares in config.into_iter() {
        let provider: Arc<dyn DnsProvider> = Arc::new(ares.provider.clone());
        let zone_rules: Arc<dyn ZoneRules> = ares.clone();
        let controller = Arc::new(DnsController::new(provider, zone_rules, scope_registry.clone(), root_logger.clone())?);

        let controller_for_run = controller.clone();
        handles.push(tokio::spawn(async move {
            controller_for_run.run().await;
        }));

        // Find all matching Records and publish them into scopes on this
        // entry's controller.
        let allowed_records: Vec<Arc<record_crd::Record>> =
            record_list.iter().filter(|record| ares.matches_selector(record.spec.fqdn.as_str())).cloned().collect();

        // TODO put a watcher over the Record list instead of just getting it at program start
        for record in allowed_records {
            let sub_logger = root_logger.new(o!("record" => record.spec.fqdn.clone()));
            let controller = controller.clone();
            let pod_namespace = opts.pod_namespace.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = producers::spawn_for_record(controller, record, pod_namespace, sub_logger.clone()).await {
                    error!(sub_logger, "producer task failed"; "error" => %e);
                }
            }));
        }
    }

    futures::future::join_all(handles).await;

    Ok(())
}
