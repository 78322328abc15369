// vim:set foldmethod=marker:

// starting doc {{{
//! A CloudFlare provider for ARES deployments.
//!
//! Configuration example:
//!
//! ```yaml
//! apiVersion: v1
//! kind: Secret
//! metadata:
//!   name: ares-secret
//! stringData:
//!   ares.yaml: |-
//!     - selector:
//!       - ***
//!       provider: cloudflare
//!       providerOptions:
//!         apiToken: ***
//! ---
//! apiVersion: v1
//! kind: Secret
//! metadata:
//!   name: ares-secret
//! stringData:
//!   ares.yaml: |-
//!     - selector:
//!       - ***
//!       provider: cloudflare
//!       providerOptions:
//!         email: ryan@***
//!         apiKey: ***
//! ```
// }}}

// {{{ imports
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::providers::{
    Changeset, ChangesetApply, DnsProvider, RecordSetsBackend, ResourceRecordSet, ZoneHandle, ZonesBackend,
};
use crate::record::{ensure_dot_suffix, RecordType};
use crate::reqwest_client_builder;
// }}}

static BASE_URL: &str = "https://api.cloudflare.com/client/v4";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum CloudFlareConfig {
    /// A CloudFlare API token. Unlike an API key (when combined with an email,
    /// gives full-account access), an API token can be limited to a specific
    /// zone, a specific set of zones, or a certain set of permissions.
    ///
    /// To set up an API Token, navigate to the "My Profile" section of the
    /// CloudFlare dashboard, then navigate to the "API Tokens" section. Then,
    /// click the "Create Token" button, and use the "Edit zone DNS" template.
    /// The required permissions are:
    ///
    /// - Zone / Zone / Read
    /// - Zone / DNS / Edit
    ///
    /// To limit your CloudFlare token to a specific zone, choose a zone from
    /// the Zone Resources option, which is already set up using the template.
    Token {
        #[serde(rename = "apiToken")]
        api_token: String,
    },
    /// A CloudFlare API Key. Unlike an API Token, this key - when combined
    /// with the email address of the account - is given the full permissions
    /// of the account.
    EmailKey {
        #[serde(rename = "email")]
        email: String,
        #[serde(rename = "apiKey")]
        api_key: String,
    },
}

macro_rules! client_builder {
    (auth::bearer(auth_token => $token:expr)) => ({
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(format!("Bearer {}", $token).as_str())?,
        );
        reqwest_client_builder!().default_headers(headers)
    });
    (auth::key(auth_email => $email:expr, auth_key => $key:expr)) => ({
        let mut headers = reqwest::header::HeaderMap::new();
        let x_auth_email = reqwest::header::HeaderName::from_static("x-auth-email");
        let x_auth_key = reqwest::header::HeaderName::from_static("x-auth-key");
        headers.insert(x_auth_email, reqwest::header::HeaderValue::from_str($email.as_str())?);
        headers.insert(x_auth_key, reqwest::header::HeaderValue::from_str($key.as_str())?);
        reqwest_client_builder!().default_headers(headers)
    });
}

impl CloudFlareConfig {
    /// Create a Reqwest client using the cloudflare::client_builder!().
    fn get_client(&self) -> anyhow::Result<reqwest::Client> {
        match self {
            CloudFlareConfig::Token { api_token } => {
                Ok(client_builder!(auth::bearer(auth_token => api_token)).build()?)
            }
            CloudFlareConfig::EmailKey { email, api_key } => {
                Ok(client_builder!(auth::key(auth_email => email, auth_key => api_key)).build()?)
            }
        }
    }
}

impl DnsProvider for CloudFlareConfig {
    fn zones(&self) -> Option<Arc<dyn ZonesBackend>> {
        let client = self.get_client().ok()?;
        Some(Arc::new(CloudflareZones { client }))
    }
}

struct CloudflareZones {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CfZone {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct CfListResponse<T> {
    result: Vec<T>,
}

#[async_trait]
impl ZonesBackend for CloudflareZones {
    async fn list(&self) -> Result<Vec<Arc<dyn ZoneHandle>>, ProviderError> {
        // TODO: paginate past the default page size once an account has
        // more zones than fit on one page.
        let response: CfListResponse<CfZone> =
            self.client.get(format!("{}/zones", BASE_URL)).send().await?.json().await?;

        Ok(response
            .result
            .into_iter()
            .map(|zone| {
                Arc::new(CloudflareZone { id: zone.id, name: zone.name, client: self.client.clone() })
                    as Arc<dyn ZoneHandle>
            })
            .collect())
    }
}

struct CloudflareZone {
    id: String,
    name: String,
    client: reqwest::Client,
}

impl ZoneHandle for CloudflareZone {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn resource_record_sets(&self) -> Option<Box<dyn RecordSetsBackend>> {
        Some(Box::new(CloudflareRecordSets { zone_id: self.id.clone(), client: self.client.clone() }))
    }
}

struct CloudflareRecordSets {
    zone_id: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CfRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    ttl: i64,
}

async fn list_matching(
    client: &reqwest::Client,
    zone_id: &str,
    name: &str,
    record_type: RecordType,
) -> Result<Vec<CfRecord>, ProviderError> {
    let list_err = |reason: String| ProviderError::ListRecordSets { zone: zone_id.to_string(), reason };
    let response: CfListResponse<CfRecord> = client
        .get(format!(
            "{}/zones/{}/dns_records?name={}&type={}",
            BASE_URL,
            zone_id,
            name,
            record_type.as_provider_str()
        ))
        .send()
        .await
        .map_err(|e| list_err(e.to_string()))?
        .json()
        .await
        .map_err(|e| list_err(e.to_string()))?;
    Ok(response.result)
}

#[async_trait]
impl RecordSetsBackend for CloudflareRecordSets {
    async fn list(&self) -> Result<Vec<ResourceRecordSet>, ProviderError> {
        let list_err = |reason: String| ProviderError::ListRecordSets { zone: self.zone_id.clone(), reason };
        let response: CfListResponse<CfRecord> = self
            .client
            .get(format!("{}/zones/{}/dns_records", BASE_URL, self.zone_id))
            .send()
            .await
            .map_err(|e| list_err(e.to_string()))?
            .json()
            .await
            .map_err(|e| list_err(e.to_string()))?;

        // Cloudflare stores one value per record; group records sharing
        // a name and type into a single resource-record-set, matching
        // the set-of-values shape the reconciliation core expects.
        let mut sets: Vec<ResourceRecordSet> = Vec::new();
        for record in response.result {
            let record_type = match RecordType::from_provider_str(&record.record_type) {
                Some(t) => t,
                None => continue,
            };
            let name = ensure_dot_suffix(&record.name);
            if let Some(existing) = sets.iter_mut().find(|rr| rr.name == name && rr.record_type == record_type) {
                existing.rrdatas.push(record.content);
            } else {
                sets.push(ResourceRecordSet { name, record_type, rrdatas: vec![record.content], ttl: record.ttl });
            }
        }
        Ok(sets)
    }

    fn start_changeset(&self) -> Box<dyn ChangesetApply> {
        Box::new(CloudflareChangeset {
            zone_id: self.zone_id.clone(),
            client: self.client.clone(),
            adds: Vec::new(),
            removes: Vec::new(),
        })
    }
}

struct CloudflareChangeset {
    zone_id: String,
    client: reqwest::Client,
    adds: Vec<ResourceRecordSet>,
    removes: Vec<ResourceRecordSet>,
}

impl Changeset for CloudflareChangeset {
    fn add(&mut self, rrset: ResourceRecordSet) {
        self.adds.push(rrset);
    }

    fn remove(&mut self, rrset: ResourceRecordSet) {
        self.removes.push(rrset);
    }
}

#[derive(Serialize)]
struct CfRecordCreate<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: &'a str,
    ttl: i64,
}

#[async_trait]
impl ChangesetApply for CloudflareChangeset {
    async fn apply(self: Box<Self>) -> Result<(), ProviderError> {
        for rrset in &self.removes {
            let existing = list_matching(&self.client, &self.zone_id, &rrset.name, rrset.record_type).await?;
            for record in existing {
                let resp = self
                    .client
                    .delete(format!("{}/zones/{}/dns_records/{}", BASE_URL, self.zone_id, record.id))
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(ProviderError::Apply {
                        zone: self.zone_id.clone(),
                        reason: format!("deleting record {}: {}", record.id, resp.status()),
                    });
                }
            }
        }

        for rrset in &self.adds {
            for value in &rrset.rrdatas {
                let body = CfRecordCreate {
                    record_type: rrset.record_type.as_provider_str(),
                    name: &rrset.name,
                    content: value,
                    ttl: rrset.ttl,
                };
                let resp = self
                    .client
                    .post(format!("{}/zones/{}/dns_records", BASE_URL, self.zone_id))
                    .json(&body)
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(ProviderError::Apply {
                        zone: self.zone_id.clone(),
                        reason: format!("creating record {}: {}", rrset.name, resp.status()),
                    });
                }
            }
        }

        Ok(())
    }
}
