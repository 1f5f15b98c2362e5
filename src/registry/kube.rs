//! Lease registry persisted in the Kubernetes API server.
//!
//! Each lease is one cluster-scoped `Lease` custom resource in the
//! `dhcp.pulcy.com/v1` group, named deterministically from its IP and
//! labelled with the IP and hardware address so that lookups can use
//! label selectors instead of scanning.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lease::{Lease as LeaseRecord, LeaseRegistry};

const LABEL_IP: &str = "dhcp.pulcy.com/ip";
const LABEL_CHADDR: &str = "dhcp.pulcy.com/chAddr";

/// Spec of the persisted `Lease` custom resource.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "dhcp.pulcy.com", version = "v1", kind = "Lease")]
pub struct LeaseSpec {
    /// Leased IP address, dotted-quad form.
    pub ip: String,

    /// Client hardware address in colon-separated hex.
    pub chaddr: String,

    /// Hostname of the user of the lease.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// When the lease expires, Unix seconds.
    #[serde(rename = "expires-at")]
    pub expires_at: i64,
}

/// Object name for the lease holding `ip`.
fn object_name(ip: Ipv4Addr) -> String {
    format!("lease-{}", label_ip_value(ip))
}

/// The IP label value: the dotted-quad with dots replaced by dashes.
fn label_ip_value(ip: Ipv4Addr) -> String {
    ip.to_string().replace('.', "-")
}

/// The hardware-address label value: the hex digits with colons stripped.
fn label_chaddr_value(chaddr: &str) -> String {
    chaddr.replace(':', "")
}

fn is_api_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

fn is_api_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn to_record(object: &Lease) -> Result<LeaseRecord> {
    let ip = object.spec.ip.parse().map_err(|_| {
        Error::Registry(format!("stored lease has invalid ip '{}'", object.spec.ip))
    })?;
    let expires_at = DateTime::from_timestamp(object.spec.expires_at, 0).ok_or_else(|| {
        Error::Registry(format!(
            "stored lease has invalid expiry {}",
            object.spec.expires_at
        ))
    })?;
    Ok(LeaseRecord {
        ip,
        chaddr: object.spec.chaddr.clone(),
        hostname: object.spec.hostname.clone(),
        expires_at,
    })
}

/// Lease registry backed by `Lease` objects in the cluster.
///
/// The backend performs no locking of its own; consistency is delegated
/// to the API server. A `create` that collides with an existing object
/// is converted into an update of that object.
pub struct KubeLeaseRegistry {
    api: Api<Lease>,
}

impl KubeLeaseRegistry {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    fn build_object(
        &self,
        ip: Ipv4Addr,
        chaddr: &str,
        hostname: Option<&str>,
        ttl: Duration,
    ) -> Lease {
        let expires_at = Utc::now() + TimeDelta::seconds(ttl.as_secs() as i64);
        let mut object = Lease::new(
            &object_name(ip),
            LeaseSpec {
                ip: ip.to_string(),
                chaddr: chaddr.to_string(),
                hostname: hostname.map(str::to_string),
                expires_at: expires_at.timestamp(),
            },
        );
        object.metadata.labels = Some(BTreeMap::from([
            (LABEL_IP.to_string(), label_ip_value(ip)),
            (LABEL_CHADDR.to_string(), label_chaddr_value(chaddr)),
        ]));
        object
    }
}

#[async_trait]
impl LeaseRegistry for KubeLeaseRegistry {
    async fn get_by_ip(&self, ip: Ipv4Addr) -> Result<LeaseRecord> {
        let params = ListParams::default().labels(&format!("{}={}", LABEL_IP, label_ip_value(ip)));
        let leases = self.api.list(&params).await?;
        match leases.items.first() {
            Some(object) => to_record(object),
            None => Err(Error::LeaseNotFound(ip)),
        }
    }

    async fn list_by_chaddr(&self, chaddr: &str) -> Result<Vec<LeaseRecord>> {
        let params = ListParams::default().labels(&format!(
            "{}={}",
            LABEL_CHADDR,
            label_chaddr_value(chaddr)
        ));
        let leases = self.api.list(&params).await?;
        let mut result = leases
            .items
            .iter()
            .map(to_record)
            .collect::<Result<Vec<_>>>()?;
        result.sort_by_key(|lease| lease.ip);
        Ok(result)
    }

    async fn create(
        &self,
        ip: Ipv4Addr,
        chaddr: &str,
        hostname: Option<&str>,
        ttl: Duration,
    ) -> Result<LeaseRecord> {
        let object = self.build_object(ip, chaddr, hostname, ttl);
        match self.api.create(&PostParams::default(), &object).await {
            Ok(created) => to_record(&created),
            Err(err) if is_api_already_exists(&err) => {
                // A prior lease for this IP holds the name. Take it over:
                // re-read the current object, overwrite its spec and
                // labels, and issue an update.
                let name = object_name(ip);
                let mut existing = self.api.get(&name).await?;
                existing.metadata.labels = object.metadata.labels.clone();
                existing.spec = object.spec.clone();
                let replaced = self
                    .api
                    .replace(&name, &PostParams::default(), &existing)
                    .await?;
                to_record(&replaced)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, lease: &LeaseRecord) -> Result<()> {
        match self
            .api
            .delete(&object_name(lease.ip), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_api_not_found(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    #[test]
    fn test_object_naming() {
        let ip = Ipv4Addr::new(10, 0, 0, 11);
        assert_eq!(object_name(ip), "lease-10-0-0-11");
        assert_eq!(label_ip_value(ip), "10-0-0-11");
        assert_eq!(label_chaddr_value("aa:bb:cc:dd:ee:ff"), "aabbccddeeff");
    }

    #[test]
    fn test_record_conversion() {
        let object = Lease::new(
            "lease-10-0-0-11",
            LeaseSpec {
                ip: "10.0.0.11".to_string(),
                chaddr: "aa:bb:cc:dd:ee:ff".to_string(),
                hostname: Some("printer".to_string()),
                expires_at: 1_700_000_000,
            },
        );
        let record = to_record(&object).unwrap();
        assert_eq!(record.ip, Ipv4Addr::new(10, 0, 0, 11));
        assert_eq!(record.chaddr, "aa:bb:cc:dd:ee:ff");
        assert_eq!(record.hostname.as_deref(), Some("printer"));
        assert_eq!(record.expires_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_record_conversion_rejects_bad_ip() {
        let object = Lease::new(
            "lease-bogus",
            LeaseSpec {
                ip: "bogus".to_string(),
                chaddr: "aa:bb:cc:dd:ee:ff".to_string(),
                hostname: None,
                expires_at: 1_700_000_000,
            },
        );
        let err = to_record(&object).unwrap_err();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_api_error_predicates() {
        let already_exists = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "leases \"lease-10-0-0-11\" already exists".to_string(),
            reason: "AlreadyExists".to_string(),
            code: 409,
        });
        assert!(is_api_already_exists(&already_exists));
        assert!(!is_api_not_found(&already_exists));

        let not_found = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(is_api_not_found(&not_found));
        assert!(!is_api_already_exists(&not_found));
    }
}
