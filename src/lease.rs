//! The lease entity and the registry abstraction over lease storage.
//!
//! A lease binds one IP address to one client hardware address for a
//! bounded time. The registry owns all live leases; the DHCP handler
//! holds no lease state of its own, which is what lets a newly elected
//! replica resume serving from the shared registry.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single IP address claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    /// The leased IP address. Unique within the registry.
    pub ip: Ipv4Addr,

    /// Client hardware address in colon-separated lowercase hex.
    pub chaddr: String,

    /// Client-provided hostname, when one was sent.
    pub hostname: Option<String>,

    /// When this lease expires (UTC).
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Builds a lease expiring `ttl` from now.
    pub fn new(ip: Ipv4Addr, chaddr: &str, hostname: Option<&str>, ttl: Duration) -> Self {
        Self {
            ip,
            chaddr: chaddr.to_string(),
            hostname: hostname.map(str::to_string),
            expires_at: Utc::now() + TimeDelta::seconds(ttl.as_secs() as i64),
        }
    }

    /// Returns true if the lease has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Returns seconds remaining until expiration, or 0 if expired.
    pub fn remaining_seconds(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Abstract store of leases, keyed by IP and indexed by hardware address.
///
/// Two backends exist: an in-memory map for tests and single-replica
/// runs, and a Kubernetes-persisted variant for production. Both uphold
/// the same contract:
///
/// - at most one lease per IP exists at any time;
/// - `create` upserts, refreshing the expiry of an existing lease;
/// - `list_by_chaddr` returns leases sorted ascending by IP, so callers
///   that pick "the first" get a deterministic answer;
/// - removing an absent lease is not an error.
#[async_trait]
pub trait LeaseRegistry: Send + Sync {
    /// Get the lease for the given IP.
    ///
    /// Returns [`Error::LeaseNotFound`](crate::Error::LeaseNotFound)
    /// when no lease exists for it.
    async fn get_by_ip(&self, ip: Ipv4Addr) -> Result<Lease>;

    /// All leases held by the given hardware address, sorted by IP.
    /// An empty list is a normal answer, not an error.
    async fn list_by_chaddr(&self, chaddr: &str) -> Result<Vec<Lease>>;

    /// Create a lease with the given IP, hardware address and time to
    /// live. Overwrites any existing lease for the same IP.
    async fn create(
        &self,
        ip: Ipv4Addr,
        chaddr: &str,
        hostname: Option<&str>,
        ttl: Duration,
    ) -> Result<Lease>;

    /// Remove the given lease.
    async fn remove(&self, lease: &Lease) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_expiry() {
        let lease = Lease::new(
            Ipv4Addr::new(10, 0, 0, 10),
            "aa:bb:cc:dd:ee:ff",
            None,
            Duration::from_secs(7200),
        );
        assert!(!lease.is_expired());
        assert!(lease.remaining_seconds() > 7100);

        let mut expired = lease.clone();
        expired.expires_at = Utc::now() - TimeDelta::seconds(1);
        assert!(expired.is_expired());
        assert_eq!(expired.remaining_seconds(), 0);
    }

    #[test]
    fn test_lease_hostname() {
        let lease = Lease::new(
            Ipv4Addr::new(10, 0, 0, 10),
            "aa:bb:cc:dd:ee:ff",
            Some("printer"),
            Duration::from_secs(60),
        );
        assert_eq!(lease.hostname.as_deref(), Some("printer"));
    }
}
