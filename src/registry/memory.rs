use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::lease::{Lease, LeaseRegistry};

/// Process-local lease registry.
///
/// A single mutex guards the map; every operation locks once, so each
/// call is atomic with respect to the others. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryLeaseRegistry {
    leases: Mutex<HashMap<Ipv4Addr, Lease>>,
}

impl MemoryLeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseRegistry for MemoryLeaseRegistry {
    async fn get_by_ip(&self, ip: Ipv4Addr) -> Result<Lease> {
        let leases = self.leases.lock().await;
        leases.get(&ip).cloned().ok_or(Error::LeaseNotFound(ip))
    }

    async fn list_by_chaddr(&self, chaddr: &str) -> Result<Vec<Lease>> {
        let leases = self.leases.lock().await;
        let mut result: Vec<Lease> = leases
            .values()
            .filter(|lease| lease.chaddr == chaddr)
            .cloned()
            .collect();
        result.sort_by_key(|lease| lease.ip);
        Ok(result)
    }

    async fn create(
        &self,
        ip: Ipv4Addr,
        chaddr: &str,
        hostname: Option<&str>,
        ttl: Duration,
    ) -> Result<Lease> {
        let lease = Lease::new(ip, chaddr, hostname, ttl);
        let mut leases = self.leases.lock().await;
        leases.insert(ip, lease.clone());
        Ok(lease)
    }

    async fn remove(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.lock().await;
        leases.remove(&lease.ip);
        Ok(())
    }
}
