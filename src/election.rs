//! Leader election over a named TTL lock.
//!
//! Exactly one replica holds the lock at a time; only the holder runs a
//! DHCP handler. The lock itself is a narrow capability so the election
//! loop can be driven by an in-process fake in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How long an acquisition lasts before it must be renewed.
pub const LOCK_TTL: Duration = Duration::from_secs(30);

/// How long a non-leader waits before trying again.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// A TTL lock shared by all replicas.
///
/// Re-acquiring by the current holder extends the TTL; that is the
/// renewal path, not a separate operation.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Take or renew the lock. Fails when another holder has it.
    async fn acquire(&self) -> Result<()>;

    /// Give the lock up so another replica can take it without waiting
    /// for expiry.
    async fn release(&self) -> Result<()>;
}

/// Lock backed by a `coordination.k8s.io/v1` Lease object.
pub struct LeaseLock {
    api: Api<Lease>,
    name: String,
    holder: String,
    ttl: Duration,
}

impl LeaseLock {
    /// `holder` identifies this replica; the pod name is the natural
    /// choice.
    pub fn new(client: Client, namespace: &str, name: &str, holder: &str, ttl: Duration) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            holder: holder.to_string(),
            ttl,
        }
    }

    fn ttl_seconds(&self) -> i32 {
        self.ttl.as_secs() as i32
    }

    fn fresh_spec(&self, previous: Option<&LeaseSpec>) -> LeaseSpec {
        let now = MicroTime(Utc::now());
        let taking_over = previous
            .and_then(|spec| spec.holder_identity.as_deref())
            .is_some_and(|holder| holder != self.holder);
        let transitions = previous.and_then(|spec| spec.lease_transitions).unwrap_or(0);
        LeaseSpec {
            holder_identity: Some(self.holder.clone()),
            lease_duration_seconds: Some(self.ttl_seconds()),
            acquire_time: if taking_over || previous.is_none() {
                Some(now.clone())
            } else {
                previous.and_then(|spec| spec.acquire_time.clone())
            },
            renew_time: Some(now),
            lease_transitions: Some(if taking_over { transitions + 1 } else { transitions }),
            ..LeaseSpec::default()
        }
    }
}

fn is_expired(spec: &LeaseSpec, ttl: Duration) -> bool {
    let renewed = spec
        .renew_time
        .as_ref()
        .or(spec.acquire_time.as_ref())
        .map(|time| time.0);
    let duration = spec
        .lease_duration_seconds
        .map(i64::from)
        .unwrap_or(ttl.as_secs() as i64);
    match renewed {
        Some(renewed) => renewed + TimeDelta::seconds(duration) < Utc::now(),
        None => true,
    }
}

#[async_trait]
impl DistributedLock for LeaseLock {
    async fn acquire(&self) -> Result<()> {
        match self.api.get_opt(&self.name).await? {
            None => {
                let lease = Lease {
                    metadata: kube::api::ObjectMeta {
                        name: Some(self.name.clone()),
                        ..Default::default()
                    },
                    spec: Some(self.fresh_spec(None)),
                };
                self.api.create(&PostParams::default(), &lease).await?;
                Ok(())
            }
            Some(mut current) => {
                let spec = current.spec.clone().unwrap_or_default();
                let held_by_us = spec.holder_identity.as_deref() == Some(self.holder.as_str());
                let free = spec.holder_identity.is_none() || is_expired(&spec, self.ttl);
                if !held_by_us && !free {
                    return Err(Error::LockHeld(
                        spec.holder_identity.unwrap_or_else(|| "<unknown>".to_string()),
                    ));
                }
                current.spec = Some(self.fresh_spec(Some(&spec)));
                self.api
                    .replace(&self.name, &PostParams::default(), &current)
                    .await?;
                Ok(())
            }
        }
    }

    async fn release(&self) -> Result<()> {
        let Some(mut current) = self.api.get_opt(&self.name).await? else {
            return Ok(());
        };
        let spec = current.spec.clone().unwrap_or_default();
        if spec.holder_identity.as_deref() != Some(self.holder.as_str()) {
            return Ok(());
        }
        current.spec = Some(LeaseSpec {
            holder_identity: None,
            renew_time: None,
            ..spec
        });
        self.api
            .replace(&self.name, &PostParams::default(), &current)
            .await?;
        Ok(())
    }
}

/// Competes for the lock until the token is cancelled, emitting `true`
/// on becoming leader and `false` on losing it.
///
/// Only transitions are sent, so the channel never carries two equal
/// values in a row. The first message can only be `true`; the loop
/// starts as non-leader.
pub async fn run_election(
    lock: Arc<dyn DistributedLock>,
    ttl: Duration,
    tx: mpsc::Sender<bool>,
    token: CancellationToken,
) {
    let mut is_leader = false;
    loop {
        let delay = match lock.acquire().await {
            Ok(()) => {
                if !is_leader {
                    info!("Leader lock acquired");
                    is_leader = true;
                    if tx.send(true).await.is_err() {
                        return;
                    }
                }
                ttl / 2
            }
            Err(error) => {
                debug!("Leader lock not acquired: {}", error);
                if is_leader {
                    warn!("Leader lock lost: {}", error);
                    is_leader = false;
                    if tx.send(false).await.is_err() {
                        return;
                    }
                }
                RETRY_BACKOFF
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.cancelled() => {
                if is_leader && let Err(error) = lock.release().await {
                    warn!("Failed to release leader lock: {}", error);
                }
                return;
            }
        }
    }
}
