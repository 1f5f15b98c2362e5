//! Couples leadership and configuration into the handler lifecycle.
//!
//! The supervisor owns at most one running DHCP handler. A handler
//! exists exactly when this replica is leader and a validated
//! configuration is at hand; any change to either tears the current
//! handler down and, when the condition still holds, builds a fresh one.
//! The handler keeps no state of its own, so rebuild-on-any-change is
//! both simple and correct.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::DhcpConfig;
use crate::error::Result;
use crate::handler::DhcpHandler;
use crate::lease::LeaseRegistry;

pub struct Supervisor {
    registry: Arc<dyn LeaseRegistry>,
    port: u16,
}

impl Supervisor {
    /// `port` is the UDP port handlers bind; 67 in production, an
    /// ephemeral port in tests.
    pub fn new(registry: Arc<dyn LeaseRegistry>, port: u16) -> Self {
        Self { registry, port }
    }

    /// Runs the event loop until the root token is cancelled or both
    /// producers go away.
    ///
    /// Events are processed strictly one at a time. Stopping the old
    /// handler does not await its termination; the new handler may
    /// briefly overlap it on the socket and tolerates that as a logged
    /// bind failure.
    pub async fn run(
        &self,
        mut leader_rx: mpsc::Receiver<bool>,
        mut config_rx: mpsc::Receiver<DhcpConfig>,
        token: CancellationToken,
    ) -> Result<()> {
        let mut is_leader = false;
        let mut config: Option<DhcpConfig> = None;
        let mut running: Option<CancellationToken> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Some(stop) = running.take() {
                        stop.cancel();
                    }
                    return Ok(());
                }
                leader = leader_rx.recv() => {
                    match leader {
                        None => {
                            if let Some(stop) = running.take() {
                                stop.cancel();
                            }
                            return Ok(());
                        }
                        Some(leader) if leader == is_leader => continue,
                        Some(leader) => is_leader = leader,
                    }
                }
                update = config_rx.recv() => {
                    match update {
                        None => {
                            if let Some(stop) = running.take() {
                                stop.cancel();
                            }
                            return Ok(());
                        }
                        Some(update) => config = Some(update),
                    }
                }
            }

            if let Some(stop) = running.take() {
                stop.cancel();
            }

            if is_leader && let Some(config) = config.as_ref() {
                match DhcpHandler::new(config, Arc::clone(&self.registry), self.port) {
                    Ok(handler) => {
                        let stop = token.child_token();
                        running = Some(stop.clone());
                        tokio::spawn(async move {
                            if let Err(err) = handler.run(stop).await {
                                error!("Handler run failed: {}", err);
                            }
                        });
                        info!("Launched updated handler on {}", config.server_ip);
                    }
                    Err(err) => error!("Creating handler failed: {}", err),
                }
            }
        }
    }
}
