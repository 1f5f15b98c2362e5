use std::env;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use kube::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kube_dhcp::election::{self, LeaseLock, LOCK_TTL};
use kube_dhcp::handler::DHCP_SERVER_PORT;
use kube_dhcp::watcher;
use kube_dhcp::{
    Error, KubeLeaseRegistry, LeaseRegistry, MemoryLeaseRegistry, Result, Supervisor,
};

/// Name of the Lease object used for leader election.
const LEADER_LOCK_NAME: &str = "kube-dhcp-leader";

#[derive(Parser)]
#[command(name = "kube-dhcp")]
#[command(author, version, about = "A cluster-aware DHCP server for Kubernetes", long_about = None)]
struct Cli {
    /// Name of the ConfigMap in the current namespace containing the
    /// DHCP configuration.
    #[arg(long = "config-map", default_value = "kube-dhcp-config")]
    config_map: String,

    /// Where leases are stored.
    #[arg(long, value_enum, default_value_t = RegistryBackend::Kube)]
    registry: RegistryBackend,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RegistryBackend {
    /// Persist leases as cluster objects; survives replica failover.
    Kube,
    /// Keep leases in process memory; single-replica use only.
    Memory,
}

fn require_env(name: &'static str) -> Result<String> {
    env::var(name).map_err(|_| Error::MissingEnv(name))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let namespace = require_env("METADATA_NAMESPACE")?;
    let pod_name = require_env("METADATA_NAME")?;
    let node_ip = require_env("METADATA_NODE_IP")?;

    let client = Client::try_default().await?;
    let registry: Arc<dyn LeaseRegistry> = match cli.registry {
        RegistryBackend::Kube => Arc::new(KubeLeaseRegistry::new(client.clone())),
        RegistryBackend::Memory => Arc::new(MemoryLeaseRegistry::new()),
    };

    let root = CancellationToken::new();
    let (config_tx, config_rx) = mpsc::channel(1);
    let (leader_tx, leader_rx) = mpsc::channel(32);

    {
        let client = client.clone();
        let namespace = namespace.clone();
        let config_map = cli.config_map.clone();
        let token = root.clone();
        tokio::spawn(async move {
            watcher::watch_config(client, &namespace, &config_map, &node_ip, config_tx, token)
                .await;
        });
    }
    {
        let lock = Arc::new(LeaseLock::new(
            client,
            &namespace,
            LEADER_LOCK_NAME,
            &pod_name,
            LOCK_TTL,
        ));
        let token = root.clone();
        tokio::spawn(async move {
            election::run_election(lock, LOCK_TTL, leader_tx, token).await;
        });
    }

    info!("Starting kube-dhcp as {}", pod_name);

    let supervisor = Supervisor::new(registry, DHCP_SERVER_PORT);
    tokio::select! {
        result = supervisor.run(leader_rx, config_rx, root.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping");
            root.cancel();
            Ok(())
        }
    }
}
