//! Watches the configuration ConfigMap and emits validated configs.
//!
//! Every accepted change is sent on the channel as-is; logically
//! equivalent re-publishes are not deduped here, the supervisor absorbs
//! them.

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use kube::Client;
use kube::runtime::watcher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DhcpConfig;
use crate::error::{Error, Result};

/// Data key inside the ConfigMap holding the YAML document.
const CONFIG_KEY: &str = "config";

/// Decodes and validates one configuration document.
///
/// `node_ip` is substituted for an empty `server-ip` during validation.
pub fn accept_config(text: &str, node_ip: &str) -> Result<DhcpConfig> {
    let mut config: DhcpConfig = serde_yaml::from_str(text)?;
    config.validate(node_ip)?;
    Ok(config)
}

/// Streams validated configuration changes into `tx` until the token is
/// cancelled or the receiver goes away.
///
/// Undecodable or invalid documents are logged and dropped; the watch
/// itself is re-established with backoff by the runtime on stream
/// errors.
pub async fn watch_config(
    client: Client,
    namespace: &str,
    config_map_name: &str,
    node_ip: &str,
    tx: mpsc::Sender<DhcpConfig>,
    token: CancellationToken,
) {
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    let mut stream = Box::pin(watcher(api, watcher::Config::default()));

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return,
            event = stream.try_next() => event,
        };
        let config_map = match event {
            Ok(Some(watcher::Event::Apply(cm))) | Ok(Some(watcher::Event::InitApply(cm))) => cm,
            Ok(Some(_)) => continue,
            Ok(None) => return,
            Err(error) => {
                warn!("ConfigMap watch error: {}", error);
                continue;
            }
        };

        if config_map.metadata.name.as_deref() != Some(config_map_name) {
            continue;
        }
        let Some(text) = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_KEY))
        else {
            warn!("ConfigMap {} is missing a `config` data item", config_map_name);
            continue;
        };

        match accept_config(text, node_ip) {
            Ok(config) => {
                debug!("Accepted configuration update for {}", config.server_ip);
                if tx.send(config).await.is_err() {
                    return;
                }
            }
            Err(Error::Yaml(error)) => {
                warn!("Failed to parse ConfigMap data: {}", error);
            }
            Err(error) => {
                warn!("ConfigMap data is not valid: {}", error);
            }
        }
    }
}
