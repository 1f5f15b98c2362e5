use std::net::Ipv4Addr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("No lease found for {0}")]
    LeaseNotFound(Ipv4Addr),

    #[error("Lease registry error: {0}")]
    Registry(String),

    #[error("Leader lock held by {0}")]
    LockHeld(String),

    #[error("{0} not set")]
    MissingEnv(&'static str),
}

impl Error {
    /// True when the error is the registry's "no such lease" signal.
    ///
    /// Call sites treat this as control flow rather than a failure;
    /// every other error kind is an opaque backend problem.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::LeaseNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
