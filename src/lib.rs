pub mod config;
pub mod election;
pub mod error;
pub mod handler;
pub mod ip;
pub mod lease;
pub mod options;
pub mod packet;
pub mod registry;
pub mod supervisor;
pub mod watcher;

pub use config::{AddressRange, DhcpConfig, OptionDefaults};
pub use election::{DistributedLock, LeaseLock};
pub use error::{Error, Result};
pub use handler::DhcpHandler;
pub use lease::{Lease, LeaseRegistry};
pub use options::{DhcpOption, MessageType};
pub use packet::DhcpPacket;
pub use registry::{KubeLeaseRegistry, MemoryLeaseRegistry};
pub use supervisor::Supervisor;
