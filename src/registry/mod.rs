//! Lease registry backends.
//!
//! The backend is selected once at startup: [`MemoryLeaseRegistry`] for
//! tests and single-replica runs, [`KubeLeaseRegistry`] when leases must
//! survive replica failover.

mod kube;
mod memory;

pub use self::kube::KubeLeaseRegistry;
pub use self::memory::MemoryLeaseRegistry;
