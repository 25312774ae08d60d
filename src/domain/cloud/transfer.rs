use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Storage backend of a cloud, decides which transfer driver moves disk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Ceph,
    #[default]
    Iscsi,
}

/// Where a payload lives: a host and a path (file path or `pool/volume` for ceph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub host: String,
    pub path: String,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.path)
    }
}

/// Moves a disk or volume payload between hosts.
#[async_trait]
pub trait TransferDriver: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Fails with [`Error::TransferError`].
    async fn transfer(&self, source: &Locator, destination: &Locator) -> Result<()>;
}

/// Drivers keyed by (source backend, destination backend).
#[derive(Debug, Clone, Default)]
pub struct TransferRegistry {
    drivers: HashMap<(StorageBackend, StorageBackend), Arc<dyn TransferDriver>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the driver for one backend pair, replacing a previous one.
    pub fn register(mut self, source: StorageBackend, destination: StorageBackend, driver: Arc<dyn TransferDriver>) -> Self {
        self.drivers.insert((source, destination), driver);
        self
    }

    /// Registers one driver for every backend combination.
    pub fn with_fallback(mut self, driver: Arc<dyn TransferDriver>) -> Self {
        for source in [StorageBackend::Ceph, StorageBackend::Iscsi] {
            for destination in [StorageBackend::Ceph, StorageBackend::Iscsi] {
                self.drivers.entry((source, destination)).or_insert_with(|| driver.clone());
            }
        }
        self
    }

    pub fn select(&self, source: StorageBackend, destination: StorageBackend) -> Result<Arc<dyn TransferDriver>> {
        self.drivers
            .get(&(source, destination))
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound(format!("transfer driver for {:?} -> {:?}", source, destination)))
    }
}

/// Conventional driver name for a backend pair (`ssh_ceph_to_file`, ...).
pub fn driver_name(source: StorageBackend, destination: StorageBackend) -> &'static str {
    match (source, destination) {
        (StorageBackend::Ceph, StorageBackend::Ceph) => "ssh_ceph_to_ceph",
        (StorageBackend::Ceph, StorageBackend::Iscsi) => "ssh_ceph_to_file",
        (StorageBackend::Iscsi, StorageBackend::Ceph) => "ssh_file_to_ceph",
        (StorageBackend::Iscsi, StorageBackend::Iscsi) => "ssh_file_to_file",
    }
}
