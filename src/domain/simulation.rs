use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::api::inventory_dto::InventoryDto;
use crate::domain::cloud::memory_adapter::{MemoryAdapter, RecordingTransfer};
use crate::domain::cloud::resource_trait::{ResourceAdapter, ResourceKind};
use crate::domain::cloud::transfer::{StorageBackend, TransferRegistry, driver_name};
use crate::domain::config::FerryConfig;
use crate::domain::ferry::Ferry;
use crate::error::Result;

/// A ferry wired to in-memory clouds, with handles on every fake adapter and
/// transfer driver so the outcome can be inspected.
#[derive(Debug)]
pub struct Simulation {
    pub ferry: Ferry,
    pub src: BTreeMap<ResourceKind, Arc<MemoryAdapter>>,
    pub dst: BTreeMap<ResourceKind, Arc<MemoryAdapter>>,
    pub transfers: Vec<Arc<RecordingTransfer>>,
}

impl Simulation {
    /// Both clouds expose every resource kind; kinds missing from the inventory start empty.
    pub fn build(config: FerryConfig, inventory: InventoryDto) -> Result<Self> {
        let src = memory_cloud(inventory.src, 0)?;
        let dst = memory_cloud(inventory.dst, inventory.settle_after)?;

        let mut registry = TransferRegistry::new();
        let mut transfers = Vec::new();
        for source in [StorageBackend::Ceph, StorageBackend::Iscsi] {
            for destination in [StorageBackend::Ceph, StorageBackend::Iscsi] {
                let driver = Arc::new(RecordingTransfer::new(driver_name(source, destination)));
                registry = registry.register(source, destination, driver.clone());
                transfers.push(driver);
            }
        }

        let ferry = Ferry::new(config, adapters(&src), adapters(&dst), registry)?;
        Ok(Simulation { ferry, src, dst, transfers })
    }

    /// Every payload moved by any driver, as `(source, destination)` locators.
    pub fn transferred(&self) -> Vec<(String, String)> {
        self.transfers.iter().flat_map(|driver| driver.transfers()).map(|(source, destination)| (source.to_string(), destination.to_string())).collect()
    }
}

fn memory_cloud(inventory: BTreeMap<String, Map<String, Value>>, settle_after: u32) -> Result<BTreeMap<ResourceKind, Arc<MemoryAdapter>>> {
    let mut records: BTreeMap<ResourceKind, Map<String, Value>> = BTreeMap::new();
    for (name, entries) in inventory {
        records.insert(ResourceKind::from_str(&name)?, entries);
    }

    Ok(ResourceKind::ALL
        .into_iter()
        .map(|kind| {
            let adapter = MemoryAdapter::with_records(kind, records.remove(&kind).unwrap_or_default()).settle_after(settle_after);
            (kind, Arc::new(adapter))
        })
        .collect())
}

fn adapters(cloud: &BTreeMap<ResourceKind, Arc<MemoryAdapter>>) -> Vec<Arc<dyn ResourceAdapter>> {
    cloud.values().map(|adapter| adapter.clone() as Arc<dyn ResourceAdapter>).collect()
}
