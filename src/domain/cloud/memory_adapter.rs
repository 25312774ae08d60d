//! In-memory stand-ins for cloud adapters and transfer drivers, used by the
//! `simulate` command and by tests.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::domain::cloud::resource_trait::{ResourceAdapter, ResourceKind, matches_filters};
use crate::domain::cloud::transfer::{Locator, TransferDriver};
use crate::error::{Error, Result};

pub const STATUS_BUILDING: &str = "build";
pub const STATUS_ACTIVE: &str = "active";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A resource kind of a fake cloud.
///
/// Created resources start in `build` and switch to `active` once their status
/// has been polled `settle_after` times (immediately when it is 0).
#[derive(Debug)]
pub struct MemoryAdapter {
    kind: ResourceKind,
    records: Mutex<Map<String, Value>>,
    settle_after: u32,
    polls: Mutex<HashMap<String, u32>>,
    /// (field, value) pairs; a create spec carrying one of them fails.
    reject: Vec<(String, Value)>,
}

impl MemoryAdapter {
    pub fn new(kind: ResourceKind) -> Self {
        Self::with_records(kind, Map::new())
    }

    pub fn with_records(kind: ResourceKind, records: Map<String, Value>) -> Self {
        MemoryAdapter { kind, records: Mutex::new(records), settle_after: 0, polls: Mutex::new(HashMap::new()), reject: Vec::new() }
    }

    pub fn settle_after(mut self, polls: u32) -> Self {
        self.settle_after = polls;
        self
    }

    /// Makes `create` fail with `RemoteOperationFailed` for specs whose `field` equals `value`.
    pub fn reject_create(mut self, field: impl Into<String>, value: Value) -> Self {
        self.reject.push((field.into(), value));
        self
    }

    pub fn records(&self) -> Map<String, Value> {
        lock(&self.records).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResourceAdapter for MemoryAdapter {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn read_info(&self, filters: &Value) -> Result<Map<String, Value>> {
        Ok(lock(&self.records).iter().filter(|(_, record)| matches_filters(record, filters)).map(|(id, record)| (id.clone(), record.clone())).collect())
    }

    async fn create(&self, spec: &Value) -> Result<String> {
        if let Some((field, value)) = self.reject.iter().find(|(field, value)| spec.get(field) == Some(value)) {
            return Err(Error::RemoteOperationFailed {
                operation: format!("create {:?}", self.kind),
                reason: format!("rejected spec with {} = {}", field, value),
            });
        }

        let id = Uuid::new_v4().to_string();
        let mut record = spec.as_object().cloned().unwrap_or_default();
        record.insert("id".to_string(), Value::String(id.clone()));
        let status = if self.settle_after == 0 { STATUS_ACTIVE } else { STATUS_BUILDING };
        record.insert("status".to_string(), Value::String(status.to_string()));

        lock(&self.records).insert(id.clone(), Value::Object(record));
        log::debug!("Created {:?} resource {}", self.kind, id);
        Ok(id)
    }

    async fn status(&self, id: &str) -> Result<String> {
        let polls = {
            let mut polls = lock(&self.polls);
            let counter = polls.entry(id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        let mut records = lock(&self.records);
        let record = records.get_mut(id).ok_or_else(|| Error::ResourceNotFound(format!("{:?} resource {}", self.kind, id)))?;

        if self.settle_after > 0 && polls >= self.settle_after {
            if let Some(fields) = record.as_object_mut() {
                fields.insert("status".to_string(), Value::String(STATUS_ACTIVE.to_string()));
            }
        }

        Ok(record.get("status").and_then(Value::as_str).unwrap_or(STATUS_ACTIVE).to_string())
    }
}

/// Transfer driver that only records what it was asked to move.
#[derive(Debug)]
pub struct RecordingTransfer {
    name: String,
    transfers: Mutex<Vec<(Locator, Locator)>>,
    /// Source paths starting with this prefix are refused.
    refused: Option<String>,
}

impl RecordingTransfer {
    pub fn new(name: impl Into<String>) -> Self {
        RecordingTransfer { name: name.into(), transfers: Mutex::new(Vec::new()), refused: None }
    }

    /// Fails every transfer whose source path starts with `prefix`.
    pub fn refusing(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        RecordingTransfer { refused: Some(prefix.into()), ..Self::new(name) }
    }

    pub fn transfers(&self) -> Vec<(Locator, Locator)> {
        lock(&self.transfers).clone()
    }
}

#[async_trait]
impl TransferDriver for RecordingTransfer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transfer(&self, source: &Locator, destination: &Locator) -> Result<()> {
        if self.refused.as_deref().is_some_and(|prefix| source.path.starts_with(prefix)) {
            return Err(Error::TransferError {
                source_locator: source.to_string(),
                destination_locator: destination.to_string(),
                reason: format!("{} refused the transfer", self.name),
            });
        }
        lock(&self.transfers).push((source.clone(), destination.clone()));
        Ok(())
    }
}
