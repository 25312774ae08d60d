use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Resource kinds a cloud can expose. Every [`Cloud`](super::cloud::Cloud) maps
/// each kind to at most one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Compute,
    Flavor,
    Image,
    Storage,
    Network,
    Identity,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] =
        [ResourceKind::Compute, ResourceKind::Flavor, ResourceKind::Image, ResourceKind::Storage, ResourceKind::Network, ResourceKind::Identity];

    /// Name of the collection holding records of this kind in the namespace.
    pub fn collection_name(&self) -> &'static str {
        match self {
            ResourceKind::Compute => "instances",
            ResourceKind::Flavor => "flavors",
            ResourceKind::Image => "images",
            ResourceKind::Storage => "volumes",
            ResourceKind::Network => "networks",
            ResourceKind::Identity => "tenants",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "compute" => Ok(ResourceKind::Compute),
            "flavor" => Ok(ResourceKind::Flavor),
            "image" => Ok(ResourceKind::Image),
            "storage" => Ok(ResourceKind::Storage),
            "network" => Ok(ResourceKind::Network),
            "identity" => Ok(ResourceKind::Identity),
            other => Err(Error::ConfigError(format!("unknown resource kind '{}'", other))),
        }
    }
}

/// Capability set of one resource kind on one platform.
///
/// Implementations wrap the platform's REST or CLI calls; failures of those calls
/// are reported as [`Error::RemoteOperationFailed`].
#[async_trait]
pub trait ResourceAdapter: Debug + Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Records matching every field of `filters` (an object; `null` matches all), keyed by id.
    async fn read_info(&self, filters: &Value) -> Result<Map<String, Value>>;

    /// Creates a resource from `spec` and returns its id.
    async fn create(&self, spec: &Value) -> Result<String>;

    /// Current status of the resource.
    async fn status(&self, id: &str) -> Result<String>;
}

/// Fixed-interval poll budget for status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy { interval: Duration::from_secs(2), max_attempts: 90 }
    }
}

/// Polls `adapter.status(id)` until it equals `target` (ignoring case).
///
/// Sleeps `poll.interval` between attempts and gives up after
/// `poll.max_attempts` observations with [`Error::TimeoutExceeded`]. The sleep
/// races the cancellation token.
pub async fn wait_for_status(adapter: &dyn ResourceAdapter, id: &str, target: &str, poll: PollPolicy, cancel: &CancellationToken) -> Result<()> {
    let mut last_status = String::new();

    for attempt in 1..=poll.max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        last_status = adapter.status(id).await?;
        if last_status.eq_ignore_ascii_case(target) {
            log::debug!("{:?} resource {} reached status '{}' after {} attempt(s).", adapter.kind(), id, target, attempt);
            return Ok(());
        }

        if attempt < poll.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(poll.interval) => {}
            }
        }
    }

    Err(Error::TimeoutExceeded {
        resource_id: id.to_string(),
        last_status: last_status.to_lowercase(),
        target_status: target.to_lowercase(),
        attempts: poll.max_attempts,
    })
}

/// Returns true when every field of `filters` equals the record's field.
pub fn matches_filters(record: &Value, filters: &Value) -> bool {
    match filters.as_object() {
        Some(fields) => fields.iter().all(|(field, expected)| record.get(field) == Some(expected)),
        None => true,
    }
}
