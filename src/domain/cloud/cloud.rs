use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::cloud::resource_trait::{ResourceAdapter, ResourceKind};
use crate::domain::cloud::transfer::TransferRegistry;
use crate::domain::config::{CloudConfig, FerryConfig};
use crate::error::{Error, Result};

/// Side of the migration a cloud (or an action) is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CloudRole {
    #[serde(rename = "src", alias = "source")]
    Source,
    #[serde(rename = "dst", alias = "destination")]
    Destination,
}

impl fmt::Display for CloudRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudRole::Source => write!(f, "source"),
            CloudRole::Destination => write!(f, "destination"),
        }
    }
}

/// Adapters of one cloud, one per resource kind. Resolved once when the cloud is built.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    adapters: BTreeMap<ResourceKind, Arc<dyn ResourceAdapter>>,
}

impl ResourceRegistry {
    pub fn new(adapters: Vec<Arc<dyn ResourceAdapter>>) -> Result<Self> {
        let mut registry = BTreeMap::new();
        for adapter in adapters {
            let kind = adapter.kind();
            if registry.insert(kind, adapter).is_some() {
                return Err(Error::ConfigError(format!("more than one {:?} adapter registered", kind)));
            }
        }
        Ok(Self { adapters: registry })
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn ResourceAdapter>> {
        self.adapters.get(&kind)
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.adapters.keys().copied().collect()
    }
}

#[derive(Debug)]
pub struct Cloud {
    role: CloudRole,
    config: CloudConfig,
    resources: ResourceRegistry,
}

impl Cloud {
    pub fn new(role: CloudRole, config: CloudConfig, adapters: Vec<Arc<dyn ResourceAdapter>>) -> Result<Self> {
        let resources = ResourceRegistry::new(adapters)?;
        log::debug!("{} cloud at {} exposes {:?}", role, config.host, resources.kinds());
        Ok(Cloud { role, config, resources })
    }

    pub fn role(&self) -> CloudRole {
        self.role
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn resource(&self, kind: ResourceKind) -> Result<Arc<dyn ResourceAdapter>> {
        self.resources.get(kind).cloned().ok_or(Error::ResourceNotRegistered { kind, role: self.role })
    }
}

/// Everything an action may need besides the namespace: both clouds, the run
/// configuration and the transfer drivers.
#[derive(Debug)]
pub struct InitContext {
    pub src_cloud: Arc<Cloud>,
    pub dst_cloud: Arc<Cloud>,
    pub config: Arc<FerryConfig>,
    pub transfers: TransferRegistry,
}

impl InitContext {
    pub fn new(config: FerryConfig, src_adapters: Vec<Arc<dyn ResourceAdapter>>, dst_adapters: Vec<Arc<dyn ResourceAdapter>>, transfers: TransferRegistry) -> Result<Self> {
        let src_cloud = Cloud::new(CloudRole::Source, config.src.clone(), src_adapters)?;
        let dst_cloud = Cloud::new(CloudRole::Destination, config.dst.clone(), dst_adapters)?;
        Ok(InitContext { src_cloud: Arc::new(src_cloud), dst_cloud: Arc::new(dst_cloud), config: Arc::new(config), transfers })
    }

    pub fn cloud(&self, role: CloudRole) -> &Arc<Cloud> {
        match role {
            CloudRole::Source => &self.src_cloud,
            CloudRole::Destination => &self.dst_cloud,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cloud::memory_adapter::MemoryAdapter;
    use crate::domain::config::tests::sample_config;

    #[test]
    fn test_registry_rejects_duplicate_kind() {
        let adapters: Vec<Arc<dyn ResourceAdapter>> = vec![Arc::new(MemoryAdapter::new(ResourceKind::Compute)), Arc::new(MemoryAdapter::new(ResourceKind::Compute))];

        assert!(matches!(ResourceRegistry::new(adapters), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_missing_kind_names_role() {
        let config = sample_config();
        let init = InitContext::new(config, vec![Arc::new(MemoryAdapter::new(ResourceKind::Compute))], Vec::new(), TransferRegistry::new()).unwrap();

        assert!(init.cloud(CloudRole::Source).resource(ResourceKind::Compute).is_ok());
        assert!(matches!(
            init.cloud(CloudRole::Destination).resource(ResourceKind::Image),
            Err(Error::ResourceNotRegistered { kind: ResourceKind::Image, role: CloudRole::Destination })
        ));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(serde_json::to_string(&CloudRole::Source).unwrap(), "\"src\"");
        assert_eq!(serde_json::from_str::<CloudRole>("\"destination\"").unwrap(), CloudRole::Destination);
    }
}
