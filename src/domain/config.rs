use std::time::Duration;

use crate::api::config_dto::{CloudConfigDto, ElementFailureDto, FerryConfigDto, SiblingPolicyDto};
use crate::domain::cloud::cloud::CloudRole;
use crate::domain::cloud::resource_trait::PollPolicy;
use crate::domain::cloud::transfer::StorageBackend;
use crate::domain::net::task::ElementFailurePolicy;
use crate::domain::scheduler::SiblingPolicy;
use crate::error::{Error, Result};
use crate::loader::parser::parse_json_file;

/// Connection parameters of one cloud. Read-only to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub tenant: String,
    pub auth_url: String,
    pub temp: String,
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrateOptions {
    pub element_failure: ElementFailurePolicy,
    pub sibling_policy: SiblingPolicy,
    pub poll: PollPolicy,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        MigrateOptions { element_failure: ElementFailurePolicy::Abort, sibling_policy: SiblingPolicy::Independent, poll: PollPolicy::default() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FerryConfig {
    pub src: CloudConfig,
    pub dst: CloudConfig,
    pub migrate: MigrateOptions,
}

impl FerryConfig {
    /// Reads and validates a JSON configuration file.
    pub fn load(file_path: &str) -> Result<Self> {
        let dto: FerryConfigDto = parse_json_file(file_path)?;
        FerryConfig::try_from(dto)
    }

    pub fn cloud(&self, role: CloudRole) -> &CloudConfig {
        match role {
            CloudRole::Source => &self.src,
            CloudRole::Destination => &self.dst,
        }
    }
}

impl TryFrom<FerryConfigDto> for FerryConfig {
    type Error = Error;

    fn try_from(dto: FerryConfigDto) -> Result<Self> {
        let src = cloud_config_from_dto(dto.src, CloudRole::Source)?;
        let dst = cloud_config_from_dto(dto.dst, CloudRole::Destination)?;

        if dto.migrate.poll_retries == 0 {
            return Err(Error::ConfigError("migrate.pollRetries must be at least 1".to_string()));
        }

        let migrate = MigrateOptions {
            element_failure: match dto.migrate.element_failure {
                ElementFailureDto::Abort => ElementFailurePolicy::Abort,
                ElementFailureDto::Skip => ElementFailurePolicy::Skip,
            },
            sibling_policy: match dto.migrate.sibling_policy {
                SiblingPolicyDto::Independent => SiblingPolicy::Independent,
                SiblingPolicyDto::CancelOnFailure => SiblingPolicy::CancelOnFailure,
            },
            poll: PollPolicy { interval: Duration::from_millis(dto.migrate.poll_interval_ms), max_attempts: dto.migrate.poll_retries },
        };

        Ok(FerryConfig { src, dst, migrate })
    }
}

fn cloud_config_from_dto(dto: CloudConfigDto, role: CloudRole) -> Result<CloudConfig> {
    if dto.host.trim().is_empty() {
        return Err(Error::ConfigError(format!("{} cloud: host must not be empty", role)));
    }
    if dto.auth_url.trim().is_empty() {
        return Err(Error::ConfigError(format!("{} cloud: authUrl must not be empty", role)));
    }

    Ok(CloudConfig {
        host: dto.host,
        user: dto.user,
        password: dto.password,
        tenant: dto.tenant,
        auth_url: dto.auth_url,
        temp: dto.temp.trim_end_matches('/').to_string(),
        backend: dto.backend,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_config() -> FerryConfig {
        let dto: FerryConfigDto = serde_json::from_value(json!({
            "src": {"host": "10.0.0.1", "user": "admin", "password": "secret", "tenant": "admin", "authUrl": "http://10.0.0.1:8080/client/api", "backend": "ceph"},
            "dst": {"host": "10.0.0.2", "user": "admin", "password": "secret", "tenant": "admin", "authUrl": "http://10.0.0.2:5000/v2.0", "temp": "/root/temp/"}
        }))
        .unwrap();
        FerryConfig::try_from(dto).unwrap()
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = sample_config();

        assert_eq!(config.src.temp, "/tmp");
        assert_eq!(config.dst.temp, "/root/temp");
        assert_eq!(config.src.backend, StorageBackend::Ceph);
        assert_eq!(config.dst.backend, StorageBackend::Iscsi);
        assert_eq!(config.migrate.poll, PollPolicy { interval: Duration::from_secs(2), max_attempts: 90 });
        assert_eq!(config.migrate.element_failure, ElementFailurePolicy::Abort);
        assert_eq!(config.migrate.sibling_policy, SiblingPolicy::Independent);
    }

    #[test]
    fn test_migrate_section_is_mapped() {
        let dto: FerryConfigDto = serde_json::from_value(json!({
            "src": {"host": "a", "user": "u", "password": "p", "tenant": "t", "authUrl": "http://a"},
            "dst": {"host": "b", "user": "u", "password": "p", "tenant": "t", "authUrl": "http://b"},
            "migrate": {"elementFailure": "skip", "siblingPolicy": "cancelOnFailure", "pollIntervalMs": 10, "pollRetries": 3}
        }))
        .unwrap();
        let config = FerryConfig::try_from(dto).unwrap();

        assert_eq!(config.migrate.element_failure, ElementFailurePolicy::Skip);
        assert_eq!(config.migrate.sibling_policy, SiblingPolicy::CancelOnFailure);
        assert_eq!(config.migrate.poll, PollPolicy { interval: Duration::from_millis(10), max_attempts: 3 });
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let dto: FerryConfigDto = serde_json::from_value(json!({
            "src": {"host": " ", "user": "u", "password": "p", "tenant": "t", "authUrl": "http://a"},
            "dst": {"host": "b", "user": "u", "password": "p", "tenant": "t", "authUrl": "http://b"}
        }))
        .unwrap();

        assert!(matches!(FerryConfig::try_from(dto), Err(Error::ConfigError(msg)) if msg.contains("source")));
    }

    #[test]
    fn test_zero_poll_retries_is_rejected() {
        let dto: FerryConfigDto = serde_json::from_value(json!({
            "src": {"host": "a", "user": "u", "password": "p", "tenant": "t", "authUrl": "http://a"},
            "dst": {"host": "b", "user": "u", "password": "p", "tenant": "t", "authUrl": "http://b"},
            "migrate": {"pollRetries": 0}
        }))
        .unwrap();

        assert!(matches!(FerryConfig::try_from(dto), Err(Error::ConfigError(_))));
    }
}
