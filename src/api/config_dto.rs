use serde::{Deserialize, Serialize};

use crate::domain::cloud::transfer::StorageBackend;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FerryConfigDto {
    pub src: CloudConfigDto,
    pub dst: CloudConfigDto,
    #[serde(default)]
    pub migrate: MigrateConfigDto,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfigDto {
    pub host: String,
    pub user: String,
    pub password: String,
    pub tenant: String,
    pub auth_url: String,
    /// Scratch directory on the cloud's host used for disk payloads.
    #[serde(default = "default_temp")]
    pub temp: String,
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MigrateConfigDto {
    #[serde(default)]
    pub element_failure: ElementFailureDto,
    #[serde(default)]
    pub sibling_policy: SiblingPolicyDto,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_retries")]
    pub poll_retries: u32,
}

impl Default for MigrateConfigDto {
    fn default() -> Self {
        MigrateConfigDto {
            element_failure: ElementFailureDto::default(),
            sibling_policy: SiblingPolicyDto::default(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_retries: default_poll_retries(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ElementFailureDto {
    #[default]
    Abort,
    Skip,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SiblingPolicyDto {
    #[default]
    Independent,
    CancelOnFailure,
}

fn default_temp() -> String {
    "/tmp".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_poll_retries() -> u32 {
    90
}
