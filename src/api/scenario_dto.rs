use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::api::config_dto::ElementFailureDto;
use crate::domain::cloud::cloud::CloudRole;
use crate::domain::cloud::resource_trait::ResourceKind;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDto {
    pub flows: BTreeMap<String, Vec<StepDto>>,
    /// Flows listed here run on their own namespace instead of the shared one.
    #[serde(default)]
    pub isolated: Vec<String>,
}

/// Where the records an action works on live. Defaults to `info` / `instances`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScopeDto {
    pub data: Option<String>,
    pub resource: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "step", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StepDto {
    ReadInfo {
        cloud: CloudRole,
        kind: ResourceKind,
        #[serde(default = "default_data")]
        output: String,
        #[serde(default)]
        filters: Value,
    },
    EnsureResource {
        kind: ResourceKind,
        pointer: String,
        output_field: String,
        #[serde(default = "default_match_field")]
        match_field: String,
        #[serde(flatten)]
        scope: ScopeDto,
    },
    CreateResource {
        kind: ResourceKind,
        #[serde(default)]
        pointer: String,
        output_field: String,
        #[serde(flatten)]
        scope: ScopeDto,
    },
    WaitForStatus {
        kind: ResourceKind,
        id_field: String,
        status: String,
        poll_interval_ms: Option<u64>,
        poll_retries: Option<u32>,
        #[serde(flatten)]
        scope: ScopeDto,
    },
    TransferPayload {
        items: String,
        #[serde(flatten)]
        scope: ScopeDto,
    },
    ForEach {
        resource: String,
        /// Prefix of the loop's namespace keys; `info` when absent.
        prefix: Option<String>,
        result: Option<String>,
        #[serde(default = "default_batch")]
        batch: usize,
        element_failure: Option<ElementFailureDto>,
        body: Vec<StepDto>,
    },
    CopyVar {
        src: String,
        dst: String,
        #[serde(default = "default_deep")]
        deep: bool,
    },
    CreateReference {
        src: String,
        reference: String,
    },
    RenameInfo {
        from: String,
        to: String,
    },
}

fn default_data() -> String {
    "info".to_string()
}

fn default_match_field() -> String {
    "name".to_string()
}

fn default_batch() -> usize {
    1
}

fn default_deep() -> bool {
    true
}
