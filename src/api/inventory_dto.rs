use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Initial content of the in-memory clouds used by `simulate`.
///
/// Resource kinds are given by name (`compute`, `flavor`, ...), records by id.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InventoryDto {
    #[serde(default)]
    pub src: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub dst: BTreeMap<String, Map<String, Value>>,
    /// Status polls a created destination resource needs before it is active.
    #[serde(default)]
    pub settle_after: u32,
}
