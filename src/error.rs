use thiserror::Error;

use crate::domain::cloud::cloud::CloudRole;
use crate::domain::cloud::resource_trait::ResourceKind;
use crate::domain::namespace::PartialUpdate;
use crate::domain::utils::id::{FlowName, NsKey};

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON document: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A cloud adapter call failed (4xx/5xx equivalent or malformed answer).
    #[error("Remote operation '{operation}' failed: {reason}")]
    RemoteOperationFailed { operation: String, reason: String },

    /// A poll loop exhausted its budget before the resource reached the target status.
    #[error("Resource {resource_id} did not reach status '{target_status}' after {attempts} attempts (last status: '{last_status}')")]
    TimeoutExceeded { resource_id: String, last_status: String, target_status: String, attempts: u32 },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Transfer from {source_locator} to {destination_locator} failed: {reason}")]
    TransferError { source_locator: String, destination_locator: String, reason: String },

    /// Composition-time failure, raised before any action is executed.
    #[error("Failed to build task graph: {0}")]
    GraphConstructionError(String),

    #[error("Namespace key {0} not found")]
    KeyNotFound(NsKey),

    #[error("Namespace key {key} does not hold {expected}")]
    UnexpectedValue { key: NsKey, expected: &'static str },

    /// A single record lacks a field the action needs.
    #[error("Record {record} is invalid: {reason}")]
    InvalidRecord { record: String, reason: String },

    #[error("No {kind:?} adapter registered for the {role} cloud")]
    ResourceNotRegistered { kind: ResourceKind, role: CloudRole },

    #[error("Migration run was cancelled")]
    Cancelled,

    #[error("Namespace lock poisoned")]
    NamespacePoisoned,

    #[error("Flow {flow} failed at step '{step}' (element: {}): {source}", element_label(.element))]
    FlowFailed { flow: FlowName, step: String, element: Option<String>, source: Box<Error> },

    /// A step failed part way through its records. `applied` describes the
    /// remote changes it made before the failure.
    #[error("{source} (after partial progress)")]
    Interrupted { applied: Box<PartialUpdate>, source: Box<Error> },

    #[error("Flow task could not be joined: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Whether a failure inside a loop body may be isolated to the current element.
    ///
    /// Namespace shape errors are not: the loop would hit them again on the next element.
    pub fn is_element_recoverable(&self) -> bool {
        if let Error::Interrupted { source, .. } = self {
            return source.is_element_recoverable();
        }
        !matches!(
            self,
            Error::Cancelled
                | Error::GraphConstructionError(_)
                | Error::NamespacePoisoned
                | Error::ConfigError(_)
                | Error::KeyNotFound(_)
                | Error::UnexpectedValue { .. }
        )
    }

    /// Unwraps `FlowFailed` and `Interrupted` down to the error raised by the action itself.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::FlowFailed { source, .. } | Error::Interrupted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn element_label(element: &Option<String>) -> &str {
    element.as_deref().unwrap_or("-")
}

pub type Result<T> = std::result::Result<T, Error>;
