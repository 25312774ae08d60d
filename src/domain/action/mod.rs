use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::cloud::cloud::{Cloud, CloudRole, InitContext};
use crate::domain::namespace::{NamespaceView, PartialUpdate};
use crate::domain::utils::id::{FlowName, NsKey};
use crate::error::Result;

pub mod iteration;
pub mod resource_actions;

/// One composable unit of migration work.
///
/// An action reads what it needs from the [`ActionContext`] and returns the
/// namespace changes it produced; it never writes the namespace itself. Actions
/// are built once per graph and may run many times inside a loop, so they keep
/// no per-run state.
#[async_trait]
pub trait Action: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Cloud this action works against, if any.
    fn cloud(&self) -> Option<CloudRole> {
        None
    }

    /// Keys that must be present before `run` is called.
    fn requires(&self) -> Vec<NsKey> {
        Vec::new()
    }

    async fn run(&self, ctx: &ActionContext) -> Result<PartialUpdate>;
}

/// Predicate selecting a branch or ending a loop.
#[async_trait]
pub trait Condition: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn requires(&self) -> Vec<NsKey> {
        Vec::new()
    }

    async fn check(&self, ctx: &ActionContext) -> Result<bool>;
}

/// What a running action can see: the namespace (read only), the init context
/// and the run's cancellation signal.
#[derive(Debug, Clone)]
pub struct ActionContext {
    flow: FlowName,
    namespace: NamespaceView,
    cancel: CancellationToken,
}

impl ActionContext {
    pub fn new(flow: FlowName, namespace: NamespaceView, cancel: CancellationToken) -> Self {
        ActionContext { flow, namespace, cancel }
    }

    pub fn flow(&self) -> &FlowName {
        &self.flow
    }

    pub fn get(&self, key: &NsKey) -> Result<Value> {
        self.namespace.get(key)
    }

    pub fn get_opt(&self, key: &NsKey) -> Result<Option<Value>> {
        self.namespace.get_opt(key)
    }

    pub fn contains(&self, key: &NsKey) -> Result<bool> {
        self.namespace.contains(key)
    }

    pub fn init(&self) -> Result<Arc<InitContext>> {
        self.namespace.init()
    }

    pub fn cloud(&self, role: CloudRole) -> Result<Arc<Cloud>> {
        Ok(self.init()?.cloud(role).clone())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
