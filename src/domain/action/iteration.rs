//! Primitives that turn a collection in the namespace into a loop over its
//! elements, and [`for_each`] which wires them around a per-element pipeline.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::action::{Action, ActionContext, Condition};
use crate::domain::namespace::PartialUpdate;
use crate::domain::net::task::{ElementFailurePolicy, LoopOptions, Task};
use crate::domain::utils::id::NsKey;
use crate::domain::utils::records;
use crate::error::{Error, Result};

/// Namespace keys used by one `for_each` loop.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationKeys {
    /// Resource type inside the collection, e.g. `instances`.
    pub resource: String,
    pub source: NsKey,
    pub backup: NsKey,
    pub iter: NsKey,
    pub element: NsKey,
    pub element_id: NsKey,
    pub accumulator: NsKey,
    pub result: NsKey,
    pub failures: NsKey,
    /// Elements handed to the pipeline per round.
    pub batch: usize,
    /// Keep what the accumulator already holds instead of starting empty.
    pub accumulate: bool,
}

impl IterationKeys {
    pub fn new(resource: impl Into<String>) -> Self {
        IterationKeys {
            resource: resource.into(),
            source: NsKey::new("info"),
            backup: NsKey::new("info_backup"),
            iter: NsKey::new("info_iter"),
            element: NsKey::new("info"),
            element_id: NsKey::new("info_element_id"),
            accumulator: NsKey::new("info_result"),
            result: NsKey::new("info"),
            failures: NsKey::new("info_failures"),
            batch: 1,
            accumulate: false,
        }
    }

    /// Derives every key from one prefix: `<prefix>`, `<prefix>_backup`, `<prefix>_iter`, ...
    pub fn prefixed(resource: impl Into<String>, prefix: &str) -> Self {
        IterationKeys {
            source: NsKey::new(prefix),
            backup: NsKey::new(format!("{}_backup", prefix)),
            iter: NsKey::new(format!("{}_iter", prefix)),
            element: NsKey::new(prefix),
            element_id: NsKey::new(format!("{}_element_id", prefix)),
            accumulator: NsKey::new(format!("{}_result", prefix)),
            result: NsKey::new(prefix),
            failures: NsKey::new(format!("{}_failures", prefix)),
            ..Self::new(resource)
        }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    pub fn with_result(mut self, result: impl Into<NsKey>) -> Self {
        self.result = result.into();
        self
    }

    pub fn with_accumulator(mut self, accumulator: impl Into<NsKey>) -> Self {
        self.accumulator = accumulator.into();
        self
    }

    /// Merges into an accumulator seeded before the loop (e.g. by the run)
    /// rather than a fresh one. Only sound for a loop that runs once per flow.
    pub fn accumulating(mut self) -> Self {
        self.accumulate = true;
        self
    }
}

/// Copies `src` to `dst`: an independent snapshot when `deep`, otherwise a
/// shallow copy sharing the live value.
#[derive(Debug, Clone)]
pub struct CopyVar {
    src: NsKey,
    dst: NsKey,
    deep: bool,
}

impl CopyVar {
    pub fn new(src: impl Into<NsKey>, dst: impl Into<NsKey>, deep: bool) -> Self {
        CopyVar { src: src.into(), dst: dst.into(), deep }
    }
}

#[async_trait]
impl Action for CopyVar {
    fn name(&self) -> &str {
        "copy_var"
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.src.clone()]
    }

    async fn run(&self, _ctx: &ActionContext) -> Result<PartialUpdate> {
        let update = PartialUpdate::new();
        Ok(if self.deep { update.snapshot(self.dst.clone(), self.src.clone()) } else { update.alias(self.dst.clone(), self.src.clone()) })
    }
}

/// Binds `reference` to the live value of `src`; draining one drains the other.
#[derive(Debug, Clone)]
pub struct CreateReference {
    src: NsKey,
    reference: NsKey,
}

impl CreateReference {
    pub fn new(src: impl Into<NsKey>, reference: impl Into<NsKey>) -> Self {
        CreateReference { src: src.into(), reference: reference.into() }
    }
}

#[async_trait]
impl Action for CreateReference {
    fn name(&self) -> &str {
        "create_reference"
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.src.clone()]
    }

    async fn run(&self, _ctx: &ActionContext) -> Result<PartialUpdate> {
        Ok(PartialUpdate::new().alias(self.reference.clone(), self.src.clone()))
    }
}

/// Binds `key` to a new value, leaving aliases of its old value untouched.
#[derive(Debug, Clone)]
pub struct SetVar {
    key: NsKey,
    value: Value,
}

impl SetVar {
    pub fn new(key: impl Into<NsKey>, value: Value) -> Self {
        SetVar { key: key.into(), value }
    }
}

#[async_trait]
impl Action for SetVar {
    fn name(&self) -> &str {
        "set_var"
    }

    async fn run(&self, _ctx: &ActionContext) -> Result<PartialUpdate> {
        Ok(PartialUpdate::new().set(self.key.clone(), self.value.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct SetDefault {
    key: NsKey,
    value: Value,
}

impl SetDefault {
    pub fn new(key: impl Into<NsKey>, value: Value) -> Self {
        SetDefault { key: key.into(), value }
    }
}

#[async_trait]
impl Action for SetDefault {
    fn name(&self) -> &str {
        "set_default"
    }

    async fn run(&self, _ctx: &ActionContext) -> Result<PartialUpdate> {
        Ok(PartialUpdate::new().set_default(self.key.clone(), self.value.clone()))
    }
}

/// Takes the next element (or batch) off the iterator collection.
///
/// The removal is written through, so every alias of the collection shrinks.
/// The taken records are exposed under `element` as `{resource: {id: record}}`
/// and their id under `element_id` (an array of ids when the batch is larger
/// than one).
#[derive(Debug, Clone)]
pub struct GetInfoIter {
    iter: NsKey,
    element: NsKey,
    element_id: NsKey,
    resource: String,
    batch: usize,
}

impl GetInfoIter {
    pub fn new(keys: &IterationKeys) -> Self {
        GetInfoIter {
            iter: keys.iter.clone(),
            element: keys.element.clone(),
            element_id: keys.element_id.clone(),
            resource: keys.resource.clone(),
            batch: keys.batch.max(1),
        }
    }
}

#[async_trait]
impl Action for GetInfoIter {
    fn name(&self) -> &str {
        "get_info_iter"
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.iter.clone()]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<PartialUpdate> {
        let collection = ctx.get(&self.iter)?;
        let (taken, remaining) = records::split_first(&self.iter, &collection, &self.resource, self.batch)?;
        if taken.is_empty() {
            return Err(Error::UnexpectedValue { key: self.iter.clone(), expected: "a non-empty collection" });
        }

        let ids: Vec<Value> = taken.iter().map(|(id, _)| Value::String(id.clone())).collect();
        let element_id = match (self.batch, ids.as_slice()) {
            (1, [single]) => single.clone(),
            _ => Value::Array(ids),
        };
        log::debug!("Took {} from {} ({} {} left)", element_id, self.iter, records::len(&self.iter, &remaining, &self.resource)?, self.resource);

        Ok(PartialUpdate::new()
            .write_through(self.iter.clone(), remaining)
            .set(self.element.clone(), records::wrap(&self.resource, taken))
            .set(self.element_id.clone(), element_id))
    }
}

/// True once the iterator collection holds no more records of its resource type.
#[derive(Debug, Clone)]
pub struct IsEndIter {
    iter: NsKey,
    resource: String,
}

impl IsEndIter {
    pub fn new(keys: &IterationKeys) -> Self {
        IsEndIter { iter: keys.iter.clone(), resource: keys.resource.clone() }
    }
}

#[async_trait]
impl Condition for IsEndIter {
    fn name(&self) -> &str {
        "is_end_iter"
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.iter.clone()]
    }

    async fn check(&self, ctx: &ActionContext) -> Result<bool> {
        let collection = ctx.get(&self.iter)?;
        Ok(records::len(&self.iter, &collection, &self.resource)? == 0)
    }
}

/// Folds the records under `data` into the accumulator, keyed by id.
///
/// Existing ids of other elements are kept; a record with the same id replaces
/// the previous one. The accumulator is updated in place and, when `result`
/// differs from it, also published under `result`.
#[derive(Debug, Clone)]
pub struct Merge {
    data: NsKey,
    accumulator: NsKey,
    result: NsKey,
    resource: String,
}

impl Merge {
    pub fn new(data: impl Into<NsKey>, accumulator: impl Into<NsKey>, resource: impl Into<String>) -> Self {
        let accumulator = accumulator.into();
        Merge { data: data.into(), result: accumulator.clone(), accumulator, resource: resource.into() }
    }

    pub fn publish_as(mut self, result: impl Into<NsKey>) -> Self {
        self.result = result.into();
        self
    }
}

#[async_trait]
impl Action for Merge {
    fn name(&self) -> &str {
        "merge"
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.data.clone(), self.accumulator.clone()]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<PartialUpdate> {
        let data = ctx.get(&self.data)?;
        let accumulator = ctx.get(&self.accumulator)?;

        let mut merged: Map<String, Value> = records::entries(&self.accumulator, &accumulator, &self.resource)?.into_iter().collect();
        merged.extend(records::entries(&self.data, &data, &self.resource)?);

        let mut outer = accumulator.as_object().cloned().unwrap_or_default();
        outer.insert(self.resource.clone(), Value::Object(merged));

        let update = PartialUpdate::new().write_through(self.accumulator.clone(), Value::Object(outer));
        Ok(if self.result != self.accumulator { update.alias(self.result.clone(), self.accumulator.clone()) } else { update })
    }
}

/// Publishes the value of `from` under `to`.
#[derive(Debug, Clone)]
pub struct RenameInfo {
    from: NsKey,
    to: NsKey,
}

impl RenameInfo {
    pub fn new(from: impl Into<NsKey>, to: impl Into<NsKey>) -> Self {
        RenameInfo { from: from.into(), to: to.into() }
    }
}

#[async_trait]
impl Action for RenameInfo {
    fn name(&self) -> &str {
        "rename_info"
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.from.clone()]
    }

    async fn run(&self, _ctx: &ActionContext) -> Result<PartialUpdate> {
        Ok(PartialUpdate::new().alias(self.to.clone(), self.from.clone()))
    }
}

/// Runs `pipeline` once per record of `keys.source`, merging each element's
/// output into the accumulator and publishing it under `keys.result` at the end.
///
/// Every start of the loop binds a fresh empty accumulator, so a nested loop
/// publishes only the records of the current outer element. With
/// [`IterationKeys::accumulating`] an existing accumulator is kept instead.
/// The source collection is backed up before the loop drains it through the
/// iterator reference.
pub fn for_each(keys: &IterationKeys, pipeline: impl Into<Task>, policy: ElementFailurePolicy) -> Task {
    let body = Task::step(GetInfoIter::new(keys)) >> pipeline.into() >> Merge::new(keys.element.clone(), keys.accumulator.clone(), keys.resource.clone());
    let options = LoopOptions { policy, element_id: Some(keys.element_id.clone()), failures: Some(keys.failures.clone()) };
    let seed = records::empty(&keys.resource);
    let init = if keys.accumulate { Task::step(SetDefault::new(keys.accumulator.clone(), seed)) } else { Task::step(SetVar::new(keys.accumulator.clone(), seed)) };

    init >> CopyVar::new(keys.source.clone(), keys.backup.clone(), true)
        >> CreateReference::new(keys.source.clone(), keys.iter.clone())
        >> Task::repeat_until(IsEndIter::new(keys), body).with_loop_options(options)
        >> RenameInfo::new(keys.accumulator.clone(), keys.result.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::namespace::Namespace;
    use crate::domain::utils::id::FlowName;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn ctx(ns: &Namespace) -> ActionContext {
        ActionContext::new(FlowName::new("test"), ns.view(), CancellationToken::new())
    }

    async fn run(ns: &Namespace, action: &dyn Action) {
        let update = action.run(&ctx(ns)).await.unwrap();
        ns.merge(update).unwrap();
    }

    fn key(name: &str) -> NsKey {
        NsKey::new(name)
    }

    #[tokio::test]
    async fn test_get_info_iter_drains_through_reference() {
        let keys = IterationKeys::new("instances");
        let ns = Namespace::new();
        ns.set("info", json!({"instances": {"vm1": {"name": "a"}, "vm2": {"name": "b"}}})).unwrap();
        run(&ns, &CreateReference::new("info", "info_iter")).await;

        run(&ns, &GetInfoIter::new(&keys)).await;

        assert_eq!(ns.get(&key("info")).unwrap(), json!({"instances": {"vm1": {"name": "a"}}}));
        assert_eq!(ns.get(&key("info_element_id")).unwrap(), json!("vm1"));
        assert_eq!(ns.get(&key("info_iter")).unwrap(), json!({"instances": {"vm2": {"name": "b"}}}));
    }

    #[tokio::test]
    async fn test_get_info_iter_batches() {
        let keys = IterationKeys::new("volumes").with_batch(2);
        let ns = Namespace::new();
        ns.set("info_iter", json!({"volumes": {"v1": {}, "v2": {}, "v3": {}}})).unwrap();

        run(&ns, &GetInfoIter::new(&keys)).await;

        assert_eq!(ns.get(&key("info_element_id")).unwrap(), json!(["v1", "v2"]));
        assert_eq!(ns.get(&key("info_iter")).unwrap(), json!({"volumes": {"v3": {}}}));
    }

    #[tokio::test]
    async fn test_get_info_iter_on_empty_collection_fails() {
        let keys = IterationKeys::new("instances");
        let ns = Namespace::new();
        ns.set("info_iter", json!({"instances": {}})).unwrap();

        let result = GetInfoIter::new(&keys).run(&ctx(&ns)).await;
        assert!(matches!(result, Err(Error::UnexpectedValue { .. })));
    }

    #[tokio::test]
    async fn test_is_end_iter() {
        let keys = IterationKeys::new("instances");
        let ns = Namespace::new();
        let condition = IsEndIter::new(&keys);

        ns.set("info_iter", json!({"instances": {"vm1": {}}})).unwrap();
        assert!(!condition.check(&ctx(&ns)).await.unwrap());

        ns.set("info_iter", json!({})).unwrap();
        assert!(condition.check(&ctx(&ns)).await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_keeps_sibling_entries() {
        let ns = Namespace::new();
        ns.set("info_result", json!({"instances": {"vm1": {"ok": true}}})).unwrap();
        ns.set("info", json!({"instances": {"vm2": {"ok": true}}})).unwrap();

        run(&ns, &Merge::new("info", "info_result", "instances")).await;

        assert_eq!(ns.get(&key("info_result")).unwrap(), json!({"instances": {"vm1": {"ok": true}, "vm2": {"ok": true}}}));
    }

    #[tokio::test]
    async fn test_merge_publishes_result_alias() {
        let ns = Namespace::new();
        ns.set("acc", json!({})).unwrap();
        ns.set("info", json!({"images": {"img": {}}})).unwrap();

        run(&ns, &Merge::new("info", "acc", "images").publish_as("images_done")).await;

        assert!(ns.shares_storage(&key("acc"), &key("images_done")).unwrap());
        assert_eq!(ns.get(&key("images_done")).unwrap(), json!({"images": {"img": {}}}));
    }

    #[tokio::test]
    async fn test_copy_var_deep_and_shallow() {
        let ns = Namespace::new();
        ns.set("info", json!({"instances": {"vm1": {}}})).unwrap();

        run(&ns, &CopyVar::new("info", "deep", true)).await;
        run(&ns, &CopyVar::new("info", "shallow", false)).await;
        ns.merge(PartialUpdate::new().write_through("info", json!({"instances": {}}))).unwrap();

        assert_eq!(ns.get(&key("deep")).unwrap(), json!({"instances": {"vm1": {}}}));
        assert_eq!(ns.get(&key("shallow")).unwrap(), json!({"instances": {}}));
    }

    #[tokio::test]
    async fn test_set_default_and_rename() {
        let ns = Namespace::new();
        run(&ns, &SetDefault::new("info_result", records::empty("instances"))).await;
        run(&ns, &RenameInfo::new("info_result", "info")).await;

        assert_eq!(ns.get(&key("info")).unwrap(), json!({"instances": {}}));
        assert!(ns.shares_storage(&key("info"), &key("info_result")).unwrap());
    }

    #[tokio::test]
    async fn test_set_var_rebinds_without_touching_aliases() {
        let ns = Namespace::new();
        ns.set("vol_result", json!({"volumes": {"v1": {}}})).unwrap();
        run(&ns, &RenameInfo::new("vol_result", "vol_done")).await;

        run(&ns, &SetVar::new("vol_result", records::empty("volumes"))).await;

        assert_eq!(ns.get(&key("vol_result")).unwrap(), json!({"volumes": {}}));
        assert_eq!(ns.get(&key("vol_done")).unwrap(), json!({"volumes": {"v1": {}}}));
    }

    #[test]
    fn test_prefixed_keys() {
        let keys = IterationKeys::prefixed("volumes", "vol");
        assert_eq!(keys.iter, key("vol_iter"));
        assert_eq!(keys.accumulator, key("vol_result"));
        assert_eq!(keys.resource, "volumes");
    }
}
