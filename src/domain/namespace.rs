use serde_json::{Map, Value};
use slotmap::{SlotMap, new_key_type};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::cloud::cloud::InitContext;
use crate::domain::utils::id::NsKey;
use crate::error::{Error, Result};

new_key_type! {
    pub struct SlotId;
}

/// Key under which the original tool stored the cloud handles and config. Kept as
/// the name reported when the init context is requested but was never seeded.
pub const INIT_TASK: &str = "__init_task__";

/// One change produced by an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Bind the key to a fresh slot holding the value. Aliases of the old slot are untouched.
    Set(Value),
    /// Replace the value inside the slot the key is bound to, visible through every alias.
    WriteThrough(Value),
    /// Bind the key to the live slot of another key.
    Alias(NsKey),
    /// Bind the key to a fresh slot holding an independent copy of another key's value.
    Snapshot(NsKey),
    /// Bind the key to a fresh slot only if it is not bound yet.
    SetDefault(Value),
}

/// Ordered set of namespace changes returned by an action.
///
/// Actions never touch the namespace themselves; the scheduler applies the
/// update with [`Namespace::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialUpdate {
    entries: Vec<(NsKey, Update)>,
}

impl PartialUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<NsKey>, update: Update) {
        self.entries.push((key.into(), update));
    }

    pub fn set(mut self, key: impl Into<NsKey>, value: Value) -> Self {
        self.push(key, Update::Set(value));
        self
    }

    pub fn write_through(mut self, key: impl Into<NsKey>, value: Value) -> Self {
        self.push(key, Update::WriteThrough(value));
        self
    }

    pub fn alias(mut self, key: impl Into<NsKey>, source: impl Into<NsKey>) -> Self {
        self.push(key, Update::Alias(source.into()));
        self
    }

    pub fn snapshot(mut self, key: impl Into<NsKey>, source: impl Into<NsKey>) -> Self {
        self.push(key, Update::Snapshot(source.into()));
        self
    }

    pub fn set_default(mut self, key: impl Into<NsKey>, value: Value) -> Self {
        self.push(key, Update::SetDefault(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(NsKey, Update)> {
        self.entries.iter()
    }

    /// Keys written by this update, in order.
    pub fn keys(&self) -> impl Iterator<Item = &NsKey> {
        self.entries.iter().map(|(key, _)| key)
    }
}

impl Extend<(NsKey, Update)> for PartialUpdate {
    fn extend<I: IntoIterator<Item = (NsKey, Update)>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl IntoIterator for PartialUpdate {
    type Item = (NsKey, Update);
    type IntoIter = std::vec::IntoIter<(NsKey, Update)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Debug, Default)]
struct NamespaceInner {
    /// Value storage.
    slots: SlotMap<SlotId, Value>,

    /// Key lookup. Several keys may point at the same slot.
    index: HashMap<NsKey, SlotId>,
}

impl NamespaceInner {
    fn bind_fresh(&mut self, key: NsKey, value: Value) {
        let slot = self.slots.insert(value);
        self.bind(key, slot);
    }

    fn bind(&mut self, key: NsKey, slot: SlotId) {
        if let Some(previous) = self.index.insert(key, slot) {
            if previous != slot {
                self.release(previous);
            }
        }
    }

    /// Drops a slot once no key refers to it anymore.
    fn release(&mut self, slot: SlotId) {
        if !self.index.values().any(|bound| *bound == slot) {
            self.slots.remove(slot);
        }
    }

    fn slot_of(&self, key: &NsKey) -> Result<SlotId> {
        self.index.get(key).copied().ok_or_else(|| Error::KeyNotFound(key.clone()))
    }

    fn apply(&mut self, key: NsKey, update: Update) -> Result<()> {
        match update {
            Update::Set(value) => self.bind_fresh(key, value),
            Update::WriteThrough(value) => match self.index.get(&key).copied() {
                Some(slot) => {
                    if let Some(stored) = self.slots.get_mut(slot) {
                        *stored = value;
                    }
                }
                None => self.bind_fresh(key, value),
            },
            Update::Alias(source) => {
                let slot = self.slot_of(&source)?;
                self.bind(key, slot);
            }
            Update::Snapshot(source) => {
                let slot = self.slot_of(&source)?;
                let copy = self.slots.get(slot).cloned().unwrap_or(Value::Null);
                self.bind_fresh(key, copy);
            }
            Update::SetDefault(value) => {
                if !self.index.contains_key(&key) {
                    self.bind_fresh(key, value);
                }
            }
        }
        Ok(())
    }
}

/// Shared key/value state of one migration run.
///
/// Cloning the handle shares the store. Every key maps to a slot in an arena;
/// aliasing keys share a slot, so draining a collection through one key is seen
/// through all of its references while snapshots stay untouched.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    inner: Arc<RwLock<NamespaceInner>>,
    init: Option<Arc<InitContext>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A namespace seeded with the run's cloud handles and config.
    pub fn with_init(init: Arc<InitContext>) -> Self {
        Self { inner: Arc::default(), init: Some(init) }
    }

    /// A namespace seeded with the init context and one empty result
    /// accumulator per resource type under `result_key`.
    pub fn seeded(init: Arc<InitContext>, result_key: impl Into<NsKey>, resource_types: &[&str]) -> Result<Self> {
        let namespace = Self::with_init(init);
        let accumulator: Map<String, Value> = resource_types.iter().map(|resource| (resource.to_string(), Value::Object(Map::new()))).collect();
        namespace.set(result_key, Value::Object(accumulator))?;
        Ok(namespace)
    }

    pub fn init(&self) -> Result<Arc<InitContext>> {
        self.init.clone().ok_or_else(|| Error::KeyNotFound(NsKey::new(INIT_TASK)))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, NamespaceInner>> {
        self.inner.read().map_err(|_| Error::NamespacePoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, NamespaceInner>> {
        self.inner.write().map_err(|_| Error::NamespacePoisoned)
    }

    pub fn get(&self, key: &NsKey) -> Result<Value> {
        self.get_opt(key)?.ok_or_else(|| Error::KeyNotFound(key.clone()))
    }

    pub fn get_opt(&self, key: &NsKey) -> Result<Option<Value>> {
        let guard = self.read()?;
        Ok(guard.index.get(key).and_then(|slot| guard.slots.get(*slot)).cloned())
    }

    pub fn contains(&self, key: &NsKey) -> Result<bool> {
        Ok(self.read()?.index.contains_key(key))
    }

    pub fn set(&self, key: impl Into<NsKey>, value: Value) -> Result<()> {
        self.merge(PartialUpdate::new().set(key, value))
    }

    /// Applies every entry of the update in order, under one write lock.
    ///
    /// Keys referenced by `Alias`/`Snapshot` must exist before the update or be
    /// bound by an earlier entry of the same update; otherwise nothing is applied.
    pub fn merge(&self, update: PartialUpdate) -> Result<()> {
        let mut guard = self.write()?;

        let mut bound: HashSet<&NsKey> = HashSet::new();
        for (key, change) in update.iter() {
            if let Update::Alias(source) | Update::Snapshot(source) = change {
                if !guard.index.contains_key(source) && !bound.contains(source) {
                    return Err(Error::KeyNotFound(source.clone()));
                }
            }
            bound.insert(key);
        }

        for (key, change) in update {
            guard.apply(key, change)?;
        }
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<NsKey>> {
        let mut keys: Vec<NsKey> = self.read()?.index.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// Whether two keys are bound to the same live slot.
    pub fn shares_storage(&self, a: &NsKey, b: &NsKey) -> Result<bool> {
        let guard = self.read()?;
        Ok(matches!((guard.index.get(a), guard.index.get(b)), (Some(x), Some(y)) if x == y))
    }

    /// Plain copy of every binding, for reports and postmortem inspection.
    pub fn snapshot(&self) -> Result<Map<String, Value>> {
        let guard = self.read()?;
        let mut keys: Vec<&NsKey> = guard.index.keys().collect();
        keys.sort();
        Ok(keys
            .into_iter()
            .filter_map(|key| guard.index.get(key).and_then(|slot| guard.slots.get(*slot)).map(|value| (key.id.clone(), value.clone())))
            .collect())
    }

    /// Number of live value slots; aliases count once.
    pub fn slot_count(&self) -> Result<usize> {
        Ok(self.read()?.slots.len())
    }

    pub fn view(&self) -> NamespaceView {
        NamespaceView { namespace: self.clone() }
    }
}

/// Read-only access handed to actions and conditions.
#[derive(Debug, Clone)]
pub struct NamespaceView {
    namespace: Namespace,
}

impl NamespaceView {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> NsKey {
        NsKey::new(name)
    }

    #[test]
    fn test_set_overwrites_last_writer_wins() {
        let ns = Namespace::new();
        ns.set("info", json!(1)).unwrap();
        ns.set("info", json!(2)).unwrap();

        assert_eq!(ns.get(&key("info")).unwrap(), json!(2));
        assert_eq!(ns.slot_count().unwrap(), 1);
    }

    #[test]
    fn test_missing_key_is_reported() {
        let ns = Namespace::new();
        assert!(matches!(ns.get(&key("nope")), Err(Error::KeyNotFound(k)) if k == key("nope")));
        assert!(matches!(ns.init(), Err(Error::KeyNotFound(k)) if k.as_str() == INIT_TASK));
    }

    #[test]
    fn test_write_through_is_visible_via_alias() {
        let ns = Namespace::new();
        ns.set("info", json!({"instances": {"vm1": {}}})).unwrap();
        ns.merge(PartialUpdate::new().alias("info_iter", "info")).unwrap();

        ns.merge(PartialUpdate::new().write_through("info_iter", json!({"instances": {}}))).unwrap();

        assert_eq!(ns.get(&key("info")).unwrap(), json!({"instances": {}}));
        assert!(ns.shares_storage(&key("info"), &key("info_iter")).unwrap());
    }

    #[test]
    fn test_set_rebinds_without_touching_aliases() {
        let ns = Namespace::new();
        ns.set("info", json!("collection")).unwrap();
        ns.merge(PartialUpdate::new().alias("info_iter", "info")).unwrap();

        ns.set("info", json!("element")).unwrap();

        assert_eq!(ns.get(&key("info_iter")).unwrap(), json!("collection"));
        assert!(!ns.shares_storage(&key("info"), &key("info_iter")).unwrap());
        assert_eq!(ns.slot_count().unwrap(), 2);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let ns = Namespace::new();
        ns.set("info", json!([1, 2, 3])).unwrap();
        ns.merge(PartialUpdate::new().snapshot("info_backup", "info")).unwrap();

        ns.merge(PartialUpdate::new().write_through("info", json!([]))).unwrap();

        assert_eq!(ns.get(&key("info_backup")).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_set_default_keeps_existing_value() {
        let ns = Namespace::new();
        ns.set("info_result", json!({"instances": {"vm1": {}}})).unwrap();
        ns.merge(PartialUpdate::new().set_default("info_result", json!({})).set_default("other", json!(0))).unwrap();

        assert_eq!(ns.get(&key("info_result")).unwrap(), json!({"instances": {"vm1": {}}}));
        assert_eq!(ns.get(&key("other")).unwrap(), json!(0));
    }

    #[test]
    fn test_merge_with_dangling_alias_applies_nothing() {
        let ns = Namespace::new();
        let update = PartialUpdate::new().set("a", json!(1)).alias("b", "missing");

        assert!(matches!(ns.merge(update), Err(Error::KeyNotFound(k)) if k == key("missing")));
        assert!(!ns.contains(&key("a")).unwrap());
    }

    #[test]
    fn test_alias_to_key_bound_earlier_in_same_update() {
        let ns = Namespace::new();
        ns.merge(PartialUpdate::new().set("a", json!(1)).alias("b", "a")).unwrap();

        assert!(ns.shares_storage(&key("a"), &key("b")).unwrap());
    }

    #[test]
    fn test_snapshot_lists_every_binding() {
        let ns = Namespace::new();
        ns.set("b", json!(2)).unwrap();
        ns.set("a", json!(1)).unwrap();

        let snapshot = ns.snapshot().unwrap();
        assert_eq!(snapshot.keys().cloned().collect::<Vec<_>>(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(ns.keys().unwrap(), vec![key("a"), key("b")]);
    }

    #[test]
    fn test_handles_share_the_store() {
        let ns = Namespace::new();
        let other = ns.clone();
        other.set("shared", json!(true)).unwrap();

        assert_eq!(ns.view().get(&key("shared")).unwrap(), json!(true));
    }
}
