//! Schema-agnostic actions over the cloud adapter interface.
//!
//! Apart from [`ReadInfo`], every action works on the records of one resource
//! type stored under a namespace key (a [`RecordScope`]), which inside a
//! `for_each` loop is the current element. Changes to those records are written
//! back in place.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::action::{Action, ActionContext, Condition};
use crate::domain::cloud::cloud::CloudRole;
use crate::domain::cloud::resource_trait::{PollPolicy, ResourceAdapter, ResourceKind, wait_for_status};
use crate::domain::cloud::transfer::{Locator, TransferDriver};
use crate::domain::config::CloudConfig;
use crate::domain::namespace::PartialUpdate;
use crate::domain::net::task::Task;
use crate::domain::utils::id::NsKey;
use crate::domain::utils::records;
use crate::error::{Error, Result};

/// The records of `resource` under the namespace key `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordScope {
    pub data: NsKey,
    pub resource: String,
}

impl RecordScope {
    pub fn new(data: impl Into<NsKey>, resource: impl Into<String>) -> Self {
        RecordScope { data: data.into(), resource: resource.into() }
    }

    fn load(&self, ctx: &ActionContext) -> Result<(Value, Vec<(String, Value)>)> {
        let collection = ctx.get(&self.data)?;
        let entries = records::entries(&self.data, &collection, &self.resource)?;
        Ok((collection, entries))
    }

    fn store(&self, collection: &Value, entries: Vec<(String, Value)>) -> PartialUpdate {
        PartialUpdate::new().write_through(self.data.clone(), records::replace(collection, &self.resource, entries))
    }

    /// Stores the records, or reports `failure`. When `changes` remote changes
    /// were already made, the failure carries the update recording them.
    fn finish(&self, collection: &Value, entries: Vec<(String, Value)>, changes: usize, failure: Option<Error>) -> Result<PartialUpdate> {
        match failure {
            None => Ok(self.store(collection, entries)),
            Some(source) if changes == 0 => Err(source),
            Some(source) => Err(Error::Interrupted { applied: Box::new(self.store(collection, entries)), source: Box::new(source) }),
        }
    }
}

impl Default for RecordScope {
    fn default() -> Self {
        RecordScope::new("info", ResourceKind::Compute.collection_name())
    }
}

fn invalid(record: &str, reason: impl Into<String>) -> Error {
    Error::InvalidRecord { record: record.to_string(), reason: reason.into() }
}

/// Whether the record already holds a non-empty string id in `field`.
fn has_id(record: &Value, field: &str) -> bool {
    record.get(field).and_then(Value::as_str).is_some_and(|id| !id.is_empty())
}

fn set_field(id: &str, record: &mut Value, field: &str, value: Value) -> Result<()> {
    match record.as_object_mut() {
        Some(fields) => {
            fields.insert(field.to_string(), value);
            Ok(())
        }
        None => Err(invalid(id, "record is not an object")),
    }
}

/// Lists the resources of one kind on one cloud and stores them under `output`
/// as `{collection_name: {id: record}}`. Other resource types already stored
/// under `output` are kept.
#[derive(Debug, Clone)]
pub struct ReadInfo {
    name: String,
    role: CloudRole,
    kind: ResourceKind,
    output: NsKey,
    filters: Value,
}

impl ReadInfo {
    pub fn new(role: CloudRole, kind: ResourceKind, output: impl Into<NsKey>) -> Self {
        ReadInfo { name: format!("read_{}", kind.collection_name()), role, kind, output: output.into(), filters: Value::Null }
    }

    pub fn with_filters(mut self, filters: Value) -> Self {
        self.filters = filters;
        self
    }
}

#[async_trait]
impl Action for ReadInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn cloud(&self) -> Option<CloudRole> {
        Some(self.role)
    }

    async fn run(&self, ctx: &ActionContext) -> Result<PartialUpdate> {
        let adapter = ctx.cloud(self.role)?.resource(self.kind)?;
        let found = adapter.read_info(&self.filters).await?;
        log::info!("Found {} {} on the {} cloud", found.len(), self.kind.collection_name(), self.role);

        let mut output = match ctx.get_opt(&self.output)? {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        output.insert(self.kind.collection_name().to_string(), Value::Object(found));
        Ok(PartialUpdate::new().set(self.output.clone(), Value::Object(output)))
    }
}

/// A resource a record depends on, described inside the record itself.
///
/// `pointer` is a JSON pointer to the dependency's description in each record
/// (`""` for the record itself); `match_field` is the field used to look the
/// dependency up on the destination; the destination id ends up in the record's
/// `output_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub kind: ResourceKind,
    pub scope: RecordScope,
    pub pointer: String,
    pub match_field: String,
    pub output_field: String,
}

impl Dependency {
    pub fn new(kind: ResourceKind, pointer: impl Into<String>, output_field: impl Into<String>) -> Self {
        Dependency { kind, scope: RecordScope::default(), pointer: pointer.into(), match_field: "name".to_string(), output_field: output_field.into() }
    }

    pub fn in_scope(mut self, scope: RecordScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn matched_by(mut self, field: impl Into<String>) -> Self {
        self.match_field = field.into();
        self
    }

    fn spec<'a>(&self, id: &str, record: &'a Value) -> Result<&'a Value> {
        record.pointer(&self.pointer).ok_or_else(|| invalid(id, format!("no {:?} description at '{}'", self.kind, self.pointer)))
    }

    /// Destination id of the dependency of one record, if it already exists there.
    async fn lookup(&self, adapter: &dyn ResourceAdapter, id: &str, record: &Value) -> Result<Option<String>> {
        let spec = self.spec(id, record)?;
        let needle = spec.get(&self.match_field).ok_or_else(|| invalid(id, format!("{:?} description has no '{}'", self.kind, self.match_field)))?;

        let mut filters = Map::new();
        filters.insert(self.match_field.clone(), needle.clone());
        Ok(adapter.read_info(&Value::Object(filters)).await?.keys().next().cloned())
    }
}

/// True when some record in scope is not linked to its dependency yet.
#[derive(Debug, Clone)]
pub struct MissingOnDestination {
    name: String,
    dependency: Dependency,
}

impl MissingOnDestination {
    pub fn new(dependency: Dependency) -> Self {
        MissingOnDestination { name: format!("{:?}_missing", dependency.kind).to_lowercase(), dependency }
    }
}

#[async_trait]
impl Condition for MissingOnDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.dependency.scope.data.clone()]
    }

    async fn check(&self, ctx: &ActionContext) -> Result<bool> {
        let (_, entries) = self.dependency.scope.load(ctx)?;
        Ok(entries.iter().any(|(_, record)| !has_id(record, &self.dependency.output_field)))
    }
}

/// Points each record at its dependency when that already exists on the
/// destination. Records whose dependency is missing are left without
/// `output_field`, dropping any value they carried over from the source.
#[derive(Debug, Clone)]
pub struct LinkExisting {
    name: String,
    dependency: Dependency,
}

impl LinkExisting {
    pub fn new(dependency: Dependency) -> Self {
        LinkExisting { name: format!("link_{:?}", dependency.kind).to_lowercase(), dependency }
    }
}

#[async_trait]
impl Action for LinkExisting {
    fn name(&self) -> &str {
        &self.name
    }

    fn cloud(&self) -> Option<CloudRole> {
        Some(CloudRole::Destination)
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.dependency.scope.data.clone()]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<PartialUpdate> {
        let adapter = ctx.cloud(CloudRole::Destination)?.resource(self.dependency.kind)?;
        let (collection, mut entries) = self.dependency.scope.load(ctx)?;

        for (id, record) in entries.iter_mut() {
            match self.dependency.lookup(adapter.as_ref(), id, record).await? {
                Some(existing) => {
                    log::debug!("Record {} reuses {:?} {}", id, self.dependency.kind, existing);
                    set_field(id, record, &self.dependency.output_field, Value::String(existing))?;
                }
                None => {
                    if let Some(fields) = record.as_object_mut() {
                        fields.remove(&self.dependency.output_field);
                    }
                }
            }
        }

        Ok(self.dependency.scope.store(&collection, entries))
    }
}

/// Creates one destination resource per record from the description at
/// `pointer` and stores the new id in the record's `output_field`.
///
/// Records that already hold an id in `output_field` are left alone, so running
/// the step again after a partial failure creates only what is still missing.
#[derive(Debug, Clone)]
pub struct CreateResource {
    name: String,
    kind: ResourceKind,
    scope: RecordScope,
    pointer: String,
    output_field: String,
}

impl CreateResource {
    pub fn new(kind: ResourceKind, pointer: impl Into<String>, output_field: impl Into<String>) -> Self {
        CreateResource {
            name: format!("create_{:?}", kind).to_lowercase(),
            kind,
            scope: RecordScope::default(),
            pointer: pointer.into(),
            output_field: output_field.into(),
        }
    }

    pub fn for_dependency(dependency: &Dependency) -> Self {
        Self::new(dependency.kind, dependency.pointer.clone(), dependency.output_field.clone()).in_scope(dependency.scope.clone())
    }

    pub fn in_scope(mut self, scope: RecordScope) -> Self {
        self.scope = scope;
        self
    }

    async fn create_for(&self, adapter: &dyn ResourceAdapter, id: &str, record: &mut Value) -> Result<()> {
        if !record.is_object() {
            return Err(invalid(id, "record is not an object"));
        }
        let spec = record.pointer(&self.pointer).cloned().ok_or_else(|| invalid(id, format!("no {:?} description at '{}'", self.kind, self.pointer)))?;
        let created = adapter.create(&spec).await?;
        log::info!("Created {:?} {} on the destination for record {}", self.kind, created, id);
        set_field(id, record, &self.output_field, Value::String(created))
    }
}

#[async_trait]
impl Action for CreateResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn cloud(&self) -> Option<CloudRole> {
        Some(CloudRole::Destination)
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.scope.data.clone()]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<PartialUpdate> {
        let adapter = ctx.cloud(CloudRole::Destination)?.resource(self.kind)?;
        let (collection, mut entries) = self.scope.load(ctx)?;

        let mut created = 0;
        let mut failure = None;
        for (id, record) in entries.iter_mut() {
            if has_id(record, &self.output_field) {
                log::debug!("Record {} already has {}, nothing to create", id, self.output_field);
                continue;
            }
            match self.create_for(adapter.as_ref(), id, record).await {
                Ok(()) => created += 1,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        self.scope.finish(&collection, entries, created, failure)
    }
}

/// Waits until the destination resource whose id is in each record's `id_field`
/// reaches `status`, then records the status on the record.
#[derive(Debug, Clone)]
pub struct WaitForStatus {
    name: String,
    kind: ResourceKind,
    scope: RecordScope,
    id_field: String,
    status: String,
    poll: Option<PollPolicy>,
}

impl WaitForStatus {
    pub fn new(kind: ResourceKind, id_field: impl Into<String>, status: impl Into<String>) -> Self {
        let status = status.into();
        WaitForStatus {
            name: format!("wait_{:?}_{}", kind, status).to_lowercase(),
            kind,
            scope: RecordScope::default(),
            id_field: id_field.into(),
            status,
            poll: None,
        }
    }

    /// Overrides the poll budget from the run configuration.
    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = Some(poll);
        self
    }

    pub fn in_scope(mut self, scope: RecordScope) -> Self {
        self.scope = scope;
        self
    }
}

#[async_trait]
impl Action for WaitForStatus {
    fn name(&self) -> &str {
        &self.name
    }

    fn cloud(&self) -> Option<CloudRole> {
        Some(CloudRole::Destination)
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.scope.data.clone()]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<PartialUpdate> {
        let init = ctx.init()?;
        let adapter = init.dst_cloud.resource(self.kind)?;
        let poll = self.poll.unwrap_or(init.config.migrate.poll);
        let (collection, mut entries) = self.scope.load(ctx)?;

        for (id, record) in entries.iter_mut() {
            let resource_id = record
                .get(&self.id_field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| invalid(id, format!("no '{}' to wait on", self.id_field)))?;

            wait_for_status(adapter.as_ref(), &resource_id, &self.status, poll, ctx.cancellation()).await?;
            set_field(id, record, "status", Value::String(self.status.to_lowercase()))?;
        }

        Ok(self.scope.store(&collection, entries))
    }
}

/// Copies the payloads listed at `items` (an array of `{id, path}`) of each
/// record from the source host to the destination's scratch directory.
///
/// The driver is chosen by the storage backends of both clouds. Each item gets a
/// `transferred_to` locator; items that already have one are not moved again.
/// Records without the array have nothing to move.
#[derive(Debug, Clone)]
pub struct TransferPayload {
    scope: RecordScope,
    items: String,
}

impl TransferPayload {
    pub fn new(items: impl Into<String>) -> Self {
        TransferPayload { scope: RecordScope::default(), items: items.into() }
    }

    pub fn in_scope(mut self, scope: RecordScope) -> Self {
        self.scope = scope;
        self
    }

    /// Moves the payloads of one record, counting every completed transfer in `moved`.
    async fn transfer_record(&self, driver: &dyn TransferDriver, src: &CloudConfig, dst: &CloudConfig, id: &str, record: &mut Value, moved: &mut usize) -> Result<()> {
        let items = match record.pointer_mut(&self.items) {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(invalid(id, format!("'{}' is not a list of payloads", self.items))),
        };

        for item in items.iter_mut() {
            if item.get("transferred_to").is_some() {
                continue;
            }
            let item_id = item.get("id").and_then(Value::as_str).ok_or_else(|| invalid(id, "payload without an id"))?.to_string();
            let path = item.get("path").and_then(Value::as_str).ok_or_else(|| invalid(id, format!("payload {} has no path", item_id)))?;

            let source = Locator { host: src.host.clone(), path: path.to_string() };
            let destination = Locator { host: dst.host.clone(), path: format!("{}/{}", dst.temp, item_id) };
            driver.transfer(&source, &destination).await?;
            log::info!("{} moved {} to {}", driver.name(), source, destination);
            *moved += 1;

            set_field(id, item, "transferred_to", Value::String(destination.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Action for TransferPayload {
    fn name(&self) -> &str {
        "transfer_payload"
    }

    fn requires(&self) -> Vec<NsKey> {
        vec![self.scope.data.clone()]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<PartialUpdate> {
        let init = ctx.init()?;
        let (src, dst) = (init.src_cloud.config(), init.dst_cloud.config());
        let driver = init.transfers.select(src.backend, dst.backend)?;
        let (collection, mut entries) = self.scope.load(ctx)?;

        let mut moved = 0;
        let mut failure = None;
        for (id, record) in entries.iter_mut() {
            if let Err(error) = self.transfer_record(driver.as_ref(), src, dst, id, record, &mut moved).await {
                failure = Some(error);
                break;
            }
        }

        self.scope.finish(&collection, entries, moved, failure)
    }
}

/// Links each record to its dependency on the destination and creates the
/// dependency only for the records whose dependency does not exist there yet.
pub fn ensure_resource(dependency: Dependency) -> Task {
    Task::step(LinkExisting::new(dependency.clone())) >> Task::step(CreateResource::for_dependency(&dependency)).when(MissingOnDestination::new(dependency))
}
