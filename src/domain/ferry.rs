use std::sync::Arc;

use crate::domain::action::iteration::{IterationKeys, for_each};
use crate::domain::action::resource_actions::{CreateResource, Dependency, ReadInfo, TransferPayload, WaitForStatus, ensure_resource};
use crate::domain::cloud::cloud::{CloudRole, InitContext};
use crate::domain::cloud::resource_trait::{ResourceAdapter, ResourceKind};
use crate::domain::cloud::transfer::TransferRegistry;
use crate::domain::config::FerryConfig;
use crate::domain::namespace::Namespace;
use crate::domain::net::cursor::Cursor;
use crate::domain::net::task::Task;
use crate::domain::scenario::Scenario;
use crate::domain::scheduler::{RunReport, Scheduler, SchedulerOptions};
use crate::domain::utils::id::FlowName;
use crate::error::Result;

pub const DEFAULT_FLOW: &str = "migrate";
pub const RESULT_KEY: &str = "info_result";

/// Builds the migration flows of one run and hands them to the scheduler.
#[derive(Debug, Clone)]
pub struct Ferry {
    init: Arc<InitContext>,
}

impl Ferry {
    pub fn new(config: FerryConfig, src_adapters: Vec<Arc<dyn ResourceAdapter>>, dst_adapters: Vec<Arc<dyn ResourceAdapter>>, transfers: TransferRegistry) -> Result<Self> {
        let init = InitContext::new(config, src_adapters, dst_adapters, transfers)?;
        log::info!("Ferry ready: {} -> {}", init.src_cloud.config().host, init.dst_cloud.config().host);
        Ok(Ferry { init: Arc::new(init) })
    }

    pub fn init(&self) -> &Arc<InitContext> {
        &self.init
    }

    /// Fresh namespace holding the init context and an empty instance accumulator.
    pub fn namespace(&self) -> Result<Namespace> {
        Namespace::seeded(self.init.clone(), RESULT_KEY, &[ResourceKind::Compute.collection_name()])
    }

    /// Default flow: read the source instances, then for each one make sure its
    /// flavor exists on the destination, move its disks, boot it there and wait
    /// until it is active.
    pub fn process_migrate(&self) -> Task {
        let migrate = &self.init.config.migrate;
        let keys = IterationKeys::new(ResourceKind::Compute.collection_name()).with_accumulator(RESULT_KEY).accumulating();

        let pipeline = ensure_resource(Dependency::new(ResourceKind::Flavor, "/flavor", "flavor_id"))
            >> TransferPayload::new("/disks")
            >> CreateResource::new(ResourceKind::Compute, "", "dst_id")
            >> WaitForStatus::new(ResourceKind::Compute, "dst_id", "active").with_poll(migrate.poll);

        Task::step(ReadInfo::new(CloudRole::Source, ResourceKind::Compute, keys.source.clone())) >> for_each(&keys, pipeline, migrate.element_failure)
    }

    /// The flows of `scenario`, or the default flow, each compiled behind a cursor.
    pub fn build_flows(&self, scenario: Option<&Scenario>) -> Result<Vec<(FlowName, Cursor)>> {
        match scenario {
            Some(scenario) => scenario.flows().iter().map(|(name, task)| Ok((name.clone(), Cursor::build(task)?))).collect(),
            None => Ok(vec![(FlowName::new(DEFAULT_FLOW), Cursor::build(&self.process_migrate())?)]),
        }
    }

    /// Scheduler loaded with every flow. Isolated scenario flows get their own seeded namespace.
    pub fn scheduler(&self, namespace: Namespace, scenario: Option<&Scenario>) -> Result<Scheduler> {
        let options = SchedulerOptions { sibling_policy: self.init.config.migrate.sibling_policy };
        let mut scheduler = Scheduler::new(namespace).with_options(options);

        for (name, cursor) in self.build_flows(scenario)? {
            scheduler = if scenario.is_some_and(|scenario| scenario.is_isolated(&name)) {
                scheduler.with_isolated_flow(name, cursor, self.namespace()?)
            } else {
                scheduler.with_flow(name, cursor)
            };
        }
        Ok(scheduler)
    }

    /// Runs the migration on a fresh namespace.
    pub async fn migrate(&self, scenario: Option<&Scenario>) -> Result<RunReport> {
        let scheduler = self.scheduler(self.namespace()?, scenario)?;
        scheduler.start().await
    }
}
