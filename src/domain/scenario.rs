use std::collections::HashSet;

use crate::api::config_dto::ElementFailureDto;
use crate::api::scenario_dto::{ScenarioDto, ScopeDto, StepDto};
use crate::domain::action::iteration::{CopyVar, CreateReference, IterationKeys, RenameInfo, for_each};
use crate::domain::action::resource_actions::{CreateResource, Dependency, ReadInfo, RecordScope, TransferPayload, WaitForStatus, ensure_resource};
use crate::domain::cloud::resource_trait::PollPolicy;
use crate::domain::config::MigrateOptions;
use crate::domain::net::task::{ElementFailurePolicy, Task};
use crate::domain::utils::id::FlowName;
use crate::error::{Error, Result};
use crate::loader::parser::parse_json_file;

/// Named flows described in a scenario file, ready to be compiled.
#[derive(Debug, Clone)]
pub struct Scenario {
    flows: Vec<(FlowName, Task)>,
    isolated: HashSet<FlowName>,
}

impl Scenario {
    pub fn load(file_path: &str, options: &MigrateOptions) -> Result<Self> {
        let dto: ScenarioDto = parse_json_file(file_path)?;
        Scenario::try_from((dto, options.clone()))
    }

    pub fn flows(&self) -> &[(FlowName, Task)] {
        &self.flows
    }

    pub fn is_isolated(&self, flow: &FlowName) -> bool {
        self.isolated.contains(flow)
    }
}

impl TryFrom<(ScenarioDto, MigrateOptions)> for Scenario {
    type Error = Error;

    fn try_from((dto, options): (ScenarioDto, MigrateOptions)) -> Result<Self> {
        if dto.flows.is_empty() {
            return Err(Error::ConfigError("scenario defines no flows".to_string()));
        }

        let default_scope = RecordScope::default();
        let mut flows = Vec::with_capacity(dto.flows.len());
        for (name, steps) in dto.flows {
            let task = sequence(steps, &options, &default_scope)?;
            flows.push((FlowName::new(name), task));
        }

        let mut isolated = HashSet::new();
        for name in dto.isolated {
            let name = FlowName::new(name);
            if !flows.iter().any(|(flow, _)| *flow == name) {
                return Err(Error::ConfigError(format!("isolated flow {} is not defined", name)));
            }
            isolated.insert(name);
        }

        Ok(Scenario { flows, isolated })
    }
}

fn sequence(steps: Vec<StepDto>, options: &MigrateOptions, scope: &RecordScope) -> Result<Task> {
    steps.into_iter().try_fold(Task::empty(), |task, step| Ok(task >> step_to_task(step, options, scope)?))
}

fn resolve_scope(dto: ScopeDto, default: &RecordScope) -> RecordScope {
    RecordScope::new(dto.data.unwrap_or_else(|| default.data.id.clone()), dto.resource.unwrap_or_else(|| default.resource.clone()))
}

fn step_to_task(step: StepDto, options: &MigrateOptions, scope: &RecordScope) -> Result<Task> {
    let task = match step {
        StepDto::ReadInfo { cloud, kind, output, filters } => Task::step(ReadInfo::new(cloud, kind, output).with_filters(filters)),
        StepDto::EnsureResource { kind, pointer, output_field, match_field, scope: step_scope } => {
            ensure_resource(Dependency::new(kind, pointer, output_field).matched_by(match_field).in_scope(resolve_scope(step_scope, scope)))
        }
        StepDto::CreateResource { kind, pointer, output_field, scope: step_scope } => {
            Task::step(CreateResource::new(kind, pointer, output_field).in_scope(resolve_scope(step_scope, scope)))
        }
        StepDto::WaitForStatus { kind, id_field, status, poll_interval_ms, poll_retries, scope: step_scope } => {
            let mut action = WaitForStatus::new(kind, id_field, status).in_scope(resolve_scope(step_scope, scope));
            if poll_interval_ms.is_some() || poll_retries.is_some() {
                let max_attempts = poll_retries.unwrap_or(options.poll.max_attempts);
                if max_attempts == 0 {
                    return Err(Error::ConfigError("wait_for_status: pollRetries must be at least 1".to_string()));
                }
                let interval = poll_interval_ms.map(std::time::Duration::from_millis).unwrap_or(options.poll.interval);
                action = action.with_poll(PollPolicy { interval, max_attempts });
            }
            Task::step(action)
        }
        StepDto::TransferPayload { items, scope: step_scope } => Task::step(TransferPayload::new(items).in_scope(resolve_scope(step_scope, scope))),
        StepDto::ForEach { resource, prefix, result, batch, element_failure, body } => {
            let mut keys = match prefix {
                Some(prefix) => IterationKeys::prefixed(resource, &prefix),
                None => IterationKeys::new(resource),
            }
            .with_batch(batch);
            if let Some(result) = result {
                keys = keys.with_result(result);
            }

            let policy = match element_failure {
                Some(ElementFailureDto::Abort) => ElementFailurePolicy::Abort,
                Some(ElementFailureDto::Skip) => ElementFailurePolicy::Skip,
                None => options.element_failure,
            };
            let element_scope = RecordScope::new(keys.element.clone(), keys.resource.clone());
            let pipeline = sequence(body, options, &element_scope)?;
            for_each(&keys, pipeline, policy)
        }
        StepDto::CopyVar { src, dst, deep } => Task::step(CopyVar::new(src, dst, deep)),
        StepDto::CreateReference { src, reference } => Task::step(CreateReference::new(src, reference)),
        StepDto::RenameInfo { from, to } => Task::step(RenameInfo::new(from, to)),
    };
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::net::net::Net;
    use serde_json::json;

    fn scenario(value: serde_json::Value) -> Result<Scenario> {
        let dto: ScenarioDto = serde_json::from_value(value)?;
        Scenario::try_from((dto, MigrateOptions::default()))
    }

    #[test]
    fn test_scenario_compiles_every_flow() {
        let scenario = scenario(json!({
            "flows": {
                "instances": [
                    {"step": "read_info", "cloud": "src", "kind": "compute"},
                    {"step": "for_each", "resource": "instances", "elementFailure": "skip", "body": [
                        {"step": "ensure_resource", "kind": "flavor", "pointer": "/flavor", "outputField": "flavor_id"},
                        {"step": "transfer_payload", "items": "/disks"},
                        {"step": "create_resource", "kind": "compute", "outputField": "dst_id"},
                        {"step": "wait_for_status", "kind": "compute", "idField": "dst_id", "status": "active", "pollRetries": 3}
                    ]}
                ],
                "images": [
                    {"step": "read_info", "cloud": "src", "kind": "image", "output": "images"},
                    {"step": "copy_var", "src": "images", "dst": "images_backup"},
                    {"step": "rename_info", "from": "images_backup", "to": "images_report"}
                ]
            },
            "isolated": ["images"]
        }))
        .unwrap();

        assert_eq!(scenario.flows().len(), 2);
        assert!(scenario.is_isolated(&FlowName::new("images")));
        for (_, task) in scenario.flows() {
            assert!(Net::compile(task).is_ok());
        }
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        let result = scenario(json!({"flows": {"main": [{"step": "teleport"}]}}));
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_empty_scenario_and_unknown_isolated_flow() {
        assert!(matches!(scenario(json!({"flows": {}})), Err(Error::ConfigError(_))));

        let result = scenario(json!({"flows": {"main": [{"step": "rename_info", "from": "a", "to": "b"}]}, "isolated": ["other"]}));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_zero_poll_retries_is_rejected() {
        let result = scenario(json!({"flows": {"main": [{"step": "wait_for_status", "kind": "compute", "idField": "dst_id", "status": "active", "pollRetries": 0}]}}));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
