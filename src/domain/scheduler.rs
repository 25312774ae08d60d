use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::action::ActionContext;
use crate::domain::namespace::{Namespace, PartialUpdate};
use crate::domain::net::cursor::{Advance, Cursor};
use crate::domain::net::net::{NetNode, NodeKind};
use crate::domain::net::task::LoopOptions;
use crate::domain::utils::id::{FlowName, NsKey};
use crate::error::{Error, Result};

/// How a failing flow affects the other flows of the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiblingPolicy {
    /// The other flows run to completion.
    #[default]
    Independent,
    /// The first failure cancels every other flow.
    CancelOnFailure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub sibling_policy: SiblingPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedElement {
    pub element: Option<String>,
    pub step: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowReport {
    pub steps_executed: usize,
    pub loop_rounds: usize,
    pub skipped: Vec<SkippedElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub flows: BTreeMap<FlowName, FlowReport>,
}

#[derive(Debug)]
struct ScheduledFlow {
    name: FlowName,
    cursor: Cursor,
    namespace: Namespace,
    shared: bool,
}

/// Slot of a shared-namespace flow in the run order. The flow starts once the
/// previous shared flow has dropped its `done` sender.
#[derive(Debug)]
struct Turn {
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

/// Drives one cursor per named flow to the end of its net.
///
/// Flows run one node at a time. Flows added with [`Scheduler::with_flow`]
/// share the scheduler's namespace and run one after another, in the order they
/// were added. Isolated flows run concurrently with everything else.
#[derive(Debug)]
pub struct Scheduler {
    namespace: Namespace,
    flows: Vec<ScheduledFlow>,
    options: SchedulerOptions,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(namespace: Namespace) -> Self {
        Scheduler { namespace, flows: Vec::new(), options: SchedulerOptions::default(), cancel: CancellationToken::new() }
    }

    pub fn with_flow(mut self, name: impl Into<FlowName>, cursor: Cursor) -> Self {
        let namespace = self.namespace.clone();
        self.flows.push(ScheduledFlow { name: name.into(), cursor, namespace, shared: true });
        self
    }

    /// Adds a flow that works on its own namespace instead of the shared one.
    pub fn with_isolated_flow(mut self, name: impl Into<FlowName>, cursor: Cursor, namespace: Namespace) -> Self {
        self.flows.push(ScheduledFlow { name: name.into(), cursor, namespace, shared: false });
        self
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    /// Token that stops every flow of this run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Runs every flow to completion.
    ///
    /// Returns the first failure in completion order once all flows have
    /// stopped, otherwise a report per flow.
    pub async fn start(self) -> Result<RunReport> {
        let mut names = HashSet::new();
        if let Some(duplicate) = self.flows.iter().find(|flow| !names.insert(flow.name.clone())) {
            return Err(Error::GraphConstructionError(format!("flow {} is scheduled twice", duplicate.name)));
        }

        let run_id = Uuid::new_v4().to_string();
        log::info!("Run {} started with {} flow(s).", run_id, self.flows.len());

        let mut running = JoinSet::new();
        let mut previous = None;
        for flow in self.flows {
            let turn = flow.shared.then(|| {
                let (done, next) = oneshot::channel();
                Turn { previous: previous.replace(next), _done: done }
            });
            running.spawn(run_flow(flow, turn, self.cancel.clone()));
        }

        let mut report = RunReport { run_id, flows: BTreeMap::new() };
        let mut first_error: Option<Error> = None;

        while let Some(joined) = running.join_next().await {
            let failure = match joined {
                Ok(Ok((name, flow_report))) => {
                    report.flows.insert(name, flow_report);
                    continue;
                }
                Ok(Err(error)) => error,
                Err(join_error) => Error::TaskJoin(join_error.to_string()),
            };

            if self.options.sibling_policy == SiblingPolicy::CancelOnFailure && !self.cancel.is_cancelled() {
                log::warn!("Cancelling remaining flows after failure: {}", failure);
                self.cancel.cancel();
            }
            first_error.get_or_insert(failure);
        }

        match first_error {
            Some(error) => Err(error),
            None => {
                log::info!("Run {} finished.", report.run_id);
                Ok(report)
            }
        }
    }
}

async fn run_flow(flow: ScheduledFlow, turn: Option<Turn>, cancel: CancellationToken) -> Result<(FlowName, FlowReport)> {
    let ScheduledFlow { name, mut cursor, namespace, .. } = flow;
    let net = cursor.net().clone();
    let ctx = ActionContext::new(name.clone(), namespace.view(), cancel.clone());
    let mut skipped = Vec::new();

    let _turn = match turn {
        Some(mut turn) => {
            if let Some(previous) = turn.previous.take() {
                log::debug!("Flow {} waits for the previous flow on the shared namespace.", name);
                // The sender is only ever dropped, so this resolves once the previous flow has ended.
                let _ = previous.await;
            }
            Some(turn)
        }
        None => None,
    };

    log::info!("Flow {} started ({} nodes).", name, net.len());

    while let Some(id) = cursor.current() {
        let Some(node) = net.node(id) else {
            let error = Error::GraphConstructionError(format!("flow {} points outside its net", name));
            return Err(flow_failed(&name, "-", &cursor, &namespace, error));
        };

        let outcome = if cancel.is_cancelled() { Err(Error::Cancelled) } else { execute(node, &ctx, &namespace).await };

        match outcome.and_then(|advance| cursor.advance(advance)) {
            Ok(()) => {}
            Err(error) => {
                if let Some(options) = cursor.skipping_loop().filter(|_| error.is_element_recoverable()).cloned() {
                    let element = current_element(&options, &namespace);
                    log::warn!("Flow {} skipped element {} after '{}' failed: {}", name, element.as_deref().unwrap_or("-"), node.name(), error);
                    record_failure(&options, &namespace, element.as_deref(), node.name(), &error)?;

                    skipped.push(SkippedElement { element, step: node.name().to_string(), error: error.to_string() });
                    cursor.skip_element();
                    continue;
                }

                log::error!("Flow {} failed at '{}': {}", name, node.name(), error);
                return Err(flow_failed(&name, node.name(), &cursor, &namespace, error));
            }
        }
    }

    let report = FlowReport { steps_executed: cursor.steps_executed(), loop_rounds: cursor.loop_rounds(), skipped };
    log::info!("Flow {} finished: {} steps, {} loop rounds, {} skipped.", name, report.steps_executed, report.loop_rounds, report.skipped.len());
    Ok((name, report))
}

async fn execute(node: &NetNode, ctx: &ActionContext, namespace: &Namespace) -> Result<Advance> {
    match &node.kind {
        NodeKind::Step { action, .. } => {
            ensure_inputs(&action.requires(), namespace)?;
            log::debug!("[{}] step {}", ctx.flow(), action.name());
            let update = match action.run(ctx).await {
                Err(Error::Interrupted { applied, source }) => {
                    log::warn!("[{}] step {} failed after partial progress, keeping its changes", ctx.flow(), action.name());
                    namespace.merge(*applied)?;
                    return Err(*source);
                }
                result => result?,
            };
            namespace.merge(update)?;
            Ok(Advance::Completed)
        }
        NodeKind::Branch { condition, .. } | NodeKind::LoopHead { until: condition, .. } => {
            ensure_inputs(&condition.requires(), namespace)?;
            let decision = condition.check(ctx).await?;
            log::debug!("[{}] {} -> {}", ctx.flow(), condition.name(), decision);
            Ok(Advance::Decided(decision))
        }
    }
}

fn ensure_inputs(required: &[NsKey], namespace: &Namespace) -> Result<()> {
    for key in required {
        if !namespace.contains(key)? {
            return Err(Error::KeyNotFound(key.clone()));
        }
    }
    Ok(())
}

/// Wraps `error` with the flow, the step and the element being processed.
fn flow_failed(name: &FlowName, step: &str, cursor: &Cursor, namespace: &Namespace, error: Error) -> Error {
    let element = cursor.element_loop().and_then(|options| current_element(options, namespace));
    Error::FlowFailed { flow: name.clone(), step: step.to_string(), element, source: Box::new(error) }
}

/// Id of the element the loop is processing, read from its element id key.
fn current_element(options: &LoopOptions, namespace: &Namespace) -> Option<String> {
    let value = namespace.get_opt(options.element_id.as_ref()?).ok()??;
    Some(match value {
        Value::String(id) => id,
        Value::Array(ids) => ids.iter().map(|id| id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string())).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    })
}

/// Appends `{id, step, error}` to the loop's failures list.
fn record_failure(options: &LoopOptions, namespace: &Namespace, element: Option<&str>, step: &str, error: &Error) -> Result<()> {
    let Some(key) = &options.failures else { return Ok(()) };

    let mut failures = match namespace.get_opt(key)? {
        Some(Value::Array(failures)) => failures,
        _ => Vec::new(),
    };
    failures.push(json!({"id": element, "step": step, "error": error.to_string()}));
    namespace.merge(PartialUpdate::new().write_through(key.clone(), Value::Array(failures)))
}
