use std::ops::{BitOr, Shr};
use std::sync::Arc;

use crate::domain::action::{Action, Condition};
use crate::domain::utils::id::NsKey;

/// What happens when one element of a loop fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementFailurePolicy {
    /// The failure ends the whole flow.
    #[default]
    Abort,
    /// The failure is recorded and the loop moves on to the next element.
    Skip,
}

/// Per-loop failure isolation settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopOptions {
    pub policy: ElementFailurePolicy,
    /// Key holding the id of the element being processed, used in error reports.
    pub element_id: Option<NsKey>,
    /// Key collecting `{id, step, error}` records of skipped elements.
    pub failures: Option<NsKey>,
}

/// Declarative task tree. Built with [`Task::step`], `>>`, `|` + [`Task::when`]
/// and [`Task::repeat_until`], then compiled into a [`Net`](super::net::Net).
#[derive(Debug, Clone)]
pub enum Task {
    Step(Arc<dyn Action>),
    Sequence(Vec<Task>),
    Alternative { condition: Option<Arc<dyn Condition>>, if_true: Box<Task>, if_false: Box<Task> },
    Repeat { until: Arc<dyn Condition>, body: Box<Task>, options: LoopOptions },
}

impl Task {
    pub fn step(action: impl Action + 'static) -> Task {
        Task::Step(Arc::new(action))
    }

    /// A task that does nothing.
    pub fn empty() -> Task {
        Task::Sequence(Vec::new())
    }

    pub fn then(self, next: impl Into<Task>) -> Task {
        self >> next
    }

    /// Sets the condition of an alternative built with `|`: true runs the left
    /// side, false the right one. On any other task, runs it only when the
    /// condition holds.
    pub fn when(self, condition: impl Condition + 'static) -> Task {
        let condition: Arc<dyn Condition> = Arc::new(condition);
        match self {
            Task::Alternative { condition: None, if_true, if_false } => Task::Alternative { condition: Some(condition), if_true, if_false },
            other => Task::Alternative { condition: Some(condition), if_true: Box::new(other), if_false: Box::new(Task::empty()) },
        }
    }

    /// Evaluates `until` first; while it is false runs `body` and re-evaluates.
    pub fn repeat_until(until: impl Condition + 'static, body: impl Into<Task>) -> Task {
        Task::Repeat { until: Arc::new(until), body: Box::new(body.into()), options: LoopOptions::default() }
    }

    /// Replaces the failure isolation settings of a loop; other tasks are returned unchanged.
    pub fn with_loop_options(self, new_options: LoopOptions) -> Task {
        match self {
            Task::Repeat { until, body, .. } => Task::Repeat { until, body, options: new_options },
            other => other,
        }
    }

    /// True when the task contains no step at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Task::Step(_) => false,
            Task::Sequence(tasks) => tasks.iter().all(Task::is_empty),
            Task::Alternative { if_true, if_false, .. } => if_true.is_empty() && if_false.is_empty(),
            Task::Repeat { .. } => false,
        }
    }
}

impl<A: Action + 'static> From<A> for Task {
    fn from(action: A) -> Self {
        Task::step(action)
    }
}

impl From<Arc<dyn Action>> for Task {
    fn from(action: Arc<dyn Action>) -> Self {
        Task::Step(action)
    }
}

/// `a >> b`: run `a`, then `b` on the namespace as updated by `a`.
impl<T: Into<Task>> Shr<T> for Task {
    type Output = Task;

    fn shr(self, rhs: T) -> Task {
        let mut tasks = match self {
            Task::Sequence(tasks) => tasks,
            other => vec![other],
        };
        match rhs.into() {
            Task::Sequence(more) => tasks.extend(more),
            other => tasks.push(other),
        }
        Task::Sequence(tasks)
    }
}

/// `a | b`: exactly one side runs. Needs a condition via [`Task::when`]; an
/// alternative left without one is rejected when the net is compiled.
impl<T: Into<Task>> BitOr<T> for Task {
    type Output = Task;

    fn bitor(self, rhs: T) -> Task {
        Task::Alternative { condition: None, if_true: Box::new(self), if_false: Box::new(rhs.into()) }
    }
}
