use slotmap::SecondaryMap;
use std::sync::Arc;

use crate::domain::net::net::{Edge, Net, NetNode, NodeId, NodeKind};
use crate::domain::net::task::{ElementFailurePolicy, LoopOptions, Task};
use crate::error::{Error, Result};

/// Outcome of the node under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// A step ran and its update was merged.
    Completed,
    /// A branch or loop condition evaluated to the given value.
    Decided(bool),
}

/// Position of one flow inside its net.
#[derive(Debug, Clone)]
pub struct Cursor {
    net: Arc<Net>,
    position: Option<NodeId>,
    steps: usize,
    rounds: SecondaryMap<NodeId, usize>,
}

impl Cursor {
    pub fn new(net: Arc<Net>) -> Self {
        let position = Some(net.entry());
        Cursor { net, position, steps: 0, rounds: SecondaryMap::new() }
    }

    /// Compiles the task tree and places a cursor on its entry.
    pub fn build(task: &Task) -> Result<Self> {
        Ok(Cursor::new(Arc::new(Net::compile(task)?)))
    }

    pub fn net(&self) -> &Arc<Net> {
        &self.net
    }

    pub fn current(&self) -> Option<NodeId> {
        self.position
    }

    pub fn current_node(&self) -> Option<&NetNode> {
        self.position.and_then(|id| self.net.node(id))
    }

    pub fn is_finished(&self) -> bool {
        self.position.is_none()
    }

    pub fn advance(&mut self, outcome: Advance) -> Result<()> {
        let id = self.position.ok_or_else(|| Error::GraphConstructionError("cursor advanced past the end of the flow".to_string()))?;
        let node = self.net.node(id).ok_or_else(|| Error::GraphConstructionError("cursor points outside its net".to_string()))?;

        let edge: Edge = match (&node.kind, outcome) {
            (NodeKind::Step { next, .. }, Advance::Completed) => {
                self.steps += 1;
                *next
            }
            (NodeKind::Branch { if_true, if_false, .. }, Advance::Decided(decision)) => {
                if decision {
                    *if_true
                } else {
                    *if_false
                }
            }
            (NodeKind::LoopHead { exit, .. }, Advance::Decided(true)) => *exit,
            (NodeKind::LoopHead { body, .. }, Advance::Decided(false)) => {
                if let Some(rounds) = self.rounds.entry(id) {
                    *rounds.or_insert(0) += 1;
                }
                *body
            }
            (_, outcome) => return Err(Error::GraphConstructionError(format!("node '{}' cannot advance with {:?}", node.name(), outcome))),
        };

        self.position = edge.target;
        Ok(())
    }

    /// Loop heads enclosing the current node, innermost first.
    fn enclosing_loops(&self) -> impl Iterator<Item = (NodeId, &LoopOptions)> + '_ {
        let first = self.current_node().and_then(|node| node.enclosing_loop);
        std::iter::successors(first, |head| self.net.node(*head).and_then(|node| node.enclosing_loop)).filter_map(|head| match self.net.node(head) {
            Some(NetNode { kind: NodeKind::LoopHead { options, .. }, .. }) => Some((head, options)),
            _ => None,
        })
    }

    /// Options of the innermost loop that names its element id key.
    pub fn element_loop(&self) -> Option<&LoopOptions> {
        self.enclosing_loops().map(|(_, options)| options).find(|options| options.element_id.is_some())
    }

    /// Options of the innermost enclosing loop that skips failed elements.
    pub fn skipping_loop(&self) -> Option<&LoopOptions> {
        self.enclosing_loops().map(|(_, options)| options).find(|options| options.policy == ElementFailurePolicy::Skip)
    }

    /// Abandons the current element: moves back to the head of the innermost
    /// enclosing loop with the `Skip` policy. Returns false when there is none.
    pub fn skip_element(&mut self) -> bool {
        let head = self.enclosing_loops().find(|(_, options)| options.policy == ElementFailurePolicy::Skip).map(|(head, _)| head);
        match head {
            Some(head) => {
                self.position = Some(head);
                true
            }
            None => false,
        }
    }

    pub fn steps_executed(&self) -> usize {
        self.steps
    }

    /// Body runs started by the given loop head.
    pub fn rounds_of(&self, head: NodeId) -> usize {
        self.rounds.get(head).copied().unwrap_or(0)
    }

    /// Body runs started across every loop of the net.
    pub fn loop_rounds(&self) -> usize {
        self.rounds.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::{Action, ActionContext, Condition};
    use crate::domain::namespace::PartialUpdate;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Noop(&'static str);

    #[async_trait]
    impl Action for Noop {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: &ActionContext) -> Result<PartialUpdate> {
            Ok(PartialUpdate::new())
        }
    }

    #[derive(Debug)]
    struct Never;

    #[async_trait]
    impl Condition for Never {
        fn name(&self) -> &str {
            "never"
        }

        async fn check(&self, _ctx: &ActionContext) -> Result<bool> {
            Ok(false)
        }
    }

    fn name(cursor: &Cursor) -> &str {
        cursor.current_node().map(NetNode::name).unwrap_or("end")
    }

    #[test]
    fn test_walks_loop_and_counts_rounds() {
        let task = Task::repeat_until(Never, Task::step(Noop("a")) >> Noop("b")) >> Noop("after");
        let mut cursor = Cursor::build(&task).unwrap();
        let head = cursor.current().unwrap();

        for _ in 0..2 {
            cursor.advance(Advance::Decided(false)).unwrap();
            assert_eq!(name(&cursor), "a");
            cursor.advance(Advance::Completed).unwrap();
            cursor.advance(Advance::Completed).unwrap();
            assert_eq!(cursor.current(), Some(head));
        }
        cursor.advance(Advance::Decided(true)).unwrap();
        assert_eq!(name(&cursor), "after");
        cursor.advance(Advance::Completed).unwrap();

        assert!(cursor.is_finished());
        assert_eq!(cursor.steps_executed(), 5);
        assert_eq!(cursor.rounds_of(head), 2);
        assert_eq!(cursor.loop_rounds(), 2);
    }

    #[test]
    fn test_mismatched_outcome_is_rejected() {
        let mut cursor = Cursor::build(&Task::step(Noop("a"))).unwrap();

        assert!(cursor.advance(Advance::Decided(true)).is_err());
        cursor.advance(Advance::Completed).unwrap();
        assert!(cursor.advance(Advance::Completed).is_err());
    }

    #[test]
    fn test_skip_element_returns_to_skipping_loop() {
        let inner = Task::repeat_until(Never, Noop("inner"));
        let outer_options = LoopOptions { policy: ElementFailurePolicy::Skip, ..LoopOptions::default() };
        let task = Task::repeat_until(Never, Task::step(Noop("outer")) >> inner).with_loop_options(outer_options);
        let mut cursor = Cursor::build(&task).unwrap();
        let outer_head = cursor.current().unwrap();

        cursor.advance(Advance::Decided(false)).unwrap();
        cursor.advance(Advance::Completed).unwrap();
        cursor.advance(Advance::Decided(false)).unwrap();
        assert_eq!(name(&cursor), "inner");

        assert!(cursor.skipping_loop().is_some());
        assert!(cursor.skip_element());
        assert_eq!(cursor.current(), Some(outer_head));
    }

    #[test]
    fn test_no_skip_outside_skipping_loop() {
        let mut cursor = Cursor::build(&Task::repeat_until(Never, Noop("body"))).unwrap();
        cursor.advance(Advance::Decided(false)).unwrap();

        assert!(cursor.element_loop().is_none());
        assert!(!cursor.skip_element());
    }
}
