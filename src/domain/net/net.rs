use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::domain::action::{Action, Condition};
use crate::domain::net::task::{LoopOptions, Task};
use crate::error::{Error, Result};

new_key_type! {
    pub struct NodeId;
}

/// Connection to the next node. `target == None` is the end of the flow.
///
/// Edges from the last node of a loop body back to its head are flagged as
/// `loop_back`; every other edge points forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub target: Option<NodeId>,
    pub loop_back: bool,
}

impl Edge {
    pub const END: Edge = Edge { target: None, loop_back: false };

    fn to(node: NodeId) -> Edge {
        Edge { target: Some(node), loop_back: false }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Step { action: Arc<dyn Action>, next: Edge },
    Branch { condition: Arc<dyn Condition>, if_true: Edge, if_false: Edge },
    /// Evaluates `until`: true follows `exit`, false runs `body`.
    LoopHead { until: Arc<dyn Condition>, body: Edge, exit: Edge, options: LoopOptions },
}

#[derive(Debug, Clone)]
pub struct NetNode {
    pub kind: NodeKind,
    /// Head of the innermost loop whose body contains this node.
    pub enclosing_loop: Option<NodeId>,
}

impl NetNode {
    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Step { action, .. } => action.name(),
            NodeKind::Branch { condition, .. } => condition.name(),
            NodeKind::LoopHead { until, .. } => until.name(),
        }
    }

    pub fn edges(&self) -> Vec<Edge> {
        match &self.kind {
            NodeKind::Step { next, .. } => vec![*next],
            NodeKind::Branch { if_true, if_false, .. } => vec![*if_true, *if_false],
            NodeKind::LoopHead { body, exit, .. } => vec![*body, *exit],
        }
    }
}

/// A task tree compiled into an arena of nodes with a single entry.
#[derive(Debug)]
pub struct Net {
    nodes: SlotMap<NodeId, NetNode>,
    entry: NodeId,
}

impl Net {
    /// Compiles a task tree. Fails with `GraphConstructionError` on an
    /// alternative without condition, a loop without body or a flow without steps.
    pub fn compile(task: &Task) -> Result<Net> {
        if task.is_empty() {
            return Err(Error::GraphConstructionError("flow contains no steps".to_string()));
        }

        let mut nodes = SlotMap::with_key();
        let entry = compile_into(&mut nodes, task, Edge::END, None)?;
        let entry = entry.target.ok_or_else(|| Error::GraphConstructionError("flow has no entry node".to_string()))?;

        let net = Net { nodes, entry };
        net.validate()?;
        Ok(net)
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn node(&self, id: NodeId) -> Option<&NetNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with an edge to the end of the flow.
    pub fn terminals(&self) -> Vec<NodeId> {
        self.nodes.iter().filter(|(_, node)| node.edges().iter().any(|edge| edge.target.is_none())).map(|(id, _)| id).collect()
    }

    /// Checks that every edge targets a node of this net, that loop-back edges
    /// end at a loop head, and that the forward edges form no cycle.
    pub fn validate(&self) -> Result<()> {
        let mut in_degree: SecondaryMap<NodeId, usize> = self.nodes.keys().map(|id| (id, 0)).collect();

        for node in self.nodes.values() {
            for edge in node.edges() {
                let Some(target) = edge.target else { continue };
                let Some(target_node) = self.nodes.get(target) else {
                    return Err(Error::GraphConstructionError(format!("node '{}' points to a node outside the net", node.name())));
                };
                if edge.loop_back {
                    if !matches!(target_node.kind, NodeKind::LoopHead { .. }) {
                        return Err(Error::GraphConstructionError(format!("loop-back edge of '{}' does not end at a loop head", node.name())));
                    }
                } else if let Some(degree) = in_degree.get_mut(target) {
                    *degree += 1;
                }
            }
        }

        let mut ready: VecDeque<NodeId> = in_degree.iter().filter(|(_, degree)| **degree == 0).map(|(id, _)| id).collect();
        let mut visited = 0;
        while let Some(id) = ready.pop_front() {
            visited += 1;
            for target in self.nodes[id].edges().into_iter().filter(|edge| !edge.loop_back).filter_map(|edge| edge.target) {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(target);
                    }
                }
            }
        }

        if visited != self.nodes.len() {
            return Err(Error::GraphConstructionError("forward edges form a cycle".to_string()));
        }
        Ok(())
    }

    /// Human readable listing of the net in breadth-first order from the entry.
    pub fn describe(&self) -> Vec<String> {
        let mut order: HashMap<NodeId, usize> = HashMap::new();
        let mut queue = VecDeque::from([self.entry]);
        let mut listed = Vec::new();

        while let Some(id) = queue.pop_front() {
            if order.contains_key(&id) {
                continue;
            }
            order.insert(id, listed.len());
            listed.push(id);
            for edge in self.nodes[id].edges() {
                if let Some(target) = edge.target {
                    queue.push_back(target);
                }
            }
        }

        let label = |edge: Edge| match edge.target {
            None => "end".to_string(),
            Some(target) => format!("#{}{}", order.get(&target).copied().unwrap_or_default(), if edge.loop_back { " (loop)" } else { "" }),
        };

        listed
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let node = &self.nodes[*id];
                match &node.kind {
                    NodeKind::Step { next, .. } => format!("#{} step {} -> {}", index, node.name(), label(*next)),
                    NodeKind::Branch { if_true, if_false, .. } => format!("#{} branch {} ? {} : {}", index, node.name(), label(*if_true), label(*if_false)),
                    NodeKind::LoopHead { body, exit, options, .. } => {
                        format!("#{} loop until {} [{:?}] body {} exit {}", index, node.name(), options.policy, label(*body), label(*exit))
                    }
                }
            })
            .collect()
    }
}

/// Compiles `task` so that it continues with `next`; returns the edge entering it.
/// Built back to front, so an empty task simply returns `next`.
fn compile_into(nodes: &mut SlotMap<NodeId, NetNode>, task: &Task, next: Edge, enclosing_loop: Option<NodeId>) -> Result<Edge> {
    match task {
        Task::Step(action) => {
            let id = nodes.insert(NetNode { kind: NodeKind::Step { action: action.clone(), next }, enclosing_loop });
            Ok(Edge::to(id))
        }
        Task::Sequence(tasks) => tasks.iter().rev().try_fold(next, |next, task| compile_into(nodes, task, next, enclosing_loop)),
        Task::Alternative { condition, if_true, if_false } => {
            let condition = condition
                .clone()
                .ok_or_else(|| Error::GraphConstructionError("alternative has no condition, use when() to set one".to_string()))?;
            let if_true = compile_into(nodes, if_true, next, enclosing_loop)?;
            let if_false = compile_into(nodes, if_false, next, enclosing_loop)?;
            let id = nodes.insert(NetNode { kind: NodeKind::Branch { condition, if_true, if_false }, enclosing_loop });
            Ok(Edge::to(id))
        }
        Task::Repeat { until, body, options } => {
            if body.is_empty() {
                return Err(Error::GraphConstructionError(format!("loop until '{}' has an empty body", until.name())));
            }

            let head = nodes.insert(NetNode {
                kind: NodeKind::LoopHead { until: until.clone(), body: next, exit: next, options: options.clone() },
                enclosing_loop,
            });
            let body_entry = compile_into(nodes, body, Edge { target: Some(head), loop_back: true }, Some(head))?;
            if let NodeKind::LoopHead { body, .. } = &mut nodes[head].kind {
                *body = body_entry;
            }
            Ok(Edge::to(head))
        }
    }
}
