//! Agent arena: nodes keyed by id, with parent/child and collaboration edges

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentId, AgentState, Budget, TerminationReason, TerminationResult};

/// One agent in the orchestration graph
#[derive(Debug)]
pub struct AgentNode {
    pub id: AgentId,
    pub name: String,
    pub objective: String,
    pub parent: Option<AgentId>,
    pub children: Vec<AgentId>,
    pub state: AgentState,
    pub budget: Budget,
    pub token: CancellationToken,
    pub result: Option<TerminationResult>,
    pub created_at: DateTime<Utc>,
    /// Admission slot; held only while the agent is Running
    pub permit: Option<OwnedSemaphorePermit>,
    /// Children whose results were already handed to this agent
    pub delivered: BTreeSet<AgentId>,
    pub current_tool: Option<String>,
}

impl AgentNode {
    pub fn new(
        id: AgentId,
        name: impl Into<String>,
        objective: impl Into<String>,
        parent: Option<AgentId>,
        budget: Budget,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            objective: objective.into(),
            parent,
            children: Vec::new(),
            state: AgentState::Pending,
            budget,
            token,
            result: None,
            created_at: Utc::now(),
            permit: None,
            delivered: BTreeSet::new(),
            current_tool: None,
        }
    }
}

/// Read-only view of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub name: String,
    pub objective: String,
    pub parent: Option<AgentId>,
    pub children: Vec<AgentId>,
    pub state: AgentState,
    pub reason: Option<TerminationReason>,
    pub steps_used: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&AgentNode> for AgentSnapshot {
    fn from(node: &AgentNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            objective: node.objective.clone(),
            parent: node.parent.clone(),
            children: node.children.clone(),
            state: node.state,
            reason: node.result.as_ref().map(|r| r.reason.clone()),
            steps_used: node.result.as_ref().map_or(0, |r| r.steps_used),
            created_at: node.created_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct AgentArena {
    nodes: HashMap<AgentId, AgentNode>,
    /// Insertion order, for stable rendering
    order: Vec<AgentId>,
    /// Undirected; each pair stored smaller id first
    collaborations: BTreeSet<(AgentId, AgentId)>,
}

impl AgentArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and wire it under its parent
    pub fn insert(&mut self, node: AgentNode) {
        if let Some(parent) = node.parent.as_ref().and_then(|p| self.nodes.get_mut(p)) {
            parent.children.push(node.id.clone());
        }
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn get(&self, id: &AgentId) -> Option<&AgentNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &AgentId) -> Option<&mut AgentNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in admission order
    pub fn iter(&self) -> impl Iterator<Item = &AgentNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn root(&self) -> Option<&AgentNode> {
        self.iter().find(|n| n.parent.is_none())
    }

    /// All descendants of `id`, children before parents, `id` excluded
    pub fn descendants_post_order(&self, id: &AgentId) -> Vec<AgentId> {
        let mut out = Vec::new();
        let mut stack: Vec<(AgentId, bool)> = self
            .nodes
            .get(id)
            .map(|n| n.children.iter().rev().map(|c| (c.clone(), false)).collect())
            .unwrap_or_default();

        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                out.push(current);
                continue;
            }
            stack.push((current.clone(), true));
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev().map(|c| (c.clone(), false)));
            }
        }
        out
    }

    /// Children of `id` not yet terminal
    pub fn live_children(&self, id: &AgentId) -> Vec<AgentId> {
        self.nodes
            .get(id)
            .map(|n| {
                n.children
                    .iter()
                    .filter(|c| self.nodes.get(*c).is_some_and(|c| !c.state.is_terminal()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `id` and every descendant are terminal
    pub fn subtree_terminal(&self, id: &AgentId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.state.is_terminal())
            && self
                .descendants_post_order(id)
                .iter()
                .all(|d| self.nodes.get(d).is_some_and(|n| n.state.is_terminal()))
    }

    pub fn count_in(&self, state: AgentState) -> usize {
        self.nodes.values().filter(|n| n.state == state).count()
    }

    /// Agents currently holding an admission slot
    pub fn holding_permits(&self) -> usize {
        self.nodes.values().filter(|n| n.permit.is_some()).count()
    }

    /// Record an undirected collaboration edge; self-edges are ignored
    pub fn link(&mut self, a: &AgentId, b: &AgentId) {
        if a == b {
            return;
        }
        let pair = if a < b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        self.collaborations.insert(pair);
    }

    pub fn collaborators(&self, id: &AgentId) -> Vec<AgentId> {
        self.collaborations
            .iter()
            .filter_map(|(a, b)| {
                if a == id {
                    Some(b.clone())
                } else if b == id {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn collaborations(&self) -> impl Iterator<Item = &(AgentId, AgentId)> {
        self.collaborations.iter()
    }

    pub fn snapshot(&self) -> Vec<AgentSnapshot> {
        self.iter().map(AgentSnapshot::from).collect()
    }

    /// Tree view with states, marking `viewer`, followed by collaboration edges
    pub fn render(&self, viewer: Option<&AgentId>) -> String {
        let mut out = String::from("=== AGENT GRAPH ===\n");
        let Some(root) = self.root() else {
            out.push_str("(empty)\n");
            return out;
        };

        let mut stack = vec![(root.id.clone(), 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let marker = if viewer == Some(&node.id) { "  <- you" } else { "" };
            let tool = node
                .current_tool
                .as_deref()
                .map(|t| format!(" [{t}]"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{}- {} ({}) {}{}{}",
                "  ".repeat(depth),
                node.name,
                node.id,
                node.state,
                tool,
                marker
            );
            stack.extend(node.children.iter().rev().map(|c| (c.clone(), depth + 1)));
        }

        if !self.collaborations.is_empty() {
            out.push_str("\nCollaborations:\n");
            for (a, b) in &self.collaborations {
                let _ = writeln!(out, "  {a} <-> {b}");
            }
        }
        out
    }
}
