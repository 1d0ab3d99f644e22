//! Workflow definitions: the persisted record the store and scheduler share.
//!
//! The graph is opaque here: nodes and edges keep every field the editor
//! sends, only `id` / `source` / `target` are typed.

use chrono::{DateTime, Utc};
use flowdeck_core::{FlowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schedule::{LastRun, ScheduleDescriptor};

/// A step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowNode {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            extra: Map::new(),
        }
    }

    /// Node type as set by the editor, if any.
    pub fn kind(&self) -> Option<&str> {
        self.extra.get("type").and_then(Value::as_str)
    }
}

/// A connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowEdge {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            id: Some(format!("{source}->{target}")),
            source: source.to_string(),
            target: target.to_string(),
            extra: Map::new(),
        }
    }
}

/// Nodes and edges, persisted flat as `nodes` / `edges`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self { nodes, edges }
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving `id`.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }
}

/// A stored, schedulable workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub schedule: ScheduleDescriptor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Build a fresh record from user input.
    /// Scheduler-maintained schedule fields are never taken from input.
    pub fn from_new(id: String, new: NewWorkflow, now: DateTime<Utc>) -> Self {
        let mut schedule = ScheduleDescriptor::none();
        schedule.merge_user_edit(new.schedule);
        Self {
            id,
            name: new.name.trim().to_string(),
            description: new.description,
            graph: new.graph,
            schedule,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_parts(&self.name, &self.graph, &self.schedule)
    }

    /// Next instant the schedule is eligible to fire.
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.schedule.next_fire_at(self.updated_at)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule.is_due(now, self.updated_at)
    }

    /// Stamp a mutation, keeping `updated_at >= created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }
}

/// User input for `create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewWorkflow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub schedule: ScheduleDescriptor,
}

impl NewWorkflow {
    pub fn new(name: &str, graph: WorkflowGraph) -> Self {
        Self {
            name: name.to_string(),
            graph,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleDescriptor) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_parts(&self.name, &self.graph, &self.schedule)
    }
}

fn validate_parts(name: &str, graph: &WorkflowGraph, schedule: &ScheduleDescriptor) -> Result<()> {
    if name.trim().is_empty() {
        return Err(FlowError::validation("Workflow name is required"));
    }
    if graph.nodes.is_empty() {
        return Err(FlowError::validation("Workflow must have at least one node"));
    }
    schedule.validate()
}

/// Partial update. Only fields that are set are written.
///
/// `schedule` is a user edit and is merged without touching the
/// scheduler-maintained fields; `fired_at` / `last_run` are set only by the
/// scheduler and never deserialized from a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Option<Vec<WorkflowNode>>,
    #[serde(default)]
    pub edges: Option<Vec<WorkflowEdge>>,
    #[serde(default)]
    pub schedule: Option<ScheduleDescriptor>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(skip)]
    pub fired_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_run: Option<LastRun>,
}

impl WorkflowPatch {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn fired_at(mut self, at: DateTime<Utc>) -> Self {
        self.fired_at = Some(at);
        self
    }

    pub fn last_run(mut self, run: LastRun) -> Self {
        self.last_run = Some(run);
        self
    }

    pub fn schedule(mut self, schedule: ScheduleDescriptor) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.nodes.is_none()
            && self.edges.is_none()
            && self.schedule.is_none()
            && self.enabled.is_none()
            && self.fired_at.is_none()
            && self.last_run.is_none()
    }

    /// Apply onto `def`. Does not stamp `updated_at`.
    ///
    /// A user edit validates the resulting record. Scheduler bookkeeping
    /// (`fired_at`, `last_run`, disabling) is always accepted so that a
    /// stored record that no longer validates can still be retired.
    pub fn apply(self, def: &mut WorkflowDefinition) -> Result<()> {
        let edits_content = self.name.is_some()
            || self.description.is_some()
            || self.nodes.is_some()
            || self.edges.is_some()
            || self.schedule.is_some();
        let enables = self.enabled == Some(true);
        if let Some(name) = self.name {
            def.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            def.description = description;
        }
        if let Some(nodes) = self.nodes {
            def.graph.nodes = nodes;
        }
        if let Some(edges) = self.edges {
            def.graph.edges = edges;
        }
        if let Some(schedule) = self.schedule {
            def.schedule.merge_user_edit(schedule);
        }
        if let Some(enabled) = self.enabled {
            def.schedule.enabled = enabled;
            def.schedule = std::mem::take(&mut def.schedule).normalized();
        }
        if let Some(at) = self.fired_at {
            def.schedule.last_fired_at = Some(at);
        }
        if let Some(run) = self.last_run {
            def.schedule.last_run = Some(run);
        }
        if edits_content {
            def.validate()
        } else if enables {
            def.schedule.validate()
        } else {
            Ok(())
        }
    }
}

/// Lightweight listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: ScheduleDescriptor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub node_count: usize,
    pub edge_count: usize,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(def: &WorkflowDefinition) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            schedule: def.schedule.clone(),
            created_at: def.created_at,
            updated_at: def.updated_at,
            node_count: def.graph.nodes.len(),
            edge_count: def.graph.edges.len(),
        }
    }
}

/// Fresh workflow identifier.
pub fn new_workflow_id() -> String {
    format!("workflow-{}", uuid::Uuid::new_v4().simple())
}

/// Identifiers are restricted to `[A-Za-z0-9_-]`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
