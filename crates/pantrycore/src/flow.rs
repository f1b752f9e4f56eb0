use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::kind::NodeKind;
use crate::payload::TriggerEvent;

pub type FlowId = String;
pub type NodeId = String;

/// Complete flow definition, as saved by the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub last_published: Option<DateTime<Utc>>,
}

impl Flow {
    pub fn new(id: impl Into<FlowId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            is_active: false,
            last_published: None,
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Plain edge between two nodes (no branch handle).
    pub fn connect(&mut self, source: &str, target: &str) {
        self.edges.push(Edge {
            id: format!("e-{}-{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
            edge_type: None,
        });
    }

    /// Labeled edge out of a condition node.
    pub fn connect_branch(&mut self, source: &str, branch: bool, target: &str) {
        let handle = if branch { "true" } else { "false" };
        self.edges.push(Edge {
            id: format!("e-{}-{}-{}", source, handle, target),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: Some(handle.to_string()),
            target_handle: None,
            edge_type: None,
        });
    }

    pub fn publish(&mut self, at: DateTime<Utc>) {
        self.is_active = true;
        self.last_published = Some(at);
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Distinct events the flow's trigger nodes listen for, in node order.
    /// Nodes with unknown kinds are ignored here; validation reports them.
    pub fn trigger_events(&self) -> Vec<TriggerEvent> {
        let mut events = Vec::new();
        for node in &self.nodes {
            let event = node
                .node_type
                .parse::<NodeKind>()
                .ok()
                .and_then(|k| k.trigger_event());
            if let Some(event) = event {
                if !events.contains(&event) {
                    events.push(event);
                }
            }
        }
        events
    }
}

/// Node specification in a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            node_type: kind.as_str().to_string(),
            position: Position::default(),
            config: Map::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Position { x, y };
        self
    }
}

/// Connection between nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<String>,
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
