use crate::flow::{FlowId, NodeId};
use crate::kind::NodeKind;
use crate::payload::{RunMode, TriggerEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type RunId = Uuid;

/// Events emitted while a flow runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    RunStarted {
        run_id: RunId,
        flow_id: FlowId,
        trigger_event: TriggerEvent,
        mode: RunMode,
        timestamp: DateTime<Utc>,
    },
    NodeEntered {
        run_id: RunId,
        node_id: NodeId,
        kind: NodeKind,
        timestamp: DateTime<Utc>,
    },
    DemoFallback {
        run_id: RunId,
        node_id: NodeId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ActionDispatched {
        run_id: RunId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    ActionFailed {
        run_id: RunId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ActionSkipped {
        run_id: RunId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        visited: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Fan-out of flow events to any number of subscribers.
pub struct EventBus {
    sender: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }

    /// Send to current subscribers. Having none is fine.
    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
