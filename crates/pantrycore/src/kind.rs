use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::payload::TriggerEvent;

/// The closed set of node kinds a flow may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    ExpirationTrigger,
    InventoryStatusTrigger,
    ConditionalBranch,
    UpdateData,
    GenerateRecipe,
    SendNotification,
    WebhookDelivery,
    PartnerIntegration,
}

impl NodeKind {
    pub const ALL: [NodeKind; 8] = [
        NodeKind::ExpirationTrigger,
        NodeKind::InventoryStatusTrigger,
        NodeKind::ConditionalBranch,
        NodeKind::UpdateData,
        NodeKind::GenerateRecipe,
        NodeKind::SendNotification,
        NodeKind::WebhookDelivery,
        NodeKind::PartnerIntegration,
    ];

    /// Wire name used in the flow JSON `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::ExpirationTrigger => "ExpirationTrigger",
            NodeKind::InventoryStatusTrigger => "InventoryStatusTrigger",
            NodeKind::ConditionalBranch => "ConditionalBranch",
            NodeKind::UpdateData => "UpdateData",
            NodeKind::GenerateRecipe => "GenerateRecipe",
            NodeKind::SendNotification => "SendNotification",
            NodeKind::WebhookDelivery => "WebhookDelivery",
            NodeKind::PartnerIntegration => "PartnerIntegration",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            NodeKind::ExpirationTrigger | NodeKind::InventoryStatusTrigger => Capability::Trigger,
            NodeKind::ConditionalBranch => Capability::Condition,
            NodeKind::UpdateData | NodeKind::GenerateRecipe => Capability::Enrichment,
            NodeKind::SendNotification
            | NodeKind::WebhookDelivery
            | NodeKind::PartnerIntegration => Capability::Action,
        }
    }

    /// The event a trigger kind responds to. `None` for non-triggers.
    pub fn trigger_event(&self) -> Option<TriggerEvent> {
        match self {
            NodeKind::ExpirationTrigger => Some(TriggerEvent::Expiration),
            NodeKind::InventoryStatusTrigger => Some(TriggerEvent::InventoryStatus),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Capability class; decides edge rules and how the interpreter treats a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Trigger,
    Condition,
    Enrichment,
    Action,
}

impl Capability {
    /// Maximum outgoing edges. Conditions are checked by handle instead.
    pub fn max_out_degree(&self) -> Option<usize> {
        match self {
            Capability::Enrichment | Capability::Action => Some(1),
            Capability::Trigger | Capability::Condition => None,
        }
    }
}

/// Editor field widget, which also decides validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Dropdown,
    Textarea,
    VariablePicker,
}

/// One entry of a node kind's config contract.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldSpec {
    pub key: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    pub options: &'static [&'static str],
}

impl FieldSpec {
    pub const fn required(key: &'static str, field_type: FieldType) -> Self {
        Self {
            key,
            field_type,
            required: true,
            options: &[],
        }
    }

    pub const fn optional(key: &'static str, field_type: FieldType) -> Self {
        Self {
            key,
            field_type,
            required: false,
            options: &[],
        }
    }

    pub const fn with_options(self, options: &'static [&'static str]) -> Self {
        Self { options, ..self }
    }
}
