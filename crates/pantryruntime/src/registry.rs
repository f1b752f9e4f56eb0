use pantrycore::{Capability, FieldSpec, FieldType, FlowError, NodeKind, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const OPERATORS: &[&str] = &["==", "!=", ">", "<", ">=", "<="];
const STATUSES: &[&str] = &["low_stock", "out_of_stock", "expired", "in_stock"];
const CHANNELS: &[&str] = &["email", "sms"];
const METHODS: &[&str] = &["POST", "PUT", "PATCH", "GET"];
const PARTNERS: &[&str] = &["instacart", "toast", "square"];
const PARTNER_ACTIONS: &[&str] = &["reorder", "sync_inventory", "flag_item"];

const EXPIRATION_TRIGGER_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("timeOffset", FieldType::Number),
    FieldSpec::optional("filterCategory", FieldType::Text),
];

const INVENTORY_STATUS_TRIGGER_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("status", FieldType::Dropdown).with_options(STATUSES),
    FieldSpec::optional("filterCategory", FieldType::Text),
    FieldSpec::optional("threshold", FieldType::Number),
];

const CONDITIONAL_BRANCH_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("checkField", FieldType::VariablePicker),
    FieldSpec::required("operator", FieldType::Dropdown).with_options(OPERATORS),
    FieldSpec::required("checkValue", FieldType::Text),
];

const UPDATE_DATA_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("targetField", FieldType::VariablePicker),
    FieldSpec::required("value", FieldType::Textarea),
];

const GENERATE_RECIPE_FIELDS: &[FieldSpec] = &[
    FieldSpec::optional("prompt", FieldType::Textarea),
    FieldSpec::optional("servings", FieldType::Number),
    FieldSpec::optional("credentialId", FieldType::Text),
];

const SEND_NOTIFICATION_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("channel", FieldType::Dropdown).with_options(CHANNELS),
    FieldSpec::required("recipient", FieldType::Text),
    FieldSpec::optional("subject", FieldType::Text),
    FieldSpec::required("message", FieldType::Textarea),
    FieldSpec::optional("credentialId", FieldType::Text),
];

const WEBHOOK_DELIVERY_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("targetUrl", FieldType::Text),
    FieldSpec::optional("method", FieldType::Dropdown).with_options(METHODS),
    FieldSpec::optional("includePayload", FieldType::Boolean),
];

const PARTNER_INTEGRATION_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("partner", FieldType::Dropdown).with_options(PARTNERS),
    FieldSpec::required("action", FieldType::Dropdown).with_options(PARTNER_ACTIONS),
    FieldSpec::required("credentialId", FieldType::Text),
];

/// Config contract of a node kind.
pub fn schema_for(kind: NodeKind) -> &'static [FieldSpec] {
    match kind {
        NodeKind::ExpirationTrigger => EXPIRATION_TRIGGER_FIELDS,
        NodeKind::InventoryStatusTrigger => INVENTORY_STATUS_TRIGGER_FIELDS,
        NodeKind::ConditionalBranch => CONDITIONAL_BRANCH_FIELDS,
        NodeKind::UpdateData => UPDATE_DATA_FIELDS,
        NodeKind::GenerateRecipe => GENERATE_RECIPE_FIELDS,
        NodeKind::SendNotification => SEND_NOTIFICATION_FIELDS,
        NodeKind::WebhookDelivery => WEBHOOK_DELIVERY_FIELDS,
        NodeKind::PartnerIntegration => PARTNER_INTEGRATION_FIELDS,
    }
}

fn describe(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::ExpirationTrigger => "Fires when an item is within timeOffset days of expiring",
        NodeKind::InventoryStatusTrigger => "Fires when an item reaches a stock status",
        NodeKind::ConditionalBranch => "Routes to the true or false branch by comparing a payload field",
        NodeKind::UpdateData => "Writes a value into related_data",
        NodeKind::GenerateRecipe => "Asks the AI provider for a recipe that uses the item",
        NodeKind::SendNotification => "Sends an email or SMS",
        NodeKind::WebhookDelivery => "Delivers the payload to an HTTP endpoint",
        NodeKind::PartnerIntegration => "Pushes the item to a partner integration",
    }
}

/// Metadata about a node kind
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetadata {
    pub kind: NodeKind,
    pub description: String,
    pub capability: Capability,
    pub fields: &'static [FieldSpec],
}

impl NodeMetadata {
    pub fn builtin(kind: NodeKind) -> Self {
        Self {
            kind,
            description: describe(kind).to_string(),
            capability: kind.capability(),
            fields: schema_for(kind),
        }
    }
}

/// Comparison operator of a condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            ">=" => Ok(Operator::Ge),
            "<=" => Ok(Operator::Le),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationTriggerConfig {
    pub time_offset: f64,
    #[serde(default)]
    pub filter_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryStatusTriggerConfig {
    pub status: String,
    #[serde(default)]
    pub filter_category: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalBranchConfig {
    pub check_field: String,
    pub operator: Operator,
    pub check_value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDataConfig {
    pub target_field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRecipeConfig {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub servings: Option<f64>,
    #[serde(default)]
    pub credential_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationConfig {
    pub channel: Channel,
    pub recipient: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default)]
    pub credential_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDeliveryConfig {
    pub target_url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub include_payload: Option<bool>,
}

impl WebhookDeliveryConfig {
    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or("POST")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerIntegrationConfig {
    pub partner: String,
    pub action: String,
    pub credential_id: String,
}

/// Validated, typed config of a node; one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    ExpirationTrigger(ExpirationTriggerConfig),
    InventoryStatusTrigger(InventoryStatusTriggerConfig),
    ConditionalBranch(ConditionalBranchConfig),
    UpdateData(UpdateDataConfig),
    GenerateRecipe(GenerateRecipeConfig),
    SendNotification(SendNotificationConfig),
    WebhookDelivery(WebhookDeliveryConfig),
    PartnerIntegration(PartnerIntegrationConfig),
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::ExpirationTrigger(_) => NodeKind::ExpirationTrigger,
            NodeConfig::InventoryStatusTrigger(_) => NodeKind::InventoryStatusTrigger,
            NodeConfig::ConditionalBranch(_) => NodeKind::ConditionalBranch,
            NodeConfig::UpdateData(_) => NodeKind::UpdateData,
            NodeConfig::GenerateRecipe(_) => NodeKind::GenerateRecipe,
            NodeConfig::SendNotification(_) => NodeKind::SendNotification,
            NodeConfig::WebhookDelivery(_) => NodeKind::WebhookDelivery,
            NodeConfig::PartnerIntegration(_) => NodeKind::PartnerIntegration,
        }
    }
}

/// Registry of available node kinds
pub struct NodeRegistry {
    kinds: HashMap<NodeKind, NodeMetadata>,
}

impl NodeRegistry {
    /// An empty registry. Most callers want [`NodeRegistry::builtin`].
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Registry with every built-in kind registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for kind in NodeKind::ALL {
            registry.register(NodeMetadata::builtin(kind));
        }
        registry
    }

    pub fn register(&mut self, metadata: NodeMetadata) {
        tracing::debug!("Registering node kind: {}", metadata.kind);
        self.kinds.insert(metadata.kind, metadata);
    }

    /// Resolve a wire `type` string to a registered kind.
    pub fn resolve_kind(&self, node_id: &str, node_type: &str) -> Result<NodeKind, FlowError> {
        node_type
            .parse::<NodeKind>()
            .ok()
            .filter(|kind| self.kinds.contains_key(kind))
            .ok_or_else(|| FlowError::UnknownNodeKind {
                node_id: node_id.to_string(),
                kind: node_type.to_string(),
            })
    }

    pub fn schema_for(&self, kind: NodeKind) -> Option<&'static [FieldSpec]> {
        self.kinds.get(&kind).map(|m| m.fields)
    }

    /// Check a raw config against the kind's field specs and produce the
    /// typed config.
    pub fn validate_config(
        &self,
        node_id: &str,
        kind: NodeKind,
        raw: &Map<String, Value>,
    ) -> Result<NodeConfig, FlowError> {
        let fields = self
            .schema_for(kind)
            .ok_or_else(|| FlowError::UnknownNodeKind {
                node_id: node_id.to_string(),
                kind: kind.to_string(),
            })?;

        let normalized = Value::Object(normalize(node_id, fields, raw)?);
        let typed = |e: serde_json::Error| ValidationError::new(node_id, "config", e.to_string());

        let config = match kind {
            NodeKind::ExpirationTrigger => {
                NodeConfig::ExpirationTrigger(serde_json::from_value(normalized).map_err(typed)?)
            }
            NodeKind::InventoryStatusTrigger => NodeConfig::InventoryStatusTrigger(
                serde_json::from_value(normalized).map_err(typed)?,
            ),
            NodeKind::ConditionalBranch => {
                NodeConfig::ConditionalBranch(serde_json::from_value(normalized).map_err(typed)?)
            }
            NodeKind::UpdateData => {
                NodeConfig::UpdateData(serde_json::from_value(normalized).map_err(typed)?)
            }
            NodeKind::GenerateRecipe => {
                NodeConfig::GenerateRecipe(serde_json::from_value(normalized).map_err(typed)?)
            }
            NodeKind::SendNotification => {
                NodeConfig::SendNotification(serde_json::from_value(normalized).map_err(typed)?)
            }
            NodeKind::WebhookDelivery => {
                NodeConfig::WebhookDelivery(serde_json::from_value(normalized).map_err(typed)?)
            }
            NodeKind::PartnerIntegration => {
                NodeConfig::PartnerIntegration(serde_json::from_value(normalized).map_err(typed)?)
            }
        };
        Ok(config)
    }

    /// Get all registered node kinds, in declaration order
    pub fn list_node_kinds(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .into_iter()
            .filter(|k| self.kinds.contains_key(k))
            .collect()
    }

    pub fn get_metadata(&self, kind: NodeKind) -> Option<&NodeMetadata> {
        self.kinds.get(&kind)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Apply field rules, returning only the declared keys with coerced values.
fn normalize(
    node_id: &str,
    fields: &[FieldSpec],
    raw: &Map<String, Value>,
) -> Result<Map<String, Value>, ValidationError> {
    let mut out = Map::new();

    for spec in fields {
        let err = |reason: String| ValidationError::new(node_id, spec.key, reason);

        let value = match raw.get(spec.key) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(err("is required".into()));
                }
                continue;
            }
            Some(v) => v,
        };

        let normalized = match spec.field_type {
            FieldType::Number => {
                let n = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .filter(|n| n.is_finite())
                .ok_or_else(|| err(format!("must be a number, got {}", value)))?;
                if n < 0.0 {
                    return Err(err("must not be negative".into()));
                }
                Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or_else(|| err("must be a finite number".into()))?
            }
            FieldType::Boolean => match value {
                Value::Bool(_) => value.clone(),
                other => return Err(err(format!("must be a boolean, got {}", other))),
            },
            _ => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => return Err(err(format!("must be a string, got {}", other))),
                };
                if text.trim().is_empty() {
                    if spec.required {
                        return Err(err("must not be empty".into()));
                    }
                    continue;
                }
                let text = match_option(spec, &text).map_err(err)?;
                if spec.key == "targetUrl" {
                    check_url(&text).map_err(err)?;
                }
                Value::String(text)
            }
        };

        out.insert(spec.key.to_string(), normalized);
    }

    Ok(out)
}

/// Dropdowns accept their options case-insensitively and store the
/// canonical spelling.
fn match_option(spec: &FieldSpec, text: &str) -> Result<String, String> {
    if spec.field_type != FieldType::Dropdown || spec.options.is_empty() {
        return Ok(text.to_string());
    }
    spec.options
        .iter()
        .find(|opt| opt.eq_ignore_ascii_case(text.trim()))
        .map(|opt| opt.to_string())
        .ok_or_else(|| format!("must be one of {:?}, got '{}'", spec.options, text))
}

fn check_url(text: &str) -> Result<(), String> {
    if text.len() < 5 {
        return Err("must be a URL of at least 5 characters".into());
    }
    url::Url::parse(text)
        .map(|_| ())
        .map_err(|e| format!("must be a scheme-qualified URL: {}", e))
}
