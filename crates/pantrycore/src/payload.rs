use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::flow::NodeId;

/// Inventory event that starts a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Expiration,
    InventoryStatus,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::Expiration => "expiration",
            TriggerEvent::InventoryStatus => "inventory_status",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expiration" => Ok(TriggerEvent::Expiration),
            "inventory_status" => Ok(TriggerEvent::InventoryStatus),
            other => Err(format!("unknown trigger event: {}", other)),
        }
    }
}

/// Whether a run may reach real external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Test,
    Live,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub remaining_days: Option<i64>,
    #[serde(default)]
    pub quantity: Option<f64>,
}

/// Execution context threaded through a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub trigger_event: TriggerEvent,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub inventory_item: InventoryItem,
    #[serde(default)]
    pub related_data: Map<String, Value>,
}

impl Payload {
    pub fn new(trigger_event: TriggerEvent, item: InventoryItem, timestamp: DateTime<Utc>) -> Self {
        Self {
            trigger_event,
            timestamp,
            user_id: None,
            inventory_item: item,
            related_data: Map::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Merge one enrichment result into `related_data`, consuming the payload.
    pub fn merge_related(mut self, key: impl Into<String>, value: Value) -> Self {
        self.related_data.insert(key.into(), value);
        self
    }

    /// Resolve a dotted field path.
    ///
    /// Full paths (`inventory_item.category`, `related_data.note`) are tried
    /// first; a bare name falls back to the inventory item and then to
    /// `related_data`. JSON nulls count as missing.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let root = serde_json::to_value(self).ok()?;

        walk(&root, path)
            .or_else(|| root.get("inventory_item").and_then(|item| walk(item, path)))
            .or_else(|| root.get("related_data").and_then(|data| walk(data, path)))
            .filter(|v| !v.is_null())
            .cloned()
    }

    /// Replace `{{path}}` placeholders with payload values. Unresolved
    /// placeholders render as empty strings.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    if let Some(value) = self.lookup(&after[..end]) {
                        out.push_str(&display_value(&value));
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn walk<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(root, |current, segment| current.get(segment))
}

/// Strings render without quotes; everything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Counters collected during one run. Not part of the wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub triggers_matched: usize,
    pub actions_dispatched: usize,
    pub actions_failed: usize,
    pub duplicates_skipped: usize,
    pub demo_fallbacks: usize,
}

/// Result of one interpreter run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub trace: Vec<NodeId>,
    pub log: Vec<String>,
    pub final_payload: Payload,
    #[serde(skip)]
    pub stats: RunStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn milk() -> Payload {
        Payload::new(
            TriggerEvent::Expiration,
            InventoryItem {
                id: "item-101".into(),
                name: "Milk (Gallon)".into(),
                category: Some("Dairy".into()),
                remaining_days: Some(2),
                ..Default::default()
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_lookup_full_and_bare_paths() {
        let payload = milk().merge_related("note", json!("use soon"));

        assert_eq!(payload.lookup("inventory_item.category"), Some(json!("Dairy")));
        assert_eq!(payload.lookup("category"), Some(json!("Dairy")));
        assert_eq!(payload.lookup("remaining_days"), Some(json!(2)));
        assert_eq!(payload.lookup("related_data.note"), Some(json!("use soon")));
        assert_eq!(payload.lookup("note"), Some(json!("use soon")));
        assert_eq!(payload.lookup("trigger_event"), Some(json!("expiration")));
    }

    #[test]
    fn test_lookup_missing_and_null() {
        let payload = milk();
        assert_eq!(payload.lookup("location"), None);
        assert_eq!(payload.lookup("nope.deeper"), None);
        assert_eq!(payload.lookup(""), None);

        let mut uncategorized = milk();
        uncategorized.inventory_item.category = None;
        assert_eq!(uncategorized.lookup("category"), None);
        assert_eq!(uncategorized.lookup("inventory_item.category"), None);
    }

    #[test]
    fn test_render_placeholders() {
        let payload = milk();
        assert_eq!(
            payload.render("{{inventory_item.name}} expires in {{remaining_days}} days{{missing}}"),
            "Milk (Gallon) expires in 2 days"
        );
        assert_eq!(payload.render("unterminated {{name"), "unterminated {{name");
    }

    #[test]
    fn test_result_wire_format_omits_stats() {
        let result = ExecutionResult {
            trace: vec!["trigger-1".into()],
            log: vec!["entered".into()],
            final_payload: milk(),
            stats: RunStats {
                actions_dispatched: 1,
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["trace"], json!(["trigger-1"]));
        assert!(value.get("finalPayload").is_some());
        assert!(value.get("stats").is_none());
        assert_eq!(value["finalPayload"]["inventory_item"]["id"], json!("item-101"));
    }
}
