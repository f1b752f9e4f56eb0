#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pantrycore::{
    AdapterError, CompletionAdapter, Credential, CredentialKind, CredentialStore, Flow, FlowStore,
    InventoryItem, NodeKind, NodeSpec, NotificationAdapter, PartnerAdapter, Payload, StoreError,
    TriggerEvent, WebhookAdapter,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

pub fn milk() -> InventoryItem {
    InventoryItem {
        id: "item-101".into(),
        name: "Milk (Gallon)".into(),
        category: Some("Dairy".into()),
        location: Some("Walk-in cooler".into()),
        status: Some("in_stock".into()),
        remaining_days: Some(2),
        quantity: Some(3.0),
    }
}

pub fn payload(item: InventoryItem) -> Payload {
    Payload::new(TriggerEvent::Expiration, item, Utc::now())
}

/// trigger-1 -> cond-1 (category == Dairy)
///   true  -> recipe-1 -> notify-1
///   false -> update-1
pub fn sample_flow() -> Flow {
    let mut flow = Flow::new("flow-1", "Dairy spoilage alert");
    flow.add_node(NodeSpec::new("trigger-1", NodeKind::ExpirationTrigger).with_config("timeOffset", 3));
    flow.add_node(
        NodeSpec::new("cond-1", NodeKind::ConditionalBranch)
            .with_config("checkField", "inventory_item.category")
            .with_config("operator", "==")
            .with_config("checkValue", "Dairy"),
    );
    flow.add_node(NodeSpec::new("recipe-1", NodeKind::GenerateRecipe).with_config("servings", 4));
    flow.add_node(
        NodeSpec::new("notify-1", NodeKind::SendNotification)
            .with_config("channel", "email")
            .with_config("recipient", "chef@example.com")
            .with_config("subject", "{{name}} expires soon")
            .with_config("message", "Try this: {{related_data.recipe_suggestion}}"),
    );
    flow.add_node(
        NodeSpec::new("update-1", NodeKind::UpdateData)
            .with_config("targetField", "note")
            .with_config("value", "{{name}} is not dairy"),
    );
    flow.connect("trigger-1", "cond-1");
    flow.connect_branch("cond-1", true, "recipe-1");
    flow.connect("recipe-1", "notify-1");
    flow.connect_branch("cond-1", false, "update-1");
    flow.publish(Utc::now());
    flow
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String, String)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationAdapter for RecordingNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), AdapterError> {
        if self.fail {
            return Err(AdapterError::Failed("smtp unavailable".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<(), AdapterError> {
        self.send_email(to, "", body).await
    }
}

#[derive(Default)]
pub struct RecordingWebhook {
    pub calls: Mutex<Vec<(String, String, Value)>>,
    pub fail: bool,
    pub delay: Option<Duration>,
}

impl RecordingWebhook {
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookAdapter for RecordingWebhook {
    async fn call_webhook(&self, url: &str, method: &str, body: &Value) -> Result<(), AdapterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AdapterError::Failed("HTTP 500".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), method.to_string(), body.clone()));
        Ok(())
    }
}

pub struct FixedCompletion {
    pub reply: String,
    pub calls: AtomicUsize,
    pub keys: Mutex<Vec<String>>,
}

impl FixedCompletion {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionAdapter for FixedCompletion {
    async fn complete_ai(&self, _prompt: &str, api_key: &str) -> Result<String, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(api_key.to_string());
        Ok(self.reply.clone())
    }
}

#[derive(Default)]
pub struct RecordingPartner {
    pub pushes: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl PartnerAdapter for RecordingPartner {
    async fn push(&self, partner: &str, action: &str, _body: &Value, api_key: &str) -> Result<(), AdapterError> {
        self.pushes
            .lock()
            .unwrap()
            .push((partner.to_string(), action.to_string(), api_key.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MapCredentials {
    pub entries: HashMap<String, Credential>,
}

impl MapCredentials {
    pub fn with(mut self, id: &str, ciphertext: String) -> Self {
        self.entries.insert(
            id.to_string(),
            Credential {
                id: id.to_string(),
                kind: CredentialKind::ApiKey,
                secret: ciphertext,
                metadata: Map::new(),
            },
        );
        self
    }
}

#[async_trait]
impl CredentialStore for MapCredentials {
    async fn get_credential(&self, id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.entries.get(id).cloned())
    }
}

/// Flow store with per-organization fixtures. Organizations listed in
/// `broken` fail every call.
#[derive(Default)]
pub struct StaticStore {
    pub flows: HashMap<String, Vec<Flow>>,
    pub items: HashMap<String, Vec<InventoryItem>>,
    pub broken: Vec<String>,
    pub delay: Option<Duration>,
    pub loads: AtomicUsize,
}

impl StaticStore {
    pub fn with_org(mut self, org: &str, flows: Vec<Flow>, items: Vec<InventoryItem>) -> Self {
        self.flows.insert(org.to_string(), flows);
        self.items.insert(org.to_string(), items);
        self
    }
}

#[async_trait]
impl FlowStore for StaticStore {
    async fn list_active_flows(&self, org_id: &str) -> Result<Vec<Flow>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken.iter().any(|b| b == org_id) {
            return Err(StoreError::new("connection refused"));
        }
        Ok(self
            .flows
            .get(org_id)
            .map(|flows| flows.iter().filter(|f| f.is_active).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_inventory_near_expiry(&self, org_id: &str) -> Result<Vec<InventoryItem>, StoreError> {
        Ok(self.items.get(org_id).cloned().unwrap_or_default())
    }
}

pub fn days(n: i64) -> chrono::Duration {
    chrono::Duration::days(n)
}

pub fn at(base: DateTime<Utc>, offset_days: i64) -> DateTime<Utc> {
    base + days(offset_days)
}
