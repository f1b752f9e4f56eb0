//! Collaborator interfaces the engine talks to.
//!
//! Persistence and transports live outside the engine; everything the
//! interpreter and scheduler need from them goes through these traits.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credential::Credential;
use crate::error::{AdapterError, StoreError};
use crate::flow::Flow;
use crate::payload::InventoryItem;

/// Read side of the persistence collaborator.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn list_active_flows(&self, org_id: &str) -> Result<Vec<Flow>, StoreError>;

    async fn list_inventory_near_expiry(&self, org_id: &str)
        -> Result<Vec<InventoryItem>, StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, id: &str) -> Result<Option<Credential>, StoreError>;
}

/// Identity of one dispatched action for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub flow_id: String,
    pub item_id: String,
    pub node_id: String,
}

impl DedupKey {
    pub fn new(
        flow_id: impl Into<String>,
        item_id: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            item_id: item_id.into(),
            node_id: node_id.into(),
        }
    }
}

/// Rolling-window record of dispatched actions.
///
/// `reserve` must be an atomic check-and-insert: concurrent callers with the
/// same key inside the window see exactly one `true`.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    async fn reserve(&self, key: &DedupKey, now: DateTime<Utc>, window: Duration) -> bool;

    /// Undo a reservation whose dispatch failed.
    async fn release(&self, key: &DedupKey);

    /// Drop entries older than the window. Returns how many were removed.
    async fn prune(&self, now: DateTime<Utc>, window: Duration) -> usize;
}

#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), AdapterError>;

    async fn send_sms(&self, to: &str, body: &str) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait WebhookAdapter: Send + Sync {
    async fn call_webhook(&self, url: &str, method: &str, body: &Value) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait CompletionAdapter: Send + Sync {
    async fn complete_ai(&self, prompt: &str, api_key: &str) -> Result<String, AdapterError>;
}

#[async_trait]
pub trait PartnerAdapter: Send + Sync {
    async fn push(
        &self,
        partner: &str,
        action: &str,
        body: &Value,
        api_key: &str,
    ) -> Result<(), AdapterError>;
}
