use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pantrycore::{DedupKey, DedupLedger};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local dedup ledger. Check-and-insert happens under one lock.
#[derive(Debug, Default)]
pub struct InMemoryDedupLedger {
    entries: Mutex<HashMap<DedupKey, DateTime<Utc>>>,
}

impl InMemoryDedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl DedupLedger for InMemoryDedupLedger {
    async fn reserve(&self, key: &DedupKey, now: DateTime<Utc>, window: Duration) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(at) if now - *at < window => false,
            _ => {
                entries.insert(key.clone(), now);
                true
            }
        }
    }

    async fn release(&self, key: &DedupKey) {
        self.entries.lock().await.remove(key);
    }

    async fn prune(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, at| now - *at < window);
        before - entries.len()
    }
}
