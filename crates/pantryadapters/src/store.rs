//! Flow, inventory and credential persistence.
//!
//! File layout:
//! ```text
//! {base_dir}/flows/{org_id}/{flow_id}.json
//! {base_dir}/inventory/{org_id}.json
//! {base_dir}/credentials.json
//! ```

use async_trait::async_trait;
use pantrycore::{Credential, CredentialStore, Flow, FlowStore, InventoryItem, StoreError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Items within this many days of expiry are returned to the scheduler.
pub const DEFAULT_HORIZON_DAYS: i64 = 7;

/// An item is worth evaluating if it expires soon or is not plainly in stock.
pub fn is_near_expiry(item: &InventoryItem, horizon_days: i64) -> bool {
    let expiring = item.remaining_days.is_some_and(|d| d <= horizon_days);
    let flagged = item
        .status
        .as_deref()
        .is_some_and(|s| !s.trim().eq_ignore_ascii_case("in_stock"));
    expiring || flagged
}

fn store_err(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::new(format!("{}: {}", context, e))
}

pub struct FileStore {
    base_dir: PathBuf,
    horizon_days: i64,
}

impl FileStore {
    /// Open a store rooted at `base_dir`, creating the directories.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        for dir in ["flows", "inventory"] {
            std::fs::create_dir_all(base_dir.join(dir))
                .map_err(|e| store_err(&format!("failed to create {} directory", dir), e))?;
        }
        Ok(Self {
            base_dir,
            horizon_days: DEFAULT_HORIZON_DAYS,
        })
    }

    pub fn with_horizon_days(mut self, days: i64) -> Self {
        self.horizon_days = days;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn org_flows_dir(&self, org_id: &str) -> PathBuf {
        self.base_dir.join("flows").join(org_id)
    }

    fn inventory_path(&self, org_id: &str) -> PathBuf {
        self.base_dir.join("inventory").join(format!("{}.json", org_id))
    }

    fn credentials_path(&self) -> PathBuf {
        self.base_dir.join("credentials.json")
    }

    pub async fn put_flow(&self, org_id: &str, flow: &Flow) -> Result<(), StoreError> {
        let dir = self.org_flows_dir(org_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| store_err("failed to create org directory", e))?;
        let data = serde_json::to_vec_pretty(flow).map_err(|e| store_err("failed to serialize flow", e))?;
        atomic_write(&dir.join(format!("{}.json", flow.id)), &data).await
    }

    pub async fn put_inventory(&self, org_id: &str, items: &[InventoryItem]) -> Result<(), StoreError> {
        let data =
            serde_json::to_vec_pretty(items).map_err(|e| store_err("failed to serialize inventory", e))?;
        atomic_write(&self.inventory_path(org_id), &data).await
    }

    /// Insert or replace one credential. `secret` must already be ciphertext.
    pub async fn put_credential(&self, credential: Credential) -> Result<(), StoreError> {
        let mut all = self.read_credentials().await?;
        all.retain(|c| c.id != credential.id);
        all.push(credential);
        let data =
            serde_json::to_vec_pretty(&all).map_err(|e| store_err("failed to serialize credentials", e))?;
        atomic_write(&self.credentials_path(), &data).await
    }

    async fn read_credentials(&self) -> Result<Vec<Credential>, StoreError> {
        match read_optional(&self.credentials_path()).await? {
            Some(data) => {
                serde_json::from_slice(&data).map_err(|e| store_err("failed to parse credentials.json", e))
            }
            None => Ok(Vec::new()),
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(store_err(&format!("failed to read {}", path.display()), e)),
    }
}

/// Write to a temp file, then rename over the target.
async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, data)
        .await
        .map_err(|e| store_err("failed to write temp file", e))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| store_err("failed to rename temp file", e))
}

#[async_trait]
impl FlowStore for FileStore {
    async fn list_active_flows(&self, org_id: &str) -> Result<Vec<Flow>, StoreError> {
        let dir = self.org_flows_dir(org_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_err("failed to read flows directory", e)),
        };

        let mut flows = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_err("failed to read dir entry", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| store_err("failed to read flow file", e))?;
            match serde_json::from_slice::<Flow>(&data) {
                Ok(flow) if flow.is_active => flows.push(flow),
                Ok(_) => {}
                Err(e) => tracing::warn!(path = %path.display(), "Ignoring unreadable flow: {}", e),
            }
        }

        flows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(flows)
    }

    async fn list_inventory_near_expiry(&self, org_id: &str) -> Result<Vec<InventoryItem>, StoreError> {
        let Some(data) = read_optional(&self.inventory_path(org_id)).await? else {
            return Ok(Vec::new());
        };
        let items: Vec<InventoryItem> =
            serde_json::from_slice(&data).map_err(|e| store_err("failed to parse inventory", e))?;
        Ok(items
            .into_iter()
            .filter(|item| is_near_expiry(item, self.horizon_days))
            .collect())
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get_credential(&self, id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.read_credentials().await?.into_iter().find(|c| c.id == id))
    }
}

/// Store kept entirely in memory. Useful for tests and the HTTP server.
#[derive(Default)]
pub struct InMemoryStore {
    flows: RwLock<HashMap<String, Vec<Flow>>>,
    inventory: RwLock<HashMap<String, Vec<InventoryItem>>>,
    credentials: RwLock<HashMap<String, Credential>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_flow(&self, org_id: &str, flow: Flow) {
        let mut flows = self.flows.write().await;
        let org = flows.entry(org_id.to_string()).or_default();
        org.retain(|f| f.id != flow.id);
        org.push(flow);
    }

    pub async fn put_inventory(&self, org_id: &str, items: Vec<InventoryItem>) {
        self.inventory.write().await.insert(org_id.to_string(), items);
    }

    pub async fn put_credential(&self, credential: Credential) {
        self.credentials
            .write()
            .await
            .insert(credential.id.clone(), credential);
    }
}

#[async_trait]
impl FlowStore for InMemoryStore {
    async fn list_active_flows(&self, org_id: &str) -> Result<Vec<Flow>, StoreError> {
        Ok(self
            .flows
            .read()
            .await
            .get(org_id)
            .map(|flows| flows.iter().filter(|f| f.is_active).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_inventory_near_expiry(&self, org_id: &str) -> Result<Vec<InventoryItem>, StoreError> {
        Ok(self
            .inventory
            .read()
            .await
            .get(org_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|i| is_near_expiry(i, DEFAULT_HORIZON_DAYS))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn get_credential(&self, id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.credentials.read().await.get(id).cloned())
    }
}
