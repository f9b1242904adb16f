//! Customer Mapping Storage
//!
//! Remembers which billing customer a local user resolved to, so later
//! lookups skip the remote search. Mappings are upserted, never deleted.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::error::{BillingError, Result};
use crate::model::{CustomerMapping, UserId};

/// Mapping storage trait
pub trait MappingStore: Send + Sync {
    /// Get the mapping for a user
    fn get(&self, user_id: UserId) -> Result<Option<CustomerMapping>>;

    /// Insert or repoint the mapping for a user
    fn upsert(&self, user_id: UserId, billing_customer_id: &str) -> Result<CustomerMapping>;
}

/// In-memory mapping store (for development)
#[derive(Default)]
pub struct MemoryMappingStore {
    mappings: RwLock<HashMap<UserId, CustomerMapping>>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_mappings(mappings: HashMap<UserId, CustomerMapping>) -> Self {
        Self {
            mappings: RwLock::new(mappings),
        }
    }

    /// Number of stored mappings
    pub fn len(&self) -> usize {
        self.mappings.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Result<HashMap<UserId, CustomerMapping>> {
        self.mappings.read().map(|m| m.clone()).map_err(poisoned)
    }
}

fn poisoned<T>(_: T) -> BillingError {
    BillingError::Storage("mapping store lock poisoned".into())
}

impl MappingStore for MemoryMappingStore {
    fn get(&self, user_id: UserId) -> Result<Option<CustomerMapping>> {
        let mappings = self.mappings.read().map_err(poisoned)?;
        Ok(mappings.get(&user_id).cloned())
    }

    fn upsert(&self, user_id: UserId, billing_customer_id: &str) -> Result<CustomerMapping> {
        let mut mappings = self.mappings.write().map_err(poisoned)?;
        let now = Utc::now();

        let mapping = mappings
            .entry(user_id)
            .and_modify(|existing| {
                if existing.billing_customer_id != billing_customer_id {
                    existing.billing_customer_id = billing_customer_id.to_string();
                }
                existing.updated_at = now;
            })
            .or_insert_with(|| CustomerMapping {
                user_id,
                billing_customer_id: billing_customer_id.to_string(),
                created_at: now,
                updated_at: now,
            });

        Ok(mapping.clone())
    }
}

/// Mapping store persisted as a JSON array, rewritten on every upsert
pub struct JsonFileMappingStore {
    path: PathBuf,
    inner: MemoryMappingStore,
    /// Held across update, snapshot, write and rename
    persist_lock: Mutex<()>,
}

impl JsonFileMappingStore {
    /// Open (or start) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mappings = if path.exists() {
            let raw = std::fs::read(&path)
                .map_err(|e| BillingError::Storage(format!("reading {}: {e}", path.display())))?;
            let records: Vec<CustomerMapping> = serde_json::from_slice(&raw)
                .map_err(|e| BillingError::Storage(format!("parsing {}: {e}", path.display())))?;
            records.into_iter().map(|m| (m.user_id, m)).collect()
        } else {
            HashMap::new()
        };

        tracing::info!(
            path = %path.display(),
            mappings = mappings.len(),
            "Customer mapping store opened"
        );
        Ok(Self {
            path,
            inner: MemoryMappingStore::with_mappings(mappings),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let mut records: Vec<CustomerMapping> = self.inner.snapshot()?.into_values().collect();
        records.sort_by_key(|m| m.user_id);

        let json = serde_json::to_vec_pretty(&records)
            .map_err(|e| BillingError::Storage(format!("serializing mappings: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| BillingError::Storage(format!("writing {}: {e}", self.path.display())))
    }
}

impl MappingStore for JsonFileMappingStore {
    fn get(&self, user_id: UserId) -> Result<Option<CustomerMapping>> {
        self.inner.get(user_id)
    }

    fn upsert(&self, user_id: UserId, billing_customer_id: &str) -> Result<CustomerMapping> {
        let _guard = self.persist_lock.lock().map_err(poisoned)?;
        let mapping = self.inner.upsert(user_id, billing_customer_id)?;
        self.persist()?;
        Ok(mapping)
    }
}
