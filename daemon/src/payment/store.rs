//! Durable payment persistence with per-key TTL.
//!
//! The TTL is a storage hygiene bound; `expires_at` inside the record is
//! authoritative for correctness and checked lazily by the manager. Both
//! implementations drop entries past their TTL deadline on read.

use std::{collections::HashMap, path::Path, time::Duration};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use arena_common::time::{get_current_time_in_millis, TimestampMillis};

use crate::providers::ProviderError;

const PAYMENT_PREFIX: &[u8] = b"payment:";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub request_id: String,
    pub from: String,
    pub to: String,
    /// Amount in the smallest on-chain unit, as a decimal string.
    pub amount: String,
    pub service: String,
    #[serde(default)]
    pub metadata: IndexMap<String, Value>,
    pub created_at: TimestampMillis,
    pub expires_at: TimestampMillis,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_tx: Option<String>,
}

impl PaymentRecord {
    pub fn is_expired(&self, now: TimestampMillis) -> bool {
        !self.verified && now > self.expires_at
    }
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn put(&self, record: &PaymentRecord, ttl: Duration) -> Result<(), ProviderError>;

    async fn get(&self, request_id: &str) -> Result<Option<PaymentRecord>, ProviderError>;

    async fn delete(&self, request_id: &str) -> Result<(), ProviderError>;

    async fn list(&self) -> Result<Vec<PaymentRecord>, ProviderError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    record: PaymentRecord,
    ttl_deadline: TimestampMillis,
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryPaymentStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn put(&self, record: &PaymentRecord, ttl: Duration) -> Result<(), ProviderError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            record.request_id.clone(),
            StoredEntry {
                record: record.clone(),
                ttl_deadline: get_current_time_in_millis() + ttl.as_millis() as u64,
            },
        );
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<PaymentRecord>, ProviderError> {
        let now = get_current_time_in_millis();
        let mut entries = self.entries.write().await;
        match entries.get(request_id) {
            Some(entry) if entry.ttl_deadline < now => {
                entries.remove(request_id);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.record.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, request_id: &str) -> Result<(), ProviderError> {
        let mut entries = self.entries.write().await;
        entries.remove(request_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PaymentRecord>, ProviderError> {
        let now = get_current_time_in_millis();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.ttl_deadline >= now);
        Ok(entries.values().map(|entry| entry.record.clone()).collect())
    }
}

/// Sled-backed store surviving process restarts.
pub struct SledPaymentStore {
    db: sled::Db,
}

impl SledPaymentStore {
    pub fn open(path: &Path) -> Result<Self, ProviderError> {
        let db = sled::open(path).map_err(|e| ProviderError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    fn read_entry(&self, key: &[u8]) -> Result<Option<StoredEntry>, ProviderError> {
        let Some(raw) = self
            .db
            .get(key)
            .map_err(|e| ProviderError::Storage(e.to_string()))?
        else {
            return Ok(None);
        };
        from_json(&raw).map(Some)
    }
}

#[async_trait]
impl PaymentStore for SledPaymentStore {
    async fn put(&self, record: &PaymentRecord, ttl: Duration) -> Result<(), ProviderError> {
        let entry = StoredEntry {
            record: record.clone(),
            ttl_deadline: get_current_time_in_millis() + ttl.as_millis() as u64,
        };
        let bytes = to_json(&entry)?;
        self.db
            .insert(payment_key(&record.request_id), bytes)
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<PaymentRecord>, ProviderError> {
        let key = payment_key(request_id);
        let Some(entry) = self.read_entry(&key)? else {
            return Ok(None);
        };
        if entry.ttl_deadline < get_current_time_in_millis() {
            self.db
                .remove(&key)
                .map_err(|e| ProviderError::Storage(e.to_string()))?;
            return Ok(None);
        }
        Ok(Some(entry.record))
    }

    async fn delete(&self, request_id: &str) -> Result<(), ProviderError> {
        self.db
            .remove(payment_key(request_id))
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PaymentRecord>, ProviderError> {
        let now = get_current_time_in_millis();
        let mut records = Vec::new();
        for item in self.db.scan_prefix(PAYMENT_PREFIX) {
            let (key, value) = item.map_err(|e| ProviderError::Storage(e.to_string()))?;
            let entry: StoredEntry = from_json(&value)?;
            if entry.ttl_deadline < now {
                self.db
                    .remove(&key)
                    .map_err(|e| ProviderError::Storage(e.to_string()))?;
                continue;
            }
            records.push(entry.record);
        }
        Ok(records)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, ProviderError> {
    serde_json::to_vec(value).map_err(|e| ProviderError::Storage(e.to_string()))
}

fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProviderError> {
    serde_json::from_slice(bytes).map_err(|e| ProviderError::Storage(e.to_string()))
}

fn payment_key(request_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PAYMENT_PREFIX.len() + request_id.len());
    key.extend_from_slice(PAYMENT_PREFIX);
    key.extend_from_slice(request_id.as_bytes());
    key
}
