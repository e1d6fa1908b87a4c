//! In-process stores for development without a database, and for tests.
//!
//! `DashMap` entry guards give per-key critical sections, so bindings for
//! one key serialize while other keys proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{AppError, Result};
use crate::models::key::{BanRecord, BindOutcome, KeyRecord};
use crate::repositories::{ban::BanStore, key::KeyStore};

#[derive(Default)]
pub struct MemoryKeyStore {
    keys: DashMap<String, KeyRecord>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn insert(&self, record: &KeyRecord) -> Result<()> {
        match self.keys.entry(record.key.clone()) {
            Entry::Occupied(_) => Err(AppError::Internal(format!(
                "duplicate key {}",
                record.key
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<KeyRecord>> {
        Ok(self.keys.get(key).map(|r| r.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.keys.remove(key).is_some())
    }

    async fn list(&self) -> Result<Vec<KeyRecord>> {
        let mut records: Vec<KeyRecord> = self.keys.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn bind_hwid(&self, key: &str, hwid: &str) -> Result<BindOutcome> {
        let Some(mut record) = self.keys.get_mut(key) else {
            return Ok(BindOutcome::Missing);
        };

        if record.is_bound(hwid) {
            Ok(BindOutcome::AlreadyBound)
        } else if record.has_capacity() {
            record.bound_hwids.push(hwid.to_string());
            Ok(BindOutcome::Bound)
        } else {
            Ok(BindOutcome::CapacityReached)
        }
    }

    async fn reset_hwids(&self, key: &str) -> Result<bool> {
        Ok(self
            .keys
            .get_mut(key)
            .map(|mut record| record.bound_hwids.clear())
            .is_some())
    }

    async fn remove_hwid(&self, key: &str, hwid: &str) -> Result<bool> {
        let Some(mut record) = self.keys.get_mut(key) else {
            return Ok(false);
        };
        let before = record.bound_hwids.len();
        record.bound_hwids.retain(|bound| bound != hwid);
        Ok(record.bound_hwids.len() != before)
    }

    async fn set_max_hwids(&self, key: &str, max_hwids: i32) -> Result<bool> {
        Ok(self
            .keys
            .get_mut(key)
            .map(|mut record| record.max_hwids = max_hwids)
            .is_some())
    }
}

#[derive(Default)]
pub struct MemoryBanStore {
    bans: DashMap<String, BanRecord>,
}

impl MemoryBanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BanStore for MemoryBanStore {
    async fn ban(&self, hwid: &str, reason: Option<&str>, at: DateTime<Utc>) -> Result<()> {
        self.bans.entry(hwid.to_string()).or_insert_with(|| BanRecord {
            hwid: hwid.to_string(),
            reason: reason.map(String::from),
            banned_at: at,
        });
        Ok(())
    }

    async fn unban(&self, hwid: &str) -> Result<bool> {
        Ok(self.bans.remove(hwid).is_some())
    }

    async fn is_banned(&self, hwid: &str) -> Result<bool> {
        Ok(self.bans.contains_key(hwid))
    }

    async fn list(&self) -> Result<Vec<BanRecord>> {
        let mut bans: Vec<BanRecord> = self.bans.iter().map(|r| r.value().clone()).collect();
        bans.sort_by(|a, b| b.banned_at.cmp(&a.banned_at));
        Ok(bans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(key: &str, max_hwids: i32) -> KeyRecord {
        KeyRecord::new(key.to_string(), 24, max_hwids, Utc::now())
    }

    #[tokio::test]
    async fn bind_respects_capacity_and_membership() {
        let store = MemoryKeyStore::new();
        store.insert(&record("K", 1)).await.unwrap();

        assert_eq!(store.bind_hwid("K", "pc-1").await.unwrap(), BindOutcome::Bound);
        assert_eq!(store.bind_hwid("K", "pc-1").await.unwrap(), BindOutcome::AlreadyBound);
        assert_eq!(store.bind_hwid("K", "pc-2").await.unwrap(), BindOutcome::CapacityReached);
        assert_eq!(store.bind_hwid("nope", "pc-1").await.unwrap(), BindOutcome::Missing);
    }

    #[tokio::test]
    async fn concurrent_first_bindings_never_exceed_capacity() {
        let store = Arc::new(MemoryKeyStore::new());
        store.insert(&record("K", 3)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.bind_hwid("K", &format!("pc-{}", i)).await.unwrap()
            }));
        }

        let mut bound = 0;
        for handle in handles {
            if handle.await.unwrap() == BindOutcome::Bound {
                bound += 1;
            }
        }

        assert_eq!(bound, 3);
        assert_eq!(store.get("K").await.unwrap().unwrap().bound_hwids.len(), 3);
    }

    #[tokio::test]
    async fn reset_and_remove_hwids() {
        let store = MemoryKeyStore::new();
        store.insert(&record("K", 2)).await.unwrap();
        store.bind_hwid("K", "a").await.unwrap();
        store.bind_hwid("K", "b").await.unwrap();

        assert!(store.remove_hwid("K", "a").await.unwrap());
        assert!(!store.remove_hwid("K", "a").await.unwrap());
        assert_eq!(store.get("K").await.unwrap().unwrap().bound_hwids, vec!["b"]);

        assert!(store.reset_hwids("K").await.unwrap());
        assert!(store.get("K").await.unwrap().unwrap().bound_hwids.is_empty());
        assert!(!store.reset_hwids("missing").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_insert_is_refused() {
        let store = MemoryKeyStore::new();
        store.insert(&record("K", 1)).await.unwrap();
        assert!(store.insert(&record("K", 1)).await.is_err());
    }

    #[tokio::test]
    async fn ban_is_idempotent() {
        let bans = MemoryBanStore::new();
        let first = Utc::now();
        bans.ban("pc-1", Some("cheating"), first).await.unwrap();
        bans.ban("pc-1", None, first + chrono::Duration::hours(1)).await.unwrap();

        let listed = bans.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reason.as_deref(), Some("cheating"));
        assert!(bans.is_banned("pc-1").await.unwrap());
        assert!(bans.unban("pc-1").await.unwrap());
        assert!(!bans.is_banned("pc-1").await.unwrap());
    }
}
