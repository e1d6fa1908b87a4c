use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::{
    error::{AppError, Result},
    models::key::{BindOutcome, KeyRecord},
};

/// Durable storage for issued keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn insert(&self, record: &KeyRecord) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<KeyRecord>>;
    /// Returns whether a record was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<KeyRecord>>;
    /// Binds `hwid` to `key` unless already bound or at capacity.
    ///
    /// Implementations must make the membership check and the append one
    /// atomic step so concurrent first-time bindings cannot exceed capacity.
    async fn bind_hwid(&self, key: &str, hwid: &str) -> Result<BindOutcome>;
    /// Clears every binding. Returns whether the key exists.
    async fn reset_hwids(&self, key: &str) -> Result<bool>;
    /// Removes one binding. Returns whether it was bound.
    async fn remove_hwid(&self, key: &str, hwid: &str) -> Result<bool>;
    /// Changes the binding capacity. Returns whether the key exists.
    async fn set_max_hwids(&self, key: &str, max_hwids: i32) -> Result<bool>;
}

/// A helper function to map a `tokio_postgres::Row` to a `KeyRecord`.
fn row_to_key(row: &Row) -> Result<KeyRecord> {
    Ok(KeyRecord {
        key: row.try_get("key").map_err(|_| AppError::MissingData("key".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
        expires_at: row.try_get("expires_at").map_err(|_| AppError::MissingData("expires_at".to_string()))?,
        bound_hwids: row.try_get("bound_hwids").map_err(|_| AppError::MissingData("bound_hwids".to_string()))?,
        max_hwids: row.try_get("max_hwids").map_err(|_| AppError::MissingData("max_hwids".to_string()))?,
    })
}

/// Key store backed by the `license_keys` table.
#[derive(Clone)]
pub struct PgKeyStore {
    pool: Pool,
}

impl PgKeyStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn insert(&self, record: &KeyRecord) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO license_keys (key, created_at, expires_at, bound_hwids, max_hwids)
                VALUES ($1, $2, $3, $4, $5)
                "#,
                &[
                    &record.key,
                    &record.created_at,
                    &record.expires_at,
                    &record.bound_hwids,
                    &record.max_hwids,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<KeyRecord>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT key, created_at, expires_at, bound_hwids, max_hwids
                FROM license_keys
                WHERE key = $1
                "#,
                &[&key],
            )
            .await?;
        row.map(|r| row_to_key(&r)).transpose()
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let removed = client
            .execute("DELETE FROM license_keys WHERE key = $1", &[&key])
            .await?;
        Ok(removed > 0)
    }

    async fn list(&self) -> Result<Vec<KeyRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT key, created_at, expires_at, bound_hwids, max_hwids
                FROM license_keys
                ORDER BY created_at DESC
                "#,
                &[],
            )
            .await?;
        rows.iter().map(row_to_key).collect()
    }

    async fn bind_hwid(&self, key: &str, hwid: &str) -> Result<BindOutcome> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE license_keys
                SET bound_hwids = array_append(bound_hwids, $2)
                WHERE key = $1
                  AND NOT ($2 = ANY(bound_hwids))
                  AND cardinality(bound_hwids) < max_hwids
                "#,
                &[&key, &hwid],
            )
            .await?;

        if updated > 0 {
            return Ok(BindOutcome::Bound);
        }

        // The conditional update refused; find out why.
        let row = client
            .query_opt(
                r#"
                SELECT ($2 = ANY(bound_hwids)) AS bound
                FROM license_keys
                WHERE key = $1
                "#,
                &[&key, &hwid],
            )
            .await?;

        Ok(match row {
            None => BindOutcome::Missing,
            Some(row) => {
                let bound: bool = row.try_get("bound").map_err(|_| AppError::MissingData("bound".to_string()))?;
                if bound {
                    BindOutcome::AlreadyBound
                } else {
                    BindOutcome::CapacityReached
                }
            }
        })
    }

    async fn reset_hwids(&self, key: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE license_keys SET bound_hwids = '{}' WHERE key = $1",
                &[&key],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn remove_hwid(&self, key: &str, hwid: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE license_keys
                SET bound_hwids = array_remove(bound_hwids, $2)
                WHERE key = $1 AND $2 = ANY(bound_hwids)
                "#,
                &[&key, &hwid],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn set_max_hwids(&self, key: &str, max_hwids: i32) -> Result<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE license_keys SET max_hwids = $2 WHERE key = $1",
                &[&key, &max_hwids],
            )
            .await?;
        Ok(updated > 0)
    }
}
