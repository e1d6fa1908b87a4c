use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::{
    error::{AppError, Result},
    models::key::BanRecord,
};

/// Durable set of banned hardware ids.
#[async_trait]
pub trait BanStore: Send + Sync {
    /// Bans `hwid`. Banning twice keeps the first record.
    async fn ban(&self, hwid: &str, reason: Option<&str>, at: DateTime<Utc>) -> Result<()>;
    /// Returns whether a ban was lifted.
    async fn unban(&self, hwid: &str) -> Result<bool>;
    async fn is_banned(&self, hwid: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<BanRecord>>;
}

fn row_to_ban(row: &Row) -> Result<BanRecord> {
    Ok(BanRecord {
        hwid: row.try_get("hwid").map_err(|_| AppError::MissingData("hwid".to_string()))?,
        reason: row.try_get("reason").map_err(|_| AppError::MissingData("reason".to_string()))?,
        banned_at: row.try_get("banned_at").map_err(|_| AppError::MissingData("banned_at".to_string()))?,
    })
}

/// Ban store backed by the `banned_hwids` table.
#[derive(Clone)]
pub struct PgBanStore {
    pool: Pool,
}

impl PgBanStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BanStore for PgBanStore {
    async fn ban(&self, hwid: &str, reason: Option<&str>, at: DateTime<Utc>) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO banned_hwids (hwid, reason, banned_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (hwid) DO NOTHING
                "#,
                &[&hwid, &reason, &at],
            )
            .await?;
        Ok(())
    }

    async fn unban(&self, hwid: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let removed = client
            .execute("DELETE FROM banned_hwids WHERE hwid = $1", &[&hwid])
            .await?;
        Ok(removed > 0)
    }

    async fn is_banned(&self, hwid: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT 1 FROM banned_hwids WHERE hwid = $1", &[&hwid])
            .await?;
        Ok(row.is_some())
    }

    async fn list(&self) -> Result<Vec<BanRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT hwid, reason, banned_at FROM banned_hwids ORDER BY banned_at DESC",
                &[],
            )
            .await?;
        rows.iter().map(row_to_ban).collect()
    }
}
