use chrono::{DateTime, Utc};
use serde::Serialize;

/// A durable license key record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    /// The opaque bearer string handed to the client.
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Hardware ids bound so far, in binding order.
    pub bound_hwids: Vec<String>,
    /// How many hardware ids may be bound.
    pub max_hwids: i32,
}

impl KeyRecord {
    /// Creates a record valid for `hours` from `now`.
    ///
    /// Lifetimes too large to represent saturate at the maximum timestamp.
    pub fn new(key: String, hours: u32, max_hwids: i32, now: DateTime<Utc>) -> Self {
        let expires_at = chrono::Duration::try_hours(i64::from(hours))
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key,
            created_at: now,
            expires_at,
            bound_hwids: Vec::new(),
            max_hwids,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_bound(&self, hwid: &str) -> bool {
        self.bound_hwids.iter().any(|bound| bound == hwid)
    }

    pub fn has_capacity(&self) -> bool {
        (self.bound_hwids.len() as i64) < i64::from(self.max_hwids)
    }

    /// Whole hours left before expiry, never negative.
    pub fn hours_left(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_hours().max(0)
    }
}

/// A banned hardware id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanRecord {
    pub hwid: String,
    pub reason: Option<String>,
    pub banned_at: DateTime<Utc>,
}

/// Outcome of an atomic binding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The hardware id was already bound.
    AlreadyBound,
    /// The hardware id has just been bound.
    Bound,
    CapacityReached,
    /// No such key.
    Missing,
}
