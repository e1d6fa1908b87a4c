//! Best-effort Discord notifications.
//!
//! Handlers enqueue and return immediately; a single worker drains the queue,
//! spacing posts and honouring Discord's rate limits.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Messages buffered before new ones are dropped.
const QUEUE_CAPACITY: usize = 256;
/// Transport failures tolerated per message.
const MAX_TRANSPORT_ATTEMPTS: u32 = 3;
/// First transport backoff; doubles on each further failure.
const TRANSPORT_BACKOFF: Duration = Duration::from_millis(500);
/// Wait used when a 429 carries no usable hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const EMBED_COLOR: u32 = 0x5865F2;

/// An execution report sent by the game client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    #[serde(default)]
    pub username: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub account_age: String,
    #[serde(default)]
    pub hwid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub game_id: String,
    #[serde(default)]
    pub key: String,
}

/// Accepts numbers as well as strings; clients send either.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Null(()) => String::new(),
    })
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: &'static str,
    color: u32,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: &'static str,
    value: String,
    inline: bool,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
}

fn or_dash(value: &str) -> String {
    if value.trim().is_empty() {
        "-".to_string()
    } else {
        // Discord rejects field values over 1024 characters.
        value.chars().take(1024).collect()
    }
}

impl ExecutionReport {
    fn to_payload(&self) -> WebhookPayload {
        let field = |name, value: &str, inline| EmbedField {
            name,
            value: or_dash(value),
            inline,
        };

        WebhookPayload {
            embeds: vec![Embed {
                title: "Script executed",
                color: EMBED_COLOR,
                fields: vec![
                    field("Username", &self.username, true),
                    field("Account age", &self.account_age, true),
                    field("Game", &self.game_id, true),
                    field("HWID", &self.hwid, false),
                    field("Key", &self.key, false),
                ],
            }],
        }
    }
}

#[derive(Debug, Error)]
enum DeliveryError {
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook answered HTTP {0}")]
    Rejected(StatusCode),
}

/// Handle used by request handlers to enqueue notifications.
#[derive(Clone)]
pub struct DiscordNotifier {
    tx: mpsc::Sender<ExecutionReport>,
}

impl DiscordNotifier {
    /// Starts the delivery worker on the current runtime.
    pub fn spawn(
        http: reqwest::Client,
        webhook_url: Option<String>,
        min_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = Worker {
            http,
            webhook_url,
            min_interval,
            backoff: TRANSPORT_BACKOFF,
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    /// Queues a report. Never waits; a full queue drops the report.
    pub fn enqueue(&self, report: ExecutionReport) -> bool {
        match self.tx.try_send(report) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("⚠️ Notification queue full, dropping report");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("❌ Notification worker is gone, dropping report");
                false
            }
        }
    }
}

/// What became of one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered { attempts: u32 },
    Dropped { attempts: u32 },
}

struct Worker {
    http: reqwest::Client,
    webhook_url: Option<String>,
    min_interval: Duration,
    backoff: Duration,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<ExecutionReport>) {
        while let Some(report) = rx.recv().await {
            let Some(url) = self.webhook_url.as_deref() else {
                tracing::info!(
                    username = %report.username,
                    game = %report.game_id,
                    key = %report.key,
                    "Execution report (no webhook configured)"
                );
                continue;
            };

            match self.deliver(url, &report).await {
                Delivery::Delivered { attempts } if attempts > 1 => {
                    tracing::info!(attempts, "✅ Notification delivered after retries");
                }
                Delivery::Delivered { .. } => {}
                Delivery::Dropped { attempts } => {
                    tracing::debug!(attempts, username = %report.username, "Notification dropped");
                }
            }
            tokio::time::sleep(self.min_interval).await;
        }
        tracing::debug!("Notification worker stopped");
    }

    /// Posts one report, retrying rate limits until accepted.
    ///
    /// Transport failures are retried with exponential backoff and the report
    /// is dropped after `MAX_TRANSPORT_ATTEMPTS` of them.
    async fn deliver(&self, url: &str, report: &ExecutionReport) -> Delivery {
        let payload = report.to_payload();
        let mut attempts = 0;
        let mut transport_failures = 0;

        loop {
            attempts += 1;
            match self.post(url, &payload).await {
                Ok(()) => {
                    tracing::debug!(username = %report.username, "✅ Notification delivered");
                    return Delivery::Delivered { attempts };
                }
                Err(DeliveryError::RateLimited(wait)) => {
                    tracing::warn!("⏳ Discord rate limit hit, retrying in {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
                Err(DeliveryError::Transport(e)) => {
                    transport_failures += 1;
                    if transport_failures >= MAX_TRANSPORT_ATTEMPTS {
                        tracing::error!("❌ Dropping notification after {} attempts: {}", attempts, e);
                        return Delivery::Dropped { attempts };
                    }
                    let backoff = self.backoff * 2u32.pow(transport_failures - 1);
                    tracing::warn!("⚠️ Notification transport error, retrying in {:?}: {}", backoff, e);
                    tokio::time::sleep(backoff).await;
                }
                Err(e @ DeliveryError::Rejected(_)) => {
                    tracing::error!("❌ Dropping notification: {}", e);
                    return Delivery::Dropped { attempts };
                }
            }
        }
    }

    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let header_hint = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok());
            let body = response.bytes().await.unwrap_or_default();
            let body_hint = sonic_rs::from_slice::<RateLimitBody>(&body)
                .ok()
                .and_then(|b| b.retry_after);

            let wait = body_hint
                .or(header_hint)
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(|secs| Duration::from_secs_f64(secs.min(300.0)))
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(DeliveryError::RateLimited(wait));
        }

        if !status.is_success() {
            return Err(DeliveryError::Rejected(status));
        }
        Ok(())
    }
}
