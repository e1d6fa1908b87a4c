use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::providers::ProviderRegistry;
use crate::repositories::{
    ban::{BanStore, PgBanStore},
    key::{KeyStore, PgKeyStore},
    memory::{MemoryBanStore, MemoryKeyStore},
};
use crate::services::checkpoint::CheckpointMachine;
use crate::services::notifier::DiscordNotifier;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// Issued license keys.
    pub keys: Arc<dyn KeyStore>,
    /// Banned hardware ids.
    pub bans: Arc<dyn BanStore>,
    /// Live checkpoint sessions.
    pub checkpoints: Arc<CheckpointMachine>,
    /// Outgoing Discord notifications.
    pub notifier: DiscordNotifier,
    /// The Redis connection manager, when rate limiting is enabled.
    pub redis: Option<ConnectionManager>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: Config) -> Result<Self> {
        let (keys, bans): (Arc<dyn KeyStore>, Arc<dyn BanStore>) = match &config.database_url {
            Some(url) => {
                let pool = crate::db::create_pool(url)?;
                crate::db::ensure_schema(&pool).await?;
                tracing::info!("✅ PostgreSQL pool initialized, schema ready");
                (
                    Arc::new(PgKeyStore::new(pool.clone())),
                    Arc::new(PgBanStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("⚠️ DATABASE_URL not set, keys and bans live in memory only");
                (Arc::new(MemoryKeyStore::new()), Arc::new(MemoryBanStore::new()))
            }
        };

        let redis = match &config.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let manager = ConnectionManager::new(client).await?;
                tracing::info!("✅ Redis Connection Manager initialized");
                Some(manager)
            }
            None => {
                tracing::info!("Redis not configured, session start rate limiting disabled");
                None
            }
        };

        let http = reqwest::Client::builder()
            .user_agent(concat!("keygate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| crate::error::AppError::Internal(format!("HTTP client: {}", e)))?;

        let providers = ProviderRegistry::from_settings(&config.providers, http.clone());
        let notifier = DiscordNotifier::spawn(
            http,
            config.discord_webhook_url.clone(),
            config.discord_min_interval,
        );
        tracing::info!("✅ Notification worker started");

        Ok(Self::with_parts(
            config,
            keys,
            bans,
            providers,
            notifier,
            redis,
            Arc::new(SystemClock),
        ))
    }

    /// Assembles a state from already-built parts.
    pub fn with_parts(
        config: Config,
        keys: Arc<dyn KeyStore>,
        bans: Arc<dyn BanStore>,
        providers: ProviderRegistry,
        notifier: DiscordNotifier,
        redis: Option<ConnectionManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let checkpoints = Arc::new(CheckpointMachine::new(
            providers,
            keys.clone(),
            clock.clone(),
            config.checkpoint.clone(),
        ));

        Self {
            config: Arc::new(config),
            keys,
            bans,
            checkpoints,
            notifier,
            redis,
            clock,
        }
    }
}
