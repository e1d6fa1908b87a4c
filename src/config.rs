use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

use crate::models::provider::Provider;

/// Rules governing the checkpoint protocol.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    /// Minimum dwell time between two successful advances.
    pub min_step_interval: Duration,
    /// How long an unconfirmed callback-style step answers `wait` before `denied`.
    pub callback_grace: Duration,
    /// Idle time after which an abandoned session is swept.
    pub session_ttl: Duration,
    /// Key lifetime used when the client omits `hours`.
    pub default_hours: u32,
    /// Largest key lifetime a client may request through the checkpoint flow.
    pub max_hours: u32,
    /// Checkpoint count used when the client omits `target_checks`.
    pub default_checks: u32,
    /// Largest checkpoint count a client may request.
    pub max_checks: u32,
    /// Binding capacity of keys minted at session completion.
    pub default_max_hwids: i32,
    /// Provider used when the client sends an unknown or empty value.
    pub fallback_provider: Provider,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            min_step_interval: Duration::from_secs(15),
            callback_grace: Duration::from_secs(30),
            session_ttl: Duration::from_secs(120 * 60),
            default_hours: 24,
            max_hours: 72,
            default_checks: 2,
            max_checks: 5,
            default_max_hwids: 1,
            fallback_provider: Provider::Linkvertise,
        }
    }
}

/// Credentials and endpoints for the link providers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Where secret-style providers send the browser back to.
    pub return_url: String,
    /// Pre-registered Work.ink links, one per step.
    pub workink_links: Vec<String>,
    /// Query parameter the Work.ink webhook echoes back.
    pub workink_correlation_param: String,
    /// Linkvertise publisher id.
    pub linkvertise_user_id: String,
    /// Lootlabs bearer token.
    pub lootlabs_api_key: Zeroizing<String>,
    /// Lootlabs link creation endpoint.
    pub lootlabs_api_url: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            return_url: "http://localhost:3000/checkpoint".to_string(),
            workink_links: Vec::new(),
            workink_correlation_param: "sid".to_string(),
            linkvertise_user_id: String::new(),
            lootlabs_api_key: Zeroizing::new(String::new()),
            lootlabs_api_url: "https://be.lootlabs.gg/api/lootlabs/content_locker".to_string(),
        }
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Shared secret required by every admin route.
    pub admin_secret: Zeroizing<String>,
    /// The URL of the PostgreSQL database. In-memory stores are used when unset.
    pub database_url: Option<String>,
    /// The URL of the Redis server used for rate limiting.
    pub redis_url: Option<String>,
    /// Allowed CORS origins. Any origin when empty.
    pub cors_origins: Vec<String>,
    /// Discord webhook receiving `/log-discord` notifications.
    pub discord_webhook_url: Option<String>,
    /// Spacing between two Discord posts.
    pub discord_min_interval: Duration,
    /// Session bootstraps allowed per client IP per hour.
    pub session_starts_per_hour: u32,
    pub checkpoint: CheckpointPolicy,
    pub providers: ProviderSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            admin_secret: Zeroizing::new(String::new()),
            database_url: None,
            redis_url: None,
            cors_origins: Vec::new(),
            discord_webhook_url: None,
            discord_min_interval: Duration::from_millis(1000),
            session_starts_per_hour: 30,
            checkpoint: CheckpointPolicy::default(),
            providers: ProviderSettings::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database_url.is_some())
            .field("redis", &self.redis_url.is_some())
            .field("cors_origins", &self.cors_origins)
            .field("discord", &self.discord_webhook_url.is_some())
            .field("checkpoint", &self.checkpoint)
            .finish_non_exhaustive()
    }
}

/// Reads an optional variable, treating an empty value as unset.
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Reads and parses a variable, falling back to `default` when unset.
fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        None => Ok(default),
    }
}

fn list(name: &str) -> Vec<String> {
    optional(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let admin_secret = env::var("ADMIN_SECRET").context("ADMIN_SECRET must be set")?;
        if admin_secret.trim().is_empty() {
            anyhow::bail!("ADMIN_SECRET must not be empty");
        }

        let host: IpAddr = parsed_or("HOST", defaults.bind_addr.ip())?;
        let port: u16 = parsed_or("PORT", defaults.bind_addr.port())?;

        let policy = CheckpointPolicy::default();
        let fallback_provider = match optional("FALLBACK_PROVIDER") {
            Some(raw) => Provider::parse(&raw)
                .with_context(|| format!("Unknown FALLBACK_PROVIDER '{}'", raw))?,
            None => policy.fallback_provider,
        };

        let checkpoint = CheckpointPolicy {
            min_step_interval: Duration::from_secs(parsed_or(
                "MIN_STEP_SECONDS",
                policy.min_step_interval.as_secs(),
            )?),
            callback_grace: Duration::from_secs(parsed_or(
                "CALLBACK_GRACE_SECONDS",
                policy.callback_grace.as_secs(),
            )?),
            session_ttl: Duration::from_secs(
                parsed_or("SESSION_TTL_MINUTES", policy.session_ttl.as_secs() / 60)? * 60,
            ),
            default_hours: parsed_or("DEFAULT_HOURS", policy.default_hours)?,
            max_hours: parsed_or("MAX_HOURS", policy.max_hours)?,
            default_checks: parsed_or("DEFAULT_CHECKS", policy.default_checks)?,
            max_checks: parsed_or("MAX_CHECKS", policy.max_checks)?,
            default_max_hwids: parsed_or("DEFAULT_MAX_HWIDS", policy.default_max_hwids)?,
            fallback_provider,
        };

        if checkpoint.default_checks == 0 || checkpoint.default_checks > checkpoint.max_checks {
            anyhow::bail!("DEFAULT_CHECKS must be between 1 and MAX_CHECKS");
        }
        if checkpoint.default_hours == 0 || checkpoint.default_hours > checkpoint.max_hours {
            anyhow::bail!("DEFAULT_HOURS must be between 1 and MAX_HOURS");
        }
        if checkpoint.default_max_hwids < 1 {
            anyhow::bail!("DEFAULT_MAX_HWIDS must be at least 1");
        }

        let provider_defaults = ProviderSettings::default();
        let providers = ProviderSettings {
            return_url: optional("RETURN_URL").unwrap_or(provider_defaults.return_url),
            workink_links: list("WORKINK_LINKS"),
            workink_correlation_param: optional("WORKINK_CORRELATION_PARAM")
                .unwrap_or(provider_defaults.workink_correlation_param),
            linkvertise_user_id: optional("LINKVERTISE_USER_ID").unwrap_or_default(),
            lootlabs_api_key: Zeroizing::new(optional("LOOTLABS_API_KEY").unwrap_or_default()),
            lootlabs_api_url: optional("LOOTLABS_API_URL")
                .unwrap_or(provider_defaults.lootlabs_api_url),
        };

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            admin_secret: Zeroizing::new(admin_secret),
            database_url: optional("DATABASE_URL"),
            redis_url: optional("REDIS_URL"),
            cors_origins: list("CORS_ORIGINS"),
            discord_webhook_url: optional("DISCORD_WEBHOOK_URL"),
            discord_min_interval: Duration::from_millis(parsed_or(
                "DISCORD_MIN_INTERVAL_MS",
                defaults.discord_min_interval.as_millis() as u64,
            )?),
            session_starts_per_hour: parsed_or(
                "SESSION_STARTS_PER_HOUR",
                defaults.session_starts_per_hour,
            )?,
            checkpoint,
            providers,
        })
    }
}
