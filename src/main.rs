use std::net::SocketAddr;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keygate::{build_router, config::Config, state::AppState};

/// How often abandoned checkpoint sessions are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");
    tracing::debug!(?config, "Effective configuration");

    let addr = config.bind_addr;
    let state = AppState::new(config).await?;
    tracing::info!("✅ AppState initialized");

    let app = build_router(state.clone())?;

    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = sweep_state.checkpoints.sweep_idle();
            if removed > 0 {
                tracing::info!(
                    removed,
                    remaining = sweep_state.checkpoints.active_sessions(),
                    "🧹 Swept idle checkpoint sessions"
                );
            }
        }
    });

    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ Background session sweep started (runs every minute)");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
