#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use zeroize::Zeroizing;

use keygate::{
    build_router,
    clock::ManualClock,
    config::Config,
    providers::ProviderRegistry,
    repositories::{
        ban::BanStore,
        key::KeyStore,
        memory::{MemoryBanStore, MemoryKeyStore},
    },
    services::notifier::DiscordNotifier,
    state::AppState,
};

pub const ADMIN_SECRET: &str = "integration-admin-secret";

// Shared test context
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: ManualClock,
}

impl TestApp {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.admin_secret = Zeroizing::new(ADMIN_SECRET.to_string());
        config.providers.return_url = "https://keys.example/checkpoint".to_string();
        config.providers.linkvertise_user_id = "1447099".to_string();
        config.providers.workink_links = vec![
            "https://work.ink/abc/first".to_string(),
            "https://work.ink/abc/second".to_string(),
        ];

        let clock = ManualClock::new(Utc::now());
        let keys: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::new());
        let bans: Arc<dyn BanStore> = Arc::new(MemoryBanStore::new());
        let providers = ProviderRegistry::from_settings(&config.providers, reqwest::Client::new());
        let notifier = DiscordNotifier::spawn(reqwest::Client::new(), None, Duration::ZERO);

        let state = AppState::with_parts(
            config,
            keys,
            bans,
            providers,
            notifier,
            None,
            Arc::new(clock.clone()),
        );
        let router = build_router(state.clone()).unwrap();

        Self {
            router,
            state,
            clock,
        }
    }

    async fn send(&self, mut request: Request<Body>) -> (StatusCode, Value) {
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn verify(&self, key: &str, hwid: &str) -> Value {
        let (status, body) = self
            .get(&format!("/verify?key={}&hwid={}", key, hwid))
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

/// Recovers the one-time secret from a Linkvertise dynamic link.
pub fn secret_from_dynamic_link(link: &str) -> String {
    let url = reqwest::Url::parse(link).unwrap();
    let encoded = url
        .query_pairs()
        .find(|(name, _)| name == "r")
        .map(|(_, value)| value.into_owned())
        .unwrap();
    let destination = String::from_utf8(general_purpose::STANDARD.decode(encoded).unwrap()).unwrap();

    reqwest::Url::parse(&destination)
        .unwrap()
        .query_pairs()
        .find(|(name, _)| name == "secret")
        .map(|(_, value)| value.into_owned())
        .unwrap()
}
