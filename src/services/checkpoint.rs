//! The checkpoint session state machine.
//!
//! A session walks `NEW -> PROGRESS(1..N-1) -> COMPLETED`. Every successful
//! advance consumes the step's proof and rotates the step token; `wait`,
//! `denied` and `error` answers leave the session untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::CheckpointPolicy;
use crate::crypto::token::{generate_key, generate_session_id, generate_step_token};
use crate::models::key::KeyRecord;
use crate::models::provider::{ProofKind, Provider};
use crate::models::session::{CheckpointSession, PendingProof, ProofStatus};
use crate::providers::ProviderRegistry;
use crate::repositories::key::KeyStore;

/// Longest poll interval suggested while waiting for a provider callback.
const CALLBACK_POLL_SECS: u64 = 3;

/// The request payload for `POST /process-step`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StepRequest {
    pub session_id: Option<String>,
    pub security_token: Option<String>,
    pub received_secret: Option<String>,
    pub provider: Option<String>,
    pub hours: Option<i64>,
    pub target_checks: Option<i64>,
}

/// Every answer the checkpoint protocol can give.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepResponse {
    /// Another checkpoint has to be completed at `url`.
    Progress {
        session_id: String,
        security_token: String,
        /// One-based index of the checkpoint handed out.
        step: u32,
        total: u32,
        url: String,
        message: String,
    },
    Completed {
        key: String,
        message: String,
    },
    /// Retry the same request after `retry_after` seconds.
    Wait {
        retry_after: u64,
        message: String,
    },
    Denied {
        message: String,
    },
    Error {
        message: String,
    },
}

impl StepResponse {
    fn error(message: impl Into<String>) -> Self {
        StepResponse::Error {
            message: message.into(),
        }
    }

    fn denied(message: impl Into<String>) -> Self {
        StepResponse::Denied {
            message: message.into(),
        }
    }
}

type SessionSlot = Arc<Mutex<CheckpointSession>>;

/// Owns every in-flight checkpoint session.
///
/// Requests for one session serialize on that session's mutex; different
/// sessions never contend beyond a `DashMap` shard lookup.
pub struct CheckpointMachine {
    sessions: DashMap<String, SessionSlot>,
    providers: ProviderRegistry,
    keys: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    policy: CheckpointPolicy,
}

/// Whole seconds from `elapsed` up to `required`, rounded up.
///
/// Saturates instead of overflowing when `required` is `Duration::MAX` or the
/// clock stepped backwards.
fn remaining_secs(required: chrono::Duration, elapsed: chrono::Duration) -> u64 {
    let remaining = required
        .checked_sub(&elapsed)
        .map_or(i64::MAX, |left| left.num_milliseconds())
        .max(0) as u64;
    remaining.div_ceil(1000).max(1)
}

impl CheckpointMachine {
    pub fn new(
        providers: ProviderRegistry,
        keys: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
        policy: CheckpointPolicy,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            providers,
            keys,
            clock,
            policy,
        }
    }

    /// Number of sessions currently held in memory.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Whether `session_id` names a live session. Unknown ids bootstrap a new one.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// A copy of a live session's state.
    pub async fn snapshot(&self, session_id: &str) -> Option<CheckpointSession> {
        let slot = self.slot(session_id)?;
        let session = slot.lock().await;
        Some(session.clone())
    }

    fn slot(&self, session_id: &str) -> Option<SessionSlot> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Runs one protocol step.
    pub async fn advance(&self, request: StepRequest) -> StepResponse {
        let known = request.session_id.as_deref().and_then(|id| self.slot(id));

        match known {
            Some(slot) => self.step(slot, request).await,
            None => self.bootstrap(request).await,
        }
    }

    fn requested(
        &self,
        value: Option<i64>,
        default: u32,
        max: u32,
        field: &str,
    ) -> Result<u32, StepResponse> {
        match value {
            None => Ok(default),
            Some(v) if v >= 1 && v <= i64::from(max) => Ok(v as u32),
            Some(_) => Err(StepResponse::error(format!(
                "{} must be between 1 and {}",
                field, max
            ))),
        }
    }

    async fn bootstrap(&self, request: StepRequest) -> StepResponse {
        let provider = request
            .provider
            .as_deref()
            .and_then(Provider::parse)
            .unwrap_or(self.policy.fallback_provider);

        let hours = match self.requested(
            request.hours,
            self.policy.default_hours,
            self.policy.max_hours,
            "hours",
        ) {
            Ok(hours) => hours,
            Err(response) => return response,
        };

        let total = match self.requested(
            request.target_checks,
            self.policy.default_checks,
            self.policy.max_checks,
            "target_checks",
        ) {
            Ok(total) => total,
            Err(response) => return response,
        };

        let Some(adapter) = self.providers.get(provider) else {
            tracing::error!(provider = %provider, "No adapter registered");
            return StepResponse::error("This provider is currently unavailable");
        };

        let now = self.clock.now_utc();
        let mut session = CheckpointSession::new(
            generate_session_id(),
            provider,
            hours,
            total,
            generate_step_token(),
            now,
        );

        let url = match adapter.issue_link(&mut session.proof, &session.id, 0).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(provider = %provider, "❌ Could not issue first link: {}", e);
                return StepResponse::error("Could not create a checkpoint link, please try again");
            }
        };

        tracing::info!(
            session = %session.id,
            provider = %provider,
            hours,
            total,
            "✅ Checkpoint session started"
        );

        let response = StepResponse::Progress {
            session_id: session.id.clone(),
            security_token: session.expected_token.clone(),
            step: 1,
            total,
            url,
            message: format!("Checkpoint 1 of {}", total),
        };

        self.sessions
            .insert(session.id.clone(), Arc::new(Mutex::new(session)));

        response
    }

    async fn step(&self, slot: SessionSlot, request: StepRequest) -> StepResponse {
        let mut session = slot.lock().await;

        if session.finished || !session.token_matches(request.security_token.as_deref()) {
            tracing::warn!(session = %session.id, "❌ Stale or invalid step token");
            return StepResponse::error("Invalid or expired session, please start again");
        }

        let now = self.clock.now_utc();
        session.last_seen = now;
        let elapsed = now - session.last_advance;

        match session.proof.check(request.received_secret.as_deref()) {
            ProofStatus::Accepted => {}
            ProofStatus::Unconfirmed => {
                let grace = chrono::Duration::from_std(self.policy.callback_grace)
                    .unwrap_or(chrono::Duration::MAX);
                if elapsed < grace {
                    tracing::debug!(session = %session.id, "Callback not received yet");
                    return StepResponse::Wait {
                        retry_after: remaining_secs(grace, elapsed).min(CALLBACK_POLL_SECS),
                        message: "Waiting for the checkpoint to be confirmed".to_string(),
                    };
                }
                tracing::warn!(session = %session.id, step = session.current_step, "❌ Callback never arrived");
                return StepResponse::denied("Checkpoint was not completed");
            }
            ProofStatus::Rejected => {
                tracing::warn!(session = %session.id, step = session.current_step, "❌ Wrong or missing checkpoint secret");
                return StepResponse::denied("Checkpoint was not completed");
            }
        }

        let min_interval = chrono::Duration::from_std(self.policy.min_step_interval)
            .unwrap_or(chrono::Duration::MAX);
        if elapsed < min_interval {
            let retry_after = remaining_secs(min_interval, elapsed);
            tracing::debug!(session = %session.id, retry_after, "Step submitted too fast");
            return StepResponse::Wait {
                retry_after,
                message: format!("Please wait {} more seconds", retry_after),
            };
        }

        if session.current_step + 1 >= session.target_steps {
            return self.complete(&mut session, now).await;
        }

        session.current_step += 1;
        session.last_advance = now;
        session.proof.consume();
        session.expected_token = generate_step_token();

        let Some(adapter) = self.providers.get(session.provider) else {
            self.discard(&mut session);
            return StepResponse::error("This provider is currently unavailable");
        };

        let step = session.current_step;
        let url = {
            let session = &mut *session;
            adapter.issue_link(&mut session.proof, &session.id, step).await
        };

        match url {
            Ok(url) => {
                tracing::info!(
                    session = %session.id,
                    step = step + 1,
                    total = session.target_steps,
                    "✅ Checkpoint advanced"
                );
                StepResponse::Progress {
                    session_id: session.id.clone(),
                    security_token: session.expected_token.clone(),
                    step: step + 1,
                    total: session.target_steps,
                    url,
                    message: format!("Checkpoint {} of {}", step + 1, session.target_steps),
                }
            }
            Err(e) => {
                tracing::warn!(session = %session.id, step, "❌ Could not issue next link: {}", e);
                self.discard(&mut session);
                StepResponse::error("Could not create the next checkpoint link, please start again")
            }
        }
    }

    /// Mints and persists the key, then retires the session.
    ///
    /// The key is stored before any session state changes, so a store
    /// failure leaves the session retryable with the same token and proof.
    async fn complete(&self, session: &mut CheckpointSession, now: DateTime<Utc>) -> StepResponse {
        let key = generate_key(session.provider.tag(), session.hours);
        let record = KeyRecord::new(key.clone(), session.hours, self.policy.default_max_hwids, now);

        if let Err(e) = self.keys.insert(&record).await {
            tracing::error!(session = %session.id, "❌ Failed to persist key: {}", e);
            return StepResponse::error("Could not save your key, please retry");
        }

        session.current_step = session.target_steps;
        session.last_advance = now;
        session.proof.consume();
        session.expected_token = generate_step_token();
        self.discard(session);

        tracing::info!(
            session = %session.id,
            provider = %session.provider,
            hours = session.hours,
            key = %key,
            "✅ Checkpoints completed, key issued"
        );

        StepResponse::Completed {
            key,
            message: format!("Key valid for {} hours", session.hours),
        }
    }

    fn discard(&self, session: &mut CheckpointSession) {
        session.finished = true;
        self.sessions.remove(&session.id);
    }

    /// Marks the current step of a callback-style session as completed.
    ///
    /// Returns `false` for unknown sessions or a provider mismatch.
    pub async fn confirm_callback(&self, provider: Provider, session_id: &str) -> bool {
        if provider.proof_kind() != ProofKind::Callback {
            return false;
        }
        let Some(slot) = self.slot(session_id) else {
            return false;
        };

        let mut session = slot.lock().await;
        if session.finished || session.provider != provider {
            return false;
        }

        session.proof = PendingProof::Callback { confirmed: true };
        tracing::info!(session = %session.id, step = session.current_step + 1, "✅ Provider callback received");
        true
    }

    /// Drops sessions idle for longer than the configured TTL.
    ///
    /// Sessions locked by an in-flight request are left alone.
    pub fn sweep_idle(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.policy.session_ttl).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now_utc();
        let before = self.sessions.len();

        self.sessions.retain(|_, slot| match slot.try_lock() {
            Ok(mut session) => {
                if now - session.last_seen > ttl {
                    session.finished = true;
                    false
                } else {
                    true
                }
            }
            Err(_) => true,
        });

        before.saturating_sub(self.sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::providers::{LinkProvider, ProviderError};
    use crate::repositories::memory::MemoryKeyStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Secret-style stub whose secret is predictable per step.
    struct StubSecret {
        fail_from_step: Option<u32>,
    }

    #[async_trait]
    impl LinkProvider for StubSecret {
        fn provider(&self) -> Provider {
            Provider::Linkvertise
        }

        async fn issue_link(
            &self,
            proof: &mut PendingProof,
            session_id: &str,
            step: u32,
        ) -> Result<String, ProviderError> {
            if self.fail_from_step.is_some_and(|from| step >= from) {
                return Err(ProviderError::Malformed("stub failure".into()));
            }
            *proof = PendingProof::Secret(Some(format!("secret-{}", step)));
            Ok(format!("https://stub.example/{}/{}", session_id, step))
        }
    }

    struct StubCallback;

    #[async_trait]
    impl LinkProvider for StubCallback {
        fn provider(&self) -> Provider {
            Provider::WorkInk
        }

        async fn issue_link(
            &self,
            proof: &mut PendingProof,
            session_id: &str,
            step: u32,
        ) -> Result<String, ProviderError> {
            *proof = PendingProof::Callback { confirmed: false };
            Ok(format!("https://work.example/{}?sid={}", step, session_id))
        }
    }

    /// Key store that can be switched into failure mode.
    struct FlakyKeys {
        inner: MemoryKeyStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl KeyStore for FlakyKeys {
        async fn insert(&self, record: &KeyRecord) -> crate::error::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(crate::error::AppError::Internal("store down".into()));
            }
            self.inner.insert(record).await
        }
        async fn get(&self, key: &str) -> crate::error::Result<Option<KeyRecord>> {
            self.inner.get(key).await
        }
        async fn delete(&self, key: &str) -> crate::error::Result<bool> {
            self.inner.delete(key).await
        }
        async fn list(&self) -> crate::error::Result<Vec<KeyRecord>> {
            self.inner.list().await
        }
        async fn bind_hwid(
            &self,
            key: &str,
            hwid: &str,
        ) -> crate::error::Result<crate::models::key::BindOutcome> {
            self.inner.bind_hwid(key, hwid).await
        }
        async fn reset_hwids(&self, key: &str) -> crate::error::Result<bool> {
            self.inner.reset_hwids(key).await
        }
        async fn remove_hwid(&self, key: &str, hwid: &str) -> crate::error::Result<bool> {
            self.inner.remove_hwid(key, hwid).await
        }
        async fn set_max_hwids(&self, key: &str, max_hwids: i32) -> crate::error::Result<bool> {
            self.inner.set_max_hwids(key, max_hwids).await
        }
    }

    struct Harness {
        machine: CheckpointMachine,
        clock: ManualClock,
        keys: Arc<FlakyKeys>,
    }

    fn harness_with(secret: StubSecret) -> Harness {
        let clock = ManualClock::new(Utc::now());
        let keys = Arc::new(FlakyKeys {
            inner: MemoryKeyStore::new(),
            failing: AtomicBool::new(false),
        });
        let providers = ProviderRegistry::empty()
            .with(Arc::new(secret))
            .with(Arc::new(StubCallback));
        let machine = CheckpointMachine::new(
            providers,
            keys.clone(),
            Arc::new(clock.clone()),
            CheckpointPolicy::default(),
        );
        Harness {
            machine,
            clock,
            keys,
        }
    }

    fn harness() -> Harness {
        harness_with(StubSecret {
            fail_from_step: None,
        })
    }

    fn start(provider: &str, checks: i64) -> StepRequest {
        StepRequest {
            provider: Some(provider.to_string()),
            hours: Some(10),
            target_checks: Some(checks),
            ..StepRequest::default()
        }
    }

    fn next(session_id: &str, token: &str, secret: Option<&str>) -> StepRequest {
        StepRequest {
            session_id: Some(session_id.to_string()),
            security_token: Some(token.to_string()),
            received_secret: secret.map(String::from),
            ..StepRequest::default()
        }
    }

    fn progress(response: StepResponse) -> (String, String, u32) {
        match response {
            StepResponse::Progress {
                session_id,
                security_token,
                step,
                ..
            } => (session_id, security_token, step),
            other => panic!("expected progress, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn full_secret_flow_issues_key_once() {
        let h = harness();
        let (id, mut token, step) = progress(h.machine.advance(start("linkvertise", 3)).await);
        assert_eq!(step, 1);

        let mut seen = HashSet::from([token.clone()]);
        for expected_step in 2..=3 {
            h.clock.advance_secs(20);
            let secret = format!("secret-{}", expected_step - 2);
            let (_, new_token, step) =
                progress(h.machine.advance(next(&id, &token, Some(&secret))).await);
            assert_eq!(step, expected_step);
            assert!(seen.insert(new_token.clone()), "token reused");
            token = new_token;
        }

        h.clock.advance_secs(20);
        let done = h.machine.advance(next(&id, &token, Some("secret-2"))).await;
        let StepResponse::Completed { key, .. } = done else {
            panic!("expected completion, got {:?}", done);
        };
        assert!(key.starts_with("MULTI-LV-10H-"));

        let stored = h.keys.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.max_hwids, 1);
        assert_eq!(stored.expires_at - stored.created_at, chrono::Duration::hours(10));

        assert!(h.machine.snapshot(&id).await.is_none());
        assert_eq!(h.machine.active_sessions(), 0);
    }

    #[tokio::test]
    async fn unknown_provider_falls_back() {
        let h = harness();
        let (id, _, _) = progress(h.machine.advance(start("adfly", 2)).await);
        let session = h.machine.snapshot(&id).await.unwrap();
        assert_eq!(session.provider, Provider::Linkvertise);
    }

    #[tokio::test]
    async fn defaults_apply_when_fields_are_absent() {
        let h = harness();
        let (id, _, _) = progress(h.machine.advance(StepRequest::default()).await);
        let session = h.machine.snapshot(&id).await.unwrap();
        let policy = CheckpointPolicy::default();
        assert_eq!(session.hours, policy.default_hours);
        assert_eq!(session.target_steps, policy.default_checks);
        assert_eq!(session.current_step, 0);
    }

    #[tokio::test]
    async fn out_of_range_requests_are_refused() {
        let h = harness();
        let mut request = start("linkvertise", 2);
        request.hours = Some(100_000);
        assert!(matches!(h.machine.advance(request).await, StepResponse::Error { .. }));

        let request = start("linkvertise", 0);
        assert!(matches!(h.machine.advance(request).await, StepResponse::Error { .. }));
        assert_eq!(h.machine.active_sessions(), 0);
    }

    #[tokio::test]
    async fn stale_token_is_rejected_forever() {
        let h = harness();
        let (id, first, _) = progress(h.machine.advance(start("linkvertise", 3)).await);
        h.clock.advance_secs(20);
        progress(h.machine.advance(next(&id, &first, Some("secret-0"))).await);

        for _ in 0..3 {
            h.clock.advance_secs(3600);
            let replay = h.machine.advance(next(&id, &first, Some("secret-1"))).await;
            assert!(matches!(replay, StepResponse::Error { .. }));
        }
        assert_eq!(h.machine.snapshot(&id).await.unwrap().current_step, 1);
    }

    #[tokio::test]
    async fn fast_resubmission_waits_without_mutation() {
        let h = harness();
        let (id, token, _) = progress(h.machine.advance(start("linkvertise", 2)).await);
        h.clock.advance_secs(5);

        let before = h.machine.snapshot(&id).await.unwrap();
        let response = h.machine.advance(next(&id, &token, Some("secret-0"))).await;
        assert_eq!(
            response,
            StepResponse::Wait {
                retry_after: 10,
                message: "Please wait 10 more seconds".to_string(),
            }
        );

        let after = h.machine.snapshot(&id).await.unwrap();
        assert_eq!(after.current_step, before.current_step);
        assert_eq!(after.expected_token, before.expected_token);
        assert_eq!(after.proof, before.proof);

        h.clock.advance_secs(10);
        let (_, rotated, step) = progress(h.machine.advance(next(&id, &token, Some("secret-0"))).await);
        assert_eq!(step, 2);
        assert_ne!(rotated, token);
    }

    #[tokio::test]
    async fn wrong_secret_is_denied_without_rotation() {
        let h = harness();
        let (id, token, _) = progress(h.machine.advance(start("linkvertise", 2)).await);
        h.clock.advance_secs(20);

        for secret in [Some("secret-1"), Some(""), None] {
            let response = h.machine.advance(next(&id, &token, secret)).await;
            assert!(matches!(response, StepResponse::Denied { .. }));
        }

        let session = h.machine.snapshot(&id).await.unwrap();
        assert_eq!(session.expected_token, token);
        assert_eq!(session.current_step, 0);
    }

    #[tokio::test]
    async fn callback_waits_then_denies_then_accepts() {
        let h = harness();
        let (id, token, _) = progress(h.machine.advance(start("workink", 1)).await);

        h.clock.advance_secs(5);
        assert!(matches!(
            h.machine.advance(next(&id, &token, None)).await,
            StepResponse::Wait { retry_after: 3, .. }
        ));

        h.clock.advance_secs(60);
        assert!(matches!(
            h.machine.advance(next(&id, &token, None)).await,
            StepResponse::Denied { .. }
        ));

        assert!(h.machine.confirm_callback(Provider::WorkInk, &id).await);
        let done = h.machine.advance(next(&id, &token, None)).await;
        let StepResponse::Completed { key, .. } = done else {
            panic!("expected completion, got {:?}", done);
        };
        assert!(key.starts_with("MULTI-WK-10H-"));
    }

    #[tokio::test]
    async fn callback_confirmation_is_consumed_per_step() {
        let h = harness();
        let (id, token, _) = progress(h.machine.advance(start("workink", 3)).await);
        assert!(h.machine.confirm_callback(Provider::WorkInk, &id).await);
        h.clock.advance_secs(20);
        let (_, token, step) = progress(h.machine.advance(next(&id, &token, None)).await);
        assert_eq!(step, 2);

        h.clock.advance_secs(20);
        assert!(!matches!(
            h.machine.advance(next(&id, &token, None)).await,
            StepResponse::Progress { .. }
        ));
    }

    #[tokio::test]
    async fn callback_for_other_provider_is_refused() {
        let h = harness();
        let (id, _, _) = progress(h.machine.advance(start("linkvertise", 2)).await);
        assert!(!h.machine.confirm_callback(Provider::WorkInk, &id).await);
        assert!(!h.machine.confirm_callback(Provider::Linkvertise, &id).await);
        assert!(!h.machine.confirm_callback(Provider::WorkInk, "unknown").await);
    }

    #[tokio::test]
    async fn first_link_failure_keeps_no_session() {
        let h = harness_with(StubSecret {
            fail_from_step: Some(0),
        });
        let response = h.machine.advance(start("linkvertise", 2)).await;
        assert!(matches!(response, StepResponse::Error { .. }));
        assert_eq!(h.machine.active_sessions(), 0);
    }

    #[tokio::test]
    async fn mid_sequence_link_failure_requires_restart() {
        let h = harness_with(StubSecret {
            fail_from_step: Some(1),
        });
        let (id, token, _) = progress(h.machine.advance(start("linkvertise", 3)).await);
        h.clock.advance_secs(20);
        let response = h.machine.advance(next(&id, &token, Some("secret-0"))).await;
        assert!(matches!(response, StepResponse::Error { .. }));
        assert!(h.machine.snapshot(&id).await.is_none());
    }

    #[tokio::test]
    async fn store_failure_leaves_final_step_retryable() {
        let h = harness();
        let (id, token, _) = progress(h.machine.advance(start("linkvertise", 1)).await);
        h.clock.advance_secs(20);

        h.keys.failing.store(true, Ordering::SeqCst);
        let response = h.machine.advance(next(&id, &token, Some("secret-0"))).await;
        assert!(matches!(response, StepResponse::Error { .. }));
        let session = h.machine.snapshot(&id).await.unwrap();
        assert_eq!(session.current_step, 0);
        assert_eq!(session.expected_token, token);

        h.keys.failing.store(false, Ordering::SeqCst);
        assert!(matches!(
            h.machine.advance(next(&id, &token, Some("secret-0"))).await,
            StepResponse::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_advances_succeed_exactly_once() {
        let h = Arc::new(harness());
        let (id, token, _) = progress(h.machine.advance(start("linkvertise", 3)).await);
        h.clock.advance_secs(20);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            let request = next(&id, &token, Some("secret-0"));
            handles.push(tokio::spawn(async move { h.machine.advance(request).await }));
        }

        let mut advanced = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), StepResponse::Progress { .. }) {
                advanced += 1;
            }
        }
        assert_eq!(advanced, 1);
        assert_eq!(h.machine.snapshot(&id).await.unwrap().current_step, 1);
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_sessions() {
        let h = harness();
        let (old, _, _) = progress(h.machine.advance(start("linkvertise", 2)).await);
        h.clock.advance(chrono::Duration::minutes(90));
        let (fresh, _, _) = progress(h.machine.advance(start("linkvertise", 2)).await);
        h.clock.advance(chrono::Duration::minutes(40));

        assert_eq!(h.machine.sweep_idle(), 1);
        assert!(h.machine.snapshot(&old).await.is_none());
        assert!(h.machine.snapshot(&fresh).await.is_some());
    }

    #[test]
    fn remaining_secs_rounds_up() {
        let required = chrono::Duration::seconds(15);
        assert_eq!(remaining_secs(required, chrono::Duration::milliseconds(14_001)), 1);
        assert_eq!(remaining_secs(required, chrono::Duration::seconds(5)), 10);
        assert_eq!(remaining_secs(required, chrono::Duration::milliseconds(4_500)), 11);
    }

    #[test]
    fn remaining_secs_saturates() {
        let backwards = chrono::Duration::seconds(-5);
        assert_eq!(
            remaining_secs(chrono::Duration::MAX, backwards),
            (i64::MAX as u64).div_ceil(1000)
        );
        assert!(remaining_secs(chrono::Duration::MAX, chrono::Duration::zero()) > 0);
        assert_eq!(remaining_secs(chrono::Duration::seconds(15), backwards), 20);
    }

    #[tokio::test]
    async fn forged_session_id_starts_a_fresh_session() {
        let h = harness();
        let forged = StepRequest {
            session_id: Some("forged-session".to_string()),
            ..start("linkvertise", 2)
        };
        assert!(!h.machine.contains("forged-session"));

        let (id, _, step) = progress(h.machine.advance(forged).await);
        assert_eq!(step, 1);
        assert_ne!(id, "forged-session");
        assert!(h.machine.contains(&id));
        assert!(!h.machine.contains("forged-session"));
    }
}
