use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;

use crate::models::provider::{ProofKind, Provider};

/// Completion evidence for the step currently in progress.
///
/// Exactly one shape is active per session, chosen by the provider's
/// [`ProofKind`]; it is reset every time a step is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingProof {
    /// One-time secret embedded in the provider destination. `None` once consumed.
    Secret(Option<String>),
    /// Set by the provider webhook.
    Callback { confirmed: bool },
}

/// Result of matching a caller-supplied proof against the pending one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofStatus {
    Accepted,
    /// Callback not received yet.
    Unconfirmed,
    Rejected,
}

impl PendingProof {
    pub fn empty(kind: ProofKind) -> Self {
        match kind {
            ProofKind::Secret => PendingProof::Secret(None),
            ProofKind::Callback => PendingProof::Callback { confirmed: false },
        }
    }

    /// Checks a proof without consuming it.
    pub fn check(&self, supplied: Option<&str>) -> ProofStatus {
        match self {
            PendingProof::Callback { confirmed: true } => ProofStatus::Accepted,
            PendingProof::Callback { confirmed: false } => ProofStatus::Unconfirmed,
            PendingProof::Secret(Some(expected)) => match supplied {
                Some(given) if bool::from(given.as_bytes().ct_eq(expected.as_bytes())) => {
                    ProofStatus::Accepted
                }
                _ => ProofStatus::Rejected,
            },
            PendingProof::Secret(None) => ProofStatus::Rejected,
        }
    }

    /// Clears the consumed proof, keeping its shape.
    pub fn consume(&mut self) {
        match self {
            PendingProof::Secret(secret) => *secret = None,
            PendingProof::Callback { confirmed } => *confirmed = false,
        }
    }
}

/// An in-memory checkpoint session.
///
/// Sessions live only for the lifetime of the process and are never persisted.
#[derive(Debug, Clone)]
pub struct CheckpointSession {
    pub id: String,
    pub provider: Provider,
    /// Requested key lifetime in hours.
    pub hours: u32,
    /// Total checkpoints required.
    pub target_steps: u32,
    /// Completed checkpoints, `0..=target_steps`.
    pub current_step: u32,
    /// The token the next request must present.
    pub expected_token: String,
    /// When the current step was handed out.
    pub last_advance: DateTime<Utc>,
    /// Last time any request touched the session, used by the idle sweep.
    pub last_seen: DateTime<Utc>,
    pub proof: PendingProof,
    /// Set once the session has been consumed so late lock holders bail out.
    pub finished: bool,
}

impl CheckpointSession {
    pub fn new(
        id: String,
        provider: Provider,
        hours: u32,
        target_steps: u32,
        token: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            provider,
            hours,
            target_steps,
            current_step: 0,
            expected_token: token,
            last_advance: now,
            last_seen: now,
            proof: PendingProof::empty(provider.proof_kind()),
            finished: false,
        }
    }

    /// Whether `token` is the most recently issued one.
    pub fn token_matches(&self, token: Option<&str>) -> bool {
        match token {
            Some(token) => bool::from(token.as_bytes().ct_eq(self.expected_token.as_bytes())),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_proof_requires_exact_match() {
        let proof = PendingProof::Secret(Some("abc123".to_string()));
        assert_eq!(proof.check(Some("abc123")), ProofStatus::Accepted);
        assert_eq!(proof.check(Some("abc124")), ProofStatus::Rejected);
        assert_eq!(proof.check(Some("abc12")), ProofStatus::Rejected);
        assert_eq!(proof.check(None), ProofStatus::Rejected);
    }

    #[test]
    fn consumed_secret_is_rejected() {
        let mut proof = PendingProof::Secret(Some("abc123".to_string()));
        proof.consume();
        assert_eq!(proof, PendingProof::Secret(None));
        assert_eq!(proof.check(Some("abc123")), ProofStatus::Rejected);
    }

    #[test]
    fn callback_proof_ignores_supplied_value() {
        let mut proof = PendingProof::empty(ProofKind::Callback);
        assert_eq!(proof.check(Some("anything")), ProofStatus::Unconfirmed);
        proof = PendingProof::Callback { confirmed: true };
        assert_eq!(proof.check(None), ProofStatus::Accepted);
        proof.consume();
        assert_eq!(proof.check(None), ProofStatus::Unconfirmed);
    }

    #[test]
    fn token_match_is_exact() {
        let session = CheckpointSession::new(
            "s".to_string(),
            Provider::Linkvertise,
            24,
            2,
            "token-1".to_string(),
            Utc::now(),
        );
        assert!(session.token_matches(Some("token-1")));
        assert!(!session.token_matches(Some("token-2")));
        assert!(!session.token_matches(None));
    }
}
