use async_trait::async_trait;

use super::{LinkProvider, ProviderError, append_query_param};
use crate::models::provider::Provider;
use crate::models::session::PendingProof;

/// Callback-style provider backed by pre-registered Work.ink links.
///
/// Work.ink calls `/webhook/workink` with the correlation parameter once the
/// user finishes the page; the link itself carries no secret.
pub struct WorkInkProvider {
    links: Vec<String>,
    correlation_param: String,
}

impl WorkInkProvider {
    pub fn new(links: Vec<String>, correlation_param: String) -> Self {
        Self {
            links,
            correlation_param,
        }
    }

    /// The registered link for `step`, clamped to the last entry.
    fn link_for(&self, step: u32) -> Option<&str> {
        let index = (step as usize).min(self.links.len().checked_sub(1)?);
        self.links.get(index).map(String::as_str)
    }
}

#[async_trait]
impl LinkProvider for WorkInkProvider {
    fn provider(&self) -> Provider {
        Provider::WorkInk
    }

    async fn issue_link(
        &self,
        proof: &mut PendingProof,
        session_id: &str,
        step: u32,
    ) -> Result<String, ProviderError> {
        let link = self
            .link_for(step)
            .ok_or(ProviderError::MissingCredential {
                provider: Provider::WorkInk,
                what: "WORKINK_LINKS",
            })?;

        *proof = PendingProof::Callback { confirmed: false };
        Ok(append_query_param(link, &self.correlation_param, session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> WorkInkProvider {
        WorkInkProvider::new(
            vec![
                "https://work.ink/a/first".to_string(),
                "https://work.ink/a/second?ref=x".to_string(),
            ],
            "sid".to_string(),
        )
    }

    #[tokio::test]
    async fn links_follow_step_and_clamp_to_last() {
        let provider = provider();
        let mut proof = PendingProof::Callback { confirmed: true };

        let first = provider.issue_link(&mut proof, "s1", 0).await.unwrap();
        assert_eq!(first, "https://work.ink/a/first?sid=s1");
        assert_eq!(proof, PendingProof::Callback { confirmed: false });

        let second = provider.issue_link(&mut proof, "s1", 1).await.unwrap();
        assert_eq!(second, "https://work.ink/a/second?ref=x&sid=s1");

        let clamped = provider.issue_link(&mut proof, "s1", 7).await.unwrap();
        assert_eq!(clamped, second);
    }

    #[tokio::test]
    async fn no_links_is_a_typed_failure() {
        let provider = WorkInkProvider::new(Vec::new(), "sid".to_string());
        let mut proof = PendingProof::Callback { confirmed: false };
        let err = provider.issue_link(&mut proof, "s1", 0).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredential { .. }));
    }
}
