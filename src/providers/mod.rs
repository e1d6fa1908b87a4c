//! Link provider adapters.
//!
//! Each external link-locker service is one [`LinkProvider`]. The checkpoint
//! machine only ever talks to the trait; adding a provider means adding a
//! variant to [`Provider`] and an adapter here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ProviderSettings;
use crate::crypto::token::generate_provider_secret;
use crate::models::provider::Provider;
use crate::models::session::PendingProof;

pub mod linkvertise;
pub mod lootlabs;
pub mod workink;

pub use linkvertise::LinkvertiseProvider;
pub use lootlabs::LootLabsProvider;
pub use workink::WorkInkProvider;

/// Why a provider could not produce a link.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A credential or link list required by the provider is not configured.
    #[error("{provider} is not configured: missing {what}")]
    MissingCredential {
        provider: Provider,
        what: &'static str,
    },

    /// A configured URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The provider API could not be reached.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider API answered with a non-success status.
    #[error("{provider} answered HTTP {status}")]
    Upstream { provider: Provider, status: u16 },

    /// The provider API answered with something we cannot use.
    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

/// Produces the redirect link for one checkpoint step.
#[async_trait]
pub trait LinkProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Issues the link for `step` (zero based).
    ///
    /// Secret-style providers arm `proof` with a fresh secret, but only once
    /// the link has been produced successfully.
    async fn issue_link(
        &self,
        proof: &mut PendingProof,
        session_id: &str,
        step: u32,
    ) -> Result<String, ProviderError>;
}

/// A freshly generated secret and the destination carrying it.
pub(crate) struct SecretDestination {
    pub secret: String,
    pub destination: String,
}

/// Builds `return_url` with a new one-time secret appended to its query.
pub(crate) fn secret_destination(return_url: &str) -> Result<SecretDestination, ProviderError> {
    let secret = generate_provider_secret();
    let mut url = reqwest::Url::parse(return_url)
        .map_err(|e| ProviderError::InvalidUrl(format!("{}: {}", return_url, e)))?;
    url.query_pairs_mut().append_pair("secret", &secret);

    Ok(SecretDestination {
        secret,
        destination: url.into(),
    })
}

/// Appends `param=value` to a link without disturbing its existing query.
///
/// A link whose query ends in the bare key `param` (no `=`) gets the value
/// attached to that key instead of a duplicate parameter. Fragments are kept
/// at the end.
pub fn append_query_param(link: &str, param: &str, value: &str) -> String {
    let (base, fragment) = match link.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (link, None),
    };

    let mut out = String::with_capacity(link.len() + param.len() + value.len() + 2);
    out.push_str(base);

    match base.split_once('?') {
        None => {
            out.push('?');
            out.push_str(param);
            out.push('=');
        }
        Some((_, query)) => {
            let last = query.rsplit('&').next().unwrap_or_default();
            if query.is_empty() || query.ends_with('&') {
                out.push_str(param);
                out.push('=');
            } else if last == param {
                out.push('=');
            } else {
                out.push('&');
                out.push_str(param);
                out.push('=');
            }
        }
    }
    out.push_str(value);

    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// One adapter per [`Provider`] variant.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn LinkProvider>>,
}

impl ProviderRegistry {
    /// Builds the production adapters from configuration.
    pub fn from_settings(settings: &ProviderSettings, http: reqwest::Client) -> Self {
        Self::empty()
            .with(Arc::new(WorkInkProvider::new(
                settings.workink_links.clone(),
                settings.workink_correlation_param.clone(),
            )))
            .with(Arc::new(LinkvertiseProvider::new(
                settings.linkvertise_user_id.clone(),
                settings.return_url.clone(),
            )))
            .with(Arc::new(LootLabsProvider::new(
                http,
                settings.lootlabs_api_url.clone(),
                settings.lootlabs_api_key.clone(),
                settings.return_url.clone(),
            )))
    }

    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registers (or replaces) the adapter for its provider.
    pub fn with(mut self, adapter: Arc<dyn LinkProvider>) -> Self {
        self.providers.insert(adapter.provider(), adapter);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn LinkProvider>> {
        self.providers.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_link_without_query() {
        assert_eq!(
            append_query_param("https://work.ink/abc", "sid", "123"),
            "https://work.ink/abc?sid=123"
        );
    }

    #[test]
    fn append_to_link_with_existing_pairs() {
        assert_eq!(
            append_query_param("https://work.ink/abc?ref=home&x=1", "sid", "123"),
            "https://work.ink/abc?ref=home&x=1&sid=123"
        );
    }

    #[test]
    fn bare_key_receives_the_value() {
        assert_eq!(
            append_query_param("https://work.ink/abc?ref=home&sid", "sid", "123"),
            "https://work.ink/abc?ref=home&sid=123"
        );
        assert_eq!(
            append_query_param("https://work.ink/abc?sid", "sid", "123"),
            "https://work.ink/abc?sid=123"
        );
    }

    #[test]
    fn dangling_separators_are_reused() {
        assert_eq!(
            append_query_param("https://work.ink/abc?", "sid", "123"),
            "https://work.ink/abc?sid=123"
        );
        assert_eq!(
            append_query_param("https://work.ink/abc?a=1&", "sid", "123"),
            "https://work.ink/abc?a=1&sid=123"
        );
    }

    #[test]
    fn fragment_stays_last() {
        assert_eq!(
            append_query_param("https://work.ink/abc?a=1#top", "sid", "123"),
            "https://work.ink/abc?a=1&sid=123#top"
        );
    }

    #[test]
    fn secret_destination_keeps_existing_query() {
        let built = secret_destination("https://site.example/checkpoint?lang=en").unwrap();
        assert_eq!(
            built.destination,
            format!("https://site.example/checkpoint?lang=en&secret={}", built.secret)
        );
    }

    #[test]
    fn secret_destination_rejects_garbage() {
        assert!(matches!(
            secret_destination("not a url"),
            Err(ProviderError::InvalidUrl(_))
        ));
    }
}
