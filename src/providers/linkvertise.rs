use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;

use super::{LinkProvider, ProviderError, secret_destination};
use crate::models::provider::Provider;
use crate::models::session::PendingProof;

const DYNAMIC_LINK_BASE: &str = "https://link-to.net";

/// Secret-style provider using Linkvertise dynamic links.
///
/// The destination is base64 encoded into the `r` parameter; Linkvertise
/// sends the browser there after the interstitial.
pub struct LinkvertiseProvider {
    user_id: String,
    return_url: String,
}

impl LinkvertiseProvider {
    pub fn new(user_id: String, return_url: String) -> Self {
        Self {
            user_id,
            return_url,
        }
    }

    fn dynamic_link(&self, destination: &str) -> Result<String, ProviderError> {
        let slot = OsRng.next_u32() % 1000;
        let encoded = general_purpose::STANDARD.encode(destination);
        let url = reqwest::Url::parse_with_params(
            &format!("{}/{}/{}/dynamic", DYNAMIC_LINK_BASE, self.user_id, slot),
            &[("r", encoded)],
        )
        .map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;
        Ok(url.into())
    }
}

#[async_trait]
impl LinkProvider for LinkvertiseProvider {
    fn provider(&self) -> Provider {
        Provider::Linkvertise
    }

    async fn issue_link(
        &self,
        proof: &mut PendingProof,
        _session_id: &str,
        _step: u32,
    ) -> Result<String, ProviderError> {
        if self.user_id.trim().is_empty() {
            return Err(ProviderError::MissingCredential {
                provider: Provider::Linkvertise,
                what: "LINKVERTISE_USER_ID",
            });
        }

        let armed = secret_destination(&self.return_url)?;
        let link = self.dynamic_link(&armed.destination)?;
        *proof = PendingProof::Secret(Some(armed.secret));
        Ok(link)
    }
}
