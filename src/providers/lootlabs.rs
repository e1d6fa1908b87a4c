use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{LinkProvider, ProviderError, secret_destination};
use crate::models::provider::Provider;
use crate::models::session::PendingProof;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct CreateLinkRequest<'a> {
    title: String,
    url: &'a str,
    tier_id: u8,
    number_of_tasks: u8,
    theme: u8,
}

#[derive(Deserialize)]
struct CreateLinkResponse {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<CreateLinkMessage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CreateLinkMessage {
    Links(Vec<CreatedLink>),
    Link(CreatedLink),
    Text(String),
}

#[derive(Deserialize)]
struct CreatedLink {
    loot_url: Option<String>,
}

impl CreateLinkResponse {
    fn into_link(self) -> Result<String, ProviderError> {
        if let Some(kind) = self.kind.as_deref() {
            if kind.eq_ignore_ascii_case("error") {
                let detail = match self.message {
                    Some(CreateLinkMessage::Text(text)) => text,
                    _ => "unspecified error".to_string(),
                };
                return Err(ProviderError::Malformed(format!("lootlabs error: {}", detail)));
            }
        }

        let link = match self.message {
            Some(CreateLinkMessage::Links(links)) => links.into_iter().find_map(|l| l.loot_url),
            Some(CreateLinkMessage::Link(link)) => link.loot_url,
            Some(CreateLinkMessage::Text(_)) | None => None,
        };

        link.filter(|l| l.starts_with("http"))
            .ok_or_else(|| ProviderError::Malformed("response carries no loot_url".to_string()))
    }
}

/// Secret-style provider that asks the Lootlabs API to wrap the destination.
///
/// Any API failure is an error; the raw destination is never handed out.
pub struct LootLabsProvider {
    http: reqwest::Client,
    api_url: String,
    api_key: Zeroizing<String>,
    return_url: String,
}

impl LootLabsProvider {
    pub fn new(
        http: reqwest::Client,
        api_url: String,
        api_key: Zeroizing<String>,
        return_url: String,
    ) -> Self {
        Self {
            http,
            api_url,
            api_key,
            return_url,
        }
    }

    async fn create_link(&self, destination: &str, step: u32) -> Result<String, ProviderError> {
        let request = CreateLinkRequest {
            title: format!("Checkpoint {}", step + 1),
            url: destination,
            tier_id: 1,
            number_of_tasks: 3,
            theme: 1,
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key.as_str())
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Upstream {
                provider: Provider::LootLabs,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let parsed: CreateLinkResponse = sonic_rs::from_slice(&body)
            .map_err(|e| ProviderError::Malformed(format!("invalid JSON: {}", e)))?;
        parsed.into_link()
    }
}

#[async_trait]
impl LinkProvider for LootLabsProvider {
    fn provider(&self) -> Provider {
        Provider::LootLabs
    }

    async fn issue_link(
        &self,
        proof: &mut PendingProof,
        session_id: &str,
        step: u32,
    ) -> Result<String, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredential {
                provider: Provider::LootLabs,
                what: "LOOTLABS_API_KEY",
            });
        }

        let armed = secret_destination(&self.return_url)?;
        let link = self.create_link(&armed.destination, step).await?;
        tracing::debug!(session = %session_id, step, "Lootlabs link created");

        *proof = PendingProof::Secret(Some(armed.secret));
        Ok(link)
    }
}
