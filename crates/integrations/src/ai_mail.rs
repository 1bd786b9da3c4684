//! AI email-drafting gateway client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// What the draft should say.
#[derive(Debug, Clone, Serialize)]
pub struct DraftRequest {
    pub recipient_name: String,
    pub company: Option<String>,
    /// What the seller wants to achieve ("agendar uma demonstração", ...).
    pub objective: String,
    /// "formal" | "casual"; the gateway defaults to formal.
    pub tone: Option<String>,
}

/// A generated draft.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
}

/// Client for the AI generation gateway.
#[derive(Debug, Clone)]
pub struct AiMailClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AiMailClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("funil/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    /// Generate one email draft. 429/402 from the gateway surface verbatim
    /// so the API can relay them to the caller.
    #[tracing::instrument(level = "debug", skip(self, request))]
    pub async fn draft(&self, request: &DraftRequest) -> Result<EmailDraft, UpstreamError> {
        let url = format!("{}/v1/email-drafts", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status, message));
        }

        resp.json::<EmailDraft>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}
