//! WhatsApp relay client (outbound messages).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    to: &'a str,
    body: &'a str,
}

/// Relay acknowledgement for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayDelivery {
    /// Relay-side message id; later status webhooks reference it.
    pub message_id: String,
}

/// Client for the WhatsApp messaging relay.
#[derive(Debug, Clone)]
pub struct WhatsappRelayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WhatsappRelayClient {
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

    /// Relay one outbound message to a phone number in E.164 form.
    #[tracing::instrument(level = "debug", skip(self, body), fields(to = %to))]
    pub async fn send_message(&self, to: &str, body: &str) -> Result<RelayDelivery, UpstreamError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&RelayRequest { to, body })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status, message));
        }

        resp.json::<RelayDelivery>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}
