//! Transactional email provider client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use funil_outreach::{MailSender, OutboundEmail, SendError};

use crate::error::UpstreamError;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Client for the transactional email provider.
#[derive(Debug, Clone)]
pub struct MailClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    from_address: String,
}

impl MailClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        from_address: impl Into<String>,
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
            from_address: from_address.into(),
        })
    }

    /// Send one email; returns the provider-side message id.
    #[tracing::instrument(level = "debug", skip(self, subject, text), fields(to = %to))]
    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        text: &str,
    ) -> Result<String, UpstreamError> {
        let url = format!("{}/emails", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&SendRequest {
                from: &self.from_address,
                to,
                subject,
                text,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status, message));
        }

        resp.json::<SendResponse>()
            .await
            .map(|r| r.id)
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MailSender for MailClient {
    async fn send(&self, email: &OutboundEmail) -> Result<(), SendError> {
        self.send_email(&email.to, &email.subject, &email.body)
            .await
            .map(|_| ())
            .map_err(|err| match err {
                UpstreamError::RateLimited | UpstreamError::Transport(_) => {
                    SendError::Unavailable(err.to_string())
                }
                other => SendError::Rejected(other.to_string()),
            })
    }
}
