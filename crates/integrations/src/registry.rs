//! National-registry (CNPJ) lookup client.

use std::time::Duration;

use funil_enrichment::RegistryRecord;

use crate::error::UpstreamError;

/// Client for the public CNPJ registry API.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("funil/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Look up one CNPJ (bare 14 digits).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn lookup(&self, cnpj: &str) -> Result<RegistryRecord, UpstreamError> {
        let url = format!("{}/cnpj/{}", self.base_url.trim_end_matches('/'), cnpj);
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status, message));
        }

        resp.json::<RegistryRecord>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}
