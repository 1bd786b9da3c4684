//! Process configuration.
//!
//! Read from the environment exactly once at startup and passed down
//! explicitly; nothing else in the tree touches `std::env`.

use std::time::Duration;

/// Credentials for one upstream integration.
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    /// Postgres connection string; in-memory store when absent.
    pub database_url: Option<String>,
    pub registry_base_url: Option<String>,
    pub ai: Option<IntegrationConfig>,
    pub mail: Option<IntegrationConfig>,
    pub mail_from: String,
    pub whatsapp: Option<IntegrationConfig>,
    /// `whsec_...` secret for inbound webhook verification.
    pub webhook_secret: Option<String>,
    pub upstream_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            "dev-secret".to_string()
        });

        let integration = |url_var: &str, key_var: &str| -> Option<IntegrationConfig> {
            match (std::env::var(url_var), std::env::var(key_var)) {
                (Ok(base_url), Ok(api_key)) => Some(IntegrationConfig { base_url, api_key }),
                _ => None,
            }
        };

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            jwt_secret,
            database_url: std::env::var("DATABASE_URL").ok(),
            registry_base_url: std::env::var("REGISTRY_BASE_URL").ok(),
            ai: integration("AI_BASE_URL", "AI_API_KEY"),
            mail: integration("MAIL_BASE_URL", "MAIL_API_KEY"),
            mail_from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "vendas@funil.app".to_string()),
            whatsapp: integration("WHATSAPP_BASE_URL", "WHATSAPP_API_KEY"),
            webhook_secret: std::env::var("WEBHOOK_SIGNING_SECRET").ok(),
            upstream_timeout: Duration::from_secs(15),
        }
    }

    /// In-memory defaults for tests: no database, no integrations.
    pub fn for_tests(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            jwt_secret: jwt_secret.into(),
            database_url: None,
            registry_base_url: None,
            ai: None,
            mail: None,
            mail_from: "vendas@funil.app".to_string(),
            whatsapp: None,
            webhook_secret: None,
            upstream_timeout: Duration::from_secs(2),
        }
    }
}
