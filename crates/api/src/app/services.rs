//! Infrastructure wiring: stores + upstream clients.
//!
//! The in-memory store backs dev and tests; setting `DATABASE_URL` switches
//! every store trait to the Postgres backend.

use std::sync::Arc;

use sqlx::PgPool;

use funil_infra::{
    ContactsStore, DealStore, DirectoryStore, InboxStore, MemoryStore, OutreachStore, PgStore,
    TagStore, TimelineStore,
};
use funil_integrations::{
    AiMailClient, MailClient, RegistryClient, WebhookVerifier, WhatsappRelayClient,
};
use funil_outreach::MailSender;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppServices {
    pub contacts: Arc<dyn ContactsStore>,
    pub deals: Arc<dyn DealStore>,
    pub timeline: Arc<dyn TimelineStore>,
    pub directory: Arc<dyn DirectoryStore>,
    pub tags: Arc<dyn TagStore>,
    pub inbox: Arc<dyn InboxStore>,
    pub outreach: Arc<dyn OutreachStore>,

    pub registry: Option<RegistryClient>,
    pub ai: Option<AiMailClient>,
    pub mailer: Option<Arc<dyn MailSender>>,
    pub whatsapp: Option<WhatsappRelayClient>,
    pub webhook_verifier: Option<WebhookVerifier>,
}

impl AppServices {
    fn from_backend<S>(store: Arc<S>, config: &AppConfig) -> Self
    where
        S: ContactsStore
            + DealStore
            + TimelineStore
            + DirectoryStore
            + TagStore
            + InboxStore
            + OutreachStore
            + 'static,
    {
        let registry = config.registry_base_url.as_ref().and_then(|base_url| {
            RegistryClient::new(base_url.clone(), config.upstream_timeout)
                .inspect_err(|e| tracing::warn!(error = %e, "registry client unavailable"))
                .ok()
        });
        let ai = config.ai.as_ref().and_then(|cfg| {
            AiMailClient::new(cfg.base_url.clone(), cfg.api_key.clone(), config.upstream_timeout)
                .inspect_err(|e| tracing::warn!(error = %e, "ai client unavailable"))
                .ok()
        });
        let mailer: Option<Arc<dyn MailSender>> = config.mail.as_ref().and_then(|cfg| {
            MailClient::new(
                cfg.base_url.clone(),
                cfg.api_key.clone(),
                config.mail_from.clone(),
                config.upstream_timeout,
            )
            .inspect_err(|e| tracing::warn!(error = %e, "mail client unavailable"))
            .ok()
            .map(|client| Arc::new(client) as Arc<dyn MailSender>)
        });
        let whatsapp = config.whatsapp.as_ref().and_then(|cfg| {
            WhatsappRelayClient::new(cfg.base_url.clone(), cfg.api_key.clone(), config.upstream_timeout)
                .inspect_err(|e| tracing::warn!(error = %e, "whatsapp client unavailable"))
                .ok()
        });
        let webhook_verifier = config.webhook_secret.as_ref().and_then(|secret| {
            WebhookVerifier::new(secret)
                .inspect_err(|e| tracing::warn!(error = %e, "webhook secret rejected"))
                .ok()
        });

        Self {
            contacts: store.clone(),
            deals: store.clone(),
            timeline: store.clone(),
            directory: store.clone(),
            tags: store.clone(),
            inbox: store.clone(),
            outreach: store,
            registry,
            ai,
            mailer,
            whatsapp,
            webhook_verifier,
        }
    }
}

pub async fn build_services(config: &AppConfig) -> AppServices {
    match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .expect("failed to connect to Postgres");
            tracing::info!("using postgres store");
            AppServices::from_backend(Arc::new(PgStore::new(pool)), config)
        }
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory store");
            AppServices::from_backend(Arc::new(MemoryStore::new()), config)
        }
    }
}
