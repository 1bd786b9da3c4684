//! `funil-integrations` — upstream HTTP clients and webhook verification.
//!
//! Every client here wraps exactly one external API: the national registry
//! (CNPJ), the AI drafting gateway, the transactional email provider and the
//! WhatsApp relay. Webhook signature verification for inbound callbacks also
//! lives here.

pub mod ai_mail;
pub mod error;
pub mod mailer;
pub mod registry;
pub mod webhook;
pub mod whatsapp;

pub use ai_mail::{AiMailClient, DraftRequest, EmailDraft};
pub use error::UpstreamError;
pub use mailer::MailClient;
pub use registry::RegistryClient;
pub use webhook::{WebhookError, WebhookVerifier, MAX_WEBHOOK_PAYLOAD_BYTES, TIMESTAMP_TOLERANCE_SECS};
pub use whatsapp::{RelayDelivery, WhatsappRelayClient};
