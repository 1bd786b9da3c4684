use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_core::{DomainError, DomainResult, RecordId, TenantId};

use crate::conversation::ConversationId;

/// Message identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub RecordId);

impl MessageId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// Delivery status as reported by the relay.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Statuses advance monotonically; relays may replay older webhooks.
    pub fn rank(self) -> u8 {
        match self {
            MessageStatus::Queued => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 4,
        }
    }
}

/// One WhatsApp message inside a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub conversation_id: ConversationId,
    pub direction: MessageDirection,
    pub body: String,
    /// Relay-side message id, used to correlate status webhooks.
    pub relay_message_id: Option<String>,
    pub status: MessageStatus,
    pub occurred_at: DateTime<Utc>,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: MessageId,
        tenant_id: TenantId,
        conversation_id: ConversationId,
        direction: MessageDirection,
        body: impl Into<String>,
        relay_message_id: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(DomainError::validation("message body cannot be empty"));
        }

        let status = match direction {
            MessageDirection::Inbound => MessageStatus::Delivered,
            MessageDirection::Outbound => MessageStatus::Queued,
        };

        Ok(Self {
            id,
            tenant_id,
            conversation_id,
            direction,
            body,
            relay_message_id,
            status,
            occurred_at,
        })
    }

    /// Apply a relay status update; regressions are ignored.
    pub fn update_status(&mut self, status: MessageStatus) {
        if status.rank() > self.status.rank() {
            self.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(now: DateTime<Utc>) -> Message {
        Message::new(
            MessageId::new(RecordId::new()),
            TenantId::new(),
            ConversationId::new(RecordId::new()),
            MessageDirection::Outbound,
            "Olá! Segue a proposta.",
            Some("wamid.123".to_string()),
            now,
        )
        .unwrap()
    }

    #[test]
    fn status_updates_never_regress() {
        let mut m = outbound(Utc::now());
        m.update_status(MessageStatus::Delivered);
        assert_eq!(m.status, MessageStatus::Delivered);

        m.update_status(MessageStatus::Sent);
        assert_eq!(m.status, MessageStatus::Delivered);

        m.update_status(MessageStatus::Read);
        assert_eq!(m.status, MessageStatus::Read);
    }

    #[test]
    fn inbound_messages_start_delivered() {
        let m = Message::new(
            MessageId::new(RecordId::new()),
            TenantId::new(),
            ConversationId::new(RecordId::new()),
            MessageDirection::Inbound,
            "Oi, pode me ligar?",
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(m.status, MessageStatus::Delivered);
    }
}
