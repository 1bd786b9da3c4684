use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_contacts::PersonId;
use funil_core::{RecordId, TenantId};

/// Conversation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub RecordId);

impl ConversationId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One WhatsApp thread, keyed by the counterpart's phone number.
///
/// A conversation may or may not be linked to a known person; inbound
/// messages from unknown numbers open an unlinked conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: TenantId,
    /// Counterpart number in E.164 form.
    pub phone: String,
    pub person_id: Option<PersonId>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        id: ConversationId,
        tenant_id: TenantId,
        phone: impl Into<String>,
        person_id: Option<PersonId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            phone: phone.into(),
            person_id,
            last_message_at: None,
            unread_count: 0,
            created_at: now,
        }
    }

    /// Record an inbound message arrival.
    pub fn note_inbound(&mut self, at: DateTime<Utc>) {
        self.last_message_at = Some(at);
        self.unread_count = self.unread_count.saturating_add(1);
    }

    /// Record an outbound send.
    pub fn note_outbound(&mut self, at: DateTime<Utc>) {
        self.last_message_at = Some(at);
    }

    pub fn mark_read(&mut self) {
        self.unread_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_increments_unread_and_outbound_does_not() {
        let now = Utc::now();
        let mut c = Conversation::new(
            ConversationId::new(RecordId::new()),
            TenantId::new(),
            "+5511912345678",
            None,
            now,
        );

        c.note_inbound(now);
        c.note_inbound(now);
        assert_eq!(c.unread_count, 2);

        c.note_outbound(now);
        assert_eq!(c.unread_count, 2);

        c.mark_read();
        assert_eq!(c.unread_count, 0);
        assert_eq!(c.last_message_at, Some(now));
    }
}
