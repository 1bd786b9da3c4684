use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_contacts::PersonId;
use funil_core::{DomainError, DomainResult, RecordId, TenantId, UserId};

/// Campaign identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub RecordId);

impl CampaignId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Recipient identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub RecordId);

impl RecipientId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Sending,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum RecipientStatus {
    Pending,
    Sent { sent_at: DateTime<Utc> },
    Failed { error: String },
    Skipped,
}

/// One addressee of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub person_id: Option<PersonId>,
    pub email: String,
    pub status: RecipientStatus,
}

/// A bulk email campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub status: CampaignStatus,
    pub recipients: Vec<Recipient>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: CampaignId,
        tenant_id: TenantId,
        name: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        let subject = subject.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("campaign name cannot be empty"));
        }
        if subject.trim().is_empty() {
            return Err(DomainError::validation("subject cannot be empty"));
        }

        Ok(Self {
            id,
            tenant_id,
            name,
            subject,
            body: body.into(),
            status: CampaignStatus::Draft,
            recipients: Vec::new(),
            created_by,
            created_at: now,
            updated_at: now,
        })
    }

    /// Add a recipient while drafting. Duplicate addresses are rejected.
    pub fn add_recipient(
        &mut self,
        email: impl Into<String>,
        person_id: Option<PersonId>,
        now: DateTime<Utc>,
    ) -> DomainResult<RecipientId> {
        if self.status != CampaignStatus::Draft {
            return Err(DomainError::conflict("campaign is not a draft"));
        }
        let email = email.into();
        if !email.contains('@') {
            return Err(DomainError::validation("invalid email address"));
        }
        if self
            .recipients
            .iter()
            .any(|r| r.email.eq_ignore_ascii_case(&email))
        {
            return Err(DomainError::conflict("recipient already added"));
        }

        let id = RecipientId::new(RecordId::new());
        self.recipients.push(Recipient {
            id,
            person_id,
            email,
            status: RecipientStatus::Pending,
        });
        self.updated_at = now;
        Ok(id)
    }

    pub fn start_sending(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != CampaignStatus::Draft {
            return Err(DomainError::conflict("campaign is not a draft"));
        }
        if self.recipients.is_empty() {
            return Err(DomainError::validation("campaign has no recipients"));
        }
        self.status = CampaignStatus::Sending;
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            CampaignStatus::Draft | CampaignStatus::Sending => {
                self.status = CampaignStatus::Cancelled;
                // Anything not yet attempted stays recorded as skipped.
                for r in &mut self.recipients {
                    if matches!(r.status, RecipientStatus::Pending) {
                        r.status = RecipientStatus::Skipped;
                    }
                }
                self.updated_at = now;
                Ok(())
            }
            _ => Err(DomainError::conflict("campaign already finished")),
        }
    }

    pub fn record_result(
        &mut self,
        recipient_id: RecipientId,
        status: RecipientStatus,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let recipient = self
            .recipients
            .iter_mut()
            .find(|r| r.id == recipient_id)
            .ok_or(DomainError::NotFound)?;
        recipient.status = status;

        if self.status == CampaignStatus::Sending
            && self
                .recipients
                .iter()
                .all(|r| !matches!(r.status, RecipientStatus::Pending))
        {
            self.status = CampaignStatus::Done;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn pending(&self) -> impl Iterator<Item = &Recipient> {
        self.recipients
            .iter()
            .filter(|r| matches!(r.status, RecipientStatus::Pending))
    }

    pub fn sent_count(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| matches!(r.status, RecipientStatus::Sent { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| matches!(r.status, RecipientStatus::Failed { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(now: DateTime<Utc>) -> Campaign {
        Campaign::new(
            CampaignId::new(RecordId::new()),
            TenantId::new(),
            "Lançamento",
            "Novidade para sua empresa",
            "Olá, {nome}!",
            UserId::new(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn duplicate_recipient_is_rejected_case_insensitively() {
        let now = Utc::now();
        let mut c = draft(now);
        c.add_recipient("ana@example.com", None, now).unwrap();
        let err = c.add_recipient("ANA@example.com", None, now).unwrap_err();
        match err {
            DomainError::Conflict(_) => {}
            _ => panic!("Expected Conflict error"),
        }
    }

    #[test]
    fn sending_requires_recipients() {
        let now = Utc::now();
        let mut c = draft(now);
        assert!(c.start_sending(now).is_err());

        c.add_recipient("ana@example.com", None, now).unwrap();
        c.start_sending(now).unwrap();
        assert_eq!(c.status, CampaignStatus::Sending);
    }

    #[test]
    fn campaign_finishes_when_last_recipient_resolves() {
        let now = Utc::now();
        let mut c = draft(now);
        let a = c.add_recipient("a@example.com", None, now).unwrap();
        let b = c.add_recipient("b@example.com", None, now).unwrap();
        c.start_sending(now).unwrap();

        c.record_result(a, RecipientStatus::Sent { sent_at: now }, now)
            .unwrap();
        assert_eq!(c.status, CampaignStatus::Sending);

        c.record_result(
            b,
            RecipientStatus::Failed {
                error: "mailbox full".to_string(),
            },
            now,
        )
        .unwrap();
        assert_eq!(c.status, CampaignStatus::Done);
        assert_eq!(c.sent_count(), 1);
        assert_eq!(c.failed_count(), 1);
    }

    #[test]
    fn cancel_skips_pending_recipients() {
        let now = Utc::now();
        let mut c = draft(now);
        c.add_recipient("a@example.com", None, now).unwrap();
        c.add_recipient("b@example.com", None, now).unwrap();
        c.start_sending(now).unwrap();
        c.cancel(now).unwrap();

        assert_eq!(c.status, CampaignStatus::Cancelled);
        assert!(c
            .recipients
            .iter()
            .all(|r| matches!(r.status, RecipientStatus::Skipped)));
    }
}
