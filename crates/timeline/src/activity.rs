use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_core::{DomainError, DomainResult, EntityKind, RecordId, TenantId, UserId};

/// Activity identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(pub RecordId);

impl ActivityId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Call,
    Meeting,
    Task,
    Email,
    Whatsapp,
}

/// A scheduled or completed touchpoint attached to a parent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub tenant_id: TenantId,
    pub parent_kind: EntityKind,
    pub parent_id: RecordId,
    pub kind: ActivityKind,
    pub subject: String,
    pub due_at: Option<DateTime<Utc>>,
    pub done_at: Option<DateTime<Utc>>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ActivityId,
        tenant_id: TenantId,
        parent_kind: EntityKind,
        parent_id: RecordId,
        kind: ActivityKind,
        subject: impl Into<String>,
        owner_id: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let subject = subject.into();
        if subject.trim().is_empty() {
            return Err(DomainError::validation("subject cannot be empty"));
        }

        Ok(Self {
            id,
            tenant_id,
            parent_kind,
            parent_id,
            kind,
            subject,
            due_at: None,
            done_at: None,
            owner_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_done(&self) -> bool {
        self.done_at.is_some()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_done() && self.due_at.is_some_and(|due| due < now)
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_done() {
            return Err(DomainError::conflict("activity is already done"));
        }
        self.done_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn reopen(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_done() {
            return Err(DomainError::conflict("activity is not done"));
        }
        self.done_at = None;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_activity(now: DateTime<Utc>) -> Activity {
        Activity::new(
            ActivityId::new(RecordId::new()),
            TenantId::new(),
            EntityKind::Deal,
            RecordId::new(),
            ActivityKind::Call,
            "Ligação de follow-up",
            UserId::new(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn complete_stamps_done_at() {
        let now = Utc::now();
        let mut a = test_activity(now);
        a.complete(now).unwrap();
        assert!(a.is_done());
        assert!(a.complete(now).is_err());
    }

    #[test]
    fn overdue_requires_past_due_and_not_done() {
        let now = Utc::now();
        let mut a = test_activity(now);
        a.due_at = Some(now - Duration::hours(1));
        assert!(a.is_overdue(now));

        a.complete(now).unwrap();
        assert!(!a.is_overdue(now));
    }
}
