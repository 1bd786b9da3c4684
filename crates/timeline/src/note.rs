use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_core::{DomainError, DomainResult, EntityKind, RecordId, TenantId, UserId};

/// Note identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub RecordId);

impl NoteId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for NoteId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Free-form note on a parent record. Mutable; one pin flag per note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub tenant_id: TenantId,
    pub parent_kind: EntityKind,
    pub parent_id: RecordId,
    pub body: String,
    pub pinned: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: NoteId,
        tenant_id: TenantId,
        parent_kind: EntityKind,
        parent_id: RecordId,
        body: impl Into<String>,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(DomainError::validation("note body cannot be empty"));
        }

        Ok(Self {
            id,
            tenant_id,
            parent_kind,
            parent_id,
            body,
            pinned: false,
            created_by,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn edit(&mut self, body: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(DomainError::validation("note body cannot be empty"));
        }
        self.body = body;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_pinned(&mut self, pinned: bool, now: DateTime<Utc>) {
        if self.pinned != pinned {
            self.pinned = pinned;
            self.updated_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_empty_body() {
        let err = Note::new(
            NoteId::new(RecordId::new()),
            TenantId::new(),
            EntityKind::Organization,
            RecordId::new(),
            "  ",
            UserId::new(),
            Utc::now(),
        )
        .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error"),
        }
    }

    #[test]
    fn pin_toggle_updates_timestamp_only_on_change() {
        let now = Utc::now();
        let mut note = Note::new(
            NoteId::new(RecordId::new()),
            TenantId::new(),
            EntityKind::Person,
            RecordId::new(),
            "Prefere contato por WhatsApp",
            UserId::new(),
            now,
        )
        .unwrap();

        let later = now + chrono::Duration::minutes(5);
        note.set_pinned(true, later);
        assert!(note.pinned);
        assert_eq!(note.updated_at, later);

        let even_later = later + chrono::Duration::minutes(5);
        note.set_pinned(true, even_later);
        assert_eq!(note.updated_at, later);
    }
}
