//! Append-only history entries.
//!
//! Entries are written once and never updated; the list for a record is its
//! audit trail. Author display names are resolved at read time from the
//! profile directory, not denormalized into the entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_core::{EntityKind, RecordId, TenantId, UserId};

/// History entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryEntryId(pub RecordId);

impl HistoryEntryId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for HistoryEntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Created,
    Updated,
    StageChanged,
    DealWon,
    DealLost,
    NoteAdded,
    FileAttached,
    Enriched,
    EmailDrafted,
    EmailSent,
    MessageSent,
    MessageReceived,
    OrganizationsMerged,
    ContactsMerged,
    MergeUndone,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Created => "created",
            HistoryKind::Updated => "updated",
            HistoryKind::StageChanged => "stage_changed",
            HistoryKind::DealWon => "deal_won",
            HistoryKind::DealLost => "deal_lost",
            HistoryKind::NoteAdded => "note_added",
            HistoryKind::FileAttached => "file_attached",
            HistoryKind::Enriched => "enriched",
            HistoryKind::EmailDrafted => "email_drafted",
            HistoryKind::EmailSent => "email_sent",
            HistoryKind::MessageSent => "message_sent",
            HistoryKind::MessageReceived => "message_received",
            HistoryKind::OrganizationsMerged => "organizations_merged",
            HistoryKind::ContactsMerged => "contacts_merged",
            HistoryKind::MergeUndone => "merge_undone",
        }
    }

    /// Merge entry kind for a given record kind, when merging is supported.
    pub fn merge_kind_for(kind: EntityKind) -> Option<Self> {
        match kind {
            EntityKind::Organization => Some(HistoryKind::OrganizationsMerged),
            EntityKind::Person => Some(HistoryKind::ContactsMerged),
            EntityKind::Deal => None,
        }
    }
}

/// One immutable audit-trail entry on a parent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryEntryId,
    pub tenant_id: TenantId,
    pub parent_kind: EntityKind,
    pub parent_id: RecordId,
    pub kind: HistoryKind,
    pub description: String,
    /// Structured detail payload (e.g. merged record id, stage names).
    pub detail: serde_json::Value,
    pub actor_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: TenantId,
        parent_kind: EntityKind,
        parent_id: RecordId,
        kind: HistoryKind,
        description: impl Into<String>,
        detail: serde_json::Value,
        actor_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoryEntryId::new(RecordId::new()),
            tenant_id,
            parent_kind,
            parent_id,
            kind,
            description: description.into(),
            detail,
            actor_id,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_kind_follows_record_kind() {
        assert_eq!(
            HistoryKind::merge_kind_for(EntityKind::Organization),
            Some(HistoryKind::OrganizationsMerged)
        );
        assert_eq!(
            HistoryKind::merge_kind_for(EntityKind::Person),
            Some(HistoryKind::ContactsMerged)
        );
        assert_eq!(HistoryKind::merge_kind_for(EntityKind::Deal), None);
    }

    #[test]
    fn kind_strings_are_snake_case() {
        assert_eq!(
            HistoryKind::OrganizationsMerged.as_str(),
            "organizations_merged"
        );
        assert_eq!(HistoryKind::MergeUndone.as_str(), "merge_undone");
    }
}
