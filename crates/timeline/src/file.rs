use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_core::{DomainError, DomainResult, EntityKind, RecordId, TenantId, UserId};

/// File attachment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub RecordId);

impl FileId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for FileId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// File metadata attached to a parent record.
///
/// Only metadata lives here; the bytes are in external object storage under
/// `storage_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: FileId,
    pub tenant_id: TenantId,
    pub parent_kind: EntityKind,
    pub parent_id: RecordId,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_path: String,
    pub uploaded_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl FileAttachment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: FileId,
        tenant_id: TenantId,
        parent_kind: EntityKind,
        parent_id: RecordId,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: i64,
        uploaded_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let file_name = file_name.into();
        if file_name.trim().is_empty() {
            return Err(DomainError::validation("file name cannot be empty"));
        }
        if size_bytes < 0 {
            return Err(DomainError::validation("file size cannot be negative"));
        }

        let storage_path = format!(
            "{}/{}/{}/{}",
            tenant_id,
            parent_kind.as_str(),
            parent_id,
            file_name
        );

        Ok(Self {
            id,
            tenant_id,
            parent_kind,
            parent_id,
            file_name,
            content_type: content_type.into(),
            size_bytes,
            storage_path,
            uploaded_by,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_path_is_scoped_by_tenant_and_parent() {
        let tenant_id = TenantId::new();
        let parent_id = RecordId::new();
        let f = FileAttachment::new(
            FileId::new(RecordId::new()),
            tenant_id,
            EntityKind::Deal,
            parent_id,
            "proposta.pdf",
            "application/pdf",
            1024,
            UserId::new(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(
            f.storage_path,
            format!("{tenant_id}/deal/{parent_id}/proposta.pdf")
        );
    }

    #[test]
    fn empty_file_name_is_rejected() {
        let err = FileAttachment::new(
            FileId::new(RecordId::new()),
            TenantId::new(),
            EntityKind::Deal,
            RecordId::new(),
            "",
            "application/pdf",
            1,
            UserId::new(),
            Utc::now(),
        )
        .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error"),
        }
    }
}
