use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_core::{DomainError, DomainResult, EntityKind, RecordId, TenantId};

/// Tag identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub RecordId);

impl TagId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for TagId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A label that can be attached to any top-level record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Hex color, `#rrggbb`.
    pub color: String,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn new(
        id: TagId,
        tenant_id: TenantId,
        name: impl Into<String>,
        color: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("tag name cannot be empty"));
        }
        let color = color.into();
        if !is_hex_color(&color) {
            return Err(DomainError::validation("color must be #rrggbb"));
        }

        Ok(Self {
            id,
            tenant_id,
            name,
            color,
            created_at: now,
        })
    }
}

/// Assignment of a tag to a record. Unique per `(tag, parent)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagLink {
    pub tag_id: TagId,
    pub parent_kind: EntityKind,
    pub parent_id: RecordId,
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hex_colors_only() {
        let now = Utc::now();
        assert!(Tag::new(TagId::new(RecordId::new()), TenantId::new(), "VIP", "#ff8800", now).is_ok());
        assert!(Tag::new(TagId::new(RecordId::new()), TenantId::new(), "VIP", "red", now).is_err());
        assert!(Tag::new(TagId::new(RecordId::new()), TenantId::new(), "VIP", "#ff88", now).is_err());
    }

    #[test]
    fn rejects_empty_names() {
        let err = Tag::new(
            TagId::new(RecordId::new()),
            TenantId::new(),
            " ",
            "#ffffff",
            Utc::now(),
        )
        .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error"),
        }
    }
}
