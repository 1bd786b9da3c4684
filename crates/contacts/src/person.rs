use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_core::{DomainError, DomainResult, Entity, RecordId, TenantId, UserId};

use crate::organization::OrganizationId;

/// Person identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub RecordId);

impl PersonId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for PersonId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Person (contact) record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// WhatsApp number in E.164 form; keys the inbox conversation.
    pub whatsapp: Option<String>,
    pub job_title: Option<String>,
    pub organization_id: Option<OrganizationId>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` keeps the existing value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub job_title: Option<String>,
    /// `Some(None)` detaches the person from its organization.
    pub organization_id: Option<Option<OrganizationId>>,
    pub owner_id: Option<UserId>,
}

impl Person {
    pub fn new(
        id: PersonId,
        tenant_id: TenantId,
        name: impl Into<String>,
        owner_id: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(Self {
            id,
            tenant_id,
            name,
            email: None,
            phone: None,
            whatsapp: None,
            job_title: None,
            organization_id: None,
            owner_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_patch(&mut self, patch: PersonPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
            self.name = name;
        }
        if let Some(email) = patch.email {
            self.email = non_empty(email);
        }
        if let Some(phone) = patch.phone {
            self.phone = non_empty(phone);
        }
        if let Some(whatsapp) = patch.whatsapp {
            self.whatsapp = non_empty(whatsapp);
        }
        if let Some(job_title) = patch.job_title {
            self.job_title = non_empty(job_title);
        }
        if let Some(organization_id) = patch.organization_id {
            self.organization_id = organization_id;
        }
        if let Some(owner_id) = patch.owner_id {
            self.owner_id = owner_id;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Number of populated optional fields (used by the merge-primary rule).
    pub fn filled_field_count(&self) -> usize {
        [
            self.email.is_some(),
            self.phone.is_some(),
            self.whatsapp.is_some(),
            self.job_title.is_some(),
            self.organization_id.is_some(),
        ]
        .iter()
        .filter(|filled| **filled)
        .count()
    }
}

impl Entity for Person {
    type Id = PersonId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_person(now: DateTime<Utc>) -> Person {
        Person::new(
            PersonId::new(RecordId::new()),
            TenantId::new(),
            "Maria Silva",
            UserId::new(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_empty_name() {
        let err = Person::new(
            PersonId::new(RecordId::new()),
            TenantId::new(),
            "",
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
    fn patch_can_detach_organization() {
        let now = Utc::now();
        let mut person = test_person(now);
        person.organization_id = Some(OrganizationId::new(RecordId::new()));

        person
            .apply_patch(
                PersonPatch {
                    organization_id: Some(None),
                    ..Default::default()
                },
                now,
            )
            .unwrap();

        assert_eq!(person.organization_id, None);
    }

    #[test]
    fn empty_strings_clear_optional_fields() {
        let now = Utc::now();
        let mut person = test_person(now);
        person.email = Some("maria@example.com".to_string());

        person
            .apply_patch(
                PersonPatch {
                    email: Some("  ".to_string()),
                    ..Default::default()
                },
                now,
            )
            .unwrap();

        assert_eq!(person.email, None);
    }
}
