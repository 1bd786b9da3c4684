use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use funil_core::{DomainError, DomainResult, Entity, RecordId, TenantId, UserId};

use crate::cnpj::{is_valid_cnpj, normalize_cnpj};

/// Organization identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub RecordId);

impl OrganizationId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Postal address (all fields optional; partial addresses are common).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self.street.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.postal_code.is_none()
    }
}

/// Fields populated from a national-registry lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrichmentData {
    pub legal_name: Option<String>,
    pub trade_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub main_activity: Option<String>,
    pub address: Address,
}

/// Organization record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub tenant_id: TenantId,
    pub name: String,
    pub legal_name: Option<String>,
    /// Bare 14-digit CNPJ (stored normalized; formatted only for display).
    pub cnpj: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub main_activity: Option<String>,
    pub address: Address,
    pub owner_id: UserId,
    pub enriched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` keeps the existing value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub legal_name: Option<String>,
    pub cnpj: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<Address>,
    pub owner_id: Option<UserId>,
}

impl Organization {
    pub fn new(
        id: OrganizationId,
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
            legal_name: None,
            cnpj: None,
            email: None,
            phone: None,
            website: None,
            main_activity: None,
            address: Address::default(),
            owner_id,
            enriched_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Set the CNPJ (accepts formatted or bare input, stores it normalized).
    pub fn set_cnpj(&mut self, value: &str, now: DateTime<Utc>) -> DomainResult<()> {
        if !is_valid_cnpj(value) {
            return Err(DomainError::validation("invalid CNPJ"));
        }
        self.cnpj = Some(normalize_cnpj(value));
        self.updated_at = now;
        Ok(())
    }

    pub fn apply_patch(&mut self, patch: OrganizationPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
            self.name = name;
        }
        if let Some(cnpj) = patch.cnpj {
            if !is_valid_cnpj(&cnpj) {
                return Err(DomainError::validation("invalid CNPJ"));
            }
            self.cnpj = Some(normalize_cnpj(&cnpj));
        }
        if let Some(legal_name) = patch.legal_name {
            self.legal_name = non_empty(legal_name);
        }
        if let Some(email) = patch.email {
            self.email = non_empty(email);
        }
        if let Some(phone) = patch.phone {
            self.phone = non_empty(phone);
        }
        if let Some(website) = patch.website {
            self.website = non_empty(website);
        }
        if let Some(address) = patch.address {
            self.address = address;
        }
        if let Some(owner_id) = patch.owner_id {
            self.owner_id = owner_id;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Apply registry-lookup results. Existing values are only overwritten by
    /// present lookup fields; the enrichment timestamp is always stamped.
    pub fn apply_enrichment(&mut self, data: EnrichmentData, now: DateTime<Utc>) {
        if data.legal_name.is_some() {
            self.legal_name = data.legal_name;
        }
        if data.trade_name.is_some() && self.name.trim().is_empty() {
            if let Some(trade_name) = data.trade_name {
                self.name = trade_name;
            }
        }
        if data.email.is_some() {
            self.email = data.email;
        }
        if data.phone.is_some() {
            self.phone = data.phone;
        }
        if data.main_activity.is_some() {
            self.main_activity = data.main_activity;
        }
        if !data.address.is_empty() {
            self.address = data.address;
        }
        self.enriched_at = Some(now);
        self.updated_at = now;
    }

    /// Number of populated optional fields (used by the merge-primary rule).
    pub fn filled_field_count(&self) -> usize {
        [
            self.legal_name.is_some(),
            self.cnpj.is_some(),
            self.email.is_some(),
            self.phone.is_some(),
            self.website.is_some(),
            self.main_activity.is_some(),
            !self.address.is_empty(),
        ]
        .iter()
        .filter(|filled| **filled)
        .count()
    }
}

impl Entity for Organization {
    type Id = OrganizationId;

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

    fn test_org(now: DateTime<Utc>) -> Organization {
        Organization::new(
            OrganizationId::new(RecordId::new()),
            TenantId::new(),
            "Acme Ltda",
            UserId::new(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_empty_name() {
        let err = Organization::new(
            OrganizationId::new(RecordId::new()),
            TenantId::new(),
            "   ",
            UserId::new(),
            Utc::now(),
        )
        .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for empty name"),
        }
    }

    #[test]
    fn set_cnpj_normalizes_formatted_input() {
        let now = Utc::now();
        let mut org = test_org(now);
        org.set_cnpj("11.222.333/0001-81", now).unwrap();
        assert_eq!(org.cnpj.as_deref(), Some("11222333000181"));
    }

    #[test]
    fn set_cnpj_rejects_bad_check_digits() {
        let now = Utc::now();
        let mut org = test_org(now);
        assert!(org.set_cnpj("11222333000199", now).is_err());
        assert_eq!(org.cnpj, None);
    }

    #[test]
    fn patch_keeps_unset_fields() {
        let now = Utc::now();
        let mut org = test_org(now);
        org.email = Some("old@acme.com".to_string());

        org.apply_patch(
            OrganizationPatch {
                phone: Some("+55 11 91234-5678".to_string()),
                ..Default::default()
            },
            now,
        )
        .unwrap();

        assert_eq!(org.email.as_deref(), Some("old@acme.com"));
        assert_eq!(org.phone.as_deref(), Some("+55 11 91234-5678"));
    }

    #[test]
    fn patch_rejects_empty_name() {
        let now = Utc::now();
        let mut org = test_org(now);
        let err = org
            .apply_patch(
                OrganizationPatch {
                    name: Some(String::new()),
                    ..Default::default()
                },
                now,
            )
            .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error"),
        }
    }

    #[test]
    fn enrichment_fills_fields_and_stamps_timestamp() {
        let now = Utc::now();
        let mut org = test_org(now);
        org.apply_enrichment(
            EnrichmentData {
                legal_name: Some("ACME COMERCIO LTDA".to_string()),
                email: Some("contato@acme.com.br".to_string()),
                ..Default::default()
            },
            now,
        );
        assert_eq!(org.legal_name.as_deref(), Some("ACME COMERCIO LTDA"));
        assert_eq!(org.enriched_at, Some(now));
    }

    #[test]
    fn filled_field_count_counts_populated_fields() {
        let now = Utc::now();
        let mut org = test_org(now);
        assert_eq!(org.filled_field_count(), 0);
        org.email = Some("a@b.c".to_string());
        org.cnpj = Some("11222333000181".to_string());
        assert_eq!(org.filled_field_count(), 2);
    }
}
