use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use funil_contacts::{OrganizationId, PersonId};
use funil_core::{DomainError, DomainResult, Entity, RecordId, TenantId, UserId};

use crate::pipeline::{PipelineId, StageId};

/// Deal identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(pub RecordId);

impl DealId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for DealId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Deal lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum DealStatus {
    Open,
    Won { won_at: DateTime<Utc> },
    Lost { lost_at: DateTime<Utc>, reason: Option<String> },
}

impl DealStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, DealStatus::Open)
    }
}

/// A sales opportunity moving through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub tenant_id: TenantId,
    pub title: String,
    /// Monetary value in centavos (BRL minor units).
    pub value_cents: i64,
    pub pipeline_id: PipelineId,
    pub stage_id: StageId,
    pub status: DealStatus,
    pub organization_id: Option<OrganizationId>,
    pub person_id: Option<PersonId>,
    pub owner_id: UserId,
    pub expected_close: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` keeps the existing value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DealPatch {
    pub title: Option<String>,
    pub value_cents: Option<i64>,
    pub organization_id: Option<Option<OrganizationId>>,
    pub person_id: Option<Option<PersonId>>,
    pub owner_id: Option<UserId>,
    pub expected_close: Option<Option<NaiveDate>>,
}

impl Deal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: DealId,
        tenant_id: TenantId,
        title: impl Into<String>,
        value_cents: i64,
        pipeline_id: PipelineId,
        stage_id: StageId,
        owner_id: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if value_cents < 0 {
            return Err(DomainError::validation("value cannot be negative"));
        }

        Ok(Self {
            id,
            tenant_id,
            title,
            value_cents,
            pipeline_id,
            stage_id,
            status: DealStatus::Open,
            organization_id: None,
            person_id: None,
            owner_id,
            expected_close: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_patch(&mut self, patch: DealPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(DomainError::validation("title cannot be empty"));
            }
            self.title = title;
        }
        if let Some(value_cents) = patch.value_cents {
            if value_cents < 0 {
                return Err(DomainError::validation("value cannot be negative"));
            }
            self.value_cents = value_cents;
        }
        if let Some(organization_id) = patch.organization_id {
            self.organization_id = organization_id;
        }
        if let Some(person_id) = patch.person_id {
            self.person_id = person_id;
        }
        if let Some(owner_id) = patch.owner_id {
            self.owner_id = owner_id;
        }
        if let Some(expected_close) = patch.expected_close {
            self.expected_close = expected_close;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Move to another stage of the same pipeline. Closed deals do not move.
    pub fn move_to_stage(&mut self, stage_id: StageId, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.is_open() {
            return Err(DomainError::conflict("deal is already closed"));
        }
        self.stage_id = stage_id;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_won(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.is_open() {
            return Err(DomainError::conflict("deal is already closed"));
        }
        self.status = DealStatus::Won { won_at: now };
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_lost(&mut self, reason: Option<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.is_open() {
            return Err(DomainError::conflict("deal is already closed"));
        }
        self.status = DealStatus::Lost {
            lost_at: now,
            reason,
        };
        self.updated_at = now;
        Ok(())
    }

    /// Reopen a closed deal back into its current stage.
    pub fn reopen(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_open() {
            return Err(DomainError::conflict("deal is not closed"));
        }
        self.status = DealStatus::Open;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Deal {
    type Id = DealId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_deal(now: DateTime<Utc>) -> Deal {
        Deal::new(
            DealId::new(RecordId::new()),
            TenantId::new(),
            "Contrato anual",
            120_000_00,
            PipelineId::new(RecordId::new()),
            StageId::new(RecordId::new()),
            UserId::new(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_negative_value() {
        let err = Deal::new(
            DealId::new(RecordId::new()),
            TenantId::new(),
            "Contrato",
            -1,
            PipelineId::new(RecordId::new()),
            StageId::new(RecordId::new()),
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
    fn won_deal_cannot_move_stages() {
        let now = Utc::now();
        let mut deal = test_deal(now);
        deal.mark_won(now).unwrap();

        let err = deal
            .move_to_stage(StageId::new(RecordId::new()), now)
            .unwrap_err();
        match err {
            DomainError::Conflict(_) => {}
            _ => panic!("Expected Conflict error"),
        }
    }

    #[test]
    fn closing_twice_is_a_conflict() {
        let now = Utc::now();
        let mut deal = test_deal(now);
        deal.mark_lost(Some("preço".to_string()), now).unwrap();
        assert!(deal.mark_won(now).is_err());
    }

    #[test]
    fn reopen_restores_open_status() {
        let now = Utc::now();
        let mut deal = test_deal(now);
        deal.mark_won(now).unwrap();
        deal.reopen(now).unwrap();
        assert!(deal.status.is_open());
    }

    #[test]
    fn reopen_of_open_deal_is_a_conflict() {
        let now = Utc::now();
        let mut deal = test_deal(now);
        assert!(deal.reopen(now).is_err());
    }
}
