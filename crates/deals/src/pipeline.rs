use serde::{Deserialize, Serialize};

use funil_core::{DomainError, DomainResult, RecordId, TenantId};

/// Pipeline identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub RecordId);

impl PipelineId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Stage identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub RecordId);

impl StageId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn record(self) -> RecordId {
        self.0
    }
}

impl core::fmt::Display for StageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One column of a pipeline board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    /// Board position, 0-based, unique within the pipeline.
    pub position: u32,
    /// Win probability in percent (0–100), used by weighted forecasts.
    pub probability: u8,
}

/// Ordered set of stages a deal moves through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub tenant_id: TenantId,
    pub name: String,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(
        id: PipelineId,
        tenant_id: TenantId,
        name: impl Into<String>,
        stages: Vec<Stage>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("pipeline name cannot be empty"));
        }
        if stages.is_empty() {
            return Err(DomainError::validation("pipeline needs at least one stage"));
        }

        let mut positions: Vec<u32> = stages.iter().map(|s| s.position).collect();
        positions.sort_unstable();
        positions.dedup();
        if positions.len() != stages.len() {
            return Err(DomainError::invariant("stage positions must be unique"));
        }
        if stages.iter().any(|s| s.probability > 100) {
            return Err(DomainError::validation("stage probability must be 0-100"));
        }

        let mut stages = stages;
        stages.sort_by_key(|s| s.position);
        Ok(Self {
            id,
            tenant_id,
            name,
            stages,
        })
    }

    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn first_stage(&self) -> &Stage {
        // Constructor guarantees at least one stage.
        &self.stages[0]
    }

    pub fn contains_stage(&self, id: StageId) -> bool {
        self.stage(id).is_some()
    }

    /// Default pipeline created for a new tenant.
    pub fn default_for_tenant(tenant_id: TenantId) -> Self {
        let names = [
            ("Prospecção", 10u8),
            ("Qualificação", 25),
            ("Proposta", 50),
            ("Negociação", 75),
            ("Fechamento", 90),
        ];
        let stages = names
            .iter()
            .enumerate()
            .map(|(i, (name, probability))| Stage {
                id: StageId::new(RecordId::new()),
                name: (*name).to_string(),
                position: i as u32,
                probability: *probability,
            })
            .collect();

        // Stages built above satisfy every constructor invariant.
        Self::new(
            PipelineId::new(RecordId::new()),
            tenant_id,
            "Funil de vendas",
            stages,
        )
        .unwrap_or_else(|_| unreachable!("default pipeline stages are valid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(position: u32) -> Stage {
        Stage {
            id: StageId::new(RecordId::new()),
            name: format!("Stage {position}"),
            position,
            probability: 50,
        }
    }

    #[test]
    fn stages_are_sorted_by_position() {
        let p = Pipeline::new(
            PipelineId::new(RecordId::new()),
            TenantId::new(),
            "Vendas",
            vec![stage(2), stage(0), stage(1)],
        )
        .unwrap();
        let positions: Vec<u32> = p.stages.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_positions_are_rejected() {
        let err = Pipeline::new(
            PipelineId::new(RecordId::new()),
            TenantId::new(),
            "Vendas",
            vec![stage(0), stage(0)],
        )
        .unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            _ => panic!("Expected InvariantViolation"),
        }
    }

    #[test]
    fn empty_pipeline_is_rejected() {
        let err = Pipeline::new(
            PipelineId::new(RecordId::new()),
            TenantId::new(),
            "Vendas",
            vec![],
        )
        .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error"),
        }
    }

    #[test]
    fn default_pipeline_has_five_stages() {
        let p = Pipeline::default_for_tenant(TenantId::new());
        assert_eq!(p.stages.len(), 5);
        assert_eq!(p.first_stage().name, "Prospecção");
    }

    proptest::proptest! {
        #[test]
        fn stages_always_come_out_sorted(
            positions in proptest::collection::hash_set(0u32..100, 1..8)
        ) {
            let stages: Vec<Stage> = positions.iter().map(|p| stage(*p)).collect();
            let pipeline = Pipeline::new(
                PipelineId::new(RecordId::new()),
                TenantId::new(),
                "Vendas",
                stages,
            )
            .unwrap();
            proptest::prop_assert!(pipeline
                .stages
                .windows(2)
                .all(|w| w[0].position < w[1].position));
        }
    }
}
