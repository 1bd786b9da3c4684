//! Reporting: pure data-shaping over fetched records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use funil_core::UserId;
use funil_deals::{Deal, DealStatus, Pipeline, StageId};
use funil_timeline::Activity;

/// Open deal count + value per stage of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub stage_id: StageId,
    pub stage_name: String,
    pub open_count: u64,
    pub open_value_cents: i64,
    /// Open value weighted by the stage's win probability.
    pub weighted_value_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub stages: Vec<StageSummary>,
    pub open_count: u64,
    pub open_value_cents: i64,
}

/// Summarize the open deals of one pipeline, stage by stage.
pub fn pipeline_summary(pipeline: &Pipeline, deals: &[Deal]) -> PipelineSummary {
    let mut stages: Vec<StageSummary> = pipeline
        .stages
        .iter()
        .map(|s| StageSummary {
            stage_id: s.id,
            stage_name: s.name.clone(),
            open_count: 0,
            open_value_cents: 0,
            weighted_value_cents: 0,
        })
        .collect();

    let mut open_count = 0;
    let mut open_value_cents = 0;
    for deal in deals {
        if deal.pipeline_id != pipeline.id || !deal.status.is_open() {
            continue;
        }
        let Some(stage) = pipeline.stage(deal.stage_id) else {
            continue;
        };
        let Some(summary) = stages.iter_mut().find(|s| s.stage_id == deal.stage_id) else {
            continue;
        };
        summary.open_count += 1;
        summary.open_value_cents += deal.value_cents;
        summary.weighted_value_cents += deal.value_cents * i64::from(stage.probability) / 100;
        open_count += 1;
        open_value_cents += deal.value_cents;
    }

    PipelineSummary {
        stages,
        open_count,
        open_value_cents,
    }
}

/// Win/loss outcome inside a period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WinLossReport {
    pub won_count: u64,
    pub won_value_cents: i64,
    pub lost_count: u64,
    pub lost_value_cents: i64,
}

pub fn win_loss(deals: &[Deal], from: DateTime<Utc>, to: DateTime<Utc>) -> WinLossReport {
    let mut report = WinLossReport::default();
    for deal in deals {
        match &deal.status {
            DealStatus::Won { won_at } if *won_at >= from && *won_at <= to => {
                report.won_count += 1;
                report.won_value_cents += deal.value_cents;
            }
            DealStatus::Lost { lost_at, .. } if *lost_at >= from && *lost_at <= to => {
                report.lost_count += 1;
                report.lost_value_cents += deal.value_cents;
            }
            _ => {}
        }
    }
    report
}

/// Activity totals per owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OwnerActivityReport {
    pub total: u64,
    pub done: u64,
    pub overdue: u64,
}

pub fn activities_by_owner(
    activities: &[Activity],
    now: DateTime<Utc>,
) -> HashMap<UserId, OwnerActivityReport> {
    let mut per_owner: HashMap<UserId, OwnerActivityReport> = HashMap::new();
    for activity in activities {
        let entry = per_owner.entry(activity.owner_id).or_default();
        entry.total += 1;
        if activity.is_done() {
            entry.done += 1;
        }
        if activity.is_overdue(now) {
            entry.overdue += 1;
        }
    }
    per_owner
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use funil_core::{RecordId, TenantId};
    use funil_deals::DealId;

    fn pipeline_with_deals() -> (Pipeline, Vec<Deal>) {
        let tenant = TenantId::new();
        let pipeline = Pipeline::default_for_tenant(tenant);
        let now = Utc::now();

        let mut deals = Vec::new();
        for (i, value) in [100_00i64, 250_00, 50_00].iter().enumerate() {
            let stage = &pipeline.stages[i % 2];
            let deal = Deal::new(
                DealId::new(RecordId::new()),
                tenant,
                format!("Deal {i}"),
                *value,
                pipeline.id,
                stage.id,
                funil_core::UserId::new(),
                now,
            )
            .unwrap();
            deals.push(deal);
        }
        (pipeline, deals)
    }

    #[test]
    fn pipeline_summary_groups_open_deals_by_stage() {
        let (pipeline, deals) = pipeline_with_deals();
        let summary = pipeline_summary(&pipeline, &deals);

        assert_eq!(summary.open_count, 3);
        assert_eq!(summary.open_value_cents, 400_00);
        assert_eq!(summary.stages.len(), pipeline.stages.len());
        assert_eq!(summary.stages[0].open_count, 2);
        assert_eq!(summary.stages[1].open_count, 1);
    }

    #[test]
    fn closed_deals_leave_the_open_summary() {
        let (pipeline, mut deals) = pipeline_with_deals();
        let now = Utc::now();
        deals[0].mark_won(now).unwrap();

        let summary = pipeline_summary(&pipeline, &deals);
        assert_eq!(summary.open_count, 2);
    }

    #[test]
    fn weighted_value_applies_stage_probability() {
        let (pipeline, deals) = pipeline_with_deals();
        let summary = pipeline_summary(&pipeline, &deals);
        // First stage has probability 10.
        let first = &summary.stages[0];
        assert_eq!(
            first.weighted_value_cents,
            first.open_value_cents / 10
        );
    }

    #[test]
    fn win_loss_counts_only_the_period() {
        let (_, mut deals) = pipeline_with_deals();
        let now = Utc::now();
        deals[0].mark_won(now).unwrap();
        deals[1]
            .mark_lost(Some("orçamento".to_string()), now - Duration::days(60))
            .unwrap();

        let report = win_loss(&deals, now - Duration::days(30), now + Duration::days(1));
        assert_eq!(report.won_count, 1);
        assert_eq!(report.lost_count, 0);
    }
}
