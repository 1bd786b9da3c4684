use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use funil_core::RecordId;
use funil_deals::PipelineId;
use funil_infra::reports;

use crate::app::{errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/pipeline/:id", get(pipeline))
        .route("/win-loss", get(win_loss))
        .route("/activities", get(activities))
}

async fn pipeline(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "reports.read") {
        return errors::forbidden(e);
    }
    let id = match id.parse::<RecordId>() {
        Ok(id) => PipelineId::new(id),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid pipeline id")
        }
    };

    let pipeline = match services.deals.pipeline(tenant.tenant_id(), id).await {
        Ok(pipeline) => pipeline,
        Err(e) => return errors::store_error_to_response(e),
    };
    let deals = match services.deals.all_deals(tenant.tenant_id()).await {
        Ok(deals) => deals,
        Err(e) => return errors::store_error_to_response(e),
    };

    let summary = reports::pipeline_summary(&pipeline, &deals);
    (StatusCode::OK, Json(serde_json::json!(summary))).into_response()
}

#[derive(Debug, Deserialize)]
struct PeriodParams {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn win_loss(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<PeriodParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "reports.read") {
        return errors::forbidden(e);
    }

    let to = params.to.unwrap_or_else(Utc::now);
    let from = params.from.unwrap_or(to - Duration::days(30));

    let deals = match services.deals.all_deals(tenant.tenant_id()).await {
        Ok(deals) => deals,
        Err(e) => return errors::store_error_to_response(e),
    };

    let report = reports::win_loss(&deals, from, to);
    (StatusCode::OK, Json(serde_json::json!(report))).into_response()
}

async fn activities(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "reports.read") {
        return errors::forbidden(e);
    }

    let activities = match services.timeline.all_activities(tenant.tenant_id()).await {
        Ok(activities) => activities,
        Err(e) => return errors::store_error_to_response(e),
    };

    let per_owner = reports::activities_by_owner(&activities, Utc::now());
    let items: Vec<serde_json::Value> = per_owner
        .iter()
        .map(|(owner, report)| {
            serde_json::json!({
                "owner_id": owner.to_string(),
                "total": report.total,
                "done": report.done,
                "overdue": report.overdue,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({ "items": items })),
    )
        .into_response()
}
