use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use funil_contacts::{OrganizationId, PersonId};
use funil_core::{EntityKind, RecordId};
use funil_deals::{Deal, DealId, DealPatch, Pipeline, PipelineId, Stage, StageId};
use funil_infra::{store::DealFilter, Pagination};
use funil_timeline::{HistoryEntry, HistoryKind};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn pipelines_router() -> Router {
    Router::new()
        .route("/", post(create_pipeline).get(list_pipelines))
        .route("/:id", get(get_pipeline))
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/:id", get(get_one).patch(update).delete(delete_one))
        .route("/:id/stage", post(move_stage))
        .route("/:id/win", post(win))
        .route("/:id/lose", post(lose))
        .route("/:id/reopen", post(reopen))
        .route("/:id/history", get(history))
}

fn parse_id(raw: &str) -> Result<DealId, axum::response::Response> {
    raw.parse::<RecordId>().map(DealId::new).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid deal id")
    })
}

async fn create_pipeline(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreatePipelineRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.create") {
        return errors::forbidden(e);
    }

    let stages: Vec<Stage> = body
        .stages
        .into_iter()
        .map(|s| Stage {
            id: StageId::new(RecordId::new()),
            name: s.name,
            position: s.position,
            probability: s.probability,
        })
        .collect();

    let pipeline = match Pipeline::new(
        PipelineId::new(RecordId::new()),
        tenant.tenant_id(),
        body.name,
        stages,
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => return errors::domain_error_to_response(e),
    };

    if let Err(e) = services.deals.insert_pipeline(pipeline.clone()).await {
        return errors::store_error_to_response(e);
    }
    (StatusCode::CREATED, Json(dto::pipeline_to_json(&pipeline))).into_response()
}

async fn list_pipelines(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.read") {
        return errors::forbidden(e);
    }

    match services.deals.pipelines(tenant.tenant_id()).await {
        Ok(pipelines) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": pipelines.iter().map(dto::pipeline_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn get_pipeline(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.read") {
        return errors::forbidden(e);
    }
    let id = match id.parse::<RecordId>() {
        Ok(id) => PipelineId::new(id),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid pipeline id")
        }
    };

    match services.deals.pipeline(tenant.tenant_id(), id).await {
        Ok(pipeline) => (StatusCode::OK, Json(dto::pipeline_to_json(&pipeline))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateDealRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.create") {
        return errors::forbidden(e);
    }

    let pipeline_id = PipelineId::new(RecordId::from_uuid(body.pipeline_id));
    let pipeline = match services.deals.pipeline(tenant.tenant_id(), pipeline_id).await {
        Ok(pipeline) => pipeline,
        Err(e) => return errors::store_error_to_response(e),
    };

    let stage_id = match body.stage_id {
        Some(raw) => {
            let stage_id = StageId::new(RecordId::from_uuid(raw));
            if !pipeline.contains_stage(stage_id) {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "unknown_stage",
                    "stage does not belong to the pipeline",
                );
            }
            stage_id
        }
        None => pipeline.first_stage().id,
    };

    let now = Utc::now();
    let owner = body.owner_id.unwrap_or_else(|| principal.user_id());
    let mut deal = match Deal::new(
        DealId::new(RecordId::new()),
        tenant.tenant_id(),
        body.title,
        body.value_cents,
        pipeline_id,
        stage_id,
        owner,
        now,
    ) {
        Ok(deal) => deal,
        Err(e) => return errors::domain_error_to_response(e),
    };
    deal.organization_id = body
        .organization_id
        .map(|id| OrganizationId::new(RecordId::from_uuid(id)));
    deal.person_id = body.person_id.map(|id| PersonId::new(RecordId::from_uuid(id)));
    deal.expected_close = body.expected_close;

    if let Err(e) = services.deals.insert_deal(deal.clone()).await {
        return errors::store_error_to_response(e);
    }

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        EntityKind::Deal,
        deal.id.record(),
        HistoryKind::Created,
        "Negócio criado",
        serde_json::json!({}),
        principal.user_id(),
        now,
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (StatusCode::CREATED, Json(dto::deal_to_json(&deal))).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct DealListParams {
    search: Option<String>,
    pipeline_id: Option<Uuid>,
    stage_id: Option<Uuid>,
    status: Option<String>,
    owner_ids: Option<String>,
    organization_id: Option<Uuid>,
    person_id: Option<Uuid>,
    page: Option<u32>,
    per_page: Option<u32>,
}

async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<DealListParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.read") {
        return errors::forbidden(e);
    }

    let filter = DealFilter {
        search: params.search,
        pipeline_id: params
            .pipeline_id
            .map(|id| PipelineId::new(RecordId::from_uuid(id))),
        stage_id: params.stage_id.map(|id| StageId::new(RecordId::from_uuid(id))),
        status: params.status,
        owner_ids: dto::ListParams::uuid_list(&params.owner_ids)
            .into_iter()
            .map(Into::into)
            .collect(),
        organization_id: params
            .organization_id
            .map(|id| OrganizationId::new(RecordId::from_uuid(id))),
        person_id: params.person_id.map(|id| PersonId::new(RecordId::from_uuid(id))),
    };
    let page = Pagination::new(params.page.unwrap_or(1), params.per_page.unwrap_or(25));

    match services.deals.deals(tenant.tenant_id(), &filter, page).await {
        Ok(result) => (
            StatusCode::OK,
            Json(dto::page_to_json(result, dto::deal_to_json)),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.deals.deal(tenant.tenant_id(), id).await {
        Ok(deal) => (StatusCode::OK, Json(dto::deal_to_json(&deal))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(patch): Json<DealPatch>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.update") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut deal = match services.deals.deal(tenant.tenant_id(), id).await {
        Ok(deal) => deal,
        Err(e) => return errors::store_error_to_response(e),
    };

    if let Err(e) = deal.apply_patch(patch, Utc::now()) {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.deals.update_deal(deal.clone()).await {
        return errors::store_error_to_response(e);
    }

    (StatusCode::OK, Json(dto::deal_to_json(&deal))).into_response()
}

async fn delete_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.delete") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.deals.delete_deal(tenant.tenant_id(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn move_stage(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::MoveStageRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.update") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut deal = match services.deals.deal(tenant.tenant_id(), id).await {
        Ok(deal) => deal,
        Err(e) => return errors::store_error_to_response(e),
    };
    let pipeline = match services.deals.pipeline(tenant.tenant_id(), deal.pipeline_id).await {
        Ok(pipeline) => pipeline,
        Err(e) => return errors::store_error_to_response(e),
    };

    let stage_id = StageId::new(RecordId::from_uuid(body.stage_id));
    let Some(stage) = pipeline.stage(stage_id) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "unknown_stage",
            "stage does not belong to the pipeline",
        );
    };
    let stage_name = stage.name.clone();
    let previous = pipeline
        .stage(deal.stage_id)
        .map(|s| s.name.clone())
        .unwrap_or_default();

    let now = Utc::now();
    if let Err(e) = deal.move_to_stage(stage_id, now) {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.deals.update_deal(deal.clone()).await {
        return errors::store_error_to_response(e);
    }

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        EntityKind::Deal,
        deal.id.record(),
        HistoryKind::StageChanged,
        format!("Etapa alterada: {previous} → {stage_name}"),
        serde_json::json!({ "from": previous, "to": stage_name }),
        principal.user_id(),
        now,
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (StatusCode::OK, Json(dto::deal_to_json(&deal))).into_response()
}

async fn win(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    close_deal(services, tenant, principal, id, Closing::Win).await
}

async fn lose(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::LoseDealRequest>,
) -> axum::response::Response {
    close_deal(services, tenant, principal, id, Closing::Lose(body.reason)).await
}

enum Closing {
    Win,
    Lose(Option<String>),
}

async fn close_deal(
    services: Arc<AppServices>,
    tenant: TenantContext,
    principal: PrincipalContext,
    id: String,
    closing: Closing,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.update") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut deal = match services.deals.deal(tenant.tenant_id(), id).await {
        Ok(deal) => deal,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = Utc::now();
    let (result, kind, description) = match &closing {
        Closing::Win => (deal.mark_won(now), HistoryKind::DealWon, "Negócio ganho".to_string()),
        Closing::Lose(reason) => (
            deal.mark_lost(reason.clone(), now),
            HistoryKind::DealLost,
            match reason {
                Some(reason) => format!("Negócio perdido: {reason}"),
                None => "Negócio perdido".to_string(),
            },
        ),
    };
    if let Err(e) = result {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.deals.update_deal(deal.clone()).await {
        return errors::store_error_to_response(e);
    }

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        EntityKind::Deal,
        deal.id.record(),
        kind,
        description,
        serde_json::json!({ "value_cents": deal.value_cents }),
        principal.user_id(),
        now,
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (StatusCode::OK, Json(dto::deal_to_json(&deal))).into_response()
}

async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .timeline
        .history_for(tenant.tenant_id(), EntityKind::Deal, id.record())
        .await
    {
        Ok(entries) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": entries.iter().map(dto::history_view_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn reopen(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "deals.update") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut deal = match services.deals.deal(tenant.tenant_id(), id).await {
        Ok(deal) => deal,
        Err(e) => return errors::store_error_to_response(e),
    };
    if let Err(e) = deal.reopen(Utc::now()) {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.deals.update_deal(deal.clone()).await {
        return errors::store_error_to_response(e);
    }

    (StatusCode::OK, Json(dto::deal_to_json(&deal))).into_response()
}
