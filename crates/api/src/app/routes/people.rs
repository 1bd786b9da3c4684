use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use funil_contacts::{OrganizationId, Person, PersonId, PersonPatch};
use funil_core::{EntityKind, RecordId};
use funil_infra::{export, Pagination, PersonFilter};
use funil_timeline::{HistoryEntry, HistoryKind, TagId};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/export", get(export_csv))
        .route("/:id", get(get_one).patch(update).delete(delete_one))
        .route("/:id/merge", post(merge))
        .route("/:id/history", get(history))
}

fn parse_id(raw: &str) -> Result<PersonId, axum::response::Response> {
    raw.parse::<RecordId>().map(PersonId::new).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid person id")
    })
}

fn filter_from_params(params: &dto::ListParams) -> PersonFilter {
    PersonFilter {
        search: params.search.clone(),
        owner_ids: dto::ListParams::uuid_list(&params.owner_ids)
            .into_iter()
            .map(Into::into)
            .collect(),
        organization_id: params
            .organization_id
            .map(|id| OrganizationId::new(RecordId::from_uuid(id))),
        created_from: params.created_from,
        created_to: params.created_to,
        tag_ids: dto::ListParams::uuid_list(&params.tags)
            .into_iter()
            .map(|id| TagId::new(RecordId::from_uuid(id)))
            .collect(),
    }
}

async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreatePersonRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "people.create") {
        return errors::forbidden(e);
    }

    let now = Utc::now();
    let owner = body.owner_id.unwrap_or_else(|| principal.user_id());
    let mut person = match Person::new(
        PersonId::new(RecordId::new()),
        tenant.tenant_id(),
        body.name,
        owner,
        now,
    ) {
        Ok(person) => person,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let patch = PersonPatch {
        email: body.email,
        phone: body.phone,
        whatsapp: body.whatsapp,
        job_title: body.job_title,
        organization_id: body
            .organization_id
            .map(|id| Some(OrganizationId::new(RecordId::from_uuid(id)))),
        ..Default::default()
    };
    if let Err(e) = person.apply_patch(patch, now) {
        return errors::domain_error_to_response(e);
    }

    if let Err(e) = services.contacts.insert_person(person.clone()).await {
        return errors::store_error_to_response(e);
    }

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        EntityKind::Person,
        person.id.record(),
        HistoryKind::Created,
        "Contato criado",
        serde_json::json!({}),
        principal.user_id(),
        now,
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (StatusCode::CREATED, Json(dto::person_to_json(&person))).into_response()
}

async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<dto::ListParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "people.read") {
        return errors::forbidden(e);
    }

    let filter = filter_from_params(&params);
    let page = Pagination::new(params.page.unwrap_or(1), params.per_page.unwrap_or(25));

    match services.contacts.people(tenant.tenant_id(), &filter, page).await {
        Ok(result) => (
            StatusCode::OK,
            Json(dto::page_to_json(result, dto::person_to_json)),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn export_csv(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<dto::ListParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "export.run") {
        return errors::forbidden(e);
    }

    let filter = filter_from_params(&params);
    let mut all = Vec::new();
    let mut page_no = 1;
    loop {
        let page = Pagination::new(page_no, 100);
        let result = match services.contacts.people(tenant.tenant_id(), &filter, page).await {
            Ok(result) => result,
            Err(e) => return errors::store_error_to_response(e),
        };
        let fetched = result.items.len();
        all.extend(result.items);
        if all.len() as u64 >= result.total || fetched == 0 {
            break;
        }
        page_no += 1;
    }

    let csv = export::people_to_csv(&all);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"contatos.csv\"",
            ),
        ],
        csv,
    )
        .into_response()
}

async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "people.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.contacts.person(tenant.tenant_id(), id).await {
        Ok(person) => (StatusCode::OK, Json(dto::person_to_json(&person))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(patch): Json<PersonPatch>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "people.update") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut person = match services.contacts.person(tenant.tenant_id(), id).await {
        Ok(person) => person,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = Utc::now();
    if let Err(e) = person.apply_patch(patch, now) {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.contacts.update_person(person.clone()).await {
        return errors::store_error_to_response(e);
    }

    (StatusCode::OK, Json(dto::person_to_json(&person))).into_response()
}

async fn delete_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "people.delete") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.contacts.delete_person(tenant.tenant_id(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn merge(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::MergePeopleRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "people.merge") {
        return errors::forbidden(e);
    }
    let keep = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let delete = PersonId::new(RecordId::from_uuid(body.delete_id));

    match services
        .contacts
        .merge_people(
            tenant.tenant_id(),
            keep,
            delete,
            &body.choices,
            principal.user_id(),
            Utc::now(),
        )
        .await
    {
        Ok((kept, outcome)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "person": dto::person_to_json(&kept),
                "backup_id": outcome.backup_id.to_string(),
                "transferred_children": outcome.transferred.total(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "people.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .timeline
        .history_for(tenant.tenant_id(), EntityKind::Person, id.record())
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
