use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use funil_infra::Profile;

use crate::app::{dto, errors, AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "tenant_id": tenant.tenant_id().to_string(),
        "principal_id": principal.principal_id().to_string(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
    }))
}

/// Upsert the caller's directory profile (display name behind notes/history).
pub async fn update_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::UpdateProfileRequest>,
) -> axum::response::Response {
    if body.display_name.trim().is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "display_name cannot be empty",
        );
    }

    let profile = Profile {
        user_id: principal.user_id(),
        display_name: body.display_name,
        email: body.email,
    };
    match services
        .directory
        .upsert_profile(tenant.tenant_id(), profile.clone())
        .await
    {
        Ok(()) => (StatusCode::OK, Json(dto::profile_to_json(&profile))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
