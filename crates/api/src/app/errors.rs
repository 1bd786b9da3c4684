//! Consistent JSON error responses.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use funil_core::DomainError;
use funil_infra::StoreError;
use funil_integrations::UpstreamError;

use super::messages;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", messages::NOT_FOUND)
        }
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::Unauthorized => {
            json_error(StatusCode::FORBIDDEN, "forbidden", messages::FORBIDDEN)
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", messages::NOT_FOUND)
        }
        StoreError::Duplicate(_) => {
            json_error(StatusCode::CONFLICT, "duplicate", messages::DUPLICATE)
        }
        StoreError::ForeignKey(_) => json_error(
            StatusCode::CONFLICT,
            "linked_records",
            messages::LINKED_RECORDS,
        ),
        StoreError::Domain(inner) => domain_error_to_response(inner),
        StoreError::Serialization(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", msg)
        }
        StoreError::Backend(msg) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            messages::user_message(Some(&msg)),
        ),
    }
}

pub fn upstream_error_to_response(err: UpstreamError) -> axum::response::Response {
    match err {
        UpstreamError::RateLimited => json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Limite de consultas atingido. Aguarde um instante e tente novamente.",
        ),
        UpstreamError::CreditsExhausted => json_error(
            StatusCode::PAYMENT_REQUIRED,
            "credits_exhausted",
            "Créditos da integração esgotados.",
        ),
        UpstreamError::NotFound => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            messages::NOT_FOUND,
        ),
        UpstreamError::Unauthorized => json_error(
            StatusCode::BAD_GATEWAY,
            "upstream_unauthorized",
            "A integração recusou as credenciais configuradas.",
        ),
        UpstreamError::Upstream { status, message } => json_error(
            StatusCode::BAD_GATEWAY,
            "upstream_error",
            format!("Falha na integração ({status}): {message}"),
        ),
        UpstreamError::Transport(_) => json_error(
            StatusCode::BAD_GATEWAY,
            "upstream_unreachable",
            messages::CONNECTIVITY,
        ),
        UpstreamError::Decode(msg) => json_error(
            StatusCode::BAD_GATEWAY,
            "upstream_decode_error",
            format!("Resposta inesperada da integração: {msg}"),
        ),
    }
}

pub fn integration_not_configured() -> axum::response::Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "integration_not_configured",
        "Integração não configurada neste ambiente.",
    )
}

pub fn forbidden(err: funil_auth::AuthzError) -> axum::response::Response {
    tracing::debug!(error = %err, "authorization denied");
    json_error(StatusCode::FORBIDDEN, "forbidden", messages::FORBIDDEN)
}
