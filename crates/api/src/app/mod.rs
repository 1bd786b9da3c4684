//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (stores, upstream clients)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses
//! - `messages.rs`: user-facing (Portuguese) error translation

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod messages;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: AppConfig) -> Router {
    let services = services::build_services(&config).await;
    build_app_with(config, services)
}

/// Router over explicit services (tests inject stub integrations here).
pub fn build_app_with(config: AppConfig, services: AppServices) -> Router {
    let jwt = Arc::new(funil_auth::Hs256JwtValidator::new(
        config.jwt_secret.clone().into_bytes(),
    ));
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services);

    // Hourly retention sweep: expired merge backups are dropped.
    {
        let contacts = services.contacts.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
            loop {
                tick.tick().await;
                match contacts.purge_expired_backups(chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "expired merge backups removed"),
                    Err(e) => tracing::warn!(error = %e, "backup retention sweep failed"),
                }
            }
        });
    }

    // Protected routes: require auth + tenant context.
    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    // Webhook receivers authenticate via signature, not bearer token.
    let webhooks = routes::webhooks::router().layer(Extension(services));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/webhooks", webhooks)
        .merge(protected)
        .layer(ServiceBuilder::new())
}
