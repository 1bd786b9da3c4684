use axum::{
    routing::{get, put},
    Router,
};

pub mod activities;
pub mod campaigns;
pub mod deals;
pub mod files;
pub mod inbox;
pub mod mail;
pub mod notes;
pub mod organizations;
pub mod people;
pub mod reports;
pub mod system;
pub mod tags;
pub mod webhooks;

/// Authenticated API surface.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/profile", put(system::update_profile))
        .nest("/organizations", organizations::router())
        .nest("/people", people::router())
        .nest("/pipelines", deals::pipelines_router())
        .nest("/deals", deals::router())
        .nest("/activities", activities::router())
        .nest("/notes", notes::router())
        .nest("/files", files::router())
        .nest("/tags", tags::router())
        .nest("/inbox", inbox::router())
        .nest("/campaigns", campaigns::router())
        .nest("/mail", mail::router())
        .nest("/reports", reports::router())
}
