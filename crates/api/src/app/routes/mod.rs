use axum::{routing::get, Router};

pub mod common;
pub mod jobs;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/status", get(system::status))
        .nest("/jobs", jobs::router())
}
