use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use labstore_auth::permissions::JOBS_READ;
use labstore_auth::Principal;

use crate::app::dto;
use crate::app::routes::common::{check, OpAuth};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    let resolved = Principal::new(principal.principal_id(), principal.roles().to_vec());
    Json(serde_json::json!({
        "principal_id": principal.principal_id().to_string(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "permissions": resolved.permissions.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
    }))
}

/// Backend, effective queue settings and reaper counters.
pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = check(&principal, &OpAuth::new("status", JOBS_READ)) {
        return resp;
    }

    Json(dto::StatusResponse {
        backend: services.backend(),
        queue: services.queue().config().clone(),
        stored_jobs: services.in_memory_len(),
        reaper: services.reaper_stats(),
    })
    .into_response()
}
