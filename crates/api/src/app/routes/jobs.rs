use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use labstore_auth::permissions::{
    JOBS_CLAIM, JOBS_CREATE, JOBS_READ, JOBS_REAP, JOBS_RETRY, JOBS_UPDATE,
};
use labstore_core::JobId;
use labstore_infra::jobs::{JobMutation, NewJob};

use crate::app::routes::common::{check, OpAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/stats", get(job_statistics))
        .route("/next", get(claim_next_job))
        .route("/reap", post(reap_orphans))
        .route("/:id", get(get_job).put(update_job))
        .route("/:id/retry", post(retry_job))
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("not a job id: {raw}"),
        )
    })
}

pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewJob>,
) -> axum::response::Response {
    if let Err(resp) = check(&principal, &OpAuth::new("jobs.create", JOBS_CREATE)) {
        return resp;
    }

    match services.run(move |queue| queue.enqueue(body)).await {
        Ok(id) => (StatusCode::CREATED, Json(dto::JobCreatedResponse { id })).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    if let Err(resp) = check(&principal, &OpAuth::new("jobs.list", JOBS_READ)) {
        return resp;
    }

    let limit = query.effective_limit();
    let state = query.state;
    match services.run(move |queue| queue.list(state, limit)).await {
        Ok(jobs) => Json(dto::JobListResponse {
            count: jobs.len(),
            jobs,
        })
        .into_response(),
        Err(resp) => resp,
    }
}

pub async fn job_statistics(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = check(&principal, &OpAuth::new("jobs.stats", JOBS_READ)) {
        return resp;
    }

    match services.run(|queue| queue.get_statistics()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(resp) => resp,
    }
}

/// 200 with the claimed job, or 204 when nothing is pending.
pub async fn claim_next_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = check(&principal, &OpAuth::new("jobs.claim", JOBS_CLAIM)) {
        return resp;
    }

    match services.run(|queue| queue.start_job()).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(resp) => resp,
    }
}

pub async fn reap_orphans(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = check(&principal, &OpAuth::new("jobs.reap", JOBS_REAP)) {
        return resp;
    }

    match services.run(|queue| queue.scan_for_orphans()).await {
        Ok(orphaned) => Json(dto::ReapResponse { orphaned }).into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = check(&principal, &OpAuth::new("jobs.get", JOBS_READ)) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.run(move |queue| queue.get(id)).await {
        Ok(job) => Json(job).into_response(),
        Err(resp) => resp,
    }
}

/// Heartbeat, field update or state change for one job.
///
/// The guard snapshot is read server-side, so two callers racing on the same
/// job still see exactly one winner.
pub async fn update_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<JobMutation>,
) -> axum::response::Response {
    if let Err(resp) = check(&principal, &OpAuth::new("jobs.update", JOBS_UPDATE)) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let result = services
        .run(move |queue| {
            let job = queue.get(id)?;
            queue.mutate(&job, body)
        })
        .await;
    match result {
        Ok(retry) => Json(dto::JobUpdatedResponse { retry }).into_response(),
        Err(resp) => resp,
    }
}

/// Operator retry; ignores the attempt ceiling.
pub async fn retry_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = check(&principal, &OpAuth::new("jobs.retry", JOBS_RETRY)) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.run(move |queue| queue.retry_job(id, true)).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(resp) => resp,
    }
}
