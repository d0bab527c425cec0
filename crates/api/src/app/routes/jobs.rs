use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use settlekit_core::JobId;

use crate::app::dto::JobsQuery;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", "invalid job id"))
}

/// The tenant's most recent jobs, newest first.
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    query: Result<Query<JobsQuery>, QueryRejection>,
) -> axum::response::Response {
    let limit = match query.map_err(|e| e.body_text()).and_then(|Query(q)| q.limit()) {
        Ok(limit) => limit,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", msg),
    };
    match services.orchestrator.list_jobs(tenant.tenant_id(), limit).await {
        Ok(jobs) => Json(serde_json::json!({ "jobs": jobs })).into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.orchestrator.job_status(tenant.tenant_id(), job_id).await {
        Ok(job) => Json(serde_json::json!({ "job": job })).into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

/// Republish a job whose original publish failed. Only `queued` jobs qualify.
pub async fn requeue_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.orchestrator.requeue(tenant.tenant_id(), job_id).await {
        Ok(message_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "status": "queued",
                "job_id": job_id,
                "message_id": message_id,
            })),
        )
            .into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}
