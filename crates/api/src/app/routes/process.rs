use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use settlekit_infra::orchestrator::SubmitOutcome;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::{RequestContext, TenantContext};

/// `202 Accepted` for a new job, `200 OK` when the period is already served.
pub async fn submit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(request): Extension<RequestContext>,
    body: Result<Json<dto::ProcessRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", e.body_text()),
    };
    let submit = match body.into_submit() {
        Ok(s) => s,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", msg),
    };

    match services
        .orchestrator
        .submit(tenant.tenant_id(), submit, request.request_id())
        .await
    {
        Ok(outcome @ SubmitOutcome::Queued { .. }) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Ok(outcome @ SubmitOutcome::DuplicateReused { .. }) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}
