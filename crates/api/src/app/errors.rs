use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use settlekit_infra::clearer::ClearError;
use settlekit_infra::effective_view::ResolverError;
use settlekit_infra::orchestrator::SubmitError;
use settlekit_infra::registry::RegistryError;

pub fn registry_error_to_response(err: RegistryError) -> axum::response::Response {
    match err {
        RegistryError::InvalidParams(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_params", msg),
        e @ RegistryError::TooLarge { .. } => {
            json_error(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", e.to_string())
        }
        e @ RegistryError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "upload_not_found", e.to_string()),
        e @ RegistryError::StorageWrite(_) => internal_error("storage_write_error", e),
        e @ RegistryError::Catalog(_) => internal_error("internal_error", e),
    }
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::InvalidParams(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_params", msg),
        e @ SubmitError::UploadNotFound { .. } => {
            json_error(StatusCode::NOT_FOUND, "upload_not_found", e.to_string())
        }
        e @ SubmitError::InvalidUploadRecord { .. } => {
            json_error(StatusCode::BAD_REQUEST, "invalid_upload_record", e.to_string())
        }
        e @ SubmitError::JobNotFound(_) => json_error(StatusCode::NOT_FOUND, "job_not_found", e.to_string()),
        e @ SubmitError::NotQueued { .. } => json_error(StatusCode::CONFLICT, "job_not_queued", e.to_string()),
        e @ (SubmitError::DependencyUnavailable(_)
        | SubmitError::Persistence(_)
        | SubmitError::Publish { .. }) => internal_error("internal_error", e),
    }
}

pub fn clear_error_to_response(err: ClearError) -> axum::response::Response {
    match err {
        ClearError::InvalidParams(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_params", msg),
        e @ ClearError::Catalog(_) => internal_error("internal_error", e),
    }
}

/// `NoPartitions` is handled by callers as an empty result, never reaching here.
pub fn resolver_error_to_response(err: ResolverError) -> axum::response::Response {
    internal_error("internal_error", err)
}

fn internal_error(code: &'static str, err: impl std::fmt::Display) -> axum::response::Response {
    tracing::error!(error = %err, code, "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, code, err.to_string())
}

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
