use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

/// `not_found` is a normal outcome and answers 200 like `ok`.
pub async fn clear_settlement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    body: Result<Json<dto::ClearRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", e.body_text()),
    };
    let (platform, year, month) = match body.into_parts() {
        Ok(parts) => parts,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", msg),
    };

    match services.clearer.clear_raw(tenant.tenant_id(), &platform, year, month).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => errors::clear_error_to_response(e),
    }
}
