use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use settlekit_infra::catalog::PeriodFacets;

use crate::app::dto::FiltersQuery;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

/// Platforms, years and months that currently have an active dataset.
pub async fn list_filters(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    query: Result<Query<FiltersQuery>, QueryRejection>,
) -> axum::response::Response {
    let (platform, year) = match query.map_err(|e| e.body_text()).and_then(|Query(q)| q.narrowing()) {
        Ok(narrowing) => narrowing,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", msg),
    };
    match services.catalog.active_periods(tenant.tenant_id()).await {
        Ok(periods) => {
            let facets = PeriodFacets::from_periods(&periods, platform, year);
            Json(serde_json::json!({ "data": facets })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "active period lookup failed");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
        }
    }
}
