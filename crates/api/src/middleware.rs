use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

use tracing::Instrument;

use settlekit_core::TenantId;

use crate::app::errors;
use crate::context::{RequestContext, TenantContext};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct TenantState {
    pub default_tenant: TenantId,
}

/// Resolve the tenant and assign a request id.
///
/// `x-tenant-id` wins over `x-user-id`; with neither the configured default
/// tenant is used. A header that is present but not a valid tenant id is
/// rejected rather than silently replaced.
pub async fn tenant_middleware(
    State(state): State<TenantState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let tenant_id = match extract_tenant(req.headers(), &state.default_tenant) {
        Ok(t) => t,
        Err(message) => {
            return errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_params", message);
        }
    };
    let request = RequestContext::generate();
    let request_id = request.request_id().to_string();

    let span = tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        tenant_id = %tenant_id,
        request_id = %request_id,
    );

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    req.extensions_mut().insert(request);

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn extract_tenant(headers: &HeaderMap, default_tenant: &TenantId) -> Result<TenantId, String> {
    for name in [TENANT_HEADER, USER_HEADER] {
        let Some(value) = headers.get(name) else {
            continue;
        };
        let raw = value
            .to_str()
            .map_err(|_| format!("{name} must be visible ASCII"))?
            .trim();
        if raw.is_empty() {
            continue;
        }
        return TenantId::parse(raw).map_err(|e| format!("{name}: {e}"));
    }
    Ok(default_tenant.clone())
}
