//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, queue and the in-process worker
//! - `routes/`: HTTP routes + handlers (one file per endpoint group)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Router};
use tower::ServiceBuilder;

use settlekit_infra::config::AppConfig;
use settlekit_infra::worker::{SettlementTransform, UnconfiguredTransform};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Multipart framing and the optional second file on top of the per-file limit.
const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

/// Build the full HTTP router with no settlement transform installed.
///
/// Jobs submitted through it fail with an explanatory error until a
/// deployment supplies its own transform via [`build_app_with`].
pub async fn build_app(config: AppConfig) -> anyhow::Result<(Router, Arc<services::AppServices>)> {
    build_app_with(config, Arc::new(UnconfiguredTransform)).await
}

pub async fn build_app_with(
    config: AppConfig,
    transform: Arc<dyn SettlementTransform>,
) -> anyhow::Result<(Router, Arc<services::AppServices>)> {
    let tenant_state = middleware::TenantState {
        default_tenant: config.default_tenant_id.clone(),
    };
    let body_limit = usize::try_from(config.max_upload_bytes.saturating_mul(2).saturating_add(BODY_LIMIT_SLACK))
        .unwrap_or(usize::MAX);

    let services = Arc::new(services::build_services(config, transform).await?);

    let tenant_scoped = routes::router().layer(axum::middleware::from_fn_with_state(
        tenant_state,
        middleware::tenant_middleware,
    ));

    let router = Router::new()
        .route("/health", get(routes::system::health))
        .merge(tenant_scoped)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services.clone()))
                .layer(DefaultBodyLimit::max(body_limit)),
        );

    Ok((router, services))
}
