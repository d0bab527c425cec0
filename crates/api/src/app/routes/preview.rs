use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use settlekit_core::{JobId, Period};
use settlekit_infra::effective_view::{
    summarize, summarize_aggs, PageRequest, ResolverError, RowFilters, RowPage,
};
use settlekit_infra::partitions::{AggRow, FactRow};

use crate::app::dto::{self, Pagination, PreviewView};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

fn bad_request(msg: impl Into<String>) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", msg)
}

/// Rows of the period's effective view.
///
/// Without an active dataset the answer is an empty page. With `job_id` only
/// that job's partitions are read, as long as the job belongs to the tenant
/// and period.
pub async fn preview(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    query: Result<Query<dto::PreviewQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return bad_request(e.body_text()),
    };
    let (view, (year, month), (page, page_size)) = match (query.view(), query.year_month(), query.page()) {
        (Ok(v), Ok(ym), Ok(p)) => (v, ym, p),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return bad_request(e),
    };
    let Some(platform) = query.platform.as_deref() else {
        return bad_request("platform is required");
    };
    let period = match Period::parse(platform, year, month) {
        Ok(p) => p,
        Err(e) => return bad_request(e.to_string()),
    };
    let tenant_id = tenant.tenant_id();
    let filters = RowFilters { sku: query.sku.clone() };
    let Some(offset) = (page - 1).checked_mul(page_size) else {
        return bad_request("page is out of range");
    };
    let request = PageRequest::new(page_size, offset);

    let job_id: Option<JobId> = match query.job_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => match raw.parse() {
            Ok(id) => Some(id),
            Err(_) => return bad_request("invalid job id"),
        },
    };

    let dataset = match services.catalog.active_dataset(tenant_id, &period).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "active dataset lookup failed");
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string());
        }
    };

    if let Some(job_id) = job_id {
        match services.orchestrator.job_status(tenant_id, job_id).await {
            Ok(job) if job.period == period => {}
            Ok(_) => return bad_request("job does not belong to the requested period"),
            Err(e) => return errors::submit_error_to_response(e),
        }
    }

    let dataset_id = dataset.as_ref().map(|d| d.id.to_string());
    let job_ids: Vec<JobId> = match (job_id, &dataset) {
        (Some(job_id), _) => vec![job_id],
        (None, Some(dataset)) => dataset.metadata.all_job_ids(),
        (None, None) => return empty(view, page, page_size),
    };

    // Partition reads decode Parquet from disk; keep them off the async workers.
    let resolver = services.resolver.clone();
    let tenant_id = tenant_id.clone();
    let read = tokio::task::spawn_blocking(move || match (view, job_id) {
        (PreviewView::Fact, Some(job_id)) => {
            PageBody::from_page(resolver.query_job_rows(&tenant_id, &period, job_id, &filters, request))
        }
        (PreviewView::Fact, None) => {
            PageBody::from_page(resolver.query_rows(&tenant_id, &period, Some(&job_ids), &filters, request))
        }
        (PreviewView::Agg, _) => {
            PageBody::from_page(resolver.query_agg_rows(&tenant_id, &period, Some(&job_ids), &filters, request))
        }
    })
    .await;

    let body = match read {
        Ok(Ok(body)) => body,
        Ok(Err(ResolverError::NoPartitions)) => return empty(view, page, page_size),
        Ok(Err(e)) => return errors::resolver_error_to_response(e),
        Err(e) => {
            tracing::error!(error = %e, "preview read task failed");
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string());
        }
    };
    Json(serde_json::json!({
        "dataset_id": dataset_id,
        "data": body.data,
        "summary": body.summary,
        "pagination": Pagination {
            page,
            page_size,
            total: body.total,
        },
    }))
    .into_response()
}

trait PageSummary: serde::Serialize + Sized {
    fn summary(rows: &[Self]) -> serde_json::Value;
}

impl PageSummary for FactRow {
    fn summary(rows: &[Self]) -> serde_json::Value {
        serde_json::to_value(summarize(rows)).unwrap_or_default()
    }
}

impl PageSummary for AggRow {
    fn summary(rows: &[Self]) -> serde_json::Value {
        let summary = summarize_aggs(rows);
        let mut value = serde_json::to_value(&summary).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert("consistency_check".into(), summary.is_consistent().into());
        }
        value
    }
}

/// A page already rendered to JSON, with the summary of its rows.
struct PageBody {
    data: serde_json::Value,
    summary: serde_json::Value,
    total: usize,
}

impl PageBody {
    fn from_page<R: PageSummary>(result: Result<RowPage<R>, ResolverError>) -> Result<Self, ResolverError> {
        let page = result?;
        Ok(Self {
            summary: R::summary(&page.rows),
            data: serde_json::to_value(&page.rows).unwrap_or_default(),
            total: page.total,
        })
    }
}

fn empty(view: PreviewView, page: usize, page_size: usize) -> axum::response::Response {
    let summary = match view {
        PreviewView::Fact => FactRow::summary(&[]),
        PreviewView::Agg => AggRow::summary(&[]),
    };
    Json(serde_json::json!({
        "dataset_id": null,
        "data": [],
        "summary": summary,
        "pagination": Pagination { page, page_size, total: 0 },
    }))
    .into_response()
}
