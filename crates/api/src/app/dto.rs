use serde::{Deserialize, Serialize};
use serde_json::Value;

use settlekit_core::{FileRole, Platform, UploadId};
use settlekit_infra::catalog::UploadRecord;
use settlekit_infra::effective_view::MAX_LIMIT;
use settlekit_infra::orchestrator::SubmitRequest;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_JOB_LIMIT: usize = 50;
pub const MAX_JOB_LIMIT: usize = 200;

// -------------------------
// Request DTOs
// -------------------------

/// Year and month arrive as untyped JSON so non-integers surface as
/// `invalid_params` instead of a body rejection.
#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub platform: Option<String>,
    pub year: Option<Value>,
    pub month: Option<Value>,
    pub mode: Option<String>,
    #[serde(default)]
    pub uploads: UploadRefsRequest,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadRefsRequest {
    pub settlement_upload_id: Option<String>,
    pub orders_upload_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    pub platform: Option<String>,
    pub year: Option<Value>,
    pub month: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub platform: Option<String>,
    pub year: Option<String>,
    pub month: Option<String>,
    pub view: Option<String>,
    pub sku: Option<String>,
    pub job_id: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FiltersQuery {
    pub platform: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PreviewView {
    Fact,
    Agg,
}

impl ProcessRequest {
    pub fn into_submit(self) -> Result<SubmitRequest, String> {
        Ok(SubmitRequest {
            platform: self.platform.ok_or("platform is required")?,
            year: integer_field("year", self.year)?,
            month: integer_field("month", self.month)?,
            mode: self.mode,
            settlement_upload_id: upload_id_field("settlement_upload_id", self.uploads.settlement_upload_id)?,
            orders_upload_id: upload_id_field("orders_upload_id", self.uploads.orders_upload_id)?,
        })
    }
}

impl ClearRequest {
    pub fn into_parts(self) -> Result<(String, i64, i64), String> {
        Ok((
            self.platform.ok_or("platform is required")?,
            integer_field("year", self.year)?,
            integer_field("month", self.month)?,
        ))
    }
}

impl PreviewQuery {
    pub fn view(&self) -> Result<PreviewView, String> {
        match self.view.as_deref().map(str::trim) {
            None | Some("") | Some("fact") => Ok(PreviewView::Fact),
            Some("agg") | Some("summary") => Ok(PreviewView::Agg),
            Some(other) => Err(format!("view must be fact or agg, got {other:?}")),
        }
    }

    pub fn year_month(&self) -> Result<(i64, i64), String> {
        let parse = |name: &str, raw: &Option<String>| -> Result<i64, String> {
            raw.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("{name} is required"))?
                .parse::<i64>()
                .map_err(|_| format!("{name} must be an integer"))
        };
        Ok((parse("year", &self.year)?, parse("month", &self.month)?))
    }

    /// One-based page and page size.
    pub fn page(&self) -> Result<(usize, usize), String> {
        let page = self.page.unwrap_or(1);
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err("page starts at 1".to_string());
        }
        if page_size == 0 || page_size > MAX_LIMIT {
            return Err(format!("page_size must be between 1 and {MAX_LIMIT}"));
        }
        Ok((page, page_size))
    }
}

impl FiltersQuery {
    /// Optional narrowing; blank values count as absent.
    pub fn narrowing(&self) -> Result<(Option<Platform>, Option<i32>), String> {
        let platform = match self.platform.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            None => None,
            Some(raw) => Some(raw.parse::<Platform>().map_err(|e| e.to_string())?),
        };
        let year = match self.year.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            None => None,
            Some(raw) => Some(raw.parse::<i32>().map_err(|_| "year must be an integer".to_string())?),
        };
        Ok((platform, year))
    }
}

impl JobsQuery {
    pub fn limit(&self) -> Result<usize, String> {
        match self.limit.unwrap_or(DEFAULT_JOB_LIMIT) {
            0 => Err("limit must be at least 1".to_string()),
            n => Ok(n.min(MAX_JOB_LIMIT)),
        }
    }
}

/// Accepts JSON integers and integer strings; rejects fractions and other types.
fn integer_field(name: &str, value: Option<Value>) -> Result<i64, String> {
    match value {
        None | Some(Value::Null) => Err(format!("{name} is required")),
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| format!("{name} must be an integer")),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| format!("{name} must be an integer")),
        Some(_) => Err(format!("{name} must be an integer")),
    }
}

fn upload_id_field(name: &str, value: Option<String>) -> Result<Option<UploadId>, String> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| format!("{name} is not a valid upload id")),
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub upload_id: UploadId,
    pub file_role: FileRole,
    pub content_hash: String,
    pub original_filename: String,
    pub storage_key: String,
    pub size: u64,
    pub reused: bool,
}

impl UploadedFile {
    pub fn from_record(record: UploadRecord, reused: bool) -> Self {
        Self {
            upload_id: record.id,
            file_role: record.file_role,
            content_hash: record.content_hash,
            original_filename: record.original_filename,
            storage_key: record.storage_key,
            size: record.byte_size,
            reused,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn process(body: Value) -> Result<SubmitRequest, String> {
        serde_json::from_value::<ProcessRequest>(body).unwrap().into_submit()
    }

    #[test]
    fn process_request_accepts_integers_and_integer_strings() {
        let id = UploadId::new();
        let req = process(json!({
            "platform": "wechat_video",
            "year": 2025,
            "month": "10",
            "uploads": { "settlement_upload_id": id.to_string() }
        }))
        .unwrap();
        assert_eq!((req.year, req.month), (2025, 10));
        assert_eq!(req.settlement_upload_id, Some(id));
        assert_eq!(req.orders_upload_id, None);
        assert_eq!(req.mode, None);
    }

    #[test]
    fn process_request_rejects_non_integers() {
        let err = process(json!({"platform": "douyin", "year": 2025.5, "month": 1})).unwrap_err();
        assert!(err.contains("year"));
        let err = process(json!({"platform": "douyin", "year": 2025, "month": true})).unwrap_err();
        assert!(err.contains("month"));
        let err = process(json!({"year": 2025, "month": 1})).unwrap_err();
        assert!(err.contains("platform"));
        let err = process(json!({
            "platform": "douyin", "year": 2025, "month": 1,
            "uploads": { "settlement_upload_id": "nope" }
        }))
        .unwrap_err();
        assert!(err.contains("settlement_upload_id"));
    }

    #[test]
    fn preview_query_defaults() {
        let q = PreviewQuery {
            platform: Some("douyin".into()),
            year: Some("2025".into()),
            month: Some("3".into()),
            view: Some("summary".into()),
            sku: None,
            job_id: None,
            page: None,
            page_size: None,
        };
        assert_eq!(q.view().unwrap(), PreviewView::Agg);
        assert_eq!(q.year_month().unwrap(), (2025, 3));
        assert_eq!(q.page().unwrap(), (1, DEFAULT_PAGE_SIZE));

        let q = PreviewQuery { page_size: Some(0), ..q };
        assert!(q.page().is_err());
    }

    #[test]
    fn filters_and_jobs_queries() {
        let q = FiltersQuery { platform: Some(" douyin ".into()), year: Some("2025".into()) };
        assert_eq!(q.narrowing().unwrap(), (Some(Platform::Douyin), Some(2025)));
        let q = FiltersQuery { platform: Some(String::new()), year: None };
        assert_eq!(q.narrowing().unwrap(), (None, None));
        assert!(FiltersQuery { platform: Some("taobao".into()), year: None }.narrowing().is_err());
        assert!(FiltersQuery { platform: None, year: Some("x".into()) }.narrowing().is_err());

        assert_eq!(JobsQuery { limit: None }.limit().unwrap(), DEFAULT_JOB_LIMIT);
        assert_eq!(JobsQuery { limit: Some(5000) }.limit().unwrap(), MAX_JOB_LIMIT);
        assert!(JobsQuery { limit: Some(0) }.limit().is_err());
    }
}
