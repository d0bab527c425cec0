//! Effective-view resolver: the read surface over a period's partitions.
//!
//! ## Design
//!
//! - A partition is visible only if its file exists, is a regular file and is
//!   at least `min_partition_bytes` long. Anything smaller is the residue of
//!   an interrupted write and is skipped (logged at `debug`).
//! - Partition files are immutable once visible, so queries decode them
//!   independently and need no coordination with writers or each other.
//! - Ordering is total (business key first, then stable tie-breakers), which
//!   keeps limit/offset pagination stable while the partition set is unchanged.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, instrument};

use settlekit_core::{JobId, Period, TenantId};

use crate::partitions::codec::{read_agg_rows, read_fact_rows};
use crate::partitions::{
    AggRow, Artifact, CodecError, DEFAULT_MIN_PARTITION_BYTES, FactRow, PartitionLayout,
};

/// Default page size.
pub const DEFAULT_LIMIT: usize = 1000;
/// Largest accepted page size.
pub const MAX_LIMIT: usize = 10_000;
/// Longest accepted `sku` filter.
pub const MAX_FILTER_LEN: usize = 128;
/// Tolerance of the net-amount consistency check.
pub const NET_TOLERANCE: f64 = 0.02;

/// Resolver error.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// The period has no valid partition yet. Callers treat this as "no data".
    #[error("no partitions for the requested period")]
    NoPartitions,
    /// Malformed filter input, unreadable partition or decode failure.
    #[error("query engine error: {0}")]
    QueryEngine(String),
}

impl From<CodecError> for ResolverError {
    fn from(value: CodecError) -> Self {
        ResolverError::QueryEngine(value.to_string())
    }
}

/// Optional row filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilters {
    /// Substring matched against SKU, finance code and order id.
    pub sku: Option<String>,
}

impl RowFilters {
    pub fn sku(value: impl Into<String>) -> Self {
        Self {
            sku: Some(value.into()),
        }
    }
}

/// Limit/offset window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl PageRequest {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// One page of rows plus the total matching count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowPage<R> {
    pub rows: Vec<R>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub partitions: usize,
}

impl<R> RowPage<R> {
    pub fn empty(page: PageRequest) -> Self {
        Self {
            rows: Vec::new(),
            total: 0,
            limit: page.limit,
            offset: page.offset,
            partitions: 0,
        }
    }
}

/// Resolver tuning.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub min_partition_bytes: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_partition_bytes: DEFAULT_MIN_PARTITION_BYTES,
        }
    }
}

/// Whether rows must match the period's year/month or only its job directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Scope {
    Period,
    Job,
}

/// Rows the resolver knows how to load, filter and order.
trait ViewRow: Sized {
    const ARTIFACT: Artifact;

    fn decode(bytes: Bytes) -> Result<Vec<Self>, CodecError>;
    fn belongs_to(&self, tenant_id: &TenantId, period: &Period, scope: Scope) -> bool;
    fn matches_sku(&self, needle: &str) -> bool;
    fn order(&self, other: &Self) -> Ordering;
}

fn same_owner(
    row_tenant: &str,
    row_platform: &str,
    row_year: i32,
    row_month: i32,
    tenant_id: &TenantId,
    period: &Period,
    scope: Scope,
) -> bool {
    row_tenant == tenant_id.as_str()
        && row_platform == period.platform().as_str()
        && (scope == Scope::Job
            || (row_year == period.year() && u32::try_from(row_month).ok() == Some(period.month())))
}

impl ViewRow for FactRow {
    const ARTIFACT: Artifact = Artifact::Fact;

    fn decode(bytes: Bytes) -> Result<Vec<Self>, CodecError> {
        read_fact_rows(bytes)
    }

    fn belongs_to(&self, tenant_id: &TenantId, period: &Period, scope: Scope) -> bool {
        same_owner(&self.tenant_id, &self.platform, self.year, self.month, tenant_id, period, scope)
    }

    fn matches_sku(&self, needle: &str) -> bool {
        self.internal_sku.contains(needle) || self.fin_code.contains(needle) || self.order_id.contains(needle)
    }

    fn order(&self, other: &Self) -> Ordering {
        self.order_id
            .cmp(&other.order_id)
            .then_with(|| self.internal_sku.cmp(&other.internal_sku))
            .then_with(|| self.job_id.cmp(&other.job_id))
            .then_with(|| self.line_no.cmp(&other.line_no))
            .then_with(|| self.row_key.cmp(&other.row_key))
    }
}

impl ViewRow for AggRow {
    const ARTIFACT: Artifact = Artifact::Agg;

    fn decode(bytes: Bytes) -> Result<Vec<Self>, CodecError> {
        read_agg_rows(bytes)
    }

    fn belongs_to(&self, tenant_id: &TenantId, period: &Period, scope: Scope) -> bool {
        same_owner(&self.tenant_id, &self.platform, self.year, self.month, tenant_id, period, scope)
    }

    fn matches_sku(&self, needle: &str) -> bool {
        self.internal_sku.contains(needle)
    }

    fn order(&self, other: &Self) -> Ordering {
        self.internal_sku
            .cmp(&other.internal_sku)
            .then_with(|| self.job_id.cmp(&other.job_id))
            .then_with(|| self.upload_id.cmp(&other.upload_id))
    }
}

/// Read surface composed from all valid partitions of a period.
#[derive(Debug, Clone)]
pub struct EffectiveViewResolver {
    layout: PartitionLayout,
    config: ResolverConfig,
}

impl EffectiveViewResolver {
    pub fn new(layout: PartitionLayout, config: ResolverConfig) -> Self {
        Self { layout, config }
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Valid partition files of one artifact kind, ordered by job id.
    ///
    /// With `job_ids`, only those jobs are considered; otherwise every job
    /// directory under the period. Never fails for "no data": an empty list
    /// is returned instead.
    #[instrument(skip(self, job_ids), fields(tenant_id = %tenant_id, period = %period, artifact = ?artifact), err)]
    pub fn resolve_partitions(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        artifact: Artifact,
        job_ids: Option<&[JobId]>,
    ) -> Result<Vec<PathBuf>, ResolverError> {
        let candidates = match job_ids {
            Some(ids) => {
                let mut ids = ids.to_vec();
                ids.sort();
                ids.dedup();
                ids
            }
            None => self
                .layout
                .discover_jobs(tenant_id, period)
                .map_err(|e| ResolverError::QueryEngine(format!("partition discovery failed: {e}")))?,
        };

        let mut valid = Vec::with_capacity(candidates.len());
        for job_id in candidates {
            let path = self.layout.artifact_path(tenant_id, period, job_id, artifact);
            if self.is_valid_partition(&path) {
                valid.push(path);
            }
        }
        Ok(valid)
    }

    fn is_valid_partition(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() && meta.len() >= self.config.min_partition_bytes => true,
            Ok(meta) => {
                debug!(
                    path = %path.display(),
                    size = meta.len(),
                    min = self.config.min_partition_bytes,
                    "excluding partial partition"
                );
                false
            }
            Err(_) => false,
        }
    }

    /// Fact rows of a period (optionally restricted to `job_ids`).
    pub fn query_rows(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_ids: Option<&[JobId]>,
        filters: &RowFilters,
        page: PageRequest,
    ) -> Result<RowPage<FactRow>, ResolverError> {
        self.query::<FactRow>(tenant_id, period, job_ids, filters, page, Scope::Period)
    }

    /// Number of fact rows `query_rows` would match, ignoring the page window.
    pub fn count_rows(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_ids: Option<&[JobId]>,
        filters: &RowFilters,
    ) -> Result<usize, ResolverError> {
        let needle = validate_filters(filters)?;
        let (rows, _) = self.load::<FactRow>(tenant_id, period, job_ids, needle.as_deref(), Scope::Period)?;
        Ok(rows.len())
    }

    /// Exactly what one job produced, trusting its directory over row year/month.
    pub fn query_job_rows(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_id: JobId,
        filters: &RowFilters,
        page: PageRequest,
    ) -> Result<RowPage<FactRow>, ResolverError> {
        self.query::<FactRow>(tenant_id, period, Some(&[job_id]), filters, page, Scope::Job)
    }

    /// Month/SKU aggregates of a period, ordered by SKU.
    pub fn query_agg_rows(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_ids: Option<&[JobId]>,
        filters: &RowFilters,
        page: PageRequest,
    ) -> Result<RowPage<AggRow>, ResolverError> {
        self.query::<AggRow>(tenant_id, period, job_ids, filters, page, Scope::Period)
    }

    fn query<R: ViewRow>(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_ids: Option<&[JobId]>,
        filters: &RowFilters,
        page: PageRequest,
        scope: Scope,
    ) -> Result<RowPage<R>, ResolverError> {
        validate_page(page)?;
        let needle = validate_filters(filters)?;
        let (rows, partitions) = self.load::<R>(tenant_id, period, job_ids, needle.as_deref(), scope)?;

        let total = rows.len();
        let rows = rows.into_iter().skip(page.offset).take(page.limit).collect();
        Ok(RowPage {
            rows,
            total,
            limit: page.limit,
            offset: page.offset,
            partitions,
        })
    }

    fn load<R: ViewRow>(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_ids: Option<&[JobId]>,
        needle: Option<&str>,
        scope: Scope,
    ) -> Result<(Vec<R>, usize), ResolverError> {
        let paths = self.resolve_partitions(tenant_id, period, R::ARTIFACT, job_ids)?;
        if paths.is_empty() {
            return Err(ResolverError::NoPartitions);
        }

        let mut rows = Vec::new();
        for path in &paths {
            let bytes = std::fs::read(path).map_err(|e| {
                ResolverError::QueryEngine(format!("failed to read {}: {e}", path.display()))
            })?;
            let decoded = R::decode(Bytes::from(bytes)).map_err(|e| {
                ResolverError::QueryEngine(format!("failed to decode {}: {e}", path.display()))
            })?;
            rows.extend(decoded.into_iter().filter(|row| {
                row.belongs_to(tenant_id, period, scope) && needle.is_none_or(|n| row.matches_sku(n))
            }));
        }
        rows.sort_by(|a, b| a.order(b));
        Ok((rows, paths.len()))
    }
}

fn validate_page(page: PageRequest) -> Result<(), ResolverError> {
    if page.limit == 0 || page.limit > MAX_LIMIT {
        return Err(ResolverError::QueryEngine(format!(
            "limit must be between 1 and {MAX_LIMIT}, got {}",
            page.limit
        )));
    }
    Ok(())
}

fn validate_filters(filters: &RowFilters) -> Result<Option<String>, ResolverError> {
    let Some(raw) = filters.sku.as_deref() else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_FILTER_LEN {
        return Err(ResolverError::QueryEngine(format!(
            "sku filter longer than {MAX_FILTER_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ResolverError::QueryEngine(
            "sku filter contains control characters".to_string(),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

/// Totals over a set of fact rows plus a net-amount consistency check.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FactSummary {
    pub row_count: usize,
    pub qty_sold: f64,
    pub recv_customer: f64,
    pub recv_platform: f64,
    pub extra_charge: f64,
    pub fees_total: f64,
    pub net_received: f64,
    /// Rows whose net differs from receivables minus fees by more than [`NET_TOLERANCE`].
    pub inconsistent_rows: usize,
    pub max_net_deviation: f64,
}

impl FactSummary {
    pub fn is_consistent(&self) -> bool {
        self.inconsistent_rows == 0
    }
}

pub fn summarize(rows: &[FactRow]) -> FactSummary {
    let mut summary = FactSummary::default();
    for row in rows {
        summary.row_count += 1;
        summary.qty_sold += row.qty_sold;
        summary.recv_customer += row.recv_customer;
        summary.recv_platform += row.recv_platform;
        summary.extra_charge += row.extra_charge;
        summary.fees_total += row.total_fees();
        summary.net_received += row.net_received;

        let deviation = (row.net_received - row.expected_net()).abs();
        summary.max_net_deviation = summary.max_net_deviation.max(deviation);
        if deviation > NET_TOLERANCE {
            summary.inconsistent_rows += 1;
        }
    }
    summary
}

/// Totals over a set of month/SKU aggregates.
///
/// The identity `income - fees == net` is checked per SKU and over the totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggSummary {
    pub sku_count: usize,
    pub record_count: i64,
    pub qty_sold: f64,
    pub income_total: f64,
    pub fee_platform_comm: f64,
    pub fee_other: f64,
    pub net_received: f64,
    pub inconsistent_rows: usize,
    /// Absolute gap between the summed net and income minus summed fees.
    pub net_deviation: f64,
}

impl AggSummary {
    pub fn is_consistent(&self) -> bool {
        self.inconsistent_rows == 0 && self.net_deviation <= NET_TOLERANCE
    }
}

pub fn summarize_aggs(rows: &[AggRow]) -> AggSummary {
    let mut summary = AggSummary::default();
    for row in rows {
        summary.sku_count += 1;
        summary.record_count += row.record_count;
        summary.qty_sold += row.qty_sold_sum;
        summary.income_total += row.income_total_sum;
        summary.fee_platform_comm += row.fee_platform_comm_sum;
        summary.fee_other += row.fee_other_sum;
        summary.net_received += row.net_received_sum;
        if (row.net_received_sum - row.expected_net()).abs() > NET_TOLERANCE {
            summary.inconsistent_rows += 1;
        }
    }
    let expected = summary.income_total - summary.fee_platform_comm - summary.fee_other;
    summary.net_deviation = round_cents((summary.net_received - expected).abs());
    summary
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
