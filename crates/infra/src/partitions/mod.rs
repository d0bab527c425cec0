//! Partitioned job output on disk.
//!
//! Layout under the partition root:
//!
//! ```text
//! tenant_id=<t>/platform=<p>/year=<yyyy>/month=<mm>/job_id=<uuid>/<artifact>.parquet
//! ```
//!
//! One directory per job. Files are written to a temp name and renamed into
//! place, and are never rewritten afterwards.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use settlekit_core::{JobId, Period, TenantId};

pub mod codec;
pub mod rows;

pub use codec::CodecError;
pub use rows::{AggRow, FactRow};

/// Default minimum size of a valid partition file, in bytes.
pub const DEFAULT_MIN_PARTITION_BYTES: u64 = 1024;

const JOB_DIR_PREFIX: &str = "job_id=";
const PLACEHOLDER_SUFFIX: &str = ".placeholder";

/// Kinds of files a job writes into its partition directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// Line-level facts.
    Fact,
    /// Month/SKU aggregates.
    Agg,
}

impl Artifact {
    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Fact => "fact_settlement.parquet",
            Artifact::Agg => "agg_month_sku.parquet",
        }
    }
}

/// Path conventions for partition files.
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    root: PathBuf,
}

impl PartitionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn period_dir(&self, tenant_id: &TenantId, period: &Period) -> PathBuf {
        self.root
            .join(format!("tenant_id={}", tenant_id))
            .join(format!("platform={}", period.platform()))
            .join(format!("year={:04}", period.year()))
            .join(format!("month={:02}", period.month()))
    }

    pub fn job_dir(&self, tenant_id: &TenantId, period: &Period, job_id: JobId) -> PathBuf {
        self.period_dir(tenant_id, period)
            .join(format!("{JOB_DIR_PREFIX}{job_id}"))
    }

    pub fn artifact_path(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_id: JobId,
        artifact: Artifact,
    ) -> PathBuf {
        self.job_dir(tenant_id, period, job_id).join(artifact.file_name())
    }

    /// Job ids that have a partition directory under the period, sorted.
    ///
    /// Missing period directories yield an empty list. Placeholder and
    /// unrecognized directory names are skipped.
    pub fn discover_jobs(&self, tenant_id: &TenantId, period: &Period) -> io::Result<Vec<JobId>> {
        let dir = self.period_dir(tenant_id, period);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(PLACEHOLDER_SUFFIX) {
                continue;
            }
            match name.strip_prefix(JOB_DIR_PREFIX).map(str::parse::<JobId>) {
                Some(Ok(job_id)) => jobs.push(job_id),
                _ => debug!(dir = %dir.display(), entry = name, "skipping unrecognized partition directory"),
            }
        }
        jobs.sort();
        Ok(jobs)
    }
}

/// Writes job artifacts into the layout.
#[derive(Debug, Clone)]
pub struct PartitionWriter {
    layout: PartitionLayout,
}

impl PartitionWriter {
    pub fn new(layout: PartitionLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Write one artifact atomically; returns its final path.
    pub fn write_artifact(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_id: JobId,
        artifact: Artifact,
        bytes: &Bytes,
    ) -> io::Result<PathBuf> {
        let dir = self.layout.job_dir(tenant_id, period, job_id);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(artifact.file_name());
        let tmp = dir.join(format!(".{}.tmp", artifact.file_name()));
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        debug!(path = %path.display(), size = bytes.len(), "partition artifact written");
        Ok(path)
    }

    pub fn write_facts(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_id: JobId,
        rows: &[FactRow],
    ) -> Result<PathBuf, PartitionWriteError> {
        let bytes = codec::write_fact_rows(rows)?;
        Ok(self.write_artifact(tenant_id, period, job_id, Artifact::Fact, &bytes)?)
    }

    pub fn write_aggs(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        job_id: JobId,
        rows: &[AggRow],
    ) -> Result<PathBuf, PartitionWriteError> {
        let bytes = codec::write_agg_rows(rows)?;
        Ok(self.write_artifact(tenant_id, period, job_id, Artifact::Agg, &bytes)?)
    }
}

/// Failure writing a partition artifact.
#[derive(Debug, thiserror::Error)]
pub enum PartitionWriteError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("partition io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
pub(crate) mod testing {
    use super::rows::{AggRow, FactRow};

    pub fn fact_row(tenant: &str, order_id: &str, sku: &str) -> FactRow {
        FactRow {
            tenant_id: tenant.to_string(),
            platform: "wechat_video".to_string(),
            upload_id: "u-1".to_string(),
            job_id: "j-1".to_string(),
            year: 2025,
            month: 10,
            order_id: order_id.to_string(),
            line_count: Some(1),
            line_no: Some(1),
            internal_sku: sku.to_string(),
            fin_code: format!("FIN-{sku}"),
            qty_sold: 1.0,
            recv_customer: 100.0,
            recv_platform: 5.0,
            extra_charge: 0.0,
            fee_platform_comm: 10.0,
            fee_affiliate: 2.0,
            fee_other: 1.0,
            net_received: 92.0,
            source_file: "settlement.xlsx".to_string(),
            source_line: Some(2),
            row_key: format!("{order_id}:{sku}"),
            row_hash: "h".to_string(),
            rule_version: "v1".to_string(),
            validation_status: "ok".to_string(),
            validation_warnings: "[]".to_string(),
        }
    }

    pub fn agg_row(tenant: &str, sku: &str, count: i64) -> AggRow {
        AggRow {
            tenant_id: tenant.to_string(),
            platform: "wechat_video".to_string(),
            upload_id: "u-1".to_string(),
            job_id: "j-1".to_string(),
            year: 2025,
            month: 10,
            internal_sku: sku.to_string(),
            qty_sold_sum: count as f64,
            income_total_sum: 105.0 * count as f64,
            fee_platform_comm_sum: 10.0 * count as f64,
            fee_other_sum: 3.0 * count as f64,
            net_received_sum: 92.0 * count as f64,
            record_count: count,
        }
    }
}
