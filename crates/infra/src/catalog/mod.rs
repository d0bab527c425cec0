//! Catalog of uploads, jobs and datasets.
//!
//! ## Design
//!
//! - Every operation that must be atomic (upload insert-if-absent, job
//!   admission, completion, clearing) is a single store call, so each backend
//!   can implement it with its native primitive: one write lock in memory,
//!   one transaction plus unique constraints in Postgres.
//! - Job state transitions are validated by [`JobRecord`] itself; stores only
//!   load, transition and persist.
//! - Reads and writes are tenant-scoped. A record owned by another tenant is
//!   reported as [`CatalogError::TenantIsolation`].

use std::sync::Arc;

use async_trait::async_trait;

use settlekit_core::{DatasetId, FileRole, JobId, Period, Platform, TenantId, UploadId};

mod in_memory;
mod postgres;
mod types;

pub use in_memory::InMemoryCatalogStore;
pub use postgres::PostgresCatalogStore;
pub use types::{
    Admission, CompletionEffect, DATASET_METADATA_VERSION, DatasetMetadata, DatasetRecord,
    DatasetStatus, FileSnapshot, InputUploadRefs, JobOutcome, JobRecord, JobState, PeriodFacets,
    UploadRecord,
};

/// Catalog store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: &'static str,
        to: &'static str,
    },
    #[error("dataset id {dataset_id} already belongs to a different period")]
    IdCollision { dataset_id: DatasetId },
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Transactional keyed store behind the registry, orchestrator, worker and clearer.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Find the upload for a (tenant, platform, role, content hash) tuple.
    async fn find_upload(
        &self,
        tenant_id: &TenantId,
        platform: Platform,
        file_role: FileRole,
        content_hash: &str,
    ) -> Result<Option<UploadRecord>, CatalogError>;

    /// Insert `record` unless its dedup tuple is taken; returns the stored record.
    async fn insert_upload(&self, record: UploadRecord) -> Result<UploadRecord, CatalogError>;

    async fn get_upload(
        &self,
        tenant_id: &TenantId,
        upload_id: UploadId,
    ) -> Result<Option<UploadRecord>, CatalogError>;

    /// The active dataset of a period, if any.
    async fn active_dataset(
        &self,
        tenant_id: &TenantId,
        period: &Period,
    ) -> Result<Option<DatasetRecord>, CatalogError>;

    /// Periods of the tenant that currently have an active dataset, ordered
    /// by platform, year and month.
    async fn active_periods(&self, tenant_id: &TenantId) -> Result<Vec<Period>, CatalogError>;

    /// Atomically store a `queued` job and make its dataset active.
    ///
    /// Fails over to [`Admission::Existing`] when the period already has an
    /// active dataset; in that case nothing is written.
    async fn admit_job(&self, job: JobRecord) -> Result<Admission, CatalogError>;

    async fn get_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<Option<JobRecord>, CatalogError>;

    /// Most recent jobs of a tenant, newest first.
    async fn list_jobs(
        &self,
        tenant_id: &TenantId,
        limit: usize,
    ) -> Result<Vec<JobRecord>, CatalogError>;

    async fn mark_job_running(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<JobRecord, CatalogError>;

    async fn update_job_progress(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), CatalogError>;

    /// Mark the job completed and fold its counts into the owning dataset.
    async fn complete_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        outcome: JobOutcome,
    ) -> Result<CompletionEffect, CatalogError>;

    async fn fail_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        error: String,
        warnings: Vec<String>,
    ) -> Result<(), CatalogError>;

    /// Tombstone every active dataset of the period; returns them as cleared.
    async fn clear_period(
        &self,
        tenant_id: &TenantId,
        period: &Period,
    ) -> Result<Vec<DatasetRecord>, CatalogError>;
}

#[async_trait]
impl<T: CatalogStore + ?Sized> CatalogStore for Arc<T> {
    async fn find_upload(
        &self,
        tenant_id: &TenantId,
        platform: Platform,
        file_role: FileRole,
        content_hash: &str,
    ) -> Result<Option<UploadRecord>, CatalogError> {
        (**self).find_upload(tenant_id, platform, file_role, content_hash).await
    }

    async fn insert_upload(&self, record: UploadRecord) -> Result<UploadRecord, CatalogError> {
        (**self).insert_upload(record).await
    }

    async fn get_upload(
        &self,
        tenant_id: &TenantId,
        upload_id: UploadId,
    ) -> Result<Option<UploadRecord>, CatalogError> {
        (**self).get_upload(tenant_id, upload_id).await
    }

    async fn active_dataset(
        &self,
        tenant_id: &TenantId,
        period: &Period,
    ) -> Result<Option<DatasetRecord>, CatalogError> {
        (**self).active_dataset(tenant_id, period).await
    }

    async fn active_periods(&self, tenant_id: &TenantId) -> Result<Vec<Period>, CatalogError> {
        (**self).active_periods(tenant_id).await
    }

    async fn admit_job(&self, job: JobRecord) -> Result<Admission, CatalogError> {
        (**self).admit_job(job).await
    }

    async fn get_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<Option<JobRecord>, CatalogError> {
        (**self).get_job(tenant_id, job_id).await
    }

    async fn list_jobs(
        &self,
        tenant_id: &TenantId,
        limit: usize,
    ) -> Result<Vec<JobRecord>, CatalogError> {
        (**self).list_jobs(tenant_id, limit).await
    }

    async fn mark_job_running(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<JobRecord, CatalogError> {
        (**self).mark_job_running(tenant_id, job_id).await
    }

    async fn update_job_progress(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), CatalogError> {
        (**self)
            .update_job_progress(tenant_id, job_id, progress, message)
            .await
    }

    async fn complete_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        outcome: JobOutcome,
    ) -> Result<CompletionEffect, CatalogError> {
        (**self).complete_job(tenant_id, job_id, outcome).await
    }

    async fn fail_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        error: String,
        warnings: Vec<String>,
    ) -> Result<(), CatalogError> {
        (**self).fail_job(tenant_id, job_id, error, warnings).await
    }

    async fn clear_period(
        &self,
        tenant_id: &TenantId,
        period: &Period,
    ) -> Result<Vec<DatasetRecord>, CatalogError> {
        (**self).clear_period(tenant_id, period).await
    }
}
