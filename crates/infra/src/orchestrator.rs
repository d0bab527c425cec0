//! Job orchestrator: validated, idempotent job submission per period.
//!
//! ## Submission protocol
//!
//! 1. Validate the request and resolve every referenced upload (no side effects).
//! 2. Under the per-(tenant, period) lock, look for an active dataset. If one
//!    exists the request is answered with `DuplicateReused`.
//! 3. Otherwise atomically admit a new `queued` job and activate its dataset.
//!    Losing that race to another process also ends in `DuplicateReused`.
//! 4. Publish the payload. A publish failure leaves the job queued and is
//!    reported as [`SubmitError::Publish`]; [`JobOrchestrator::requeue`]
//!    republishes it later.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use settlekit_core::{DatasetId, FileRole, JobId, Period, ProcessMode, TenantId, UploadId};

use crate::catalog::{Admission, CatalogError, CatalogStore, InputUploadRefs, JobRecord, JobState, UploadRecord};
use crate::locks::KeyedLocks;
use crate::payload::JobPayload;
use crate::queue::JobQueue;

/// Loosely typed submission as it arrives from a client.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub platform: String,
    pub year: i64,
    pub month: i64,
    pub mode: Option<String>,
    pub settlement_upload_id: Option<UploadId>,
    pub orders_upload_id: Option<UploadId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Queued {
        job_id: JobId,
        dataset_id: DatasetId,
    },
    DuplicateReused {
        dataset_id: DatasetId,
        job_id: JobId,
        fact_count: Option<u64>,
        agg_count: Option<u64>,
    },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            SubmitOutcome::Queued { job_id, .. } | SubmitOutcome::DuplicateReused { job_id, .. } => *job_id,
        }
    }

    pub fn dataset_id(&self) -> &DatasetId {
        match self {
            SubmitOutcome::Queued { dataset_id, .. }
            | SubmitOutcome::DuplicateReused { dataset_id, .. } => dataset_id,
        }
    }
}

/// Orchestrator error.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("{role} upload {upload_id} not found")]
    UploadNotFound { upload_id: UploadId, role: FileRole },
    #[error("upload {upload_id} cannot be used: {reason}")]
    InvalidUploadRecord { upload_id: UploadId, reason: String },
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("job {job_id} is {status}, only queued jobs can be republished")]
    NotQueued { job_id: JobId, status: &'static str },
    #[error("duplicate check failed: {0}")]
    DependencyUnavailable(#[source] CatalogError),
    #[error("failed to persist job: {0}")]
    Persistence(#[source] CatalogError),
    #[error("job {job_id} was stored but could not be published: {message}")]
    Publish {
        job_id: JobId,
        dataset_id: DatasetId,
        message: String,
    },
}

pub struct JobOrchestrator<C, Q> {
    catalog: C,
    queue: Q,
    locks: KeyedLocks<(TenantId, Period)>,
}

impl<C: CatalogStore, Q: JobQueue> JobOrchestrator<C, Q> {
    pub fn new(catalog: C, queue: Q) -> Self {
        Self {
            catalog,
            queue,
            locks: KeyedLocks::new(),
        }
    }

    #[instrument(
        skip(self, request),
        fields(tenant_id = %tenant_id, platform = %request.platform, year = request.year, month = request.month),
        err
    )]
    pub async fn submit(
        &self,
        tenant_id: &TenantId,
        request: SubmitRequest,
        request_id: &str,
    ) -> Result<SubmitOutcome, SubmitError> {
        let period = Period::parse(&request.platform, request.year, request.month)
            .map_err(|e| SubmitError::InvalidParams(e.to_string()))?;
        let mode = match request.mode.as_deref().map(str::trim) {
            None | Some("") => ProcessMode::default(),
            Some(raw) => raw
                .parse::<ProcessMode>()
                .map_err(|e| SubmitError::InvalidParams(e.to_string()))?,
        };
        let refs = InputUploadRefs {
            settlement_upload_id: request.settlement_upload_id.ok_or_else(|| {
                SubmitError::InvalidParams("a settlement upload reference is required".to_string())
            })?,
            orders_upload_id: request.orders_upload_id,
        };
        if period.platform().requires_orders() && refs.orders_upload_id.is_none() {
            return Err(SubmitError::InvalidParams(format!(
                "platform {} requires an orders upload reference",
                period.platform()
            )));
        }
        let uploads = self.resolve_uploads(tenant_id, &period, &refs).await?;

        let _guard = self.locks.lock((tenant_id.clone(), period.clone())).await;

        if let Some(active) = self
            .catalog
            .active_dataset(tenant_id, &period)
            .await
            .map_err(SubmitError::DependencyUnavailable)?
        {
            debug!(dataset_id = %active.id, "period already has an active dataset");
            return Ok(duplicate(&active));
        }

        let job = JobRecord::queued(
            tenant_id.clone(),
            period,
            mode,
            refs,
            &uploads,
            request_id,
            Utc::now(),
        );
        let payload = JobPayload::from_job(&job);
        let (job_id, dataset_id) = (job.id, job.dataset_id.clone());

        match self.catalog.admit_job(job).await {
            Ok(Admission::Admitted(_)) => {}
            Ok(Admission::Existing(active)) => {
                debug!(dataset_id = %active.id, "lost admission race");
                return Ok(duplicate(&active));
            }
            Err(e) => return Err(SubmitError::Persistence(e)),
        }

        if let Err(e) = self.queue.enqueue(&payload).await {
            warn!(job_id = %job_id, error = %e, "job admitted but not published");
            return Err(SubmitError::Publish {
                job_id,
                dataset_id,
                message: e.to_string(),
            });
        }

        info!(job_id = %job_id, dataset_id = %dataset_id, mode = %mode, request_id, "job queued");
        Ok(SubmitOutcome::Queued { job_id, dataset_id })
    }

    /// Republish a job that is still queued, from its stored snapshot.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    pub async fn requeue(&self, tenant_id: &TenantId, job_id: JobId) -> Result<String, SubmitError> {
        let job = self.job_status(tenant_id, job_id).await?;
        if !matches!(job.state, JobState::Queued) {
            return Err(SubmitError::NotQueued {
                job_id,
                status: job.status(),
            });
        }
        let message_id = self
            .queue
            .enqueue(&JobPayload::from_job(&job))
            .await
            .map_err(|e| SubmitError::Publish {
                job_id,
                dataset_id: job.dataset_id.clone(),
                message: e.to_string(),
            })?;
        info!(message_id = %message_id, "job republished");
        Ok(message_id)
    }

    /// Tenant-scoped job record.
    pub async fn job_status(&self, tenant_id: &TenantId, job_id: JobId) -> Result<JobRecord, SubmitError> {
        match self.catalog.get_job(tenant_id, job_id).await {
            Ok(Some(job)) => Ok(job),
            Ok(None) | Err(CatalogError::TenantIsolation) => Err(SubmitError::JobNotFound(job_id)),
            Err(e) => Err(SubmitError::DependencyUnavailable(e)),
        }
    }

    /// Most recent jobs of the tenant, newest first.
    pub async fn list_jobs(&self, tenant_id: &TenantId, limit: usize) -> Result<Vec<JobRecord>, SubmitError> {
        self.catalog
            .list_jobs(tenant_id, limit)
            .await
            .map_err(SubmitError::DependencyUnavailable)
    }

    async fn resolve_uploads(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        refs: &InputUploadRefs,
    ) -> Result<Vec<UploadRecord>, SubmitError> {
        let mut uploads = Vec::new();
        for (role, upload_id) in refs.by_role() {
            let record = match self.catalog.get_upload(tenant_id, upload_id).await {
                Ok(Some(record)) => record,
                Ok(None) | Err(CatalogError::TenantIsolation) => {
                    return Err(SubmitError::UploadNotFound { upload_id, role });
                }
                Err(e) => return Err(SubmitError::DependencyUnavailable(e)),
            };
            if record.file_role != role {
                return Err(SubmitError::InvalidUploadRecord {
                    upload_id,
                    reason: format!("registered as {}, referenced as {role}", record.file_role),
                });
            }
            if record.platform != period.platform() {
                return Err(SubmitError::InvalidUploadRecord {
                    upload_id,
                    reason: format!("registered for {}, not {}", record.platform, period.platform()),
                });
            }
            if record.storage_key.trim().is_empty() {
                return Err(SubmitError::InvalidUploadRecord {
                    upload_id,
                    reason: "storage key is empty".to_string(),
                });
            }
            uploads.push(record);
        }
        Ok(uploads)
    }
}

fn duplicate(active: &crate::catalog::DatasetRecord) -> SubmitOutcome {
    SubmitOutcome::DuplicateReused {
        dataset_id: active.id.clone(),
        job_id: active.metadata.job_id,
        fact_count: active.metadata.fact_count,
        agg_count: active.metadata.agg_count,
    }
}
