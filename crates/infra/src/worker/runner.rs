use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use settlekit_core::Period;

use super::transform::{SettlementTransform, TransformInput, TransformOutput};
use super::WorkerError;
use crate::blob::BlobStore;
use crate::catalog::{CatalogError, CatalogStore, CompletionEffect, JobOutcome, JobRecord};
use crate::partitions::PartitionWriter;
use crate::payload::JobPayload;

/// Attempts to find the job record before giving up on a message.
pub const LOOKUP_ATTEMPTS: u32 = 5;
const DEFAULT_LOOKUP_BACKOFF: Duration = Duration::from_millis(200);

/// How one message ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed {
        fact_count: u64,
        agg_count: u64,
        /// `false` when the period was cleared while the job ran.
        dataset_updated: bool,
    },
    /// The job was already terminal (redelivery).
    Skipped { status: &'static str },
    /// The job was recorded as failed.
    Failed { error: String },
}

/// Executes a single job payload end to end.
pub struct JobRunner<C, B> {
    catalog: C,
    blobs: B,
    writer: PartitionWriter,
    transform: Arc<dyn SettlementTransform>,
    lookup_backoff: Duration,
}

impl<C: CatalogStore, B: BlobStore> JobRunner<C, B> {
    pub fn new(catalog: C, blobs: B, writer: PartitionWriter, transform: Arc<dyn SettlementTransform>) -> Self {
        Self {
            catalog,
            blobs,
            writer,
            transform,
            lookup_backoff: DEFAULT_LOOKUP_BACKOFF,
        }
    }

    pub fn with_lookup_backoff(mut self, backoff: Duration) -> Self {
        self.lookup_backoff = backoff;
        self
    }

    #[instrument(skip(self, payload), fields(job_id = %payload.job_id, tenant_id = %payload.tenant_id), err)]
    pub async fn run(&self, payload: &JobPayload) -> Result<RunOutcome, WorkerError> {
        let period = payload
            .period()
            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))?;
        let job = self.lookup_job(payload).await?;
        if job.is_terminal() {
            debug!(status = job.status(), "job already finished, skipping");
            return Ok(RunOutcome::Skipped { status: job.status() });
        }
        if job.dataset_id != payload.dataset_id || job.period != period {
            return Err(WorkerError::InvalidPayload(format!(
                "payload does not match job {} ({})",
                job.id, job.period
            )));
        }

        self.catalog.mark_job_running(&payload.tenant_id, payload.job_id).await?;

        match self.process(payload, &period).await {
            Ok(outcome) => {
                let (fact_count, agg_count) = (outcome.fact_count, outcome.agg_count);
                let effect = self
                    .catalog
                    .complete_job(&payload.tenant_id, payload.job_id, outcome)
                    .await?;
                let dataset_updated = matches!(effect, CompletionEffect::DatasetUpdated(_));
                if !dataset_updated {
                    warn!("period was cleared while the job ran; dataset left untouched");
                }
                info!(fact_count, agg_count, "job completed");
                Ok(RunOutcome::Completed {
                    fact_count,
                    agg_count,
                    dataset_updated,
                })
            }
            Err(failure) => {
                let error = failure.to_string();
                let warnings = match failure {
                    WorkerError::Transform(e) => e.warnings,
                    _ => Vec::new(),
                };
                warn!(error = %error, "job failed");
                self.catalog
                    .fail_job(&payload.tenant_id, payload.job_id, error.clone(), warnings)
                    .await?;
                Ok(RunOutcome::Failed { error })
            }
        }
    }

    /// Read the job record, waiting out a publish that raced its admission.
    async fn lookup_job(&self, payload: &JobPayload) -> Result<JobRecord, WorkerError> {
        for attempt in 1..=LOOKUP_ATTEMPTS {
            match self.catalog.get_job(&payload.tenant_id, payload.job_id).await {
                Ok(Some(job)) => return Ok(job),
                Ok(None) => debug!(attempt, "job record not visible yet"),
                Err(CatalogError::TenantIsolation) => return Err(WorkerError::JobMissing(payload.job_id)),
                Err(e) => warn!(attempt, error = %e, "job lookup failed"),
            }
            if attempt < LOOKUP_ATTEMPTS {
                tokio::time::sleep(self.lookup_backoff * attempt).await;
            }
        }
        Err(WorkerError::JobMissing(payload.job_id))
    }

    async fn process(&self, payload: &JobPayload, period: &Period) -> Result<JobOutcome, WorkerError> {
        self.progress(payload, 10, "loading input files").await?;
        let mut files = BTreeMap::new();
        for (role, key) in &payload.file_objects {
            let bytes = self.blobs.get(key).await?;
            files.insert(*role, bytes);
        }

        self.progress(payload, 30, "transforming rows").await?;
        let input = TransformInput {
            payload: payload.clone(),
            files,
        };
        let transform = self.transform.clone();
        let mut output = tokio::task::spawn_blocking(move || transform.transform(&input))
            .await
            .map_err(|e| WorkerError::Join(e.to_string()))??;
        stamp_rows(&mut output, payload);

        self.progress(payload, 70, "writing partitions").await?;
        let writer = self.writer.clone();
        let (tenant_id, job_id, period) = (payload.tenant_id.clone(), payload.job_id, period.clone());
        let TransformOutput { facts, aggs, warnings } = output;
        let (fact_count, agg_count) = (facts.len() as u64, aggs.len() as u64);
        tokio::task::spawn_blocking(move || {
            writer.write_facts(&tenant_id, &period, job_id, &facts)?;
            writer.write_aggs(&tenant_id, &period, job_id, &aggs)?;
            Ok::<_, WorkerError>(())
        })
        .await
        .map_err(|e| WorkerError::Join(e.to_string()))??;

        Ok(JobOutcome {
            fact_count,
            agg_count,
            warnings,
        })
    }

    async fn progress(&self, payload: &JobPayload, pct: u8, message: &str) -> Result<(), WorkerError> {
        self.catalog
            .update_job_progress(&payload.tenant_id, payload.job_id, pct, Some(message.to_string()))
            .await?;
        Ok(())
    }
}

/// Ownership columns always reflect the job that wrote the rows.
fn stamp_rows(output: &mut TransformOutput, payload: &JobPayload) {
    let upload_id = payload.input_upload_refs.settlement_upload_id.to_string();
    let job_id = payload.job_id.to_string();
    for row in &mut output.facts {
        row.tenant_id = payload.tenant_id.to_string();
        row.platform = payload.platform.to_string();
        row.job_id.clone_from(&job_id);
        if row.upload_id.is_empty() {
            row.upload_id.clone_from(&upload_id);
        }
    }
    for row in &mut output.aggs {
        row.tenant_id = payload.tenant_id.to_string();
        row.platform = payload.platform.to_string();
        row.job_id.clone_from(&job_id);
        if row.upload_id.is_empty() {
            row.upload_id.clone_from(&upload_id);
        }
    }
}
