//! Period clearer: retire a period's active dataset.
//!
//! Clearing only tombstones catalog state. Partition files stay on disk; the
//! next submit for the period starts a fresh job history.

use serde::Serialize;
use tracing::{info, instrument};

use settlekit_core::{DatasetId, JobId, Period, TenantId};

use crate::catalog::{CatalogError, CatalogStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClearOutcome {
    #[serde(rename = "ok")]
    Cleared {
        dataset_id: DatasetId,
        job_ids: Vec<JobId>,
    },
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum ClearError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("failed to clear period: {0}")]
    Catalog(#[from] CatalogError),
}

pub struct PeriodClearer<C> {
    catalog: C,
}

impl<C: CatalogStore> PeriodClearer<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    /// Clear from loosely typed request values.
    pub async fn clear_raw(
        &self,
        tenant_id: &TenantId,
        platform: &str,
        year: i64,
        month: i64,
    ) -> Result<ClearOutcome, ClearError> {
        let period = Period::parse(platform, year, month)
            .map_err(|e| ClearError::InvalidParams(e.to_string()))?;
        self.clear(tenant_id, &period).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, period = %period), err)]
    pub async fn clear(&self, tenant_id: &TenantId, period: &Period) -> Result<ClearOutcome, ClearError> {
        let cleared = self.catalog.clear_period(tenant_id, period).await?;
        let Some(dataset_id) = cleared.first().map(|d| d.id.clone()) else {
            info!("no active dataset to clear");
            return Ok(ClearOutcome::NotFound);
        };

        let mut job_ids: Vec<JobId> = Vec::new();
        for dataset in &cleared {
            for job_id in dataset.metadata.all_job_ids() {
                if !job_ids.contains(&job_id) {
                    job_ids.push(job_id);
                }
            }
        }

        info!(
            audit = true,
            dataset_id = %dataset_id,
            job_ids = ?job_ids,
            datasets = cleared.len(),
            "period cleared"
        );
        Ok(ClearOutcome::Cleared { dataset_id, job_ids })
    }
}
