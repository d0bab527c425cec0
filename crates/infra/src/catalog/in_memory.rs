use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use settlekit_core::{DatasetId, FileRole, JobId, Period, Platform, TenantId, UploadId};

use super::{
    Admission, CatalogError, CatalogStore, CompletionEffect, DatasetRecord, JobOutcome, JobRecord,
    UploadRecord,
};

type UploadKey = (TenantId, Platform, FileRole, String);
type PeriodKey = (TenantId, Period);

#[derive(Debug, Default)]
struct CatalogState {
    uploads: HashMap<UploadId, UploadRecord>,
    upload_keys: HashMap<UploadKey, UploadId>,
    jobs: HashMap<JobId, JobRecord>,
    datasets: HashMap<PeriodKey, DatasetRecord>,
    dataset_owners: HashMap<DatasetId, PeriodKey>,
}

impl CatalogState {
    fn job_mut(&mut self, tenant_id: &TenantId, job_id: JobId) -> Result<&mut JobRecord, CatalogError> {
        match self.jobs.get_mut(&job_id) {
            Some(job) if &job.tenant_id == tenant_id => Ok(job),
            Some(_) => Err(CatalogError::TenantIsolation),
            None => Err(CatalogError::NotFound(format!("job {job_id}"))),
        }
    }
}

/// In-memory catalog for tests/dev.
///
/// A single `RwLock` guards all maps, which makes every trait operation atomic.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn job_count(&self) -> usize {
        self.read().jobs.len()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn find_upload(
        &self,
        tenant_id: &TenantId,
        platform: Platform,
        file_role: FileRole,
        content_hash: &str,
    ) -> Result<Option<UploadRecord>, CatalogError> {
        let state = self.read();
        let key = (tenant_id.clone(), platform, file_role, content_hash.to_string());
        Ok(state
            .upload_keys
            .get(&key)
            .and_then(|id| state.uploads.get(id))
            .cloned())
    }

    async fn insert_upload(&self, record: UploadRecord) -> Result<UploadRecord, CatalogError> {
        let mut state = self.write();
        let key = (
            record.tenant_id.clone(),
            record.platform,
            record.file_role,
            record.content_hash.clone(),
        );
        if let Some(existing) = state.upload_keys.get(&key).and_then(|id| state.uploads.get(id)) {
            return Ok(existing.clone());
        }
        if state.uploads.contains_key(&record.id) {
            return Err(CatalogError::AlreadyExists(format!("upload {}", record.id)));
        }
        state.upload_keys.insert(key, record.id);
        state.uploads.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_upload(
        &self,
        tenant_id: &TenantId,
        upload_id: UploadId,
    ) -> Result<Option<UploadRecord>, CatalogError> {
        match self.read().uploads.get(&upload_id) {
            Some(u) if &u.tenant_id == tenant_id => Ok(Some(u.clone())),
            Some(_) => Err(CatalogError::TenantIsolation),
            None => Ok(None),
        }
    }

    async fn active_dataset(
        &self,
        tenant_id: &TenantId,
        period: &Period,
    ) -> Result<Option<DatasetRecord>, CatalogError> {
        let key = (tenant_id.clone(), period.clone());
        Ok(self
            .read()
            .datasets
            .get(&key)
            .filter(|d| d.is_active())
            .cloned())
    }

    async fn active_periods(&self, tenant_id: &TenantId) -> Result<Vec<Period>, CatalogError> {
        let mut periods: Vec<Period> = self
            .read()
            .datasets
            .values()
            .filter(|d| &d.tenant_id == tenant_id && d.is_active())
            .map(|d| d.period.clone())
            .collect();
        periods.sort_by_key(|p| (p.platform(), p.year(), p.month()));
        Ok(periods)
    }

    async fn admit_job(&self, job: JobRecord) -> Result<Admission, CatalogError> {
        let mut state = self.write();
        let key = (job.tenant_id.clone(), job.period.clone());

        if let Some(existing) = state.datasets.get(&key).filter(|d| d.is_active()) {
            return Ok(Admission::Existing(existing.clone()));
        }
        if let Some(owner) = state.dataset_owners.get(&job.dataset_id) {
            if owner != &key {
                return Err(CatalogError::IdCollision {
                    dataset_id: job.dataset_id.clone(),
                });
            }
        }
        if state.jobs.contains_key(&job.id) {
            return Err(CatalogError::AlreadyExists(format!("job {}", job.id)));
        }

        let now = Utc::now();
        let dataset = match state.datasets.get_mut(&key) {
            Some(cleared) => {
                cleared.reactivate(&job, now);
                cleared.clone()
            }
            None => {
                let created = DatasetRecord::activated_by(&job, now);
                state.datasets.insert(key.clone(), created.clone());
                created
            }
        };
        state.dataset_owners.insert(job.dataset_id.clone(), key);
        debug!(job_id = %job.id, dataset_id = %dataset.id, "job admitted");
        state.jobs.insert(job.id, job);

        Ok(Admission::Admitted(dataset))
    }

    async fn get_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<Option<JobRecord>, CatalogError> {
        match self.read().jobs.get(&job_id) {
            Some(j) if &j.tenant_id == tenant_id => Ok(Some(j.clone())),
            Some(_) => Err(CatalogError::TenantIsolation),
            None => Ok(None),
        }
    }

    async fn list_jobs(
        &self,
        tenant_id: &TenantId,
        limit: usize,
    ) -> Result<Vec<JobRecord>, CatalogError> {
        let state = self.read();
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| &j.tenant_id == tenant_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn mark_job_running(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<JobRecord, CatalogError> {
        let mut state = self.write();
        let job = state.job_mut(tenant_id, job_id)?;
        job.start(Utc::now())?;
        Ok(job.clone())
    }

    async fn update_job_progress(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), CatalogError> {
        let mut state = self.write();
        state
            .job_mut(tenant_id, job_id)?
            .report_progress(progress, message, Utc::now())
    }

    async fn complete_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        outcome: JobOutcome,
    ) -> Result<CompletionEffect, CatalogError> {
        let mut state = self.write();
        let now = Utc::now();

        let job = state.job_mut(tenant_id, job_id)?;
        job.complete(outcome.clone(), now)?;
        let key = (job.tenant_id.clone(), job.period.clone());
        let mode = job.mode;

        match state.datasets.get_mut(&key) {
            Some(dataset) => {
                if dataset.record_completion(job_id, mode, &outcome, now) {
                    Ok(CompletionEffect::DatasetUpdated(dataset.clone()))
                } else {
                    Ok(CompletionEffect::Orphaned)
                }
            }
            None => Ok(CompletionEffect::Orphaned),
        }
    }

    async fn fail_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        error: String,
        warnings: Vec<String>,
    ) -> Result<(), CatalogError> {
        let mut state = self.write();
        state
            .job_mut(tenant_id, job_id)?
            .fail(error, warnings, Utc::now())
    }

    async fn clear_period(
        &self,
        tenant_id: &TenantId,
        period: &Period,
    ) -> Result<Vec<DatasetRecord>, CatalogError> {
        let mut state = self.write();
        let key = (tenant_id.clone(), period.clone());
        match state.datasets.get_mut(&key) {
            Some(dataset) if dataset.is_active() => {
                dataset.clear(Utc::now());
                Ok(vec![dataset.clone()])
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DatasetStatus, InputUploadRefs, JobState};
    use settlekit_core::ProcessMode;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    fn period() -> Period {
        Period::new(Platform::WechatVideo, 2025, 10).unwrap()
    }

    fn upload(tenant_id: &TenantId, hash: &str) -> UploadRecord {
        UploadRecord {
            id: UploadId::new(),
            tenant_id: tenant_id.clone(),
            platform: Platform::WechatVideo,
            file_role: FileRole::Settlement,
            content_hash: hash.to_string(),
            original_filename: "s.xlsx".into(),
            storage_key: format!("raw/{hash}.xlsx"),
            byte_size: 3,
            uploaded_at: Utc::now(),
        }
    }

    fn job(tenant_id: &TenantId) -> JobRecord {
        let u = upload(tenant_id, "h");
        let refs = InputUploadRefs {
            settlement_upload_id: u.id,
            orders_upload_id: None,
        };
        JobRecord::queued(tenant_id.clone(), period(), ProcessMode::Merge, refs, &[u], "req", Utc::now())
    }

    #[tokio::test]
    async fn upload_insert_is_idempotent_per_tuple() {
        let store = InMemoryCatalogStore::new();
        let t = tenant("t1");

        let first = store.insert_upload(upload(&t, "abc")).await.unwrap();
        let second = store.insert_upload(upload(&t, "abc")).await.unwrap();
        assert_eq!(first.id, second.id);

        let found = store
            .find_upload(&t, Platform::WechatVideo, FileRole::Settlement, "abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);

        // Another tenant never sees it.
        assert!(matches!(
            store.get_upload(&tenant("t2"), first.id).await,
            Err(CatalogError::TenantIsolation)
        ));
    }

    #[tokio::test]
    async fn only_one_admission_per_active_period() {
        let store = InMemoryCatalogStore::new();
        let t = tenant("t1");

        let first = job(&t);
        let first_id = first.id;
        assert!(matches!(store.admit_job(first).await.unwrap(), Admission::Admitted(_)));

        match store.admit_job(job(&t)).await.unwrap() {
            Admission::Existing(ds) => assert_eq!(ds.metadata.job_id, first_id),
            other => panic!("expected existing dataset, got {other:?}"),
        }
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn completion_updates_dataset_and_clear_orphans_late_jobs() {
        let store = InMemoryCatalogStore::new();
        let t = tenant("t1");
        let j = job(&t);
        let id = j.id;
        store.admit_job(j).await.unwrap();

        store.mark_job_running(&t, id).await.unwrap();
        store.update_job_progress(&t, id, 40, Some("parsing".into())).await.unwrap();

        let cleared = store.clear_period(&t, &period()).await.unwrap();
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].status, DatasetStatus::Cleared);

        let effect = store
            .complete_job(&t, id, JobOutcome { fact_count: 5, agg_count: 1, warnings: vec![] })
            .await
            .unwrap();
        assert_eq!(effect, CompletionEffect::Orphaned);
        assert!(store.active_dataset(&t, &period()).await.unwrap().is_none());

        let stored = store.get_job(&t, id).await.unwrap().unwrap();
        assert!(matches!(stored.state, JobState::Completed { fact_count: 5, .. }));
    }

    #[tokio::test]
    async fn fail_job_records_error_and_is_terminal() {
        let store = InMemoryCatalogStore::new();
        let t = tenant("t1");
        let j = job(&t);
        let id = j.id;
        store.admit_job(j).await.unwrap();

        store.fail_job(&t, id, "bad sheet".into(), vec!["w".into()]).await.unwrap();
        let stored = store.get_job(&t, id).await.unwrap().unwrap();
        assert_eq!(stored.status(), "failed");
        assert!(store.mark_job_running(&t, id).await.is_err());
        assert!(matches!(
            store.fail_job(&tenant("t2"), id, "x".into(), vec![]).await,
            Err(CatalogError::TenantIsolation)
        ));
    }

    #[tokio::test]
    async fn list_jobs_newest_first() {
        let store = InMemoryCatalogStore::new();
        let t = tenant("t1");
        let first = job(&t);
        let first_id = first.id;
        store.admit_job(first).await.unwrap();
        store.clear_period(&t, &period()).await.unwrap();
        let mut second = job(&t);
        second.created_at = second.created_at + chrono::Duration::seconds(1);
        let second_id = second.id;
        store.admit_job(second).await.unwrap();

        let listed: Vec<_> = store.list_jobs(&t, 10).await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![second_id, first_id]);
        assert_eq!(store.list_jobs(&t, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completion_folds_counts_into_active_dataset() {
        let store = InMemoryCatalogStore::new();
        let t = tenant("t1");
        let j = job(&t);
        let id = j.id;
        store.admit_job(j).await.unwrap();
        store.mark_job_running(&t, id).await.unwrap();

        let effect = store
            .complete_job(&t, id, JobOutcome { fact_count: 120, agg_count: 5, warnings: vec![] })
            .await
            .unwrap();
        match effect {
            CompletionEffect::DatasetUpdated(ds) => {
                assert_eq!(ds.metadata.fact_count, Some(120));
                assert_eq!(ds.metadata.job_ids, vec![id]);
            }
            other => panic!("expected dataset update, got {other:?}"),
        }
        let active = store.active_dataset(&t, &period()).await.unwrap().unwrap();
        assert_eq!(active.metadata.agg_count, Some(5));
    }

    #[tokio::test]
    async fn active_periods_skip_cleared_and_foreign_datasets() {
        let store = InMemoryCatalogStore::new();
        let t = tenant("t1");
        store.admit_job(job(&t)).await.unwrap();
        store.admit_job(job(&tenant("t2"))).await.unwrap();

        let mut earlier = job(&t);
        earlier.period = Period::new(Platform::WechatVideo, 2025, 3).unwrap();
        earlier.dataset_id = DatasetId::derive(&t, &earlier.period);
        store.admit_job(earlier).await.unwrap();

        let periods = store.active_periods(&t).await.unwrap();
        assert_eq!(periods.iter().map(Period::month).collect::<Vec<_>>(), vec![3, 10]);

        store.clear_period(&t, &period()).await.unwrap();
        let periods = store.active_periods(&t).await.unwrap();
        assert_eq!(periods, vec![Period::new(Platform::WechatVideo, 2025, 3).unwrap()]);
    }
}
