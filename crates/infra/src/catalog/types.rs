//! Upload, job and dataset records.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use settlekit_core::{DatasetId, FileRole, JobId, Period, Platform, ProcessMode, TenantId, UploadId};

use super::CatalogError;

/// Current version of [`DatasetMetadata`]'s persisted shape.
pub const DATASET_METADATA_VERSION: u16 = 1;

/// One deduplicated physical file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: UploadId,
    pub tenant_id: TenantId,
    pub platform: settlekit_core::Platform,
    pub file_role: FileRole,
    /// Lowercase hex SHA-256 of the raw bytes.
    pub content_hash: String,
    pub original_filename: String,
    pub storage_key: String,
    pub byte_size: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            id: self.id,
            storage_key: self.storage_key.clone(),
            content_hash: self.content_hash.clone(),
            file_role: self.file_role,
            original_filename: self.original_filename.clone(),
            size: self.byte_size,
        }
    }
}

/// Upload metadata frozen into a job at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub id: UploadId,
    pub storage_key: String,
    pub content_hash: String,
    pub file_role: FileRole,
    pub original_filename: String,
    pub size: u64,
}

/// Upload references named by a processing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputUploadRefs {
    pub settlement_upload_id: UploadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders_upload_id: Option<UploadId>,
}

impl InputUploadRefs {
    /// Referenced uploads with the role each one is expected to carry.
    pub fn by_role(&self) -> Vec<(FileRole, UploadId)> {
        let mut refs = vec![(FileRole::Settlement, self.settlement_upload_id)];
        if let Some(orders) = self.orders_upload_id {
            refs.push((FileRole::Orders, orders));
        }
        refs
    }
}

/// What a finished job produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub fact_count: u64,
    pub agg_count: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Job lifecycle. Each state carries only the data meaningful for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        completed_at: DateTime<Utc>,
        fact_count: u64,
        agg_count: u64,
        #[serde(default)]
        warnings: Vec<String>,
    },
    Failed {
        failed_at: DateTime<Utc>,
        error: String,
        #[serde(default)]
        warnings: Vec<String>,
    },
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

/// One asynchronous processing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub period: Period,
    pub dataset_id: DatasetId,
    pub mode: ProcessMode,
    pub request_id: String,
    pub input_upload_refs: InputUploadRefs,
    /// Role → storage key, as of submission.
    pub file_objects: BTreeMap<FileRole, String>,
    pub file_metadata: BTreeMap<FileRole, FileSnapshot>,
    pub state: JobState,
    /// Percentage in 0..=100.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A freshly admitted job snapshotting `uploads`.
    pub fn queued(
        tenant_id: TenantId,
        period: Period,
        mode: ProcessMode,
        input_upload_refs: InputUploadRefs,
        uploads: &[UploadRecord],
        request_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let dataset_id = DatasetId::derive(&tenant_id, &period);
        let file_metadata: BTreeMap<FileRole, FileSnapshot> = uploads
            .iter()
            .map(|u| (u.file_role, u.snapshot()))
            .collect();
        let file_objects = file_metadata
            .iter()
            .map(|(role, snap)| (*role, snap.storage_key.clone()))
            .collect();

        Self {
            id: JobId::new(),
            tenant_id,
            period,
            dataset_id,
            mode,
            request_id: request_id.into(),
            input_upload_refs,
            file_objects,
            file_metadata,
            state: JobState::Queued,
            progress: 0,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn input_upload_id(&self) -> UploadId {
        self.input_upload_refs.settlement_upload_id
    }

    pub fn status(&self) -> &'static str {
        self.state.name()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            JobState::Completed { completed_at, .. } => Some(*completed_at),
            JobState::Failed { failed_at, .. } => Some(*failed_at),
            _ => None,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), CatalogError> {
        match self.state {
            JobState::Queued => {
                self.state = JobState::Running { started_at: now };
                self.updated_at = now;
                Ok(())
            }
            // Redelivery after a worker crash re-enters an already running job.
            JobState::Running { .. } => {
                self.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid_transition("running")),
        }
    }

    pub fn report_progress(
        &mut self,
        progress: u8,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        if self.is_terminal() {
            return Err(self.invalid_transition("progress"));
        }
        self.progress = progress.min(100);
        if message.is_some() {
            self.message = message;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, outcome: JobOutcome, now: DateTime<Utc>) -> Result<(), CatalogError> {
        if self.is_terminal() {
            return Err(self.invalid_transition("completed"));
        }
        self.state = JobState::Completed {
            completed_at: now,
            fact_count: outcome.fact_count,
            agg_count: outcome.agg_count,
            warnings: outcome.warnings,
        };
        self.progress = 100;
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(
        &mut self,
        error: String,
        warnings: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        if self.is_terminal() {
            return Err(self.invalid_transition("failed"));
        }
        self.message = Some(error.clone());
        self.state = JobState::Failed {
            failed_at: now,
            error,
            warnings,
        };
        self.updated_at = now;
        Ok(())
    }

    fn invalid_transition(&self, to: &'static str) -> CatalogError {
        CatalogError::InvalidTransition {
            job_id: self.id,
            from: self.state.name(),
            to,
        }
    }
}

/// Lifecycle of a dataset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    Active,
    Cleared,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Active => "active",
            DatasetStatus::Cleared => "cleared",
        }
    }
}

impl core::str::FromStr for DatasetStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DatasetStatus::Active),
            "cleared" => Ok(DatasetStatus::Cleared),
            other => Err(CatalogError::Corrupt(format!("unknown dataset status {other:?}"))),
        }
    }
}

/// Typed dataset metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub schema_version: u16,
    /// Most recent job that produced (or is producing) this dataset.
    pub job_id: JobId,
    /// Every job that contributed since the dataset was last activated.
    pub job_ids: Vec<JobId>,
    pub mode: ProcessMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_count: Option<u64>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl DatasetMetadata {
    pub fn for_job(job: &JobRecord) -> Self {
        Self {
            schema_version: DATASET_METADATA_VERSION,
            job_id: job.id,
            job_ids: vec![job.id],
            mode: job.mode,
            fact_count: None,
            agg_count: None,
            warnings: Vec::new(),
        }
    }

    pub fn references(&self, job_id: JobId) -> bool {
        self.job_id == job_id || self.job_ids.contains(&job_id)
    }

    /// Job ids in history order, most recent included, without duplicates.
    pub fn all_job_ids(&self) -> Vec<JobId> {
        let mut ids = Vec::with_capacity(self.job_ids.len() + 1);
        for id in self.job_ids.iter().copied().chain(std::iter::once(self.job_id)) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

/// The current effective data of one tenant + period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub tenant_id: TenantId,
    pub period: Period,
    pub status: DatasetStatus,
    pub metadata: DatasetMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<DateTime<Utc>>,
}

impl DatasetRecord {
    pub fn activated_by(job: &JobRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: job.dataset_id.clone(),
            tenant_id: job.tenant_id.clone(),
            period: job.period.clone(),
            status: DatasetStatus::Active,
            metadata: DatasetMetadata::for_job(job),
            created_at: now,
            updated_at: now,
            cleared_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DatasetStatus::Active
    }

    /// Bring a cleared dataset back for a new job; history starts over.
    pub fn reactivate(&mut self, job: &JobRecord, now: DateTime<Utc>) {
        self.status = DatasetStatus::Active;
        self.metadata = DatasetMetadata::for_job(job);
        self.updated_at = now;
        self.cleared_at = None;
    }

    pub fn clear(&mut self, now: DateTime<Utc>) {
        self.status = DatasetStatus::Cleared;
        self.cleared_at = Some(now);
        self.updated_at = now;
    }

    /// Fold a completed job into the metadata.
    ///
    /// Returns `false` (and changes nothing) when the dataset no longer owns
    /// the job, i.e. it was cleared or re-activated by a later job.
    pub fn record_completion(
        &mut self,
        job_id: JobId,
        mode: ProcessMode,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_active() || !self.metadata.references(job_id) {
            return false;
        }
        match mode {
            ProcessMode::Merge => {
                if !self.metadata.job_ids.contains(&job_id) {
                    self.metadata.job_ids.push(job_id);
                }
            }
            ProcessMode::Replace => self.metadata.job_ids = vec![job_id],
        }
        self.metadata.job_id = job_id;
        self.metadata.mode = mode;
        self.metadata.fact_count = Some(outcome.fact_count);
        self.metadata.agg_count = Some(outcome.agg_count);
        self.metadata.warnings = outcome.warnings.clone();
        self.updated_at = now;
        true
    }
}

/// Result of an atomic admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The job was stored and the dataset is now active for it.
    Admitted(DatasetRecord),
    /// Another job already holds the period; nothing was written.
    Existing(DatasetRecord),
}

/// Effect of a job completion on its dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEffect {
    DatasetUpdated(DatasetRecord),
    /// The dataset was cleared (or taken over) while the job ran.
    Orphaned,
}

/// Distinct platforms, years and months over a tenant's active periods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeriodFacets {
    pub platforms: Vec<Platform>,
    pub years: Vec<i32>,
    pub months: Vec<u32>,
}

impl PeriodFacets {
    /// Years are narrowed by `platform`. Months are listed only when both
    /// `platform` and `year` are given.
    pub fn from_periods(periods: &[Period], platform: Option<Platform>, year: Option<i32>) -> Self {
        let mut platforms: Vec<Platform> = periods
            .iter()
            .map(Period::platform)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        platforms.sort_by_key(|p| p.as_str());

        let on_platform = |p: &&Period| platform.is_none_or(|wanted| p.platform() == wanted);
        let years = periods
            .iter()
            .filter(on_platform)
            .map(Period::year)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let months = match (platform, year) {
            (Some(platform), Some(year)) => periods
                .iter()
                .filter(|p| p.platform() == platform && p.year() == year)
                .map(Period::month)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            _ => Vec::new(),
        };

        Self { platforms, years, months }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobRecord {
        let tenant = TenantId::parse("t1").unwrap();
        let period = Period::new(Platform::WechatVideo, 2025, 10).unwrap();
        let upload = UploadRecord {
            id: UploadId::new(),
            tenant_id: tenant.clone(),
            platform: Platform::WechatVideo,
            file_role: FileRole::Settlement,
            content_hash: "ab".repeat(32),
            original_filename: "s.xlsx".into(),
            storage_key: "raw/s.xlsx".into(),
            byte_size: 10,
            uploaded_at: Utc::now(),
        };
        let refs = InputUploadRefs {
            settlement_upload_id: upload.id,
            orders_upload_id: None,
        };
        JobRecord::queued(tenant, period, ProcessMode::Merge, refs, &[upload], "req-1", Utc::now())
    }

    #[test]
    fn queued_job_snapshots_uploads() {
        let job = job();
        assert_eq!(job.status(), "queued");
        assert_eq!(job.file_objects.get(&FileRole::Settlement).unwrap(), "raw/s.xlsx");
        assert_eq!(job.file_metadata[&FileRole::Settlement].size, 10);
        assert_eq!(job.input_upload_id(), job.input_upload_refs.settlement_upload_id);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut job = job();
        job.start(Utc::now()).unwrap();
        job.start(Utc::now()).unwrap();
        job.report_progress(150, Some("halfway".into()), Utc::now()).unwrap();
        assert_eq!(job.progress, 100);

        job.complete(
            JobOutcome {
                fact_count: 3,
                agg_count: 1,
                warnings: vec![],
            },
            Utc::now(),
        )
        .unwrap();
        assert!(job.is_terminal());
        assert!(job.completed_at().is_some());

        let err = job.fail("late".into(), vec![], Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::InvalidTransition { from: "completed", to: "failed", .. }
        ));
        assert!(job.start(Utc::now()).is_err());
    }

    #[test]
    fn job_state_is_tagged_by_status() {
        let failed = JobState::Failed {
            failed_at: Utc::now(),
            error: "boom".into(),
            warnings: vec![],
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert!(json.get("fact_count").is_none());
    }

    #[test]
    fn completion_merges_or_replaces_history() {
        let first = job();
        let mut ds = DatasetRecord::activated_by(&first, Utc::now());
        let outcome = JobOutcome {
            fact_count: 120,
            agg_count: 7,
            warnings: vec![],
        };
        assert!(ds.record_completion(first.id, ProcessMode::Merge, &outcome, Utc::now()));
        assert_eq!(ds.metadata.fact_count, Some(120));
        assert_eq!(ds.metadata.job_ids, vec![first.id]);

        // A job the dataset never admitted is ignored.
        assert!(!ds.record_completion(JobId::new(), ProcessMode::Merge, &outcome, Utc::now()));

        // Replace keeps only the completing job.
        ds.metadata.job_ids.push(JobId::new());
        assert!(ds.record_completion(first.id, ProcessMode::Replace, &outcome, Utc::now()));
        assert_eq!(ds.metadata.job_ids, vec![first.id]);
    }

    #[test]
    fn cleared_dataset_ignores_completion_and_resets_on_reactivation() {
        let first = job();
        let mut ds = DatasetRecord::activated_by(&first, Utc::now());
        ds.clear(Utc::now());
        assert!(!ds.record_completion(first.id, ProcessMode::Merge, &JobOutcome::default(), Utc::now()));

        let second = job();
        ds.reactivate(&second, Utc::now());
        assert!(ds.is_active());
        assert_eq!(ds.metadata.all_job_ids(), vec![second.id]);
        assert!(ds.cleared_at.is_none());
    }

    #[test]
    fn period_facets_narrow_by_platform_and_year() {
        let periods = [
            Period::new(Platform::WechatVideo, 2025, 10).unwrap(),
            Period::new(Platform::WechatVideo, 2025, 3).unwrap(),
            Period::new(Platform::WechatVideo, 2024, 12).unwrap(),
            Period::new(Platform::Douyin, 2023, 1).unwrap(),
        ];

        let all = PeriodFacets::from_periods(&periods, None, None);
        assert_eq!(all.platforms, vec![Platform::Douyin, Platform::WechatVideo]);
        assert_eq!(all.years, vec![2023, 2024, 2025]);
        assert!(all.months.is_empty());

        let wechat = PeriodFacets::from_periods(&periods, Some(Platform::WechatVideo), None);
        assert_eq!(wechat.years, vec![2024, 2025]);
        assert!(wechat.months.is_empty());

        let months = PeriodFacets::from_periods(&periods, Some(Platform::WechatVideo), Some(2025));
        assert_eq!(months.months, vec![3, 10]);
        assert_eq!(months.platforms, all.platforms);

        assert_eq!(PeriodFacets::from_periods(&[], None, None), PeriodFacets::default());
    }
}
