//! Message published to the job queue for every admitted job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use settlekit_core::{DatasetId, FileRole, JobId, Period, Platform, ProcessMode, TenantId};

use crate::catalog::{FileSnapshot, InputUploadRefs, JobRecord};

/// Queue payload. Carries everything a worker needs besides the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub year: i32,
    pub month: u32,
    pub mode: ProcessMode,
    pub dataset_id: DatasetId,
    pub file_objects: BTreeMap<FileRole, String>,
    pub file_metadata: BTreeMap<FileRole, FileSnapshot>,
    pub input_upload_refs: InputUploadRefs,
    pub request_id: String,
}

impl JobPayload {
    pub fn from_job(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            tenant_id: job.tenant_id.clone(),
            platform: job.period.platform(),
            year: job.period.year(),
            month: job.period.month(),
            mode: job.mode,
            dataset_id: job.dataset_id.clone(),
            file_objects: job.file_objects.clone(),
            file_metadata: job.file_metadata.clone(),
            input_upload_refs: job.input_upload_refs.clone(),
            request_id: job.request_id.clone(),
        }
    }

    /// The period this payload targets, revalidated after deserialization.
    pub fn period(&self) -> Result<Period, settlekit_core::DomainError> {
        Period::new(self.platform, self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::UploadRecord;
    use chrono::Utc;
    use settlekit_core::UploadId;

    #[test]
    fn payload_mirrors_job_and_uses_snake_case() {
        let tenant = TenantId::parse("t1").unwrap();
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
        let job = JobRecord::queued(
            tenant,
            Period::new(Platform::WechatVideo, 2025, 10).unwrap(),
            ProcessMode::Merge,
            InputUploadRefs {
                settlement_upload_id: upload.id,
                orders_upload_id: None,
            },
            std::slice::from_ref(&upload),
            "req-1",
            Utc::now(),
        );

        let payload = JobPayload::from_job(&job);
        assert_eq!(payload.dataset_id, job.dataset_id);
        assert_eq!(payload.period().unwrap(), job.period);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["platform"], "wechat_video");
        assert_eq!(json["mode"], "merge");
        assert_eq!(json["file_objects"]["settlement"], "raw/s.xlsx");

        let back: JobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }
}
