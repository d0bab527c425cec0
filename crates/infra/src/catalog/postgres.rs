//! Postgres-backed catalog store.
//!
//! ## Schema
//!
//! - `settlement_uploads`: unique on `(tenant_id, platform, file_role, content_hash)`.
//! - `settlement_jobs`: the full [`JobRecord`] as JSONB plus indexed columns.
//! - `settlement_datasets`: primary key `(tenant_id, platform, year, month)`,
//!   `id` unique. The primary key closes the duplicate-submission race across
//!   processes; the `id` constraint turns a truncated-hash collision into an
//!   error instead of two periods sharing one dataset.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | CatalogError |
//! |------------|----------------------|--------------|
//! | Database (unique violation on `settlement_datasets_id_key`, admission only) | `23505` | `IdCollision` |
//! | Database (other unique violation) | `23505` | `AlreadyExists` |
//! | Database (other) | any | `Unavailable` |
//! | PoolClosed / Io / Tls / timeouts | N/A | `Unavailable` |
//! | Decode / ColumnDecode | N/A | `Corrupt` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

use settlekit_core::{DatasetId, FileRole, JobId, Period, Platform, TenantId, UploadId};

use super::{
    Admission, CatalogError, CatalogStore, CompletionEffect, DatasetMetadata, DatasetRecord,
    DatasetStatus, JobOutcome, JobRecord, UploadRecord,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settlement_uploads (
    id UUID PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    platform TEXT NOT NULL,
    file_role TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    byte_size BIGINT NOT NULL CHECK (byte_size >= 0),
    uploaded_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT settlement_uploads_content_key UNIQUE (tenant_id, platform, file_role, content_hash)
);

CREATE TABLE IF NOT EXISTS settlement_jobs (
    id UUID PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    dataset_id TEXT NOT NULL,
    status TEXT NOT NULL,
    record JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS settlement_jobs_tenant_created_idx
    ON settlement_jobs (tenant_id, created_at DESC);

CREATE TABLE IF NOT EXISTS settlement_datasets (
    tenant_id TEXT NOT NULL,
    platform TEXT NOT NULL,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
    id TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    cleared_at TIMESTAMPTZ NULL,
    PRIMARY KEY (tenant_id, platform, year, month),
    CONSTRAINT settlement_datasets_id_key UNIQUE (id)
)
"#;

const DATASET_ID_CONSTRAINT: &str = "settlement_datasets_id_key";

/// Postgres-backed catalog.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool (Arc + Send + Sync). Multi-statement
/// operations run in a single transaction with the job row locked
/// `FOR UPDATE`.
#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: Arc<PgPool>,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), CatalogError> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        info!("catalog schema ready");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, CatalogError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn lock_job(
        tx: &mut Transaction<'static, Postgres>,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<JobRecord, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, record
            FROM settlement_jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_job", e))?
        .ok_or_else(|| CatalogError::NotFound(format!("job {job_id}")))?;

        let owner: String = row.try_get("tenant_id").map_err(|e| map_sqlx_error("lock_job", e))?;
        if owner != tenant_id.as_str() {
            return Err(CatalogError::TenantIsolation);
        }
        let Json(job): Json<JobRecord> =
            row.try_get("record").map_err(|e| map_sqlx_error("lock_job", e))?;
        Ok(job)
    }

    async fn save_job(
        tx: &mut Transaction<'static, Postgres>,
        job: &JobRecord,
    ) -> Result<(), CatalogError> {
        sqlx::query(
            r#"
            UPDATE settlement_jobs
            SET status = $2, record = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status())
        .bind(Json(job))
        .bind(job.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("save_job", e))?;
        Ok(())
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), CatalogError> {
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, platform = %platform, role = %file_role), err)]
    async fn find_upload(
        &self,
        tenant_id: &TenantId,
        platform: Platform,
        file_role: FileRole,
        content_hash: &str,
    ) -> Result<Option<UploadRecord>, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, platform, file_role, content_hash, original_filename,
                   storage_key, byte_size, uploaded_at
            FROM settlement_uploads
            WHERE tenant_id = $1 AND platform = $2 AND file_role = $3 AND content_hash = $4
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(platform.as_str())
        .bind(file_role.as_str())
        .bind(content_hash)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_upload", e))?;

        row.as_ref().map(upload_from_row).transpose()
    }

    #[instrument(skip(self, record), fields(upload_id = %record.id, tenant_id = %record.tenant_id), err)]
    async fn insert_upload(&self, record: UploadRecord) -> Result<UploadRecord, CatalogError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO settlement_uploads (
                id, tenant_id, platform, file_role, content_hash, original_filename,
                storage_key, byte_size, uploaded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT ON CONSTRAINT settlement_uploads_content_key DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.tenant_id.as_str())
        .bind(record.platform.as_str())
        .bind(record.file_role.as_str())
        .bind(&record.content_hash)
        .bind(&record.original_filename)
        .bind(&record.storage_key)
        .bind(record.byte_size as i64)
        .bind(record.uploaded_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_upload", e))?;

        if inserted.is_some() {
            return Ok(record);
        }

        debug!("upload tuple already registered; returning existing record");
        self.find_upload(
            &record.tenant_id,
            record.platform,
            record.file_role,
            &record.content_hash,
        )
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("upload {}", record.content_hash)))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, upload_id = %upload_id), err)]
    async fn get_upload(
        &self,
        tenant_id: &TenantId,
        upload_id: UploadId,
    ) -> Result<Option<UploadRecord>, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, platform, file_role, content_hash, original_filename,
                   storage_key, byte_size, uploaded_at
            FROM settlement_uploads
            WHERE id = $1
            "#,
        )
        .bind(upload_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_upload", e))?;

        match row.as_ref().map(upload_from_row).transpose()? {
            Some(u) if &u.tenant_id == tenant_id => Ok(Some(u)),
            Some(_) => Err(CatalogError::TenantIsolation),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, period = %period), err)]
    async fn active_dataset(
        &self,
        tenant_id: &TenantId,
        period: &Period,
    ) -> Result<Option<DatasetRecord>, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, platform, year, month, id, status, metadata,
                   created_at, updated_at, cleared_at
            FROM settlement_datasets
            WHERE tenant_id = $1 AND platform = $2 AND year = $3 AND month = $4
              AND status = 'active'
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(period.platform().as_str())
        .bind(period.year())
        .bind(period.month() as i32)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_dataset", e))?;

        row.as_ref().map(dataset_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn active_periods(&self, tenant_id: &TenantId) -> Result<Vec<Period>, CatalogError> {
        let rows = sqlx::query(
            r#"
            SELECT platform, year, month
            FROM settlement_datasets
            WHERE tenant_id = $1 AND status = 'active'
            "#,
        )
        .bind(tenant_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_periods", e))?;

        let mut periods = rows
            .iter()
            .map(|row| {
                let platform: String = row.try_get("platform").map_err(|e| map_sqlx_error("active_periods", e))?;
                let year: i32 = row.try_get("year").map_err(|e| map_sqlx_error("active_periods", e))?;
                let month: i32 = row.try_get("month").map_err(|e| map_sqlx_error("active_periods", e))?;
                let platform: Platform = platform.parse().map_err(|e| corrupt("platform", e))?;
                let month = u32::try_from(month).map_err(|e| corrupt("month", e))?;
                Period::new(platform, year, month).map_err(|e| corrupt("period", e))
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        periods.sort_by_key(|p| (p.platform(), p.year(), p.month()));
        Ok(periods)
    }

    #[instrument(
        skip(self, job),
        fields(job_id = %job.id, tenant_id = %job.tenant_id, dataset_id = %job.dataset_id),
        err
    )]
    async fn admit_job(&self, job: JobRecord) -> Result<Admission, CatalogError> {
        let now = Utc::now();
        let metadata = DatasetMetadata::for_job(&job);
        let mut tx = self.begin().await?;

        // Insert, or reactivate a cleared row. An active row makes the
        // conditional update a no-op and RETURNING yields nothing.
        let claimed = sqlx::query(
            r#"
            INSERT INTO settlement_datasets (
                tenant_id, platform, year, month, id, status, metadata,
                created_at, updated_at, cleared_at
            )
            VALUES ($1, $2, $3, $4, $5, 'active', $6, $7, $7, NULL)
            ON CONFLICT (tenant_id, platform, year, month) DO UPDATE
            SET status = 'active',
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at,
                cleared_at = NULL
            WHERE settlement_datasets.status <> 'active'
            RETURNING created_at
            "#,
        )
        .bind(job.tenant_id.as_str())
        .bind(job.period.platform().as_str())
        .bind(job.period.year())
        .bind(job.period.month() as i32)
        .bind(job.dataset_id.as_str())
        .bind(Json(&metadata))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_dataset_id_collision(&e) {
                CatalogError::IdCollision {
                    dataset_id: job.dataset_id.clone(),
                }
            } else {
                map_sqlx_error("claim_dataset", e)
            }
        })?;

        let Some(claimed) = claimed else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return match self.active_dataset(&job.tenant_id, &job.period).await? {
                Some(existing) => Ok(Admission::Existing(existing)),
                // Cleared between our claim and this read; the caller may retry.
                None => Err(CatalogError::Unavailable(format!(
                    "period {} changed concurrently",
                    job.period
                ))),
            };
        };
        let created_at: DateTime<Utc> = claimed
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("claim_dataset", e))?;

        sqlx::query(
            r#"
            INSERT INTO settlement_jobs (id, tenant_id, dataset_id, status, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.tenant_id.as_str())
        .bind(job.dataset_id.as_str())
        .bind(job.status())
        .bind(Json(&job))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        Self::commit(tx).await?;

        Ok(Admission::Admitted(DatasetRecord {
            id: job.dataset_id.clone(),
            tenant_id: job.tenant_id.clone(),
            period: job.period.clone(),
            status: DatasetStatus::Active,
            metadata,
            created_at,
            updated_at: now,
            cleared_at: None,
        }))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    async fn get_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<Option<JobRecord>, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, record
            FROM settlement_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_job", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let owner: String = row.try_get("tenant_id").map_err(|e| map_sqlx_error("get_job", e))?;
        if owner != tenant_id.as_str() {
            return Err(CatalogError::TenantIsolation);
        }
        let Json(job): Json<JobRecord> =
            row.try_get("record").map_err(|e| map_sqlx_error("get_job", e))?;
        Ok(Some(job))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_jobs(
        &self,
        tenant_id: &TenantId,
        limit: usize,
    ) -> Result<Vec<JobRecord>, CatalogError> {
        let rows = sqlx::query(
            r#"
            SELECT record
            FROM settlement_jobs
            WHERE tenant_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Json<JobRecord>, _>("record")
                    .map(|Json(job)| job)
                    .map_err(|e| map_sqlx_error("list_jobs", e))
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    async fn mark_job_running(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
    ) -> Result<JobRecord, CatalogError> {
        let mut tx = self.begin().await?;
        let mut job = Self::lock_job(&mut tx, tenant_id, job_id).await?;
        job.start(Utc::now())?;
        Self::save_job(&mut tx, &job).await?;
        Self::commit(tx).await?;
        Ok(job)
    }

    #[instrument(skip(self, message), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    async fn update_job_progress(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), CatalogError> {
        let mut tx = self.begin().await?;
        let mut job = Self::lock_job(&mut tx, tenant_id, job_id).await?;
        job.report_progress(progress, message, Utc::now())?;
        Self::save_job(&mut tx, &job).await?;
        Self::commit(tx).await
    }

    #[instrument(skip(self, outcome), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    async fn complete_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        outcome: JobOutcome,
    ) -> Result<CompletionEffect, CatalogError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let mut job = Self::lock_job(&mut tx, tenant_id, job_id).await?;
        job.complete(outcome.clone(), now)?;
        Self::save_job(&mut tx, &job).await?;

        let row = sqlx::query(
            r#"
            SELECT tenant_id, platform, year, month, id, status, metadata,
                   created_at, updated_at, cleared_at
            FROM settlement_datasets
            WHERE tenant_id = $1 AND platform = $2 AND year = $3 AND month = $4
            FOR UPDATE
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(job.period.platform().as_str())
        .bind(job.period.year())
        .bind(job.period.month() as i32)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_dataset", e))?;

        let mut effect = CompletionEffect::Orphaned;
        if let Some(row) = row {
            let mut dataset = dataset_from_row(&row)?;
            if dataset.record_completion(job_id, job.mode, &outcome, now) {
                sqlx::query(
                    r#"
                    UPDATE settlement_datasets
                    SET metadata = $5, updated_at = $6
                    WHERE tenant_id = $1 AND platform = $2 AND year = $3 AND month = $4
                    "#,
                )
                .bind(tenant_id.as_str())
                .bind(job.period.platform().as_str())
                .bind(job.period.year())
                .bind(job.period.month() as i32)
                .bind(Json(&dataset.metadata))
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_dataset", e))?;
                effect = CompletionEffect::DatasetUpdated(dataset);
            }
        }

        Self::commit(tx).await?;
        Ok(effect)
    }

    #[instrument(skip(self, error, warnings), fields(tenant_id = %tenant_id, job_id = %job_id), err)]
    async fn fail_job(
        &self,
        tenant_id: &TenantId,
        job_id: JobId,
        error: String,
        warnings: Vec<String>,
    ) -> Result<(), CatalogError> {
        let mut tx = self.begin().await?;
        let mut job = Self::lock_job(&mut tx, tenant_id, job_id).await?;
        job.fail(error, warnings, Utc::now())?;
        Self::save_job(&mut tx, &job).await?;
        Self::commit(tx).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, period = %period), err)]
    async fn clear_period(
        &self,
        tenant_id: &TenantId,
        period: &Period,
    ) -> Result<Vec<DatasetRecord>, CatalogError> {
        let rows = sqlx::query(
            r#"
            UPDATE settlement_datasets
            SET status = 'cleared', cleared_at = $5, updated_at = $5
            WHERE tenant_id = $1 AND platform = $2 AND year = $3 AND month = $4
              AND status = 'active'
            RETURNING tenant_id, platform, year, month, id, status, metadata,
                      created_at, updated_at, cleared_at
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(period.platform().as_str())
        .bind(period.year())
        .bind(period.month() as i32)
        .bind(Utc::now())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("clear_period", e))?;

        rows.iter().map(dataset_from_row).collect()
    }
}

fn corrupt(field: &str, err: impl std::fmt::Display) -> CatalogError {
    CatalogError::Corrupt(format!("{field}: {err}"))
}

fn upload_from_row(row: &PgRow) -> Result<UploadRecord, CatalogError> {
    let get_text = |col: &str| -> Result<String, CatalogError> {
        row.try_get::<String, _>(col).map_err(|e| map_sqlx_error("upload_row", e))
    };
    let id: uuid::Uuid = row.try_get("id").map_err(|e| map_sqlx_error("upload_row", e))?;
    let byte_size: i64 = row.try_get("byte_size").map_err(|e| map_sqlx_error("upload_row", e))?;

    Ok(UploadRecord {
        id: UploadId::from_uuid(id),
        tenant_id: TenantId::parse(get_text("tenant_id")?).map_err(|e| corrupt("tenant_id", e))?,
        platform: get_text("platform")?.parse().map_err(|e| corrupt("platform", e))?,
        file_role: get_text("file_role")?.parse().map_err(|e| corrupt("file_role", e))?,
        content_hash: get_text("content_hash")?,
        original_filename: get_text("original_filename")?,
        storage_key: get_text("storage_key")?,
        byte_size: u64::try_from(byte_size).map_err(|e| corrupt("byte_size", e))?,
        uploaded_at: row.try_get("uploaded_at").map_err(|e| map_sqlx_error("upload_row", e))?,
    })
}

fn dataset_from_row(row: &PgRow) -> Result<DatasetRecord, CatalogError> {
    let get_text = |col: &str| -> Result<String, CatalogError> {
        row.try_get::<String, _>(col).map_err(|e| map_sqlx_error("dataset_row", e))
    };
    let year: i32 = row.try_get("year").map_err(|e| map_sqlx_error("dataset_row", e))?;
    let month: i32 = row.try_get("month").map_err(|e| map_sqlx_error("dataset_row", e))?;
    let platform: Platform = get_text("platform")?.parse().map_err(|e| corrupt("platform", e))?;
    let month = u32::try_from(month).map_err(|e| corrupt("month", e))?;
    let Json(metadata): Json<DatasetMetadata> =
        row.try_get("metadata").map_err(|e| map_sqlx_error("dataset_row", e))?;

    Ok(DatasetRecord {
        id: get_text("id")?
            .parse::<DatasetId>()
            .map_err(|e| corrupt("id", e))?,
        tenant_id: TenantId::parse(get_text("tenant_id")?).map_err(|e| corrupt("tenant_id", e))?,
        period: Period::new(platform, year, month).map_err(|e| corrupt("period", e))?,
        status: get_text("status")?.parse()?,
        metadata,
        created_at: row.try_get("created_at").map_err(|e| map_sqlx_error("dataset_row", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| map_sqlx_error("dataset_row", e))?,
        cleared_at: row.try_get("cleared_at").map_err(|e| map_sqlx_error("dataset_row", e))?,
    })
}

fn is_dataset_id_collision(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                && db_err.constraint() == Some(DATASET_ID_CONSTRAINT)
        }
        _ => false,
    }
}

/// Map SQLx errors to [`CatalogError`] (see the module table).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CatalogError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => CatalogError::AlreadyExists(msg),
                _ => CatalogError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            CatalogError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        other => CatalogError::Unavailable(format!("{} failed: {}", operation, other)),
    }
}
