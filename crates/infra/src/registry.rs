//! Content registry: content-addressed upload deduplication.
//!
//! An upload is identified by (tenant, platform, file role, SHA-256 of the
//! bytes). Registering the same tuple again returns the stored record and
//! writes nothing.
//!
//! ## Concurrency
//!
//! Registration runs under a per-tuple async lock, and the catalog insert is
//! insert-if-absent. The lock keeps concurrent callers in one process from
//! writing the blob twice; the store constraint covers other processes.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use settlekit_core::{FileRole, Platform, TenantId, UploadId};

use crate::blob::{BlobError, BlobStore};
use crate::catalog::{CatalogError, CatalogStore, UploadRecord};
use crate::locks::KeyedLocks;

/// Default upload size limit (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

const MAX_FILENAME_LEN: usize = 200;
const FALLBACK_FILENAME: &str = "upload.bin";

/// Registry error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid upload: {0}")]
    InvalidParams(String),
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("failed to store upload content: {0}")]
    StorageWrite(#[source] BlobError),
    #[error("upload not found: {0}")]
    NotFound(UploadId),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Result of [`ContentRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub record: UploadRecord,
    /// `true` when an identical upload was already registered.
    pub reused: bool,
}

type UploadKey = (TenantId, Platform, FileRole, String);

pub struct ContentRegistry<C, B> {
    catalog: C,
    blobs: B,
    locks: KeyedLocks<UploadKey>,
    max_upload_bytes: u64,
}

impl<C: CatalogStore, B: BlobStore> ContentRegistry<C, B> {
    pub fn new(catalog: C, blobs: B) -> Self {
        Self {
            catalog,
            blobs,
            locks: KeyedLocks::new(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Register raw file content, reusing an identical earlier upload.
    #[instrument(
        skip(self, content, original_filename),
        fields(tenant_id = %tenant_id, platform = %platform, file_role = %file_role, size = content.len()),
        err
    )]
    pub async fn register(
        &self,
        tenant_id: &TenantId,
        platform: Platform,
        file_role: FileRole,
        content: Bytes,
        original_filename: &str,
    ) -> Result<Registration, RegistryError> {
        let size = content.len() as u64;
        if size == 0 {
            return Err(RegistryError::InvalidParams("file is empty".to_string()));
        }
        if size > self.max_upload_bytes {
            return Err(RegistryError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let content_hash = content_hash(&content);
        let _guard = self
            .locks
            .lock((tenant_id.clone(), platform, file_role, content_hash.clone()))
            .await;

        if let Some(existing) = self
            .catalog
            .find_upload(tenant_id, platform, file_role, &content_hash)
            .await?
        {
            debug!(upload_id = %existing.id, "identical upload already registered");
            return Ok(Registration {
                record: existing,
                reused: true,
            });
        }

        let uploaded_at = Utc::now();
        let key = storage_key(
            tenant_id,
            platform,
            file_role,
            uploaded_at,
            &sanitize_filename(original_filename),
        );
        self.blobs
            .put(&key, content)
            .await
            .map_err(RegistryError::StorageWrite)?;

        let record = UploadRecord {
            id: UploadId::new(),
            tenant_id: tenant_id.clone(),
            platform,
            file_role,
            content_hash,
            original_filename: original_filename.chars().take(MAX_FILENAME_LEN).collect(),
            storage_key: key,
            byte_size: size,
            uploaded_at,
        };
        let candidate = record.id;
        let stored = self.catalog.insert_upload(record).await?;
        // Another process may have won the insert; its record is authoritative.
        let reused = stored.id != candidate;
        info!(upload_id = %stored.id, storage_key = %stored.storage_key, reused, "upload registered");
        Ok(Registration {
            record: stored,
            reused,
        })
    }

    /// Tenant-scoped read of an upload record.
    pub async fn lookup(
        &self,
        tenant_id: &TenantId,
        upload_id: UploadId,
    ) -> Result<UploadRecord, RegistryError> {
        match self.catalog.get_upload(tenant_id, upload_id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) | Err(CatalogError::TenantIsolation) => Err(RegistryError::NotFound(upload_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the record's content is still present in blob storage.
    pub async fn storage_key_resolves(&self, record: &UploadRecord) -> Result<bool, RegistryError> {
        if record.storage_key.is_empty() {
            return Ok(false);
        }
        match self.blobs.exists(&record.storage_key).await {
            Ok(found) => Ok(found),
            Err(BlobError::InvalidKey(_)) => Ok(false),
            Err(e) => Err(RegistryError::StorageWrite(e)),
        }
    }
}

/// Lowercase hex SHA-256.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn storage_key(
    tenant_id: &TenantId,
    platform: Platform,
    file_role: FileRole,
    uploaded_at: DateTime<Utc>,
    filename: &str,
) -> String {
    format!(
        "raw/tenant_id={}/platform={}/file_role={}/uploaded_at={}/{}",
        tenant_id,
        platform,
        file_role,
        uploaded_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        filename
    )
}

/// Base name of a client-supplied filename, safe to use as a key segment.
fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::blob::InMemoryBlobStore;
    use crate::catalog::InMemoryCatalogStore;

    fn tenant(raw: &str) -> TenantId {
        TenantId::parse(raw).unwrap()
    }

    fn registry() -> (
        Arc<InMemoryBlobStore>,
        ContentRegistry<Arc<InMemoryCatalogStore>, Arc<InMemoryBlobStore>>,
    ) {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let registry = ContentRegistry::new(Arc::new(InMemoryCatalogStore::new()), blobs.clone());
        (blobs, registry)
    }

    #[tokio::test]
    async fn identical_content_is_stored_once() {
        let (blobs, registry) = registry();
        let t = tenant("t1");
        let bytes = Bytes::from_static(b"settlement-bytes");

        let first = registry
            .register(&t, Platform::Douyin, FileRole::Settlement, bytes.clone(), "june.xlsx")
            .await
            .unwrap();
        let second = registry
            .register(&t, Platform::Douyin, FileRole::Settlement, bytes.clone(), "renamed.xlsx")
            .await
            .unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.record, second.record);
        assert_eq!(blobs.write_count(), 1);
        assert!(first.record.storage_key.starts_with(
            "raw/tenant_id=t1/platform=douyin/file_role=settlement/uploaded_at="
        ));
        assert!(first.record.storage_key.ends_with("/june.xlsx"));
        assert_eq!(first.record.content_hash, content_hash(b"settlement-bytes"));
    }

    #[tokio::test]
    async fn record_keeps_client_filename_while_key_is_sanitized() {
        let (_blobs, registry) = registry();
        let t = tenant("t1");
        let reg = registry
            .register(&t, Platform::Douyin, FileRole::Orders, Bytes::from_static(b"o"), "exports/六月 结算.xlsx")
            .await
            .unwrap();
        assert_eq!(reg.record.original_filename, "exports/六月 结算.xlsx");
        assert!(reg.record.storage_key.ends_with("/六月_结算.xlsx"));

        let long = "x".repeat(MAX_FILENAME_LEN + 50);
        let reg = registry
            .register(&t, Platform::Douyin, FileRole::Orders, Bytes::from_static(b"o2"), &long)
            .await
            .unwrap();
        assert_eq!(reg.record.original_filename.chars().count(), MAX_FILENAME_LEN);
    }

    #[tokio::test]
    async fn dedup_key_includes_role_platform_and_tenant() {
        let (blobs, registry) = registry();
        let bytes = Bytes::from_static(b"same");
        let a = registry
            .register(&tenant("t1"), Platform::Douyin, FileRole::Settlement, bytes.clone(), "a")
            .await
            .unwrap();
        let b = registry
            .register(&tenant("t1"), Platform::Douyin, FileRole::Orders, bytes.clone(), "a")
            .await
            .unwrap();
        let c = registry
            .register(&tenant("t1"), Platform::Xiaohongshu, FileRole::Settlement, bytes.clone(), "a")
            .await
            .unwrap();
        let d = registry
            .register(&tenant("t2"), Platform::Douyin, FileRole::Settlement, bytes, "a")
            .await
            .unwrap();

        let ids = [a.record.id, b.record.id, c.record.id, d.record.id];
        assert!([a.reused, b.reused, c.reused, d.reused].iter().all(|r| !r));
        assert_eq!(ids.iter().collect::<std::collections::HashSet<_>>().len(), 4);
        assert_eq!(blobs.write_count(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_write_once() {
        let (blobs, registry) = registry();
        let registry = Arc::new(registry);
        let t = tenant("t1");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let t = t.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register(&t, Platform::Douyin, FileRole::Settlement, Bytes::from_static(b"race"), "r.xlsx")
                    .await
                    .unwrap()
            }));
        }

        let mut ids = std::collections::HashSet::new();
        let mut fresh = 0;
        for h in handles {
            let reg = h.await.unwrap();
            ids.insert(reg.record.id);
            if !reg.reused {
                fresh += 1;
            }
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(fresh, 1);
        assert_eq!(blobs.write_count(), 1);
    }

    #[tokio::test]
    async fn empty_and_oversized_uploads_are_rejected() {
        let (blobs, registry) = registry();
        let registry = registry.with_max_upload_bytes(4);
        let t = tenant("t1");

        assert!(matches!(
            registry.register(&t, Platform::Douyin, FileRole::Settlement, Bytes::new(), "e").await,
            Err(RegistryError::InvalidParams(_))
        ));
        assert!(matches!(
            registry
                .register(&t, Platform::Douyin, FileRole::Settlement, Bytes::from_static(b"12345"), "big")
                .await,
            Err(RegistryError::TooLarge { size: 5, limit: 4 })
        ));
        assert_eq!(blobs.write_count(), 0);
    }

    struct FailingBlobStore;

    #[async_trait]
    impl BlobStore for FailingBlobStore {
        async fn put(&self, key: &str, _bytes: Bytes) -> Result<(), BlobError> {
            Err(BlobError::Io {
                key: key.to_string(),
                source: std::io::Error::other("disk full"),
            })
        }

        async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
            Err(BlobError::NotFound(key.to_string()))
        }

        async fn exists(&self, _key: &str) -> Result<bool, BlobError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn failed_blob_write_leaves_no_record() {
        let catalog = Arc::new(InMemoryCatalogStore::new());
        let registry = ContentRegistry::new(catalog.clone(), FailingBlobStore);
        let t = tenant("t1");
        let bytes = Bytes::from_static(b"lost");

        let err = registry
            .register(&t, Platform::Douyin, FileRole::Settlement, bytes, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::StorageWrite(_)));

        let found = catalog
            .find_upload(&t, Platform::Douyin, FileRole::Settlement, &content_hash(b"lost"))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn lookup_is_tenant_scoped() {
        let (_, registry) = registry();
        let reg = registry
            .register(&tenant("t1"), Platform::Douyin, FileRole::Settlement, Bytes::from_static(b"x"), "x")
            .await
            .unwrap();

        assert_eq!(registry.lookup(&tenant("t1"), reg.record.id).await.unwrap(), reg.record);
        assert!(registry.storage_key_resolves(&reg.record).await.unwrap());
        assert!(matches!(
            registry.lookup(&tenant("t2"), reg.record.id).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.lookup(&tenant("t1"), UploadId::new()).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn filenames_are_reduced_to_safe_base_names() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\exports\\六月 结算.xlsx"), "六月_结算.xlsx");
        assert_eq!(sanitize_filename("..hidden"), "hidden");
        assert_eq!(sanitize_filename(""), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("a/"), FALLBACK_FILENAME);
    }
}
