//! Blob storage seam for raw uploaded files.
//!
//! The registry only needs to put, get and probe blobs by key; where the
//! bytes physically live (local disk, object storage) is an adapter detail.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

mod in_memory;
mod local;

pub use in_memory::InMemoryBlobStore;
pub use local::LocalBlobStore;

/// Blob store error.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    #[error("blob io error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Minimal blob storage abstraction.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` under `key`, replacing any previous content.
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), BlobError>;

    /// Read the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Bytes, BlobError>;

    /// Whether a blob exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, BlobError>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), BlobError> {
        (**self).put(key, bytes).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        (**self).get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        (**self).exists(key).await
    }
}

/// Reject keys that could escape the store root.
pub(crate) fn validate_key(key: &str) -> Result<(), BlobError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_must_stay_relative() {
        assert!(validate_key("raw/tenant_id=t1/a.xlsx").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("raw/../secret").is_err());
        assert!(validate_key("raw//double").is_err());
        assert!(validate_key("raw\\win").is_err());
    }
}
