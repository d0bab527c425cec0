//! `settlekit-core` — domain primitives for settlement ingestion.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! tenants, platforms, periods and the identifiers derived from them.

pub mod error;
pub mod id;
pub mod period;

pub use error::{DomainError, DomainResult};
pub use id::{DatasetId, JobId, TenantId, UploadId};
pub use period::{FileRole, Period, Platform, ProcessMode};
