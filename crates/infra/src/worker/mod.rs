//! Worker side of the job contract.
//!
//! ## Design
//!
//! - A worker depends only on the queue payload and the job record.
//! - Business rules live behind [`SettlementTransform`]; the runner owns
//!   everything around them: lifecycle transitions, blob reads, partition
//!   writes and dataset bookkeeping.
//! - Redelivered messages for finished jobs are acknowledged and skipped.
//!
//! ## Components
//!
//! - `JobRunner`: runs one payload to completion or failure
//! - `WorkerRuntime`: background loop reserving messages from a `JobQueue`

use settlekit_core::JobId;

use crate::blob::BlobError;
use crate::catalog::CatalogError;
use crate::partitions::PartitionWriteError;
use crate::queue::QueueError;

mod runner;
mod runtime;
mod transform;

pub use runner::{JobRunner, LOOKUP_ATTEMPTS, RunOutcome};
pub use runtime::{WorkerConfig, WorkerHandle, WorkerRuntime, WorkerStats};
pub use transform::{
    SettlementTransform, TransformError, TransformInput, TransformOutput, UnconfiguredTransform,
};

/// Worker error.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("job {0} not found")]
    JobMissing(JobId),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to read input file: {0}")]
    Blob(#[from] BlobError),
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("failed to write partitions: {0}")]
    Partition(#[from] PartitionWriteError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("worker task failed: {0}")]
    Join(String),
}

impl WorkerError {
    /// Poison messages that no amount of redelivery will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, WorkerError::JobMissing(_) | WorkerError::InvalidPayload(_))
    }
}

#[cfg(test)]
mod tests;
