//! Job queue seam between the orchestrator and workers.
//!
//! ## Design
//!
//! - At-least-once: a reserved message stays outstanding until it is
//!   acknowledged or failed. Workers tolerate redelivery by skipping jobs whose
//!   record is already terminal.
//! - `fail` is terminal for the message. Retrying is a caller decision
//!   (`JobOrchestrator::requeue`), not a queue policy.
//! - Payloads are JSON (`JobPayload`), so any backend that stores strings works.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::payload::JobPayload;

mod in_memory;
#[cfg(feature = "redis")]
mod redis_streams;

pub use in_memory::{DeadLetter, InMemoryJobQueue};
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsJobQueue;

/// Queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("queue serialization error: {0}")]
    Serialization(String),
    #[error("unknown message id: {0}")]
    UnknownMessage(String),
}

/// A message handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedJob {
    pub message_id: String,
    pub payload: JobPayload,
    /// How many times this message has been handed out, this time included.
    pub deliveries: u32,
}

/// Durable-enough FIFO of job payloads.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a payload; returns the backend message id.
    async fn enqueue(&self, payload: &JobPayload) -> Result<String, QueueError>;

    /// Wait up to `timeout` for the next message.
    async fn reserve(&self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError>;

    /// The message was handled; forget it.
    async fn ack(&self, message_id: &str) -> Result<(), QueueError>;

    /// The message could not be handled; move it aside with `error`.
    async fn fail(&self, message_id: &str, error: &str) -> Result<(), QueueError>;

    /// Messages neither acknowledged nor failed yet.
    async fn len(&self) -> Result<usize, QueueError>;
}

#[async_trait]
impl<T: JobQueue + ?Sized> JobQueue for Arc<T> {
    async fn enqueue(&self, payload: &JobPayload) -> Result<String, QueueError> {
        (**self).enqueue(payload).await
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
        (**self).reserve(timeout).await
    }

    async fn ack(&self, message_id: &str) -> Result<(), QueueError> {
        (**self).ack(message_id).await
    }

    async fn fail(&self, message_id: &str, error: &str) -> Result<(), QueueError> {
        (**self).fail(message_id, error).await
    }

    async fn len(&self) -> Result<usize, QueueError> {
        (**self).len().await
    }
}
