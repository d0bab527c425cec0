use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use super::{JobQueue, QueueError, ReservedJob};
use crate::payload::JobPayload;

/// A failed message kept for inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: String,
    pub payload: JobPayload,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<(String, JobPayload, u32)>,
    in_flight: HashMap<String, (JobPayload, u32)>,
    dead_letters: Vec<DeadLetter>,
}

/// Process-local queue for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    next_id: AtomicU64,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead_letters.clone()
    }

    /// Payloads waiting to be reserved, in delivery order.
    pub fn pending(&self) -> Vec<JobPayload> {
        self.lock().ready.iter().map(|(_, p, _)| p.clone()).collect()
    }

    /// Put every reserved-but-unacknowledged message back at the front,
    /// as a broker would after its visibility timeout.
    pub fn redeliver_unacked(&self) -> usize {
        let mut state = self.lock();
        let mut ids: Vec<String> = state.in_flight.keys().cloned().collect();
        ids.sort();
        for id in ids.iter().rev() {
            if let Some((payload, deliveries)) = state.in_flight.remove(id) {
                state.ready.push_front((id.clone(), payload, deliveries));
            }
        }
        drop(state);
        for _ in &ids {
            self.notify.notify_one();
        }
        ids.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_take(&self) -> Option<ReservedJob> {
        let mut state = self.lock();
        let (message_id, payload, deliveries) = state.ready.pop_front()?;
        let deliveries = deliveries + 1;
        state
            .in_flight
            .insert(message_id.clone(), (payload.clone(), deliveries));
        Some(ReservedJob {
            message_id,
            payload,
            deliveries,
        })
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, payload: &JobPayload) -> Result<String, QueueError> {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let message_id = format!("mem-{seq:010}");
        self.lock()
            .ready
            .push_back((message_id.clone(), payload.clone(), 0));
        self.notify.notify_one();
        Ok(message_id)
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_take() {
                return Ok(Some(job));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.try_take());
            }
        }
    }

    async fn ack(&self, message_id: &str) -> Result<(), QueueError> {
        self.lock()
            .in_flight
            .remove(message_id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownMessage(message_id.to_string()))
    }

    async fn fail(&self, message_id: &str, error: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let (payload, _) = state
            .in_flight
            .remove(message_id)
            .ok_or_else(|| QueueError::UnknownMessage(message_id.to_string()))?;
        warn!(message_id, job_id = %payload.job_id, error, "message dead-lettered");
        state.dead_letters.push(DeadLetter {
            message_id: message_id.to_string(),
            payload,
            error: error.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let state = self.lock();
        Ok(state.ready.len() + state.in_flight.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::{InputUploadRefs, JobRecord, UploadRecord};
    use settlekit_core::{FileRole, Period, Platform, ProcessMode, TenantId, UploadId};

    fn payload() -> JobPayload {
        let tenant = TenantId::parse("t1").unwrap();
        let upload = UploadRecord {
            id: UploadId::new(),
            tenant_id: tenant.clone(),
            platform: Platform::Xiaohongshu,
            file_role: FileRole::Settlement,
            content_hash: "00".repeat(32),
            original_filename: "s.xlsx".into(),
            storage_key: "raw/s.xlsx".into(),
            byte_size: 1,
            uploaded_at: Utc::now(),
        };
        let job = JobRecord::queued(
            tenant,
            Period::new(Platform::Xiaohongshu, 2025, 1).unwrap(),
            ProcessMode::Merge,
            InputUploadRefs {
                settlement_upload_id: upload.id,
                orders_upload_id: None,
            },
            std::slice::from_ref(&upload),
            "req-q",
            Utc::now(),
        );
        JobPayload::from_job(&job)
    }

    #[tokio::test]
    async fn fifo_reserve_ack() {
        let queue = InMemoryJobQueue::new();
        let first = payload();
        let second = payload();
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        let got = queue.reserve(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(got.payload, first);
        assert_eq!(got.deliveries, 1);
        queue.ack(&got.message_id).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);

        assert!(matches!(
            queue.ack(&got.message_id).await,
            Err(QueueError::UnknownMessage(_))
        ));
    }

    #[tokio::test]
    async fn reserve_times_out_when_empty() {
        let queue = InMemoryJobQueue::new();
        let got = queue.reserve(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn waiting_consumer_is_woken_by_enqueue() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.reserve(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let p = payload();
        queue.enqueue(&p).await.unwrap();

        let got = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(got.payload, p);
    }

    #[tokio::test]
    async fn unacked_messages_are_redelivered() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(&payload()).await.unwrap();
        let first = queue.reserve(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(queue.redeliver_unacked(), 1);
        let again = queue.reserve(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.message_id, first.message_id);
        assert_eq!(again.deliveries, 2);
    }

    #[tokio::test]
    async fn failed_messages_are_dead_lettered() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(&payload()).await.unwrap();
        let got = queue.reserve(Duration::from_millis(10)).await.unwrap().unwrap();
        queue.fail(&got.message_id, "boom").await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 0);
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error, "boom");
    }
}
