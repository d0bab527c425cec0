//! Redis Streams-backed job queue (durable, at-least-once delivery).
//!
//! - **Stream**: `settlekit:jobs`, one entry per published payload
//! - **Consumer group**: `settlekit.workers`, so each entry reaches one worker
//! - **Redelivery**: entries idle longer than the claim timeout are claimed
//!   by the next `reserve`
//! - **Dead-letter stream**: `settlekit:jobs:dlq`, failed entries with the error
//!
//! Acknowledged entries are deleted from the stream, so `XLEN` is the number
//! of outstanding messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, warn};

use super::{JobQueue, QueueError, ReservedJob};
use crate::payload::JobPayload;

const DEFAULT_STREAM_KEY: &str = "settlekit:jobs";
const DEFAULT_DLQ_KEY: &str = "settlekit:jobs:dlq";
const DEFAULT_GROUP: &str = "settlekit.workers";
const DEFAULT_CLAIM_IDLE_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct RedisStreamsJobQueue {
    client: Arc<redis::Client>,
    stream_key: String,
    dlq_key: String,
    group: String,
    consumer: String,
    claim_idle_ms: u64,
}

struct StreamEntry {
    id: String,
    fields: Vec<(String, String)>,
}

impl StreamEntry {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl RedisStreamsJobQueue {
    /// Connect and make sure the consumer group exists.
    pub fn new(redis_url: impl AsRef<str>, consumer: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let queue = Self {
            client: Arc::new(client),
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            dlq_key: DEFAULT_DLQ_KEY.to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer: consumer.into(),
            claim_idle_ms: DEFAULT_CLAIM_IDLE_MS,
        };
        queue.ensure_group()?;
        Ok(queue)
    }

    pub fn with_stream_key(mut self, stream_key: impl Into<String>) -> Self {
        self.stream_key = stream_key.into();
        self.dlq_key = format!("{}:dlq", self.stream_key);
        self
    }

    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle_ms = idle.as_millis() as u64;
        self
    }

    fn connection(&self) -> Result<redis::Connection, QueueError> {
        self.client
            .get_connection()
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }

    fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        // BUSYGROUP means it already exists.
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);
        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Unavailable(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T, QueueError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| QueueError::Unavailable(format!("redis task failed: {e}")))?
    }

    #[instrument(skip(self, payload), fields(stream_key = %self.stream_key, job_id = %payload.job_id), err)]
    fn enqueue_sync(&self, payload: &JobPayload) -> Result<String, QueueError> {
        let body =
            serde_json::to_string(payload).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let mut conn = self.connection()?;
        redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("job_id")
            .arg(payload.job_id.to_string())
            .arg("tenant_id")
            .arg(payload.tenant_id.as_str())
            .arg("payload")
            .arg(body)
            .query(&mut conn)
            .map_err(|e| QueueError::Unavailable(format!("XADD failed: {e}")))
    }

    fn reserve_sync(&self, block_ms: u64) -> Result<Option<ReservedJob>, QueueError> {
        let mut conn = self.connection()?;
        if let Some(job) = self.claim_stale(&mut conn)? {
            return Ok(Some(job));
        }

        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_ms.max(1))
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query(&mut conn)
            .map_err(|e| QueueError::Unavailable(format!("XREADGROUP failed: {e}")))?;

        // [[stream, [entry, ...]], ...] or nil on timeout.
        let Some(entry) = bulk(reply)
            .into_iter()
            .flat_map(|stream| bulk(stream).into_iter().nth(1).map(bulk).unwrap_or_default())
            .next()
        else {
            return Ok(None);
        };
        let entry = parse_entry(entry)?;
        self.to_reserved(entry, 1).map(Some)
    }

    /// Claim one entry another consumer left pending for too long.
    fn claim_stale(&self, conn: &mut redis::Connection) -> Result<Option<ReservedJob>, QueueError> {
        // [[id, consumer, idle_ms, deliveries], ...]
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.claim_idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query(conn)
            .map_err(|e| QueueError::Unavailable(format!("XPENDING failed: {e}")))?;
        let Some((id, _, _, deliveries)) = pending.into_iter().next() else {
            return Ok(None);
        };

        let claimed: redis::Value = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.claim_idle_ms)
            .arg(&id)
            .query(conn)
            .map_err(|e| QueueError::Unavailable(format!("XCLAIM failed: {e}")))?;
        match bulk(claimed).into_iter().next() {
            Some(entry) => {
                let entry = parse_entry(entry)?;
                let deliveries = u32::try_from(deliveries).unwrap_or(u32::MAX).saturating_add(1);
                self.to_reserved(entry, deliveries).map(Some)
            }
            // Claimed concurrently by someone else or deleted meanwhile.
            None => Ok(None),
        }
    }

    fn to_reserved(&self, entry: StreamEntry, deliveries: u32) -> Result<ReservedJob, QueueError> {
        let body = entry
            .field("payload")
            .ok_or_else(|| QueueError::Serialization(format!("entry {} has no payload", entry.id)))?;
        let payload: JobPayload =
            serde_json::from_str(body).map_err(|e| QueueError::Serialization(e.to_string()))?;
        Ok(ReservedJob {
            message_id: entry.id,
            payload,
            deliveries,
        })
    }

    fn ack_sync(&self, message_id: &str) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        let acked: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(message_id)
            .query(&mut conn)
            .map_err(|e| QueueError::Unavailable(format!("XACK failed: {e}")))?;
        if acked == 0 {
            return Err(QueueError::UnknownMessage(message_id.to_string()));
        }
        let _: u64 = redis::cmd("XDEL")
            .arg(&self.stream_key)
            .arg(message_id)
            .query(&mut conn)
            .map_err(|e| QueueError::Unavailable(format!("XDEL failed: {e}")))?;
        Ok(())
    }

    fn fail_sync(&self, message_id: &str, error: &str) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        let range: redis::Value = redis::cmd("XRANGE")
            .arg(&self.stream_key)
            .arg(message_id)
            .arg(message_id)
            .query(&mut conn)
            .map_err(|e| QueueError::Unavailable(format!("XRANGE failed: {e}")))?;
        let payload = bulk(range)
            .into_iter()
            .next()
            .map(parse_entry)
            .transpose()?
            .and_then(|entry| entry.field("payload").map(str::to_string))
            .ok_or_else(|| QueueError::UnknownMessage(message_id.to_string()))?;

        let _: String = redis::cmd("XADD")
            .arg(&self.dlq_key)
            .arg("*")
            .arg("original_message_id")
            .arg(message_id)
            .arg("error")
            .arg(error)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("payload")
            .arg(payload)
            .query(&mut conn)
            .map_err(|e| QueueError::Unavailable(format!("DLQ XADD failed: {e}")))?;
        warn!(message_id, error, "message sent to dead-letter stream");

        self.ack_sync(message_id)
    }

    fn len_sync(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection()?;
        redis::cmd("XLEN")
            .arg(&self.stream_key)
            .query(&mut conn)
            .map_err(|e| QueueError::Unavailable(format!("XLEN failed: {e}")))
    }
}

fn bulk(value: redis::Value) -> Vec<redis::Value> {
    match value {
        redis::Value::Bulk(items) => items,
        _ => Vec::new(),
    }
}

fn text(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(data) => Some(String::from_utf8_lossy(data).into_owned()),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// `[id, [field, value, ...]]`
fn parse_entry(entry: redis::Value) -> Result<StreamEntry, QueueError> {
    let mut parts = bulk(entry).into_iter();
    let id = parts
        .next()
        .as_ref()
        .and_then(text)
        .ok_or_else(|| QueueError::Serialization("stream entry without id".to_string()))?;
    let raw = parts.next().map(bulk).unwrap_or_default();
    let fields = raw
        .chunks(2)
        .filter_map(|pair| match pair {
            [k, v] => Some((text(k)?, text(v)?)),
            _ => None,
        })
        .collect();
    Ok(StreamEntry { id, fields })
}

#[async_trait]
impl JobQueue for RedisStreamsJobQueue {
    async fn enqueue(&self, payload: &JobPayload) -> Result<String, QueueError> {
        let payload = payload.clone();
        self.blocking(move |q| q.enqueue_sync(&payload)).await
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
        let block_ms = timeout.as_millis() as u64;
        self.blocking(move |q| q.reserve_sync(block_ms)).await
    }

    async fn ack(&self, message_id: &str) -> Result<(), QueueError> {
        let id = message_id.to_string();
        self.blocking(move |q| q.ack_sync(&id)).await
    }

    async fn fail(&self, message_id: &str, error: &str) -> Result<(), QueueError> {
        let id = message_id.to_string();
        let error = error.to_string();
        self.blocking(move |q| q.fail_sync(&id, &error)).await
    }

    async fn len(&self) -> Result<usize, QueueError> {
        self.blocking(|q| q.len_sync()).await
    }
}
