use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use settlekit_core::{FileRole, Platform, TenantId};

use super::*;
use crate::blob::InMemoryBlobStore;
use crate::catalog::{CatalogStore, InMemoryCatalogStore, JobState};
use crate::clearer::{ClearOutcome, PeriodClearer};
use crate::effective_view::{EffectiveViewResolver, PageRequest, ResolverConfig, RowFilters};
use crate::orchestrator::{JobOrchestrator, SubmitOutcome, SubmitRequest};
use crate::partitions::testing::{agg_row, fact_row};
use crate::partitions::{PartitionLayout, PartitionWriter};
use crate::payload::JobPayload;
use crate::queue::{InMemoryJobQueue, JobQueue};
use crate::registry::ContentRegistry;

type Catalog = Arc<InMemoryCatalogStore>;
type Blobs = Arc<InMemoryBlobStore>;

struct Harness {
    _dir: tempfile::TempDir,
    catalog: Catalog,
    queue: Arc<InMemoryJobQueue>,
    registry: ContentRegistry<Catalog, Blobs>,
    orchestrator: JobOrchestrator<Catalog, Arc<InMemoryJobQueue>>,
    resolver: EffectiveViewResolver,
    blobs: Blobs,
    layout: PartitionLayout,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(InMemoryCatalogStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let layout = PartitionLayout::new(dir.path());
    Harness {
        registry: ContentRegistry::new(catalog.clone(), blobs.clone()),
        orchestrator: JobOrchestrator::new(catalog.clone(), queue.clone()),
        resolver: EffectiveViewResolver::new(layout.clone(), ResolverConfig { min_partition_bytes: 64 }),
        catalog,
        queue,
        blobs,
        layout,
        _dir: dir,
    }
}

/// One fact row per `order,sku` line of the settlement file.
fn line_transform(input: &TransformInput) -> Result<TransformOutput, TransformError> {
    let raw = input
        .file(FileRole::Settlement)
        .ok_or_else(|| TransformError::new("settlement file missing"))?;
    let text = std::str::from_utf8(raw).map_err(|e| TransformError::new(e.to_string()))?;
    let facts: Vec<_> = text
        .lines()
        .filter_map(|line| line.split_once(','))
        .map(|(order, sku)| fact_row("ignored", order, sku))
        .collect();
    if facts.is_empty() {
        return Err(TransformError::new("no rows").with_warnings(vec!["empty sheet".into()]));
    }
    Ok(TransformOutput {
        aggs: vec![agg_row("ignored", "ALL", facts.len() as i64)],
        facts,
        warnings: vec!["1 row without fee breakdown".into()],
    })
}

impl Harness {
    fn runner(&self) -> JobRunner<Catalog, Blobs> {
        JobRunner::new(
            self.catalog.clone(),
            self.blobs.clone(),
            PartitionWriter::new(self.layout.clone()),
            Arc::new(line_transform),
        )
        .with_lookup_backoff(Duration::from_millis(1))
    }

    async fn submit(&self, tenant: &TenantId, body: &'static [u8]) -> SubmitOutcome {
        let upload = self
            .registry
            .register(tenant, Platform::WechatVideo, FileRole::Settlement, Bytes::from_static(body), "s.csv")
            .await
            .unwrap();
        self.orchestrator
            .submit(
                tenant,
                SubmitRequest {
                    platform: "wechat_video".into(),
                    year: 2025,
                    month: 10,
                    mode: None,
                    settlement_upload_id: Some(upload.record.id),
                    orders_upload_id: None,
                },
                "req-test",
            )
            .await
            .unwrap()
    }

    async fn next_payload(&self) -> JobPayload {
        let reserved = self.queue.reserve(Duration::from_millis(50)).await.unwrap().unwrap();
        self.queue.ack(&reserved.message_id).await.unwrap();
        reserved.payload
    }
}

fn tenant() -> TenantId {
    TenantId::parse("t1").unwrap()
}

#[tokio::test]
async fn runner_completes_job_and_publishes_partitions() {
    let h = harness();
    let t = tenant();
    let job_id = h.submit(&t, b"O-2,B\nO-1,A\nO-3,C\n").await.job_id();
    let payload = h.next_payload().await;

    let outcome = h.runner().run(&payload).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            fact_count: 3,
            agg_count: 1,
            dataset_updated: true,
        }
    );

    let job = h.catalog.get_job(&t, job_id).await.unwrap().unwrap();
    assert!(matches!(job.state, JobState::Completed { fact_count: 3, .. }));
    assert_eq!(job.progress, 100);

    let period = payload.period().unwrap();
    let dataset = h.catalog.active_dataset(&t, &period).await.unwrap().unwrap();
    assert_eq!(dataset.metadata.fact_count, Some(3));
    assert_eq!(dataset.metadata.job_ids, vec![job_id]);

    let page = h
        .resolver
        .query_rows(&t, &period, None, &RowFilters::default(), PageRequest::default())
        .unwrap();
    let orders: Vec<_> = page.rows.iter().map(|r| r.order_id.as_str()).collect();
    assert_eq!(orders, vec!["O-1", "O-2", "O-3"]);
    assert!(page.rows.iter().all(|r| r.job_id == job_id.to_string() && r.tenant_id == "t1"));
}

#[tokio::test]
async fn redelivered_message_for_finished_job_is_skipped() {
    let h = harness();
    h.submit(&tenant(), b"O-1,A\n").await;
    let payload = h.next_payload().await;
    let runner = h.runner();

    runner.run(&payload).await.unwrap();
    assert_eq!(
        runner.run(&payload).await.unwrap(),
        RunOutcome::Skipped { status: "completed" }
    );
}

#[tokio::test]
async fn transform_failure_marks_job_failed_with_warnings() {
    let h = harness();
    let t = tenant();
    let job_id = h.submit(&t, b"no rows here").await.job_id();
    let payload = h.next_payload().await;

    let outcome = h.runner().run(&payload).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed { ref error } if error.contains("no rows")));

    let job = h.catalog.get_job(&t, job_id).await.unwrap().unwrap();
    let JobState::Failed { warnings, .. } = job.state else {
        panic!("expected failed job");
    };
    assert_eq!(warnings, vec!["empty sheet".to_string()]);
    assert!(h.layout.discover_jobs(&t, &payload.period().unwrap()).unwrap().is_empty());
}

#[tokio::test]
async fn unknown_job_is_a_permanent_error() {
    let h = harness();
    h.submit(&tenant(), b"O-1,A\n").await;
    let mut payload = h.next_payload().await;
    payload.job_id = settlekit_core::JobId::new();

    let err = h.runner().run(&payload).await.unwrap_err();
    assert!(matches!(err, WorkerError::JobMissing(_)));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn job_finishing_after_clear_does_not_revive_dataset() {
    let h = harness();
    let t = tenant();
    let job_id = h.submit(&t, b"O-1,A\n").await.job_id();
    let payload = h.next_payload().await;

    let cleared = PeriodClearer::new(h.catalog.clone())
        .clear(&t, &payload.period().unwrap())
        .await
        .unwrap();
    assert!(matches!(cleared, ClearOutcome::Cleared { ref job_ids, .. } if job_ids == &vec![job_id]));

    let outcome = h.runner().run(&payload).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { dataset_updated: false, .. }));
    assert!(h.catalog.active_dataset(&t, &payload.period().unwrap()).await.unwrap().is_none());
}

async fn wait_for(handle: &WorkerHandle, done: impl Fn(&WorkerStats) -> bool) -> WorkerStats {
    for _ in 0..200 {
        let stats = handle.stats();
        if done(&stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("worker did not reach the expected state: {:?}", handle.stats());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runtime_processes_queue_until_shutdown() {
    let h = harness();
    let t = tenant();
    let job_id = h.submit(&t, b"O-1,A\nO-2,B\n").await.job_id();

    let handle = WorkerRuntime::spawn(
        Arc::new(h.runner()),
        h.queue.clone(),
        WorkerConfig::default().with_reserve_timeout(Duration::from_millis(20)),
    );
    let stats = wait_for(&handle, |s| s.jobs_completed == 1).await;
    assert_eq!(stats.messages_received, 1);
    handle.shutdown().await;

    assert_eq!(h.queue.len().await.unwrap(), 0);
    let job = h.catalog.get_job(&t, job_id).await.unwrap().unwrap();
    assert_eq!(job.status(), "completed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runtime_dead_letters_failed_jobs() {
    let h = harness();
    h.submit(&tenant(), b"garbage").await;

    let handle = WorkerRuntime::spawn(
        Arc::new(h.runner()),
        h.queue.clone(),
        WorkerConfig::default().with_reserve_timeout(Duration::from_millis(20)),
    );
    wait_for(&handle, |s| s.jobs_failed == 1).await;
    handle.shutdown().await;

    let dead = h.queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].error.contains("no rows"));
}

#[tokio::test]
async fn unconfigured_transform_rejects_input() {
    let h = harness();
    h.submit(&tenant(), b"O-1,A\n").await;
    let payload = h.next_payload().await;
    let runner = JobRunner::new(
        h.catalog.clone(),
        h.blobs.clone(),
        PartitionWriter::new(h.layout.clone()),
        Arc::new(UnconfiguredTransform),
    );
    let outcome = runner.run(&payload).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed { ref error } if error.contains("wechat_video")));
}
