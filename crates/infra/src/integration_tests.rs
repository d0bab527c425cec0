//! Integration tests for the full settlement pipeline.
//!
//! Tests: upload → submit → queue → worker → partitions → effective view → clear
//!
//! Verifies:
//! - At most one active dataset per period, duplicates answered with its counts
//! - Clearing frees the period and the next submit starts a fresh job
//! - Tenants never see each other's uploads, jobs or rows

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use settlekit_core::{DatasetId, FileRole, JobId, Period, Platform, TenantId};

    use crate::blob::LocalBlobStore;
    use crate::catalog::{CatalogStore, InMemoryCatalogStore};
    use crate::clearer::{ClearOutcome, PeriodClearer};
    use crate::effective_view::{EffectiveViewResolver, PageRequest, ResolverConfig, ResolverError, RowFilters, summarize};
    use crate::orchestrator::{JobOrchestrator, SubmitOutcome, SubmitRequest};
    use crate::partitions::testing::{agg_row, fact_row};
    use crate::partitions::{PartitionLayout, PartitionWriter};
    use crate::queue::{InMemoryJobQueue, JobQueue};
    use crate::registry::ContentRegistry;
    use crate::worker::{
        JobRunner, TransformError, TransformInput, TransformOutput, WorkerConfig, WorkerHandle, WorkerRuntime,
    };

    type Catalog = Arc<InMemoryCatalogStore>;
    type Blobs = Arc<LocalBlobStore>;

    struct Pipeline {
        _dir: tempfile::TempDir,
        catalog: Catalog,
        queue: Arc<InMemoryJobQueue>,
        registry: ContentRegistry<Catalog, Blobs>,
        orchestrator: JobOrchestrator<Catalog, Arc<InMemoryJobQueue>>,
        clearer: PeriodClearer<Catalog>,
        resolver: EffectiveViewResolver,
        worker: WorkerHandle,
    }

    /// `rows=<n>` in the settlement file yields n fact rows.
    fn counting_transform(input: &TransformInput) -> Result<TransformOutput, TransformError> {
        let raw = input
            .file(FileRole::Settlement)
            .ok_or_else(|| TransformError::new("settlement file missing"))?;
        let text = String::from_utf8_lossy(raw);
        let n: usize = text
            .trim()
            .strip_prefix("rows=")
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| TransformError::new("unreadable settlement file"))?;
        let facts = (0..n)
            .map(|i| fact_row("", &format!("O-{i:04}"), &format!("SKU-{}", i % 5)))
            .collect();
        let aggs = (0..5).map(|i| agg_row("", &format!("SKU-{i}"), 1)).collect();
        Ok(TransformOutput {
            facts,
            aggs,
            warnings: Vec::new(),
        })
    }

    fn pipeline() -> Pipeline {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalogStore::new());
        let blobs = Arc::new(LocalBlobStore::new(dir.path().join("blobs")));
        let queue = Arc::new(InMemoryJobQueue::new());
        let layout = PartitionLayout::new(dir.path().join("partitions"));

        let runner = JobRunner::new(
            catalog.clone(),
            blobs.clone(),
            PartitionWriter::new(layout.clone()),
            Arc::new(counting_transform),
        );
        let worker = WorkerRuntime::spawn(
            Arc::new(runner),
            queue.clone(),
            WorkerConfig::default().with_reserve_timeout(Duration::from_millis(20)),
        );

        Pipeline {
            registry: ContentRegistry::new(catalog.clone(), blobs),
            orchestrator: JobOrchestrator::new(catalog.clone(), queue.clone()),
            clearer: PeriodClearer::new(catalog.clone()),
            resolver: EffectiveViewResolver::new(layout, ResolverConfig { min_partition_bytes: 64 }),
            catalog,
            queue,
            worker,
            _dir: dir,
        }
    }

    impl Pipeline {
        async fn submit(&self, tenant: &TenantId, settlement: &'static [u8]) -> SubmitOutcome {
            let upload = self
                .registry
                .register(tenant, Platform::WechatVideo, FileRole::Settlement, Bytes::from_static(settlement), "s.xlsx")
                .await
                .unwrap();
            self.orchestrator
                .submit(
                    tenant,
                    SubmitRequest {
                        platform: "wechat_video".into(),
                        year: 2025,
                        month: 10,
                        mode: Some("merge".into()),
                        settlement_upload_id: Some(upload.record.id),
                        orders_upload_id: None,
                    },
                    "req-it",
                )
                .await
                .unwrap()
        }

        async fn wait_until_finished(&self, tenant: &TenantId, job_id: JobId) {
            for _ in 0..300 {
                let job = self.catalog.get_job(tenant, job_id).await.unwrap().unwrap();
                if job.is_terminal() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("job {job_id} did not finish");
        }
    }

    fn period() -> Period {
        Period::new(Platform::WechatVideo, 2025, 10).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_process_duplicate_clear_resubmit() {
        let p = pipeline();
        let t1 = TenantId::parse("t1").unwrap();
        let d1 = DatasetId::derive(&t1, &period());

        let SubmitOutcome::Queued { job_id: j1, dataset_id } = p.submit(&t1, b"rows=120").await else {
            panic!("first submit must queue");
        };
        assert_eq!(dataset_id, d1);
        p.wait_until_finished(&t1, j1).await;

        let count = p.resolver.count_rows(&t1, &period(), None, &RowFilters::default()).unwrap();
        assert_eq!(count, 120);

        assert_eq!(
            p.submit(&t1, b"rows=120").await,
            SubmitOutcome::DuplicateReused {
                dataset_id: d1.clone(),
                job_id: j1,
                fact_count: Some(120),
                agg_count: Some(5),
            }
        );

        assert_eq!(
            p.clearer.clear(&t1, &period()).await.unwrap(),
            ClearOutcome::Cleared {
                dataset_id: d1.clone(),
                job_ids: vec![j1],
            }
        );

        let SubmitOutcome::Queued { job_id: j2, dataset_id } = p.submit(&t1, b"rows=120").await else {
            panic!("submit after clear must queue");
        };
        assert_ne!(j2, j1);
        assert_eq!(dataset_id, d1);
        p.wait_until_finished(&t1, j2).await;

        let dataset = p.catalog.active_dataset(&t1, &period()).await.unwrap().unwrap();
        assert_eq!(dataset.metadata.job_ids, vec![j2]);

        // Partitions are kept on clear: the unrestricted view unions both jobs,
        // the dataset's job list narrows it to the current one.
        let all = p.resolver.count_rows(&t1, &period(), None, &RowFilters::default()).unwrap();
        assert_eq!(all, 240);
        let current = p
            .resolver
            .query_rows(&t1, &period(), Some(&dataset.metadata.job_ids), &RowFilters::default(), PageRequest::new(50, 0))
            .unwrap();
        assert_eq!(current.total, 120);
        assert_eq!(current.rows.len(), 50);
        assert!(summarize(&current.rows).is_consistent());

        p.worker.shutdown().await;
        assert_eq!(p.queue.len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tenants_are_isolated_end_to_end() {
        let p = pipeline();
        let t1 = TenantId::parse("t1").unwrap();
        let t2 = TenantId::parse("t2").unwrap();

        let a = p.submit(&t1, b"rows=3").await;
        let b = p.submit(&t2, b"rows=3").await;
        assert!(matches!(a, SubmitOutcome::Queued { .. }));
        assert!(matches!(b, SubmitOutcome::Queued { .. }));
        assert_ne!(a.dataset_id(), b.dataset_id());
        p.wait_until_finished(&t1, a.job_id()).await;
        p.wait_until_finished(&t2, b.job_id()).await;

        assert!(p.catalog.get_job(&t2, a.job_id()).await.is_err());
        let t1_rows = p
            .resolver
            .query_rows(&t1, &period(), None, &RowFilters::default(), PageRequest::default())
            .unwrap();
        assert!(t1_rows.rows.iter().all(|r| r.tenant_id == "t1"));

        let t3 = TenantId::parse("t3").unwrap();
        assert!(matches!(
            p.resolver.count_rows(&t3, &period(), None, &RowFilters::default()),
            Err(ResolverError::NoPartitions)
        ));
        assert_eq!(p.clearer.clear(&t3, &period()).await.unwrap(), ClearOutcome::NotFound);

        p.worker.shutdown().await;
    }
}
