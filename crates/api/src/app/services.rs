use std::sync::{Arc, Mutex};

use anyhow::Context;

use settlekit_infra::blob::{BlobStore, InMemoryBlobStore, LocalBlobStore};
use settlekit_infra::catalog::{CatalogStore, InMemoryCatalogStore, PostgresCatalogStore};
use settlekit_infra::clearer::PeriodClearer;
use settlekit_infra::config::{AppConfig, QueueDriver, StorageDriver};
use settlekit_infra::effective_view::{EffectiveViewResolver, ResolverConfig};
use settlekit_infra::orchestrator::JobOrchestrator;
use settlekit_infra::partitions::{PartitionLayout, PartitionWriter};
use settlekit_infra::queue::{InMemoryJobQueue, JobQueue};
use settlekit_infra::registry::ContentRegistry;
use settlekit_infra::worker::{
    JobRunner, SettlementTransform, WorkerConfig, WorkerHandle, WorkerRuntime, WorkerStats,
};

#[cfg(feature = "redis")]
use settlekit_infra::queue::RedisStreamsJobQueue;

pub type DynCatalog = Arc<dyn CatalogStore>;
pub type DynBlobs = Arc<dyn BlobStore>;
pub type DynQueue = Arc<dyn JobQueue>;

/// Everything a request handler needs, built once per process.
pub struct AppServices {
    pub config: AppConfig,
    pub registry: ContentRegistry<DynCatalog, DynBlobs>,
    pub orchestrator: JobOrchestrator<DynCatalog, DynQueue>,
    pub clearer: PeriodClearer<DynCatalog>,
    pub resolver: EffectiveViewResolver,
    pub catalog: DynCatalog,
    pub queue: DynQueue,
    worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    /// Worker counters; `None` once the worker has been shut down.
    pub fn worker_stats(&self) -> Option<WorkerStats> {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(WorkerHandle::stats)
    }

    /// Stop the in-process worker after its current message.
    pub async fn shutdown(&self) {
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

/// Wire stores, queue and worker from `config`.
///
/// Must run inside a tokio runtime: the worker loop is spawned here.
pub async fn build_services(
    config: AppConfig,
    transform: Arc<dyn SettlementTransform>,
) -> anyhow::Result<AppServices> {
    let catalog = build_catalog(&config).await?;
    let blobs = build_blobs(&config);
    let queue = build_queue(&config)?;

    let layout = PartitionLayout::new(config.partition_root());
    let resolver = EffectiveViewResolver::new(
        layout.clone(),
        ResolverConfig {
            min_partition_bytes: config.min_partition_bytes,
        },
    );

    let runner = JobRunner::new(catalog.clone(), blobs.clone(), PartitionWriter::new(layout), transform);
    let worker = WorkerRuntime::spawn(
        Arc::new(runner),
        queue.clone(),
        WorkerConfig::default().with_name(format!("settlement-worker-{}", std::process::id())),
    );

    tracing::info!(
        data_dir = %config.data_dir.display(),
        storage = ?config.storage_driver,
        queue = ?config.queue_driver,
        persistent = config.use_persistent_stores(),
        "services ready"
    );

    Ok(AppServices {
        registry: ContentRegistry::new(catalog.clone(), blobs).with_max_upload_bytes(config.max_upload_bytes),
        orchestrator: JobOrchestrator::new(catalog.clone(), queue.clone()),
        clearer: PeriodClearer::new(catalog.clone()),
        resolver,
        catalog,
        queue,
        worker: Mutex::new(Some(worker)),
        config,
    })
}

async fn build_catalog(config: &AppConfig) -> anyhow::Result<DynCatalog> {
    let Some(url) = config.database_url.as_deref() else {
        return Ok(Arc::new(InMemoryCatalogStore::new()));
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to DATABASE_URL")?;
    let store = PostgresCatalogStore::new(pool);
    store.ensure_schema().await.context("failed to prepare catalog schema")?;
    Ok(Arc::new(store))
}

fn build_blobs(config: &AppConfig) -> DynBlobs {
    match config.storage_driver {
        StorageDriver::Local => Arc::new(LocalBlobStore::new(config.blob_root())),
        StorageDriver::Memory => Arc::new(InMemoryBlobStore::new()),
    }
}

fn build_queue(config: &AppConfig) -> anyhow::Result<DynQueue> {
    match config.queue_driver {
        QueueDriver::InMemory => Ok(Arc::new(InMemoryJobQueue::new())),
        QueueDriver::Redis => {
            #[cfg(feature = "redis")]
            {
                let consumer = format!("api-{}", std::process::id());
                let queue = RedisStreamsJobQueue::new(&config.redis_url, consumer)
                    .context("failed to connect to REDIS_URL")?;
                Ok(Arc::new(queue))
            }
            #[cfg(not(feature = "redis"))]
            {
                tracing::warn!("QUEUE_DRIVER=redis but redis feature not enabled, falling back to in-memory");
                Ok(Arc::new(InMemoryJobQueue::new()))
            }
        }
    }
}
