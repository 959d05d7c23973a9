use anyhow::Result;
use media_processor::{
    MediaConfig, MediaPipeline, ProcessingQueue, ProcessingWorker, ReconciliationSweeper,
    SweepScheduler,
};
use shared::db::repositories::{InMemoryMediaRecordStore, MediaRecordStore, PgMediaRecordRepository};
use shared::storage::create_media_storage;
use shared::telemetry::init_tracing;
use shared::DatabasePool;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("media-processor")?;

    let config = Arc::new(MediaConfig::from_env()?);
    info!(
        "Starting media processor: {} variant sizes, worker concurrency {}",
        config.variant_sizes.len(),
        config.worker_concurrency
    );

    let records: Arc<dyn MediaRecordStore> = match &config.database_url {
        Some(url) => {
            let db_pool = DatabasePool::new(url, config.db_max_connections).await?;
            db_pool.run_migrations().await?;
            Arc::new(PgMediaRecordRepository::new(db_pool.pool()))
        }
        None => {
            warn!("DATABASE_URL not set, media records are kept in memory only");
            Arc::new(InMemoryMediaRecordStore::new())
        }
    };

    let storage = create_media_storage(&config.storage).await?;

    let (queue, receiver) = ProcessingQueue::channel(config.queue_capacity);
    let pipeline = Arc::new(MediaPipeline::new(
        config.clone(),
        storage.facade.clone(),
        records.clone(),
        queue,
    ));
    let worker = ProcessingWorker::new(pipeline.clone(), receiver, config.worker_concurrency);

    let sweeper = Arc::new(ReconciliationSweeper::new(
        records,
        storage.durable.clone(),
        storage.local.clone(),
        config.sweep_batch_size,
        config.sweep_timeout,
    ));
    let scheduler = SweepScheduler::new(sweeper, config.sweep_interval);

    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    worker
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    scheduler_handle.abort();
    info!("Media processor stopped");

    Ok(())
}
