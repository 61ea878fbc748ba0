//! Service entry-point: loads settings, connects the database, and runs the
//! flush scheduler until interrupted.

use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use webhook_batcher::config::WebhooksSettings;
use webhook_batcher::domain::ports::{BatchStore, StorageApi};
use webhook_batcher::domain::{
    BackoffPolicy, ExportPipeline, ExportPipelineConfig, ExportPipelinePorts, FlushScheduler,
    FlushSchedulerConfig, JobPoller, TokioSleeper, WebhookService,
};
use webhook_batcher::outbound::persistence::{DbPool, DieselBatchStore};
use webhook_batcher::outbound::staging::CsvStagingArea;
use webhook_batcher::outbound::storage_api::StorageApiHttpClient;
use webhook_batcher::outbound::upload::S3FileUploader;

/// Application bootstrap.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = WebhooksSettings::load().wrap_err("load settings")?;
    let pool = DbPool::connect(settings.pool_config()?)
        .await
        .wrap_err("connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let store: Arc<dyn BatchStore> = Arc::new(DieselBatchStore::new(pool, Arc::clone(&clock)));
    let storage_api: Arc<dyn StorageApi> = Arc::new(
        StorageApiHttpClient::new(settings.storage_api_host()?, settings.storage_api_timeout())
            .wrap_err("build storage api client")?,
    );
    let uploader = Arc::new(S3FileUploader::new(settings.upload_timeout()));
    let staging = Arc::new(CsvStagingArea::new(settings.staging_dir()));

    let shutdown = CancellationToken::new();
    let poller = JobPoller::new(
        Arc::clone(&storage_api),
        Arc::new(TokioSleeper),
        BackoffPolicy::default(),
        shutdown.child_token(),
    );
    let pipeline = ExportPipeline::new(
        ExportPipelinePorts {
            store: Arc::clone(&store),
            storage_api: Arc::clone(&storage_api),
            uploader,
            staging,
        },
        poller,
        ExportPipelineConfig {
            upload_timeout: settings.upload_timeout(),
        },
    );
    let scheduler = Arc::new(FlushScheduler::new(
        Arc::clone(&store),
        Arc::new(pipeline),
        clock,
        FlushSchedulerConfig {
            check_interval: settings.check_interval(),
        },
    ));
    let timer = scheduler.spawn(shutdown.child_token());

    // No inbound HTTP transport drives `WebhookCommand` in this binary yet;
    // the service is held until shutdown so manual flushes share the
    // scheduler's in-flight set.
    let service = WebhookService::new(
        store,
        storage_api,
        Arc::clone(&scheduler),
        settings.public_host()?,
    );
    info!(
        public_host = settings.public_host()?,
        check_interval = ?settings.check_interval(),
        "webhook service ready"
    );

    tokio::signal::ctrl_c()
        .await
        .wrap_err("listen for shutdown signal")?;
    info!("shutdown requested; waiting for running exports");
    shutdown.cancel();
    if let Err(e) = timer.await {
        warn!(error = %e, "flush timer task ended abnormally");
    }
    scheduler.wait_for_exports().await;
    drop(service);
    info!("shutdown complete");
    Ok(())
}
