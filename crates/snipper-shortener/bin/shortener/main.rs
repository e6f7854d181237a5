mod cli;

use crate::cli::{GeneratorArg, LogFormat, StorageBackendArg, CLI};
use anyhow::Context;
use clap::Parser;
use snipper_core::{Shortener, Storage};
use snipper_generator::{Generator, SeqGenerator, UuidGenerator};
use snipper_shortener::ShortenerService;
use snipper_storage::{
    BatchDeleter, DeleteQueueConfig, FileStorage, InMemoryStorage, PostgresStorage,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);
    config.validate()?;

    info!(
        storage_backend = %config.storage,
        generator = %config.generator,
        base_url = %config.base_url,
        "starting shortener"
    );

    let generator: Box<dyn Generator> = match config.generator {
        GeneratorArg::Uuid => Box::new(UuidGenerator::new()),
        GeneratorArg::Seq => Box::new(SeqGenerator::new()),
    };

    match config.storage {
        StorageBackendArg::InMemory => run(&config, InMemoryStorage::new(), generator).await,
        StorageBackendArg::File => {
            let path = config
                .file_storage_path
                .clone()
                .context("file path is required when storage backend is file")?;
            let storage = FileStorage::open(path).await?;
            run(&config, storage, generator).await
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .database_dsn
                .as_deref()
                .context("database dsn is required when storage backend is postgres")?;
            let storage = PostgresStorage::connect(dsn).await?;
            storage.migrate().await?;
            run(&config, storage, generator).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run<S: Storage>(
    config: &CLI,
    storage: S,
    generator: Box<dyn Generator>,
) -> anyhow::Result<()> {
    let storage = Arc::new(storage);
    let delete_config = DeleteQueueConfig::builder()
        .buffer_size(config.delete_buffer_size)
        .flush_interval(config.delete_flush_interval())
        .operation_timeout(config.delete_operation_timeout())
        .build();

    let (deleter, deletes) = BatchDeleter::new(Arc::clone(&storage), delete_config);
    let (stop, shutdown) = watch::channel(false);
    let worker = tokio::spawn(deleter.start(shutdown));

    let service = ShortenerService::new(storage, generator, deletes, config.base_url.as_str());
    service.ping().await.context("storage backend is not reachable")?;
    let stats = service.stats().await?;
    info!(
        urls_count = stats.urls_count,
        users_count = stats.users_count,
        "shortener ready"
    );

    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("received ctrl-c, shutting down");

    // Dropping the service releases the last producer handle.
    drop(service);
    if stop.send(true).is_err() {
        warn!("delete worker already stopped");
    }
    worker.await.context("delete worker panicked")?;

    info!("shortener stopped");
    Ok(())
}
