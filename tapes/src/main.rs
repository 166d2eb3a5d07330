use std::net::SocketAddr;
use std::sync::Arc;

use args::Args;
use clap::Parser;
use config::{Config, StorageBackend};
use dag::{DagStore, MemoryStore, Recorder, SqliteStore};
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    let store: Arc<dyn DagStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite => {
            if let Some(parent) = config.storage.path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            Arc::new(SqliteStore::open(&config.storage.path)?)
        }
    };

    let (recorder, recorder_worker) =
        Recorder::spawn(store.clone(), None, config.recorder.queue_depth);

    let shutdown_signal = CancellationToken::new();
    {
        let shutdown_signal = shutdown_signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown_signal.cancel();
            }
        });
    }

    let listen_address = args
        .listen
        .or(config.server.listen_address)
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8091)));

    server::serve(ServeConfig {
        listen_address,
        config,
        recorder,
        credentials: None,
        shutdown_signal,
        log_filter: args.log,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await?;

    // Drain what the proxy already handed over, then release the database.
    recorder_worker.join().await;

    if let Err(err) = store.close() {
        log::error!("failed to close storage driver: {err}");
    }

    Ok(())
}
