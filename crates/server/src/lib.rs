//! Tapes server library.
//!
//! Provides a reusable serve function to run the recording proxy either for
//! the binary, or for the integration tests. The caller owns the storage
//! driver and recorder worker: after `serve` returns, drop the last
//! [`dag::Recorder`] clone, join the worker, then close the store.

#![deny(missing_docs)]

mod credentials;
mod headers;
mod http_client;
mod logger;
mod proxy;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use config::Config;
pub use credentials::{ConfigCredentials, CredentialStore};
use dag::Recorder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::proxy::ProxyState;

/// Configuration for serving the proxy.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized tapes TOML configuration.
    pub config: Config,
    /// Handle to the recording worker fed by the proxied routes.
    pub recorder: Recorder,
    /// Credential lookup for outbound requests; `None` falls back to the
    /// route tokens in the configuration.
    pub credentials: Option<Arc<dyn CredentialStore>>,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g., "info" or "server=debug,dag=debug").
    pub log_filter: String,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if
    /// port 0 was specified).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the recording proxy with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        recorder,
        credentials,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&log_filter);

    log::info!("Tapes {version}");

    if config.embedding.enabled && !recorder.has_embeddings() {
        // The embedding worker needs an embedder implementation wired in by
        // the caller; without one, turns are recorded without vectors.
        log::warn!("embedding.enabled is set but no embedder is wired, skipping vector indexing");
    }

    let credentials =
        credentials.unwrap_or_else(|| Arc::new(ConfigCredentials::from_config(&config)));

    let state = Arc::new(ProxyState::new(&config, recorder, credentials));
    let app = proxy::router(state);

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(listener.local_addr()?)
            .expect("Failed to send back bound address.");
    }

    if let Some(route) = &config.proxy {
        log::info!(
            "Default {} route: http://{listen_address} -> {}",
            route.provider,
            route.upstream
        );
    }

    for (name, route) in &config.agents {
        log::info!(
            "Agent route: http://{listen_address}/agents/{name} -> {} ({})",
            route.upstream,
            route.provider
        );
    }

    // Run with graceful shutdown
    tokio::select! {
        result = axum::serve(listener, app) => {
            result.map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}
