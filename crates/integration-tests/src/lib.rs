//! Test harness: a canned upstream plus a fully wired proxy, both bound to
//! ephemeral ports.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Response},
    routing::any,
};
use dag::{DagStore, MemoryStore, Recorder};
use http::StatusCode;
use server::ServeConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// What the canned upstream answers with.
#[derive(Clone)]
pub enum MockResponse {
    /// Raw body with the given content type and status 200.
    Body {
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// An error status with a plain-text body.
    Status(u16, &'static str),
}

impl MockResponse {
    /// A buffered JSON response, passed as the exact bytes to serve.
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::Body {
            content_type: "application/json",
            body: body.into(),
        }
    }

    /// A complete SSE body, served in one piece.
    pub fn sse(body: impl Into<Vec<u8>>) -> Self {
        Self::Body {
            content_type: "text/event-stream",
            body: body.into(),
        }
    }
}

struct UpstreamState {
    response: Mutex<MockResponse>,
    last_path: Mutex<Option<String>>,
}

/// A canned upstream server.
pub struct MockUpstream {
    /// Base URL to put into the proxy configuration.
    pub url: String,
    state: Arc<UpstreamState>,
}

impl MockUpstream {
    /// Bind a mock upstream on an ephemeral port.
    pub async fn spawn(response: MockResponse) -> Self {
        let state = Arc::new(UpstreamState {
            response: Mutex::new(response),
            last_path: Mutex::new(None),
        });

        let app = Router::new()
            .fallback(any(respond))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    /// Swap the canned response for the next request.
    pub fn set_response(&self, response: MockResponse) {
        *self.state.response.lock().unwrap() = response;
    }

    /// Path and query of the most recent request the upstream saw.
    pub fn last_path(&self) -> Option<String> {
        self.state.last_path.lock().unwrap().clone()
    }
}

async fn respond(State(state): State<Arc<UpstreamState>>, request: Request) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_default();
    *state.last_path.lock().unwrap() = Some(path_and_query);

    let response = state.response.lock().unwrap().clone();

    match response {
        MockResponse::Body { content_type, body } => (
            StatusCode::OK,
            [(http::header::CONTENT_TYPE, content_type)],
            Body::from(body),
        )
            .into_response(),
        MockResponse::Status(code, body) => (
            StatusCode::from_u16(code).unwrap(),
            body.to_string(),
        )
            .into_response(),
    }
}

/// A running proxy wired to an in-memory store.
pub struct TestProxy {
    /// Base URL clients talk to.
    pub url: String,
    /// The store the recorder writes into, for assertions.
    pub store: Arc<MemoryStore>,
    shutdown: CancellationToken,
}

impl TestProxy {
    /// Spawn the proxy from a raw tapes.toml snippet. The configuration
    /// should reference the mock upstream's URL.
    pub async fn spawn(config_toml: &str) -> Self {
        let config: config::Config = toml::from_str(config_toml).unwrap();
        config.validate().unwrap();

        let store = Arc::new(MemoryStore::new());
        let dag_store: Arc<dyn DagStore> = store.clone();
        let (recorder, _worker) = Recorder::spawn(dag_store, None, 64);

        let shutdown = CancellationToken::new();
        let (addr_tx, addr_rx) = tokio::sync::oneshot::channel::<SocketAddr>();

        let serve_config = ServeConfig {
            listen_address: "127.0.0.1:0".parse().unwrap(),
            config,
            recorder,
            credentials: None,
            shutdown_signal: shutdown.clone(),
            log_filter: "info".to_string(),
            version: "test".to_string(),
            bound_addr_sender: Some(addr_tx),
        };

        tokio::spawn(async move {
            if let Err(err) = server::serve(serve_config).await {
                eprintln!("test proxy exited with error: {err}");
            }
        });

        let addr = addr_rx.await.unwrap();

        Self {
            url: format!("http://{addr}"),
            store,
            shutdown,
        }
    }

    /// Poll until the store holds `count` nodes; panics after a few seconds
    /// so a lost recording fails the test instead of hanging it.
    pub async fn wait_for_nodes(&self, count: usize) {
        for _ in 0..250 {
            if self.store.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(
            self.store.len() >= count,
            "expected {count} recorded nodes, store still has {}",
            self.store.len()
        );
    }

    /// Give the fire-and-forget recording path a moment, for tests asserting
    /// that nothing was recorded.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
