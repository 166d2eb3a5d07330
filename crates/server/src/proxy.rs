//! The forwarding path: capture the request, dispatch upstream, stream the
//! response back while teeing it into the recorder.
//!
//! The client writer is the authoritative sink. The capture side has a
//! strict size ceiling and detaches on overflow; nothing on the recording
//! path can delay or fail the client response.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use dag::{RecordTask, Recorder};
use futures::StreamExt;
use http::StatusCode;
use secrecy::ExposeSecret;
use url::Url;

use crate::{
    credentials::CredentialStore,
    headers::{insert_proxied_headers_into, is_hop_by_hop},
    http_client::http_client,
};

/// One resolved forwarding destination.
#[derive(Clone)]
pub(crate) struct RouteTarget {
    pub provider: String,
    pub upstream: Url,
}

pub(crate) struct ProxyState {
    pub default_target: Option<RouteTarget>,
    pub agents: HashMap<String, RouteTarget>,
    pub recorder: Recorder,
    pub credentials: Arc<dyn CredentialStore>,
    pub client: reqwest::Client,
    pub max_request_bytes: usize,
    pub max_capture_bytes: usize,
    pub project: Option<String>,
}

impl ProxyState {
    pub(crate) fn new(
        config: &config::Config,
        recorder: Recorder,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let default_target = config.proxy.as_ref().map(|route| RouteTarget {
            provider: route.provider.clone(),
            upstream: route.upstream.clone(),
        });

        let agents = config
            .agents
            .iter()
            .map(|(name, route)| {
                (
                    name.clone(),
                    RouteTarget {
                        provider: route.provider.clone(),
                        upstream: route.upstream.clone(),
                    },
                )
            })
            .collect();

        Self {
            default_target,
            agents,
            recorder,
            credentials,
            client: http_client(),
            max_request_bytes: config.server.max_request_bytes,
            max_capture_bytes: config.server.max_capture_bytes,
            project: config.recorder.project.clone(),
        }
    }
}

pub(crate) fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/agents/{name}", any(agent_root))
        .route("/agents/{name}/{*path}", any(agent_subpath))
        .route("/providers/{name}", any(agent_root))
        .route("/providers/{name}/{*path}", any(agent_subpath))
        .fallback(default_route)
        .with_state(state)
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

async fn agent_root(
    State(state): State<Arc<ProxyState>>,
    Path(name): Path<String>,
    request: Request,
) -> Response {
    agent(state, name, String::new(), request).await
}

async fn agent_subpath(
    State(state): State<Arc<ProxyState>>,
    Path((name, path)): Path<(String, String)>,
    request: Request,
) -> Response {
    agent(state, name, path, request).await
}

async fn agent(state: Arc<ProxyState>, name: String, path: String, request: Request) -> Response {
    let Some(target) = state.agents.get(&name).cloned() else {
        log::debug!("no agent or provider named {name} configured");
        return StatusCode::NOT_FOUND.into_response();
    };

    forward(state, target, path, request).await
}

async fn default_route(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let Some(target) = state.default_target.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let path = request.uri().path().to_string();
    forward(state, target, path, request).await
}

/// Step through one exchange: buffer the request, dispatch upstream, write
/// the response through the tee, and offer the capture to the recorder once
/// the body ends.
async fn forward(
    state: Arc<ProxyState>,
    target: RouteTarget,
    path: String,
    request: Request,
) -> Response {
    let received_at = jiff::Timestamp::now();
    let (parts, body) = request.into_parts();

    // Requests are small; bound and buffer them whole so the same bytes can
    // go both upstream and to the recorder.
    let request_bytes = match axum::body::to_bytes(body, state.max_request_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("failed to read request body: {err}");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut url = match target.upstream.join(path.strip_prefix('/').unwrap_or(&path)) {
        Ok(url) => url,
        Err(err) => {
            log::error!("cannot join upstream url with {path}: {err}");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };
    url.set_query(parts.uri.query());

    let mut outbound = insert_proxied_headers_into(
        state.client.request(parts.method.clone(), url),
        &parts.headers,
    );

    if let Some(secret) = state.credentials.get(&target.provider) {
        // Anthropic expects its key in x-api-key; everyone else speaks
        // bearer tokens.
        outbound = if target.provider == "anthropic" {
            outbound.header("x-api-key", secret.expose_secret())
        } else {
            outbound.header(
                http::header::AUTHORIZATION,
                format!("Bearer {}", secret.expose_secret()),
            )
        };
    }

    let upstream_response = match outbound.body(request_bytes.clone()).send().await {
        Ok(response) => response,
        Err(err) => {
            log::error!("failed to reach upstream for {}: {err}", target.provider);
            return (
                StatusCode::BAD_GATEWAY,
                format!("upstream unreachable: {err}"),
            )
                .into_response();
        }
    };

    let status = upstream_response.status();

    // Recording is worth attempting only for successful JSON exchanges; the
    // response must also be something the codecs can interpret.
    let recordable = status.is_success()
        && content_type_is(&parts.headers, &["application/json"])
        && content_type_is(
            upstream_response.headers(),
            &[
                "application/json",
                "application/x-ndjson",
                "text/event-stream",
            ],
        );

    let capture = Capture::new(
        state.max_capture_bytes,
        recordable.then(|| RecordContext {
            recorder: state.recorder.clone(),
            request: request_bytes,
            provider: target.provider.clone(),
            project: state.project.clone(),
            received_at,
        }),
    );

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if !is_hop_by_hop(name) {
            builder = builder.header(name, value);
        }
    }

    // Copy loop: every upstream chunk goes straight to the client, with the
    // capture riding along until it overflows or the body ends.
    let stream = futures::stream::unfold(
        (upstream_response.bytes_stream(), capture),
        |(mut body, mut capture)| async move {
            match body.next().await {
                Some(Ok(chunk)) => {
                    capture.push(&chunk);
                    Some((Ok(chunk), (body, capture)))
                }
                Some(Err(err)) => {
                    log::warn!("upstream body error: {err}");
                    capture.discard();
                    Some((Err(std::io::Error::other(err)), (body, capture)))
                }
                None => {
                    capture.offer();
                    None
                }
            }
        },
    );

    match builder.body(Body::from_stream(stream)) {
        Ok(response) => response,
        Err(err) => {
            log::error!("failed to assemble proxied response: {err}");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

fn content_type_is(headers: &http::HeaderMap, allowed: &[&str]) -> bool {
    let Some(content_type) = headers.get(http::header::CONTENT_TYPE) else {
        return false;
    };

    content_type
        .to_str()
        .map(|value| allowed.iter().any(|allowed| value.starts_with(allowed)))
        .unwrap_or(false)
}

struct RecordContext {
    recorder: Recorder,
    request: Bytes,
    provider: String,
    project: Option<String>,
    received_at: jiff::Timestamp,
}

/// The recorder-side half of the tee.
struct Capture {
    buf: Vec<u8>,
    limit: usize,
    enabled: bool,
    overflowed: bool,
    offered: bool,
    /// `None` when this exchange is not worth recording; the capture then
    /// buffers nothing.
    context: Option<RecordContext>,
}

impl Capture {
    fn new(limit: usize, context: Option<RecordContext>) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            enabled: context.is_some(),
            overflowed: false,
            offered: false,
            context,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if !self.enabled || self.overflowed {
            return;
        }

        if self.buf.len() + chunk.len() > self.limit {
            log::warn!(
                "response capture exceeded {} bytes, skipping recording",
                self.limit
            );
            self.overflowed = true;
            self.buf = Vec::new();
            return;
        }

        self.buf.extend_from_slice(chunk);
    }

    /// Hand the captured body to the recorder. Idempotent.
    fn offer(&mut self) {
        if self.offered || self.overflowed {
            return;
        }
        self.offered = true;

        if let Some(context) = self.context.take() {
            context.recorder.offer(RecordTask {
                request: context.request,
                response: Bytes::from(std::mem::take(&mut self.buf)),
                provider: context.provider,
                project: context.project,
                received_at: context.received_at,
            });
        }
    }

    /// Drop the capture without recording, for bodies known to be broken.
    fn discard(&mut self) {
        self.offered = true;
        self.context = None;
        self.buf = Vec::new();
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        // A client disconnect tears the stream down mid-copy; the captured
        // prefix is still offered, and the recorder rejects it if the
        // terminal marker never arrived.
        self.offer();
    }
}
