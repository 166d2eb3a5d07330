use std::net::SocketAddr;

use serde::Deserialize;

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the proxy binds to. Defaults to 127.0.0.1:8091
    /// when unset.
    pub listen_address: Option<SocketAddr>,

    /// Ceiling on inbound request bodies, which are buffered in full before
    /// forwarding.
    pub max_request_bytes: usize,

    /// Ceiling on the response capture buffer. Responses larger than this
    /// still stream to the client in full; only the recording is skipped.
    pub max_capture_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            // 32 MiB, matching the most generous upstream request limit.
            max_request_bytes: 32 << 20,
            // 8 MiB of captured response is plenty for any chat exchange.
            max_capture_bytes: 8 << 20,
        }
    }
}
