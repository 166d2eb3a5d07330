use std::{sync::OnceLock, time::Duration};

use reqwest::Client;

/// Common HTTP client to re-use as much as possible the same upstream
/// connections. No request timeout: streamed chat responses legitimately
/// run for minutes.
pub(crate) fn http_client() -> reqwest::Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            let mut headers = http::HeaderMap::new();
            headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

            Client::builder()
                .connect_timeout(Duration::from_secs(10))
                // A short idle timeout picks up upstream DNS changes without
                // hurting connection reuse under load.
                .pool_idle_timeout(Some(Duration::from_secs(5)))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .default_headers(headers)
                .build()
                .expect("Failed to build default HTTP client")
        })
        .clone()
}
