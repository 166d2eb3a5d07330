use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// One proxied route: which codec records it and where requests go.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Provider identifier. Selects the recording codec; unknown values fall
    /// back to the best-effort codec.
    pub provider: String,

    /// Upstream base URL requests are rewritten to.
    pub upstream: Url,

    /// Optional credential injected as the outbound authorization header.
    /// Supports `{{ env.NAME }}` expansion.
    #[serde(default)]
    pub token: Option<SecretString>,
}
