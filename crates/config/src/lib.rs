//! Tapes configuration structures to map the tapes.toml configuration.

#![deny(missing_docs)]

mod loader;
mod route;
mod server;
mod storage;

use std::collections::BTreeMap;
use std::path::Path;

pub use route::RouteConfig;
use serde::Deserialize;
pub use server::ServerConfig;
pub use storage::{StorageBackend, StorageConfig};

/// Main configuration structure for the tapes proxy.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// DAG storage configuration settings.
    pub storage: StorageConfig,
    /// Recorder queue configuration settings.
    pub recorder: RecorderConfig,
    /// Vector-index configuration settings.
    pub embedding: EmbeddingConfig,
    /// Default provider route served as the catch-all.
    pub proxy: Option<RouteConfig>,
    /// Named routes served under `/agents/{name}` and `/providers/{name}`.
    pub agents: BTreeMap<String, RouteConfig>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration has at least one route to proxy.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate_has_routes(self)
    }
}

/// Settings of the recording pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecorderConfig {
    /// Bounded depth of the recording queue; overflow drops tasks.
    pub queue_depth: usize,
    /// Optional project tag stamped onto every recorded node.
    pub project: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            project: None,
        }
    }
}

/// Settings of the optional embedding worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Whether recorded turns should be vector-indexed at all.
    pub enabled: bool,
    /// Bounded depth of the embedding queue.
    pub queue_depth: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_depth: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                max_request_bytes: 33554432,
                max_capture_bytes: 8388608,
            },
            storage: StorageConfig {
                backend: Sqlite,
                path: ".tapes/tapes.db",
            },
            recorder: RecorderConfig {
                queue_depth: 256,
                project: None,
            },
            embedding: EmbeddingConfig {
                enabled: false,
                queue_depth: 64,
            },
            proxy: None,
            agents: {},
        }
        "#);
    }

    #[test]
    fn routes_parse() {
        let config: Config = toml::from_str(
            r#"
            [proxy]
            provider = "ollama"
            upstream = "http://localhost:11434"

            [agents.coder]
            provider = "anthropic"
            upstream = "https://api.anthropic.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.proxy.as_ref().unwrap().provider, "ollama");
        assert_eq!(
            config.agents.get("coder").unwrap().upstream.as_str(),
            "https://api.anthropic.com/"
        );
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<Config, _> = toml::from_str("[server]\nlisten_adress = \"x\"");
        assert!(result.is_err());
    }
}
