use std::path::PathBuf;

use serde::Deserialize;

/// Which storage driver backs the DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Everything in process memory; records vanish on exit.
    Memory,
    /// A single SQLite database file.
    Sqlite,
}

/// DAG storage settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// The driver to use.
    pub backend: StorageBackend,
    /// Database file path, for the SQLite backend.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from(".tapes/tapes.db"),
        }
    }
}
