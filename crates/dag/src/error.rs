use thiserror::Error;

pub type DagResult<T> = std::result::Result<T, DagError>;

/// Errors on the recording and storage path. None of these ever reach the
/// proxied client; the recorder logs and drops.
#[derive(Debug, Error)]
pub enum DagError {
    /// Request or response bytes did not decode.
    #[error(transparent)]
    Parse(#[from] codec::CodecError),

    /// The decoded exchange cannot be recorded as a turn.
    #[error("malformed exchange: {0}")]
    MalformedExchange(String),

    /// The storage backend failed.
    #[error("storage backend: {0}")]
    Storage(String),

    /// A referenced node does not exist in the store.
    #[error("node {0} not found")]
    NotFound(String),
}

impl DagError {
    pub(crate) fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Storage errors are the only transient kind; the recorder retries them
    /// once before giving up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<rusqlite::Error> for DagError {
    fn from(err: rusqlite::Error) -> Self {
        Self::storage(err)
    }
}
