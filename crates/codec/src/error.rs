use thiserror::Error;

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Errors produced while decoding provider wire formats.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The body was not valid JSON at all.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The body was JSON but did not match the provider's schema.
    #[error("malformed {provider} payload: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },

    /// The body was not valid UTF-8, which every supported wire format requires.
    #[error("body is not valid UTF-8")]
    NotUtf8,

    /// The codec has no streaming wire format.
    #[error("streaming is not supported by the {0} codec")]
    StreamingUnsupported(&'static str),

    /// A captured stream ended without its terminal marker.
    #[error("streamed response ended without a terminal marker")]
    IncompleteStream,
}

impl CodecError {
    pub(crate) fn malformed(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider,
            message: message.into(),
        }
    }
}
