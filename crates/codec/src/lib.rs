//! Provider codecs: decoding LLM chat wire formats into one canonical form.
//!
//! The proxy forwards bytes untouched; these codecs exist solely so the
//! recorder can understand what passed through. Each variant decodes one
//! provider's request/response/stream format into [`ChatRequest`] and
//! [`ChatResponse`], keeping the original bytes in `raw` and uninterpreted
//! top-level fields in `extra`. Dispatch is a closed enum selected per route
//! by configuration; [`ProviderCodec::BestEffort`] is the fallback that never
//! fails on JSON input.

mod anthropic;
mod best_effort;
mod chat;
mod error;
mod ollama;
mod openai;
mod stream;

pub use chat::{
    ChatRequest, ChatResponse, ContentBlock, ImageSource, Message, Role, StreamChunk,
    UnknownFields, Usage,
};
pub use error::{CodecError, CodecResult};

/// The set of wire formats the proxy can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCodec {
    Anthropic,
    OpenAi,
    Ollama,
    BestEffort,
}

impl ProviderCodec {
    /// Resolve a codec from its configured identifier.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            "best-effort" | "best_effort" => Some(Self::BestEffort),
            _ => None,
        }
    }

    /// Canonical provider identifier, as stored on every recorded node.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anthropic => anthropic::NAME,
            Self::OpenAi => openai::NAME,
            Self::Ollama => ollama::NAME,
            Self::BestEffort => best_effort::NAME,
        }
    }

    /// Decode a request body into the canonical form.
    pub fn parse_request(&self, bytes: &[u8]) -> CodecResult<ChatRequest> {
        match self {
            Self::Anthropic => anthropic::parse_request(bytes),
            Self::OpenAi => openai::parse_request(bytes),
            Self::Ollama => ollama::parse_request(bytes),
            Self::BestEffort => best_effort::parse_request(bytes),
        }
    }

    /// Decode a response body into the canonical form.
    ///
    /// Accepts both buffered JSON documents and complete captured streams:
    /// when the plain parse fails and the body looks like SSE or NDJSON, the
    /// captured frames are reassembled into a single response.
    pub fn parse_response(&self, bytes: &[u8]) -> CodecResult<ChatResponse> {
        let direct = match self {
            Self::Anthropic => anthropic::parse_response(bytes),
            Self::OpenAi => openai::parse_response(bytes),
            Self::Ollama => ollama::parse_response(bytes),
            Self::BestEffort => return best_effort::parse_response(bytes),
        };

        match direct {
            Ok(response) => Ok(response),
            Err(err) => {
                let body = std::str::from_utf8(bytes).map_err(|_| CodecError::NotUtf8)?;

                if stream::looks_like_stream(*self, body)
                    || matches!(err, CodecError::IncompleteStream)
                {
                    stream::reassemble_response(*self, bytes)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Decode one streaming frame: an SSE `data:` payload for Anthropic and
    /// OpenAI, an NDJSON line for Ollama. `Ok(None)` marks a frame that
    /// carries nothing recordable (keep-alives, block boundaries).
    pub fn parse_stream_chunk(&self, frame: &str) -> CodecResult<Option<StreamChunk>> {
        match self {
            Self::Anthropic => anthropic::parse_stream_chunk(frame),
            Self::OpenAi => openai::parse_stream_chunk(frame),
            Self::Ollama => ollama::parse_stream_chunk(frame),
            Self::BestEffort => Err(CodecError::StreamingUnsupported(best_effort::NAME)),
        }
    }
}

impl std::fmt::Display for ProviderCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_names_round_trip() {
        for codec in [
            ProviderCodec::Anthropic,
            ProviderCodec::OpenAi,
            ProviderCodec::Ollama,
            ProviderCodec::BestEffort,
        ] {
            assert_eq!(ProviderCodec::from_name(codec.name()), Some(codec));
        }

        assert_eq!(ProviderCodec::from_name("bedrock"), None);
    }

    #[test]
    fn buffered_and_streamed_bodies_share_an_entry_point() {
        let buffered = br#"{"model":"llama3","message":{"role":"assistant","content":"hello"},"done":true}"#;
        let response = ProviderCodec::Ollama.parse_response(buffered).unwrap();
        assert_eq!(response.message.text(), "hello");

        let streamed = concat!(
            "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"hel\"},\"done\":false}\n",
            "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":true}\n",
        );
        let response = ProviderCodec::Ollama
            .parse_response(streamed.as_bytes())
            .unwrap();
        assert_eq!(response.message.text(), "hello");
    }

    #[test]
    fn best_effort_has_no_stream_format() {
        let err = ProviderCodec::BestEffort
            .parse_stream_chunk("{}")
            .unwrap_err();
        assert!(matches!(err, CodecError::StreamingUnsupported(_)));
    }

    #[test]
    fn raw_always_equals_input() {
        let body = br#"{"model":"m","messages":[{"role":"user","content":"hi"}]}"#;

        for codec in [
            ProviderCodec::Anthropic,
            ProviderCodec::OpenAi,
            ProviderCodec::Ollama,
            ProviderCodec::BestEffort,
        ] {
            let request = codec.parse_request(body).unwrap();
            assert_eq!(request.raw.as_ref(), body, "{codec} changed raw bytes");
        }
    }
}
