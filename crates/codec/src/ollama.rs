//! Decoder for the Ollama chat wire format.
//!
//! Generation parameters nest under `options`, images ride as a sibling
//! base64 `images[]` list on the message, and streaming is newline-delimited
//! JSON where the final object carries `done: true` plus the eval counters.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    chat::{
        ChatRequest, ChatResponse, ContentBlock, ImageSource, Message, Role, StreamChunk,
        UnknownFields, Usage,
    },
    error::{CodecError, CodecResult},
};

pub(crate) const NAME: &str = "ollama";

/// Media type recorded for Ollama images, which arrive as bare base64 with no
/// declared type.
const UNKNOWN_IMAGE_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
struct ChatRequestWire {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(default)]
    options: Option<Options>,
    #[serde(default)]
    stream: Option<bool>,

    #[serde(flatten)]
    extra: UnknownFields,
}

#[derive(Debug, Default, Deserialize)]
struct Options {
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    top_k: Option<u32>,
    #[serde(default)]
    num_predict: Option<u32>,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default)]
    stop: Option<StopSequences>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StopSequences {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default)]
    images: Option<Vec<String>>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// Unlike OpenAI, arguments arrive as a JSON object, not a string.
    #[serde(default)]
    arguments: Value,
}

fn convert_message(wire: WireMessage) -> Message {
    let mut content = Vec::new();

    if !wire.content.is_empty() {
        content.push(ContentBlock::text(wire.content));
    }

    for data in wire.images.unwrap_or_default() {
        content.push(ContentBlock::Image {
            source: ImageSource::Base64 {
                media_type: UNKNOWN_IMAGE_MEDIA_TYPE.to_string(),
                data,
            },
        });
    }

    for call in wire.tool_calls.unwrap_or_default() {
        content.push(ContentBlock::ToolUse {
            id: String::new(),
            name: call.function.name,
            input: call.function.arguments,
        });
    }

    Message::new(wire.role, content)
}

pub(crate) fn parse_request(bytes: &[u8]) -> CodecResult<ChatRequest> {
    let wire: ChatRequestWire = serde_json::from_slice(bytes)?;
    let options = wire.options.unwrap_or_default();

    Ok(ChatRequest {
        model: wire.model,
        messages: wire.messages.into_iter().map(convert_message).collect(),
        system: None,
        max_tokens: options.num_predict,
        temperature: options.temperature,
        top_p: options.top_p,
        top_k: options.top_k,
        stop_sequences: match options.stop {
            Some(StopSequences::One(stop)) => vec![stop],
            Some(StopSequences::Many(stops)) => stops,
            None => Vec::new(),
        },
        seed: options.seed,
        stream: wire.stream,
        raw: Bytes::copy_from_slice(bytes),
        extra: wire.extra,
    })
}

#[derive(Debug, Deserialize)]
struct ChatResponseWire {
    model: String,
    message: WireMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    /// Wall-clock duration of the whole request, in nanoseconds.
    #[serde(default)]
    total_duration: Option<u64>,

    #[serde(flatten)]
    extra: UnknownFields,
}

impl ChatResponseWire {
    fn usage(&self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_eval_count,
            completion_tokens: self.eval_count,
            duration_ms: self.total_duration.map(|nanos| nanos / 1_000_000),
            ..Default::default()
        }
    }

    fn created_at(&self) -> jiff::Timestamp {
        self.created_at
            .as_deref()
            .and_then(|stamp| stamp.parse().ok())
            .unwrap_or_else(jiff::Timestamp::now)
    }
}

pub(crate) fn parse_response(bytes: &[u8]) -> CodecResult<ChatResponse> {
    let wire: ChatResponseWire = serde_json::from_slice(bytes)?;

    // A single object with done=false is a stream fragment, not a response.
    if !wire.done {
        return Err(CodecError::IncompleteStream);
    }

    let usage = wire.usage().with_computed_total();
    let created_at = wire.created_at();

    Ok(ChatResponse {
        model: wire.model,
        message: convert_message(wire.message),
        stop_reason: wire.done_reason,
        usage,
        done: true,
        created_at,
        raw: Bytes::copy_from_slice(bytes),
        extra: wire.extra,
    })
}

/// Parse one NDJSON line of a streamed chat. Every line shares the response
/// shape; only the final one has `done: true` and the counters.
pub(crate) fn parse_stream_chunk(frame: &str) -> CodecResult<Option<StreamChunk>> {
    let wire: ChatResponseWire = serde_json::from_str(frame)?;

    let usage = wire.usage();

    Ok(Some(StreamChunk {
        delta_text: wire.message.content,
        done: wire.done,
        model: Some(wire.model),
        stop_reason: wire.done_reason,
        usage: if usage.is_empty() { None } else { Some(usage) },
    }))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn request_with_options() {
        let body = indoc! {r#"
            {
              "model": "llama3",
              "messages": [{"role": "user", "content": "hi"}],
              "options": {"temperature": 0.2, "num_predict": 128, "stop": ["END"]},
              "keep_alive": "5m"
            }
        "#};

        let request = parse_request(body.as_bytes()).unwrap();

        assert_eq!(request.model, "llama3");
        assert_eq!(request.max_tokens, Some(128));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.stop_sequences, vec!["END".to_string()]);
        assert!(request.extra.contains_key("keep_alive"));
    }

    #[test]
    fn images_ride_as_siblings() {
        let body = indoc! {r#"
            {
              "model": "llava",
              "messages": [{"role": "user", "content": "describe", "images": ["aGVsbG8="]}]
            }
        "#};

        let request = parse_request(body.as_bytes()).unwrap();

        assert_eq!(
            request.messages[0].content[1],
            ContentBlock::Image {
                source: ImageSource::Base64 {
                    media_type: UNKNOWN_IMAGE_MEDIA_TYPE.into(),
                    data: "aGVsbG8=".into(),
                }
            }
        );
    }

    #[test]
    fn response_with_counters() {
        let body = indoc! {r#"
            {
              "model": "llama3",
              "created_at": "2024-12-24T03:24:43.041107573Z",
              "message": {"role": "assistant", "content": "hello"},
              "done": true,
              "done_reason": "stop",
              "prompt_eval_count": 5,
              "eval_count": 3,
              "total_duration": 1500000000
            }
        "#};

        let response = parse_response(body.as_bytes()).unwrap();

        assert_eq!(response.message.text(), "hello");
        assert_eq!(response.usage.prompt_tokens, Some(5));
        assert_eq!(response.usage.completion_tokens, Some(3));
        assert_eq!(response.usage.total_tokens, Some(8));
        assert_eq!(response.usage.duration_ms, Some(1500));
        assert_eq!(response.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn partial_object_is_an_incomplete_stream() {
        let body = r#"{"model":"llama3","message":{"role":"assistant","content":"he"},"done":false}"#;
        let err = parse_response(body.as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::IncompleteStream));
    }

    #[test]
    fn stream_chunk_carries_delta() {
        let frame = r#"{"model":"llama3","message":{"role":"assistant","content":"he"},"done":false}"#;
        let chunk = parse_stream_chunk(frame).unwrap().unwrap();
        assert_eq!(chunk.delta_text, "he");
        assert!(!chunk.done);

        let last = r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true,"eval_count":3,"prompt_eval_count":5}"#;
        let chunk = parse_stream_chunk(last).unwrap().unwrap();
        assert!(chunk.done);

        let usage = chunk.usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(5));
        assert_eq!(usage.completion_tokens, Some(3));
    }
}
