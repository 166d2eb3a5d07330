//! Decoder for the OpenAI Chat Completions wire format.
//!
//! Content may be a string or an array of typed parts, tool calls arrive as
//! `tool_calls[]` with JSON-encoded argument strings, and a `role: "tool"`
//! message answers a call by `tool_call_id`. Streaming is SSE with
//! `data: {...}` chunks and a terminating `data: [DONE]`.

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

pub(crate) const NAME: &str = "openai";

pub(crate) const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    stop: Option<StopSequences>,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default)]
    stream: Option<bool>,

    #[serde(flatten)]
    extra: UnknownFields,
}

/// `stop` is a scalar or an array of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(stop) => vec![stop],
            StopSequences::Many(stops) => stops,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default)]
    tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// The arguments object, JSON-encoded as a string on the wire.
    #[serde(default)]
    arguments: String,
}

fn convert_message(wire: WireMessage) -> Message {
    let mut content = Vec::new();

    if let Some(tool_call_id) = wire.tool_call_id {
        // A tool role message answers a previous call; its content is the
        // opaque tool output.
        let output = match wire.content {
            Some(WireContent::Text(text)) => Value::String(text),
            Some(WireContent::Parts(parts)) => Value::String(collect_part_text(parts)),
            None => Value::Null,
        };

        content.push(ContentBlock::ToolResult {
            tool_use_id: tool_call_id,
            content: output,
        });

        return Message::new(wire.role, content);
    }

    match wire.content {
        Some(WireContent::Text(text)) => content.push(ContentBlock::text(text)),
        Some(WireContent::Parts(parts)) => {
            for part in parts {
                match part {
                    WirePart::Text { text } => content.push(ContentBlock::Text { text }),
                    WirePart::ImageUrl { image_url } => content.push(ContentBlock::Image {
                        source: ImageSource::Url { url: image_url.url },
                    }),
                    WirePart::Unknown(_) => {}
                }
            }
        }
        None => {}
    }

    for call in wire.tool_calls.unwrap_or_default() {
        // Arguments are a JSON-encoded string; keep the raw string when it
        // does not parse.
        let input = serde_json::from_str(&call.function.arguments)
            .unwrap_or_else(|_| Value::String(call.function.arguments));

        content.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    Message::new(wire.role, content)
}

fn collect_part_text(parts: Vec<WirePart>) -> String {
    let mut out = String::new();

    for part in parts {
        if let WirePart::Text { text } = part {
            out.push_str(&text);
        }
    }

    out
}

pub(crate) fn parse_request(bytes: &[u8]) -> CodecResult<ChatRequest> {
    let wire: ChatCompletionRequest = serde_json::from_slice(bytes)?;

    let mut messages = wire.messages.into_iter().map(convert_message).peekable();

    // Leading system messages become the canonical system prompt, so the
    // message sequence lines up with providers that carry `system` out of
    // band.
    let mut system_parts = Vec::new();
    while matches!(
        messages.peek(),
        Some(message) if message.role == Role::System
    ) {
        if let Some(message) = messages.next() {
            system_parts.push(message.text());
        }
    }

    Ok(ChatRequest {
        model: wire.model,
        messages: messages.collect(),
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        },
        max_tokens: wire.max_tokens,
        temperature: wire.temperature,
        top_p: wire.top_p,
        top_k: None,
        stop_sequences: wire.stop.map(StopSequences::into_vec).unwrap_or_default(),
        seed: wire.seed,
        stream: wire.stream,
        raw: Bytes::copy_from_slice(bytes),
        extra: wire.extra,
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    created: Option<i64>,

    #[serde(flatten)]
    extra: UnknownFields,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl From<WireUsage> for Usage {
    fn from(wire: WireUsage) -> Self {
        Usage {
            prompt_tokens: wire.prompt_tokens,
            completion_tokens: wire.completion_tokens,
            total_tokens: wire.total_tokens,
            ..Default::default()
        }
    }
}

pub(crate) fn parse_response(bytes: &[u8]) -> CodecResult<ChatResponse> {
    let wire: ChatCompletionResponse = serde_json::from_slice(bytes)?;

    let mut choices = wire.choices.into_iter();
    let choice = choices
        .next()
        .ok_or_else(|| CodecError::malformed(NAME, "response has no choices"))?;

    let created_at = wire
        .created
        .and_then(|seconds| jiff::Timestamp::from_second(seconds).ok())
        .unwrap_or_else(jiff::Timestamp::now);

    Ok(ChatResponse {
        model: wire.model.unwrap_or_default(),
        message: convert_message(choice.message),
        stop_reason: choice.finish_reason,
        usage: wire
            .usage
            .map(Usage::from)
            .unwrap_or_default()
            .with_computed_total(),
        done: true,
        created_at,
        raw: Bytes::copy_from_slice(bytes),
        extra: wire.extra,
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one SSE `data:` payload. The terminal frame is the literal
/// `[DONE]` marker rather than JSON.
pub(crate) fn parse_stream_chunk(frame: &str) -> CodecResult<Option<StreamChunk>> {
    if frame.trim() == DONE_MARKER {
        return Ok(Some(StreamChunk {
            done: true,
            ..Default::default()
        }));
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(frame)?;

    let mut out = StreamChunk {
        model: chunk.model,
        usage: chunk.usage.map(Usage::from),
        ..Default::default()
    };

    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(content) = choice.delta.content {
            out.delta_text = content;
        }
        out.stop_reason = choice.finish_reason;
    }

    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn request_with_system_and_stop_scalar() {
        let body = indoc! {r#"
            {
              "model": "gpt-4o",
              "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
              ],
              "stop": "END",
              "seed": 7,
              "user": "u-1"
            }
        "#};

        let request = parse_request(body.as_bytes()).unwrap();

        assert_eq!(request.system.as_deref(), Some("be brief"));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.stop_sequences, vec!["END".to_string()]);
        assert_eq!(request.seed, Some(7));
        assert!(request.extra.contains_key("user"));
    }

    #[test]
    fn tool_calls_decode_into_tool_use_blocks() {
        let body = indoc! {r#"
            {
              "model": "gpt-4o",
              "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "tool_calls": [
                  {"id": "call_1", "type": "function",
                   "function": {"name": "get_weather", "arguments": "{\"city\":\"Berlin\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "13C"}
              ]
            }
        "#};

        let request = parse_request(body.as_bytes()).unwrap();

        assert_eq!(
            request.messages[1].content,
            vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "get_weather".into(),
                input: serde_json::json!({"city": "Berlin"}),
            }]
        );
        assert_eq!(
            request.messages[2].content,
            vec![ContentBlock::ToolResult {
                tool_use_id: "call_1".into(),
                content: serde_json::json!("13C"),
            }]
        );
    }

    #[test]
    fn image_url_parts() {
        let body = indoc! {r#"
            {
              "model": "gpt-4o",
              "messages": [
                {"role": "user", "content": [
                  {"type": "text", "text": "what is this?"},
                  {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}}
                ]}
              ]
            }
        "#};

        let request = parse_request(body.as_bytes()).unwrap();

        assert_eq!(
            request.messages[0].content[1],
            ContentBlock::Image {
                source: ImageSource::Url {
                    url: "https://example.com/cat.png".into()
                }
            }
        );
    }

    #[test]
    fn response_decodes_first_choice() {
        let body = indoc! {r#"
            {
              "id": "chatcmpl-1",
              "model": "gpt-4o",
              "created": 1719000000,
              "choices": [
                {"index": 0,
                 "message": {"role": "assistant", "content": "hello"},
                 "finish_reason": "stop"}
              ],
              "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}
            }
        "#};

        let response = parse_response(body.as_bytes()).unwrap();

        assert_eq!(response.message.text(), "hello");
        assert_eq!(response.stop_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.total_tokens, Some(11));
        assert!(response.extra.contains_key("id"));
    }

    #[test]
    fn empty_choices_is_malformed() {
        let body = r#"{"model":"gpt-4o","choices":[]}"#;
        let err = parse_response(body.as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }

    #[test]
    fn stream_chunks_and_done_marker() {
        let frame = r#"{"id":"chatcmpl-1","model":"gpt-4o","choices":[{"index":0,"delta":{"content":"hi"},"finish_reason":null}]}"#;
        let chunk = parse_stream_chunk(frame).unwrap().unwrap();
        assert_eq!(chunk.delta_text, "hi");
        assert!(!chunk.done);

        let done = parse_stream_chunk("[DONE]").unwrap().unwrap();
        assert!(done.done);
    }
}
