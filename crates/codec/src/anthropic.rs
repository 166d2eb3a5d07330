//! Decoder for the Anthropic Messages API wire format.
//!
//! Requests carry `messages` with string-or-block content, an optional
//! `system` prompt that may itself be a string or an array of text blocks,
//! and `stop_sequences`. Streaming uses typed SSE events: `message_start`,
//! `content_block_delta`, `message_delta` and a terminal `message_stop`.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    chat::{
        ChatRequest, ChatResponse, ContentBlock, ImageSource, Message, Role, StreamChunk,
        UnknownFields, Usage,
    },
    error::CodecResult,
};

pub(crate) const NAME: &str = "anthropic";

#[derive(Debug, Deserialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<InputMessage>,
    #[serde(default)]
    system: Option<SystemPrompt>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    top_k: Option<u32>,
    #[serde(default)]
    stop_sequences: Vec<String>,
    #[serde(default)]
    stream: Option<bool>,

    #[serde(flatten)]
    extra: UnknownFields,
}

#[derive(Debug, Deserialize)]
struct InputMessage {
    role: Role,
    content: MessageContent,
}

/// Message content is either a bare string or structured blocks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Image {
        source: Value,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
    },
    #[serde(untagged)]
    Unknown(Value),
}

/// The system prompt may be a string or an array of `{type: "text"}` blocks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Deserialize)]
struct SystemBlock {
    text: String,
}

impl SystemPrompt {
    fn joined(self) -> String {
        match self {
            SystemPrompt::Text(text) => text,
            SystemPrompt::Blocks(blocks) => blocks
                .into_iter()
                .map(|block| block.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn convert_content(content: MessageContent) -> Vec<ContentBlock> {
    match content {
        MessageContent::Text(text) => vec![ContentBlock::text(text)],
        MessageContent::Blocks(blocks) => blocks.into_iter().filter_map(convert_block).collect(),
    }
}

fn convert_block(block: WireBlock) -> Option<ContentBlock> {
    match block {
        WireBlock::Text { text } => Some(ContentBlock::Text { text }),
        WireBlock::Image { source } => serde_json::from_value::<ImageSource>(source)
            .ok()
            .map(|source| ContentBlock::Image { source }),
        WireBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse { id, name, input }),
        WireBlock::ToolResult {
            tool_use_id,
            content,
        } => Some(ContentBlock::ToolResult {
            tool_use_id,
            content,
        }),
        WireBlock::Unknown(_) => None,
    }
}

pub(crate) fn parse_request(bytes: &[u8]) -> CodecResult<ChatRequest> {
    let wire: MessagesRequest = serde_json::from_slice(bytes)?;

    let messages = wire
        .messages
        .into_iter()
        .map(|message| Message::new(message.role, convert_content(message.content)))
        .collect();

    Ok(ChatRequest {
        model: wire.model,
        messages,
        system: wire.system.map(SystemPrompt::joined),
        max_tokens: wire.max_tokens,
        temperature: wire.temperature,
        top_p: wire.top_p,
        top_k: wire.top_k,
        stop_sequences: wire.stop_sequences,
        seed: None,
        stream: wire.stream,
        raw: Bytes::copy_from_slice(bytes),
        extra: wire.extra,
    })
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    #[serde(default)]
    role: Option<Role>,
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,

    #[serde(flatten)]
    extra: UnknownFields,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u32>,
    #[serde(default)]
    cache_read_input_tokens: Option<u32>,
}

impl From<WireUsage> for Usage {
    // No computed total here: stream deltas report counters piecemeal, and
    // a half-filled total would survive the merge. Totals are derived once
    // a response is complete.
    fn from(wire: WireUsage) -> Self {
        Usage {
            prompt_tokens: wire.input_tokens,
            completion_tokens: wire.output_tokens,
            cache_creation_tokens: wire.cache_creation_input_tokens,
            cache_read_tokens: wire.cache_read_input_tokens,
            ..Default::default()
        }
    }
}

pub(crate) fn parse_response(bytes: &[u8]) -> CodecResult<ChatResponse> {
    let wire: MessagesResponse = serde_json::from_slice(bytes)?;

    let role = wire.role.unwrap_or(Role::Assistant);
    let content = wire
        .content
        .into_iter()
        .filter_map(convert_block)
        .collect::<Vec<_>>();

    Ok(ChatResponse {
        model: wire.model,
        message: Message::new(role, content),
        stop_reason: wire.stop_reason,
        usage: wire
            .usage
            .map(Usage::from)
            .unwrap_or_default()
            .with_computed_total(),
        done: true,
        created_at: jiff::Timestamp::now(),
        raw: Bytes::copy_from_slice(bytes),
        extra: wire.extra,
    })
}

/// Typed SSE events of the Anthropic streaming protocol. Unknown event types
/// are tolerated so newer API revisions don't break reassembly.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StreamMessageStart,
    },
    ContentBlockStart {
        #[allow(dead_code)]
        index: u32,
    },
    ContentBlockDelta {
        #[allow(dead_code)]
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        #[allow(dead_code)]
        error: Value,
    },
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Deserialize)]
struct StreamMessageStart {
    model: String,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        #[allow(dead_code)]
        partial_json: String,
    },
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Parse one SSE `data:` payload. Returns `None` for frames that carry no
/// recordable signal (pings, block boundaries, unknown events).
pub(crate) fn parse_stream_chunk(frame: &str) -> CodecResult<Option<StreamChunk>> {
    let event: StreamEvent = serde_json::from_str(frame)?;

    let chunk = match event {
        StreamEvent::MessageStart { message } => Some(StreamChunk {
            model: Some(message.model),
            usage: message.usage.map(Usage::from),
            ..Default::default()
        }),
        StreamEvent::ContentBlockDelta { delta, .. } => match delta {
            BlockDelta::TextDelta { text } => Some(StreamChunk {
                delta_text: text,
                ..Default::default()
            }),
            BlockDelta::InputJsonDelta { .. } | BlockDelta::Unknown(_) => None,
        },
        StreamEvent::MessageDelta { delta, usage } => Some(StreamChunk {
            stop_reason: delta.stop_reason,
            usage: usage.map(Usage::from),
            ..Default::default()
        }),
        StreamEvent::MessageStop => Some(StreamChunk {
            done: true,
            ..Default::default()
        }),
        StreamEvent::ContentBlockStart { .. }
        | StreamEvent::ContentBlockStop { .. }
        | StreamEvent::Ping
        | StreamEvent::Error { .. }
        | StreamEvent::Unknown(_) => None,
    };

    Ok(chunk)
}
