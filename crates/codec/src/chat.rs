//! Canonical chat representation shared by every provider codec.
//!
//! Each codec decodes its wire format into these types. The canonical form is
//! deliberately small: it keeps exactly what the recorder hashes and stores,
//! while `raw` retains the original bytes and `extra` carries every top-level
//! field the codec did not interpret, so nothing is lost in translation.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arbitrary top-level fields a codec passed through without interpreting.
///
/// Backed by a `BTreeMap` so serialized output has a deterministic key order.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownFields(BTreeMap<String, Value>);

impl UnknownFields {
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Originating role of a message turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    #[serde(untagged)]
    Unknown(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Unknown(other) => other,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Role::User)
    }
}

/// Where an image block gets its pixels from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// One ordered element of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// A role plus its ordered content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn from_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Canonical textual projection: the text of every text block, in order.
    pub fn text(&self) -> String {
        let mut out = String::new();

        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }

        out
    }
}

/// Token accounting reported by a provider. Absence is distinguishable from
/// zero everywhere, since some providers omit counters entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
    #[serde(default)]
    pub cache_creation_tokens: Option<u32>,
    #[serde(default)]
    pub cache_read_tokens: Option<u32>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl Usage {
    pub fn is_empty(&self) -> bool {
        *self == Usage::default()
    }

    /// Fill `total_tokens` from prompt + completion when the wire omitted it.
    pub fn with_computed_total(mut self) -> Self {
        if self.total_tokens.is_none()
            && (self.prompt_tokens.is_some() || self.completion_tokens.is_some())
        {
            self.total_tokens = Some(
                self.prompt_tokens.unwrap_or_default() + self.completion_tokens.unwrap_or_default(),
            );
        }

        self
    }

    /// Overlay the populated counters of `other` onto `self`. Streaming
    /// protocols report usage piecemeal across frames.
    pub fn merge(&mut self, other: &Usage) {
        if other.prompt_tokens.is_some() {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens.is_some() {
            self.completion_tokens = other.completion_tokens;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        }
        if other.cache_creation_tokens.is_some() {
            self.cache_creation_tokens = other.cache_creation_tokens;
        }
        if other.cache_read_tokens.is_some() {
            self.cache_read_tokens = other.cache_read_tokens;
        }
        if other.duration_ms.is_some() {
            self.duration_ms = other.duration_ms;
        }
    }
}

/// A decoded chat request, independent of the wire format it arrived in.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub seed: Option<i64>,
    pub stream: Option<bool>,
    /// The original request bytes, verbatim.
    pub raw: Bytes,
    /// Top-level fields the codec did not interpret.
    pub extra: UnknownFields,
}

impl ChatRequest {
    /// The final message, which for a well-formed exchange is the user turn
    /// the assistant is answering.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// A decoded chat response, independent of the wire format it arrived in.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub model: String,
    /// The single assistant message of this exchange.
    pub message: Message,
    /// Provider-native stop reason string, untranslated.
    pub stop_reason: Option<String>,
    pub usage: Usage,
    /// False only for partial streaming chunks decoded in isolation.
    pub done: bool,
    pub created_at: jiff::Timestamp,
    /// The original response bytes, verbatim.
    pub raw: Bytes,
    /// Top-level fields the codec did not interpret.
    pub extra: UnknownFields,
}

/// One decoded frame of a streamed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub delta_text: String,
    pub done: bool,
    pub model: Option<String>,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
}
