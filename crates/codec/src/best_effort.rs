//! Fallback decoder for unknown wire formats.
//!
//! Never fails: it pulls out whatever recognizable fields it can find and
//! shelves everything else in `extra`. A body that is not even JSON yields an
//! empty canonical value with `extra["parse_error"]` set and `raw` intact.

use bytes::Bytes;
use serde_json::{Map, Value, json};

use crate::{
    chat::{ChatRequest, ChatResponse, ContentBlock, Message, Role, UnknownFields, Usage},
    error::CodecResult,
};

pub(crate) const NAME: &str = "best-effort";

fn role_from_value(value: Option<&Value>) -> Role {
    match value.and_then(Value::as_str) {
        Some("system") => Role::System,
        Some("assistant") => Role::Assistant,
        Some("tool") => Role::Tool,
        Some("user") | None => Role::User,
        Some(other) => Role::Unknown(other.to_string()),
    }
}

/// Pull text out of a content value: a string, or an array whose elements are
/// strings or objects with a `text` member (OpenAI parts and Anthropic blocks
/// both match).
fn text_from_content(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let mut out = String::new();

            for item in items {
                match item {
                    Value::String(text) => out.push_str(text),
                    Value::Object(object) => {
                        if let Some(text) = object.get("text").and_then(Value::as_str) {
                            out.push_str(text);
                        }
                    }
                    _ => {}
                }
            }

            out
        }
        _ => String::new(),
    }
}

fn message_from_value(value: &Value) -> Message {
    let role = role_from_value(value.get("role"));
    let text = value.get("content").map(text_from_content).unwrap_or_default();

    Message::new(role, vec![ContentBlock::text(text)])
}

/// Recognize usage counters in OpenAI, Anthropic, or Ollama shape.
fn usage_from_object(object: &Map<String, Value>) -> Usage {
    fn counter(value: Option<&Value>) -> Option<u32> {
        value.and_then(Value::as_u64).map(|count| count as u32)
    }

    let usage = object.get("usage").and_then(Value::as_object);

    let prompt = usage
        .and_then(|usage| {
            counter(usage.get("prompt_tokens")).or_else(|| counter(usage.get("input_tokens")))
        })
        .or_else(|| counter(object.get("prompt_eval_count")));
    let completion = usage
        .and_then(|usage| {
            counter(usage.get("completion_tokens")).or_else(|| counter(usage.get("output_tokens")))
        })
        .or_else(|| counter(object.get("eval_count")));
    let total = usage.and_then(|usage| counter(usage.get("total_tokens")));

    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
        ..Default::default()
    }
    .with_computed_total()
}

fn parse_error_fields(err: &serde_json::Error) -> UnknownFields {
    let mut extra = UnknownFields::default();
    extra.insert("parse_error", json!(err.to_string()));
    extra
}

pub(crate) fn parse_request(bytes: &[u8]) -> CodecResult<ChatRequest> {
    let mut request = ChatRequest {
        model: String::new(),
        messages: Vec::new(),
        system: None,
        max_tokens: None,
        temperature: None,
        top_p: None,
        top_k: None,
        stop_sequences: Vec::new(),
        seed: None,
        stream: None,
        raw: Bytes::copy_from_slice(bytes),
        extra: UnknownFields::default(),
    };

    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(err) => {
            request.extra = parse_error_fields(&err);
            return Ok(request);
        }
    };

    let Value::Object(object) = value else {
        request.extra.insert("value", value);
        return Ok(request);
    };

    for (key, value) in object {
        // Recognized members are lifted into the canonical form; the match
        // hands everything else back so it lands in `extra`.
        let value = match (key.as_str(), value) {
            ("model", Value::String(model)) => {
                request.model = model;
                continue;
            }
            ("messages", Value::Array(messages)) => {
                request.messages = messages.iter().map(message_from_value).collect();
                continue;
            }
            ("prompt" | "input", value) if request.messages.is_empty() => {
                // A bare prompt becomes a single user message.
                request
                    .messages
                    .push(Message::from_text(Role::User, text_from_content(&value)));
                continue;
            }
            ("system", value) => {
                request.system = Some(text_from_content(&value));
                continue;
            }
            ("stream", Value::Bool(stream)) => {
                request.stream = Some(stream);
                continue;
            }
            (_, value) => value,
        };

        request.extra.insert(key, value);
    }

    Ok(request)
}

pub(crate) fn parse_response(bytes: &[u8]) -> CodecResult<ChatResponse> {
    let mut response = ChatResponse {
        model: String::new(),
        message: Message::new(Role::Assistant, Vec::new()),
        stop_reason: None,
        usage: Usage::default(),
        done: true,
        created_at: jiff::Timestamp::now(),
        raw: Bytes::copy_from_slice(bytes),
        extra: UnknownFields::default(),
    };

    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(err) => {
            response.extra = parse_error_fields(&err);
            return Ok(response);
        }
    };

    let Value::Object(object) = value else {
        response.extra.insert("value", value);
        return Ok(response);
    };

    response.usage = usage_from_object(&object);

    if let Some(model) = object.get("model").and_then(Value::as_str) {
        response.model = model.to_string();
    }

    response.stop_reason = ["stop_reason", "finish_reason", "done_reason"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_string);

    if let Some(done) = object.get("done").and_then(Value::as_bool) {
        response.done = done;
    }

    // Assistant text, in order of preference: OpenAI choices, Ollama message,
    // Anthropic content array.
    let first_choice = object
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());

    if let Some(choice) = first_choice {
        if let Some(message) = choice.get("message") {
            response.message = message_from_value(message);
        }
        if response.stop_reason.is_none() {
            response.stop_reason = choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    } else if let Some(message) = object.get("message") {
        response.message = message_from_value(message);
    } else if let Some(content) = object.get("content") {
        response.message = Message::new(
            Role::Assistant,
            vec![ContentBlock::text(text_from_content(content))],
        );
    }

    let interpreted = [
        "model",
        "choices",
        "message",
        "content",
        "usage",
        "stop_reason",
        "finish_reason",
        "done_reason",
        "done",
        "prompt_eval_count",
        "eval_count",
    ];

    for (key, value) in object {
        if !interpreted.contains(&key.as_str()) {
            response.extra.insert(key, value);
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_request_sets_parse_error_and_keeps_raw() {
        let body = b"not json at all";
        let request = parse_request(body).unwrap();

        assert!(request.extra.contains_key("parse_error"));
        assert_eq!(request.raw.as_ref(), body);
        assert!(request.messages.is_empty());
    }

    #[test]
    fn bare_prompt_becomes_a_user_message() {
        let body = br#"{"model":"mystery-1","prompt":"hi there","n":2}"#;
        let request = parse_request(body).unwrap();

        assert_eq!(request.model, "mystery-1");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.messages[0].text(), "hi there");
        assert!(request.extra.contains_key("n"));
    }

    #[test]
    fn openai_shaped_response_is_recognized() {
        let body = br#"{"model":"m","choices":[{"message":{"role":"assistant","content":"yo"},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3},"obj":"x"}"#;
        let response = parse_response(body).unwrap();

        assert_eq!(response.message.text(), "yo");
        assert_eq!(response.stop_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.total_tokens, Some(3));
        assert!(response.extra.contains_key("obj"));
    }

    #[test]
    fn anthropic_shaped_content_array_is_recognized() {
        let body = br#"{"model":"m","content":[{"type":"text","text":"yo"}],"usage":{"input_tokens":4,"output_tokens":2}}"#;
        let response = parse_response(body).unwrap();

        assert_eq!(response.message.text(), "yo");
        assert_eq!(response.usage.total_tokens, Some(6));
    }

    #[test]
    fn ollama_counters_without_usage_object() {
        let body = br#"{"model":"llama3","message":{"role":"assistant","content":"yo"},"done":true,"prompt_eval_count":5,"eval_count":3}"#;
        let response = parse_response(body).unwrap();

        assert_eq!(response.usage.total_tokens, Some(8));
    }
}
