//! Reassembly of captured streaming bodies.
//!
//! The proxy tees streamed responses into a byte buffer; by the time the
//! recorder sees them they are one contiguous body again. This module splits
//! that body back into frames (SSE events or NDJSON lines), runs each frame
//! through the codec's chunk parser, and folds the chunks into a complete
//! [`ChatResponse`]. A stream that never reached its terminal marker is
//! rejected rather than stored half-finished.

use bytes::Bytes;

use crate::{
    ProviderCodec,
    chat::{ChatResponse, Message, Role, Usage},
    error::{CodecError, CodecResult},
};

/// Extract the `data:` payloads of a Server-Sent-Events body, one entry per
/// event. Multi-line data is joined with newlines; comment and `event:`/`id:`
/// lines are dropped.
pub(crate) fn sse_data_frames(body: &str) -> Vec<String> {
    let mut frames = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            if !current.is_empty() {
                frames.push(current.join("\n"));
                current.clear();
            }
            continue;
        }

        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
        // `event:`, `id:`, `retry:` and comment lines carry no payload.
    }

    if !current.is_empty() {
        frames.push(current.join("\n"));
    }

    frames
}

/// Whether a captured body plausibly is a stream for the given codec rather
/// than a single buffered JSON document.
pub(crate) fn looks_like_stream(codec: ProviderCodec, body: &str) -> bool {
    match codec {
        ProviderCodec::Ollama => body.trim().lines().count() > 1,
        ProviderCodec::Anthropic | ProviderCodec::OpenAi => {
            let trimmed = body.trim_start();
            trimmed.starts_with("data:") || trimmed.starts_with("event:") || trimmed.starts_with(':')
        }
        ProviderCodec::BestEffort => false,
    }
}

/// Rebuild a complete response from a captured stream body.
///
/// Frames are fed through [`ProviderCodec::parse_stream_chunk`]; text deltas
/// concatenate in arrival order and usage counters overlay as they are
/// reported. Errors with [`CodecError::IncompleteStream`] when no frame
/// announced the end of the stream.
pub(crate) fn reassemble_response(codec: ProviderCodec, bytes: &[u8]) -> CodecResult<ChatResponse> {
    let body = std::str::from_utf8(bytes).map_err(|_| CodecError::NotUtf8)?;

    let frames: Vec<String> = match codec {
        ProviderCodec::Ollama => body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        _ => sse_data_frames(body),
    };

    let mut text = String::new();
    let mut usage = Usage::default();
    let mut model = String::new();
    let mut stop_reason = None;
    let mut done = false;

    for frame in &frames {
        let chunk = match codec.parse_stream_chunk(frame) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => continue,
            Err(err) => {
                // One undecodable frame does not invalidate the capture.
                log::debug!("skipping undecodable stream frame: {err}");
                continue;
            }
        };

        text.push_str(&chunk.delta_text);

        if let Some(chunk_model) = chunk.model
            && !chunk_model.is_empty()
        {
            model = chunk_model;
        }

        if let Some(chunk_usage) = &chunk.usage {
            usage.merge(chunk_usage);
        }

        if chunk.stop_reason.is_some() {
            stop_reason = chunk.stop_reason;
        }

        if chunk.done {
            done = true;
        }
    }

    if !done {
        return Err(CodecError::IncompleteStream);
    }

    Ok(ChatResponse {
        model,
        message: Message::from_text(Role::Assistant, text),
        stop_reason,
        usage: usage.with_computed_total(),
        done: true,
        created_at: jiff::Timestamp::now(),
        raw: Bytes::copy_from_slice(bytes),
        extra: Default::default(),
    })
}
