//! Decoder for the upstream's tagged-line stream protocol.
//!
//! Every line is `<tag>:<payload>`:
//! - `f` carries message metadata as a JSON object (`messageId`)
//! - `0` carries one content fragment as a quoted string
//! - `e` / `d` close a step / message with `finishReason` and `usage`
//!
//! Other tags are ignored.

use serde::Deserialize;
use serde_json::Value;

const TAG_DELIMITER: u8 = b':';

/// One semantic event decoded from a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaggedEvent {
    ContentFragment(String),
    MessageMeta(String),
    TerminalMeta(TerminalMeta),
}

/// End-of-turn metadata. `None` means "no update", never "reset".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalMeta {
    pub finish_reason: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// A line whose payload could not be decoded. Recovered locally by the caller.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON payload for tag '{tag}': {source}")]
    Json {
        tag: char,
        #[source]
        source: serde_json::Error,
    },
    #[error("content payload is not a quoted string")]
    UnquotedContent,
}

#[derive(Deserialize)]
struct MessageMetaPayload {
    #[serde(rename = "messageId", default)]
    message_id: Option<String>,
}

/// `e` / `d` payload. Fields are read loosely so an odd `usage` value never
/// costs the line its `finishReason`.
#[derive(Deserialize)]
struct TerminalPayload {
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<Value>,
    #[serde(default)]
    usage: Option<Value>,
}

/// Decode one complete line.
///
/// Returns `Ok(None)` for lines that carry nothing for this protocol: empty
/// lines, lines without a `:` delimiter, and unknown tags.
///
/// # Errors
///
/// Returns [`DecodeError`] when a known tag carries a malformed payload.
pub fn decode_line(line: &str) -> Result<Option<TaggedEvent>, DecodeError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(delimiter) = memchr::memchr(TAG_DELIMITER, line.as_bytes()) else {
        return Ok(None);
    };
    let tag = &line[..delimiter];
    let payload = &line[delimiter + 1..];

    match tag {
        "0" => decode_content(payload).map(|text| Some(TaggedEvent::ContentFragment(text))),
        "f" => {
            let meta: MessageMetaPayload = parse_json('f', payload)?;
            Ok(Some(TaggedEvent::MessageMeta(
                meta.message_id.unwrap_or_default(),
            )))
        }
        "e" | "d" => {
            let tag_char = if tag == "e" { 'e' } else { 'd' };
            let terminal: TerminalPayload = parse_json(tag_char, payload)?;
            Ok(Some(TaggedEvent::TerminalMeta(terminal.into())))
        }
        _ => {
            tracing::trace!(tag, "ignoring unknown upstream line tag");
            Ok(None)
        }
    }
}

fn parse_json<'a, T: Deserialize<'a>>(tag: char, payload: &'a str) -> Result<T, DecodeError> {
    serde_json::from_str(payload).map_err(|source| DecodeError::Json { tag, source })
}

/// Strip the wrapping quotes and turn every `\n` escape into a newline.
///
/// The upstream only escapes newlines inside content payloads, so no other
/// escape sequence is interpreted.
fn decode_content(payload: &str) -> Result<String, DecodeError> {
    let inner = payload
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or(DecodeError::UnquotedContent)?;

    if memchr::memmem::find(inner.as_bytes(), b"\\n").is_none() {
        return Ok(inner.to_string());
    }
    Ok(inner.replace("\\n", "\n"))
}

impl From<TerminalPayload> for TerminalMeta {
    fn from(payload: TerminalPayload) -> Self {
        let finish_reason = payload
            .finish_reason
            .as_ref()
            .and_then(Value::as_str)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);
        let (prompt_tokens, completion_tokens) = match payload.usage {
            None | Some(Value::Null) => (None, None),
            Some(usage) => (
                Some(token_count(usage.get("promptTokens"))),
                Some(token_count(usage.get("completionTokens"))),
            ),
        };
        Self {
            finish_reason,
            prompt_tokens,
            completion_tokens,
        }
    }
}

/// Missing, negative or non-numeric counts read as zero; fractional counts
/// are truncated.
fn token_count(value: Option<&Value>) -> u64 {
    let Some(value) = value else {
        return 0;
    };
    if let Some(count) = value.as_u64() {
        return count;
    }
    match value.as_f64() {
        Some(count) if count.is_finite() && count > 0.0 => count.trunc() as u64,
        _ => 0,
    }
}
