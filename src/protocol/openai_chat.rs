use serde::{Deserialize, Serialize};

pub const CHAT_COMPLETION_OBJECT: &str = "chat.completion";
pub const CHAT_COMPLETION_CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const ASSISTANT_ROLE: &str = "assistant";

/// `OpenAI` Chat Completion request wire type, reduced to the fields this
/// gateway reads. Sampling parameters are kept as raw JSON and forwarded
/// without interpretation.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    #[serde(default)]
    pub temperature: Option<serde_json::Value>,
    #[serde(default)]
    pub max_tokens: Option<serde_json::Value>,
}

impl ChatCompletionRequest {
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    #[must_use]
    pub fn include_usage(&self) -> bool {
        self.stream_options
            .as_ref()
            .and_then(|options| options.include_usage)
            .unwrap_or(false)
    }
}

/// Stream options for `include_usage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
}

/// Inbound message. `content` is either a string or an array of content parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

impl ChatMessage {
    /// Flatten the message content to plain text.
    ///
    /// Array content keeps only `text` parts, joined with newlines.
    #[must_use]
    pub fn text_content(&self) -> String {
        match &self.content {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(serde_json::Value::Array(parts)) => {
                let mut out = String::new();
                for text in parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(serde_json::Value::as_str))
                {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
                out
            }
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// `OpenAI` Chat Completion response wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub system_fingerprint: String,
    pub choices: Vec<OpenAiChoice>,
    pub usage: OpenAiUsage,
    pub service_tier: String,
}

/// A single choice in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChoice {
    pub index: u32,
    pub message: OpenAiMessage,
    pub logprobs: Option<serde_json::Value>,
    pub finish_reason: String,
}

/// Assistant message in a non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    pub content: String,
    pub refusal: Option<String>,
    pub annotations: Vec<serde_json::Value>,
}

/// Usage info, including the zeroed detail breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub prompt_tokens_details: PromptTokensDetails,
    pub completion_tokens_details: CompletionTokensDetails,
}

impl OpenAiUsage {
    #[must_use]
    pub fn from_counts(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            prompt_tokens_details: PromptTokensDetails::default(),
            completion_tokens_details: CompletionTokensDetails::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    pub cached_tokens: u64,
    pub audio_tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    pub reasoning_tokens: u64,
    pub audio_tokens: u64,
    pub accepted_prediction_tokens: u64,
    pub rejected_prediction_tokens: u64,
}

/// A streaming chunk. Borrows the per-request identifiers so every frame of a
/// stream serializes without cloning them.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamChunk<'a> {
    pub id: &'a str,
    pub object: &'static str,
    pub created: u64,
    pub model: &'a str,
    pub system_fingerprint: &'a str,
    pub choices: Vec<OpenAiStreamChoice<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
}

/// A choice within a stream chunk. `logprobs` and `finish_reason` serialize
/// as `null` when absent.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamChoice<'a> {
    pub index: u32,
    pub delta: OpenAiDelta<'a>,
    pub logprobs: Option<serde_json::Value>,
    pub finish_reason: Option<&'a str>,
}

/// Delta content within a stream choice.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OpenAiDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: ChatCompletionRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert!(!req.is_stream());
        assert!(!req.include_usage());
        assert!(req.temperature.is_none());
    }

    #[test]
    fn test_request_stream_options() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"messages":[],"stream":true,"stream_options":{"include_usage":true},"max_tokens":64}"#,
        )
        .unwrap();
        assert!(req.is_stream());
        assert!(req.include_usage());
        assert_eq!(req.max_tokens, Some(serde_json::json!(64)));
    }

    #[test]
    fn test_text_content_from_parts() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"a"},{"type":"image_url","image_url":{"url":"x"}},{"type":"text","text":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.text_content(), "a\nb");
    }

    #[test]
    fn test_text_content_null() {
        let msg: ChatMessage = serde_json::from_str(r#"{"role":"assistant","content":null}"#).unwrap();
        assert_eq!(msg.text_content(), "");
    }

    #[test]
    fn test_stream_chunk_serializes_null_fields() {
        let chunk = OpenAiStreamChunk {
            id: "chatcmpl-1",
            object: CHAT_COMPLETION_CHUNK_OBJECT,
            created: 1,
            model: "m",
            system_fingerprint: "fp_1",
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta: OpenAiDelta::default(),
                logprobs: None,
                finish_reason: None,
            }],
            usage: None,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["choices"][0]["delta"], serde_json::json!({}));
        assert!(json["choices"][0]["finish_reason"].is_null());
        assert!(json["choices"][0]["logprobs"].is_null());
        assert!(json.get("usage").is_none());
    }

    #[test]
    fn test_usage_total_and_details() {
        let usage = OpenAiUsage::from_counts(5, 2);
        let json = serde_json::to_value(usage).unwrap();
        assert_eq!(json["total_tokens"], 7);
        assert_eq!(json["prompt_tokens_details"]["cached_tokens"], 0);
        assert_eq!(
            json["completion_tokens_details"]["rejected_prediction_tokens"],
            0
        );
    }
}
