use bytes::Bytes;

use crate::protocol::openai_chat::{
    OpenAiChatResponse, OpenAiChoice, OpenAiDelta, OpenAiMessage, OpenAiStreamChoice,
    OpenAiStreamChunk, OpenAiUsage, ASSISTANT_ROLE, CHAT_COMPLETION_CHUNK_OBJECT,
    CHAT_COMPLETION_OBJECT,
};
use crate::stream::aggregate::AggregateSnapshot;
use crate::stream::sse::json_sse_frame;
use crate::util::{random_completion_id, random_fingerprint, unix_now_secs};

const SERVICE_TIER: &str = "default";

/// Identifiers shared by every object produced for one client request.
///
/// All chunks of a stream carry the same `id`, `created` and
/// `system_fingerprint`.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    pub id: String,
    pub created: u64,
    pub system_fingerprint: String,
    pub model: String,
}

impl OutboundEnvelope {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: random_completion_id(),
            created: unix_now_secs(),
            system_fingerprint: random_fingerprint(),
            model: model.into(),
        }
    }

    /// Build the non-streaming `chat.completion` object from a final snapshot.
    #[must_use]
    pub fn completion(&self, snapshot: &AggregateSnapshot<'_>) -> OpenAiChatResponse {
        OpenAiChatResponse {
            id: self.id.clone(),
            object: CHAT_COMPLETION_OBJECT.to_string(),
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: self.system_fingerprint.clone(),
            choices: vec![OpenAiChoice {
                index: 0,
                message: OpenAiMessage {
                    role: ASSISTANT_ROLE.to_string(),
                    content: snapshot.full_content(),
                    refusal: None,
                    annotations: Vec::new(),
                },
                logprobs: None,
                finish_reason: snapshot.finish_reason.to_string(),
            }],
            usage: OpenAiUsage::from_counts(snapshot.prompt_tokens, snapshot.completion_tokens),
            service_tier: SERVICE_TIER.to_string(),
        }
    }

    fn chunk<'a>(
        &'a self,
        delta: OpenAiDelta<'a>,
        finish_reason: Option<&'a str>,
        usage: Option<OpenAiUsage>,
    ) -> OpenAiStreamChunk<'a> {
        OpenAiStreamChunk {
            id: &self.id,
            object: CHAT_COMPLETION_CHUNK_OBJECT,
            created: self.created,
            model: &self.model,
            system_fingerprint: &self.system_fingerprint,
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta,
                logprobs: None,
                finish_reason,
            }],
            usage,
        }
    }

    /// First frame of a stream: `delta = {"role":"assistant"}`.
    ///
    /// # Errors
    ///
    /// Returns the serialization error, which only occurs on a broken serializer.
    pub fn role_chunk(&self) -> Result<Bytes, serde_json::Error> {
        let delta = OpenAiDelta {
            role: Some(ASSISTANT_ROLE),
            content: None,
        };
        json_sse_frame(&self.chunk(delta, None, None))
    }

    /// One content frame per upstream fragment.
    ///
    /// # Errors
    ///
    /// Returns the serialization error, which only occurs on a broken serializer.
    pub fn content_chunk(&self, content: &str) -> Result<Bytes, serde_json::Error> {
        let delta = OpenAiDelta {
            role: None,
            content: Some(content),
        };
        json_sse_frame(&self.chunk(delta, None, None))
    }

    /// Closing frame with an empty delta and the final finish reason.
    ///
    /// # Errors
    ///
    /// Returns the serialization error, which only occurs on a broken serializer.
    pub fn terminal_chunk(&self, finish_reason: &str) -> Result<Bytes, serde_json::Error> {
        json_sse_frame(&self.chunk(OpenAiDelta::default(), Some(finish_reason), None))
    }

    /// Usage frame sent after the terminal frame when the client asked for it.
    ///
    /// # Errors
    ///
    /// Returns the serialization error, which only occurs on a broken serializer.
    pub fn usage_chunk(&self, snapshot: &AggregateSnapshot<'_>) -> Result<Bytes, serde_json::Error> {
        let usage = OpenAiUsage::from_counts(snapshot.prompt_tokens, snapshot.completion_tokens);
        let chunk = OpenAiStreamChunk {
            choices: Vec::new(),
            ..self.chunk(OpenAiDelta::default(), None, Some(usage))
        };
        json_sse_frame(&chunk)
    }
}
