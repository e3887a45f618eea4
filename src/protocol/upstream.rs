//! Request-side wire types for the upstream chat service.

use serde::{Deserialize, Serialize};

use crate::protocol::openai_chat::ChatMessage;

const USER_ROLE: &str = "user";

/// Body of the upstream chat call.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamChatPayload {
    pub messages: Vec<UpstreamMessage>,
    pub id: String,
    #[serde(rename = "selectedChatModel")]
    pub selected_chat_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamMessage {
    pub role: String,
    pub content: String,
}

/// Response of the token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Flatten inbound messages to the upstream shape.
///
/// With `merge_user_turns`, a conversation of more than one message that
/// contains at least one user turn collapses into a single user message whose
/// content is every user turn joined with `\n`. Other roles are dropped in
/// that case. Otherwise messages pass through with their text content.
#[must_use]
pub fn build_upstream_messages(
    messages: &[ChatMessage],
    merge_user_turns: bool,
) -> Vec<UpstreamMessage> {
    if merge_user_turns && messages.len() > 1 {
        let mut user_turns = messages.iter().filter(|msg| msg.role == USER_ROLE).peekable();
        if user_turns.peek().is_some() {
            let joined = user_turns
                .map(ChatMessage::text_content)
                .collect::<Vec<_>>()
                .join("\n");
            return vec![UpstreamMessage {
                role: USER_ROLE.to_string(),
                content: joined,
            }];
        }
    }

    messages
        .iter()
        .map(|msg| UpstreamMessage {
            role: msg.role.clone(),
            content: msg.text_content(),
        })
        .collect()
}
