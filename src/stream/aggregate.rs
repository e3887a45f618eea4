use crate::protocol::tagged_line::{TaggedEvent, TerminalMeta};

pub const DEFAULT_FINISH_REASON: &str = "stop";

/// Per-call accumulator fed by decoded events in arrival order.
#[derive(Debug, Clone)]
pub struct AggregationState {
    message_id: String,
    content_fragments: Vec<String>,
    finish_reason: String,
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Immutable view of an [`AggregationState`].
#[derive(Debug, Clone, Copy)]
pub struct AggregateSnapshot<'a> {
    pub message_id: &'a str,
    pub content_fragments: &'a [String],
    pub finish_reason: &'a str,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl AggregationState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            message_id: String::new(),
            content_fragments: Vec::new(),
            finish_reason: DEFAULT_FINISH_REASON.to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    pub fn apply(&mut self, event: TaggedEvent) {
        match event {
            TaggedEvent::ContentFragment(text) => self.content_fragments.push(text),
            TaggedEvent::MessageMeta(message_id) => self.message_id = message_id,
            TaggedEvent::TerminalMeta(meta) => self.apply_terminal(meta),
        }
    }

    fn apply_terminal(&mut self, meta: TerminalMeta) {
        if let Some(reason) = meta.finish_reason.filter(|reason| !reason.is_empty()) {
            self.finish_reason = reason;
        }
        if let Some(prompt_tokens) = meta.prompt_tokens {
            self.prompt_tokens = prompt_tokens;
        }
        if let Some(completion_tokens) = meta.completion_tokens {
            self.completion_tokens = completion_tokens;
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> AggregateSnapshot<'_> {
        AggregateSnapshot {
            message_id: &self.message_id,
            content_fragments: &self.content_fragments,
            finish_reason: &self.finish_reason,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
        }
    }
}

impl Default for AggregationState {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateSnapshot<'_> {
    #[must_use]
    pub fn full_content(&self) -> String {
        self.content_fragments.concat()
    }

    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}
