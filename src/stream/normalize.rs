use crate::protocol::tagged_line::TaggedEvent;

/// Optional trailing-newline normalization between the decoder and the
/// aggregation state.
///
/// Some upstream versions end the last content line of a turn with an escaped
/// newline. When stripping is enabled the most recent fragment is held back
/// until the next event shows whether it closed the turn; a turn closes on an
/// `e`/`d` event or at end-of-stream. Stripping is lossy, so it is off unless
/// configured.
#[derive(Debug, Default)]
pub struct TurnNormalizer {
    strip_trailing_newline: bool,
    held: Option<String>,
}

impl TurnNormalizer {
    #[must_use]
    pub fn new(strip_trailing_newline: bool) -> Self {
        Self {
            strip_trailing_newline,
            held: None,
        }
    }

    /// Push one decoded event and append the events it releases, in order.
    pub fn push(&mut self, event: TaggedEvent, out: &mut Vec<TaggedEvent>) {
        if !self.strip_trailing_newline {
            out.push(event);
            return;
        }
        match event {
            TaggedEvent::ContentFragment(text) => {
                if let Some(previous) = self.held.replace(text) {
                    out.push(TaggedEvent::ContentFragment(previous));
                }
            }
            TaggedEvent::MessageMeta(_) => {
                self.release_held(false, out);
                out.push(event);
            }
            TaggedEvent::TerminalMeta(_) => {
                self.release_held(true, out);
                out.push(event);
            }
        }
    }

    /// Clean end-of-stream: the held fragment closes the turn.
    pub fn finish(&mut self, out: &mut Vec<TaggedEvent>) {
        self.release_held(true, out);
    }

    /// Aborted stream: release the held fragment untouched, since the turn
    /// never closed.
    pub fn abort(&mut self, out: &mut Vec<TaggedEvent>) {
        self.release_held(false, out);
    }

    fn release_held(&mut self, closes_turn: bool, out: &mut Vec<TaggedEvent>) {
        let Some(mut text) = self.held.take() else {
            return;
        };
        if closes_turn && text.ends_with('\n') {
            text.pop();
            if text.is_empty() {
                return;
            }
        }
        out.push(TaggedEvent::ContentFragment(text));
    }
}
