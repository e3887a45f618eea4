/// Incremental line framer for the upstream's newline-delimited protocol.
///
/// Byte chunks arrive with no alignment to lines or even to UTF-8 character
/// boundaries. The framer decodes them into a pending text buffer and hands out
/// every complete line, keeping the unterminated tail for the next read.
use std::collections::VecDeque;

use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

/// What to do with an unterminated final fragment at end-of-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingFragmentPolicy {
    /// Emit a non-empty unterminated fragment as the last line.
    #[default]
    Flush,
    /// Treat the fragment as incomplete and drop it.
    Discard,
}

/// Incremental newline framer with UTF-8 carry across chunks.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: String,
    // At most three bytes of a character whose remaining bytes are still in flight.
    utf8_carry: SmallVec<[u8; 4]>,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk and return the complete lines it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        self.push_into(chunk, &mut out);
        out
    }

    /// Feed one raw chunk and append the complete lines it finished into a
    /// caller-provided buffer.
    pub fn push_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        let scan_from = self.pending.len();
        if self.utf8_carry.is_empty() {
            self.decode_append(chunk);
        } else {
            let mut joined = std::mem::take(&mut self.utf8_carry).into_vec();
            joined.extend_from_slice(chunk);
            self.decode_append(&joined);
        }
        self.split_complete_lines(scan_from, out);
    }

    /// Tear the framer down at end-of-stream and return the trailing fragment
    /// if the policy keeps it.
    #[must_use]
    pub fn finish(mut self, policy: TrailingFragmentPolicy) -> Option<String> {
        if !self.utf8_carry.is_empty() {
            self.pending.push(char::REPLACEMENT_CHARACTER);
        }
        if self.pending.is_empty() {
            return None;
        }
        match policy {
            TrailingFragmentPolicy::Flush => Some(self.pending),
            TrailingFragmentPolicy::Discard => {
                tracing::debug!(
                    bytes = self.pending.len(),
                    "dropping unterminated trailing upstream fragment"
                );
                None
            }
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn decode_append(&mut self, mut bytes: &[u8]) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.pending.push_str(text);
                    return;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                    let text = unsafe { std::str::from_utf8_unchecked(&bytes[..valid_up_to]) };
                    self.pending.push_str(text);
                    match err.error_len() {
                        Some(invalid_len) => {
                            self.pending.push(char::REPLACEMENT_CHARACTER);
                            bytes = &bytes[valid_up_to + invalid_len..];
                        }
                        None => {
                            self.utf8_carry.extend_from_slice(&bytes[valid_up_to..]);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn split_complete_lines(&mut self, scan_from: usize, out: &mut Vec<String>) {
        let mut line_start = 0usize;
        for rel_pos in memchr_iter(b'\n', &self.pending.as_bytes()[scan_from..]) {
            let line_end = scan_from + rel_pos;
            out.push(self.pending[line_start..line_end].to_string());
            line_start = line_end + 1;
        }
        if line_start > 0 {
            self.pending.drain(..line_start);
        }
    }
}

/// Split an upstream byte stream into complete lines using [`LineFramer`].
///
/// A transport error is yielded once and ends the stream; the unterminated
/// tail is then dropped since the frame it belongs to was cut short. On a
/// clean end-of-stream the tail is handled per `policy`.
pub fn line_stream<S, E>(
    byte_stream: S,
    policy: TrailingFragmentPolicy,
) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            Some(LineFramer::new()),
            VecDeque::<String>::new(),
            Vec::<String>::with_capacity(8),
        ),
        move |(mut stream, mut framer, mut pending, mut parsed)| async move {
            loop {
                if let Some(line) = pending.pop_front() {
                    return Some((Ok(line), (stream, framer, pending, parsed)));
                }
                let active = framer.as_mut()?;

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        active.push_into(&bytes, &mut parsed);
                        pending.extend(parsed.drain(..));
                    }
                    Some(Err(err)) => {
                        if let Some(torn_down) = framer.take() {
                            let _ = torn_down.finish(TrailingFragmentPolicy::Discard);
                        }
                        return Some((Err(err), (stream, framer, pending, parsed)));
                    }
                    None => {
                        let torn_down = framer.take()?;
                        if let Some(tail) = torn_down.finish(policy) {
                            pending.push_back(tail);
                        }
                    }
                }
            }
        },
    )
}
