//! Upstream tagged-line stream to `OpenAI` chat completion translation.
//!
//! Both entry points share one pipeline per request:
//! framing -> line decoding -> optional turn normalization -> aggregation.
//! The non-streaming path drains the upstream and builds one object; the
//! streaming path is a pull-driven state machine that emits an SSE frame per
//! content fragment and always closes with a terminal frame and `[DONE]`.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{error, warn};

use crate::config::FeaturesConfig;
use crate::error::GatewayError;
use crate::observability::{log_request_complete, RequestOutcome};
use crate::protocol::openai_chat::OpenAiChatResponse;
use crate::protocol::tagged_line::{decode_line, TaggedEvent};
use crate::stream::aggregate::AggregationState;
use crate::stream::line_framer::{line_stream, TrailingFragmentPolicy};
use crate::stream::normalize::TurnNormalizer;
use crate::stream::sse::done_frame;
use crate::stream::synthesizer::OutboundEnvelope;

/// Per-request translation knobs.
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    pub strip_trailing_newline: bool,
    pub trailing_policy: TrailingFragmentPolicy,
    /// Send a usage frame after the terminal frame (streaming only).
    pub include_usage: bool,
    /// Pause before each content frame. Zero disables pacing.
    pub chunk_delay: Duration,
}

impl TranslateOptions {
    #[must_use]
    pub fn from_features(features: &FeaturesConfig, include_usage: bool) -> Self {
        Self {
            strip_trailing_newline: features.strip_trailing_newline,
            trailing_policy: if features.flush_unterminated_line {
                TrailingFragmentPolicy::Flush
            } else {
                TrailingFragmentPolicy::Discard
            },
            include_usage,
            chunk_delay: Duration::from_millis(features.stream_chunk_delay_ms),
        }
    }
}

/// Decoder, normalizer and aggregation state for one upstream response.
struct TurnPipeline {
    normalizer: TurnNormalizer,
    state: AggregationState,
    released: Vec<TaggedEvent>,
}

impl TurnPipeline {
    fn new(strip_trailing_newline: bool) -> Self {
        Self {
            normalizer: TurnNormalizer::new(strip_trailing_newline),
            state: AggregationState::new(),
            released: Vec::with_capacity(2),
        }
    }

    /// Decode one line and apply whatever it releases. Released content
    /// fragments are copied into `fragments` when the caller wants them.
    fn push_line(&mut self, line: &str, fragments: Option<&mut Vec<String>>) {
        match decode_line(line) {
            Ok(Some(event)) => self.normalizer.push(event, &mut self.released),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, line_len = line.len(), "skipping malformed upstream line");
            }
        }
        self.apply_released(fragments);
    }

    fn finish(&mut self, fragments: Option<&mut Vec<String>>) {
        self.normalizer.finish(&mut self.released);
        self.apply_released(fragments);
    }

    fn abort(&mut self, fragments: Option<&mut Vec<String>>) {
        self.normalizer.abort(&mut self.released);
        self.apply_released(fragments);
    }

    fn apply_released(&mut self, mut fragments: Option<&mut Vec<String>>) {
        for event in self.released.drain(..) {
            if let (Some(out), TaggedEvent::ContentFragment(text)) = (fragments.as_deref_mut(), &event)
            {
                out.push(text.clone());
            }
            self.state.apply(event);
        }
    }
}

/// Drain the upstream body and build one `chat.completion` object.
///
/// # Errors
///
/// Returns [`GatewayError::Transport`] when the upstream body breaks off
/// before end-of-stream.
pub async fn translate_non_streaming<S, E>(
    byte_stream: S,
    envelope: &OutboundEnvelope,
    options: &TranslateOptions,
) -> Result<OpenAiChatResponse, GatewayError>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let started = Instant::now();
    let mut lines = Box::pin(line_stream(byte_stream, options.trailing_policy));
    let mut pipeline = TurnPipeline::new(options.strip_trailing_newline);

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => pipeline.push_line(&line, None),
            Err(err) => {
                return Err(GatewayError::Transport(format!(
                    "upstream response interrupted: {err}"
                )));
            }
        }
    }
    pipeline.finish(None);

    let snapshot = pipeline.state.snapshot();
    log_request_complete(
        &envelope.model,
        false,
        snapshot.prompt_tokens,
        snapshot.completion_tokens,
        RequestOutcome::Completed,
        started,
    );
    Ok(envelope.completion(&snapshot))
}

/// Translate the upstream body into a lazy sequence of SSE frames.
///
/// The sequence is one-shot. Upstream bytes are only read when the consumer
/// polls, so dropping the returned stream stops reading and releases the
/// upstream connection. Every sequence ends with a terminal frame and
/// `[DONE]`, including when the upstream breaks off mid-body.
pub fn translate_streaming<S, E>(
    byte_stream: S,
    envelope: OutboundEnvelope,
    options: TranslateOptions,
) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let translation = StreamingTranslation::new(byte_stream, envelope, options);
    futures_util::stream::unfold(translation, |mut translation| async move {
        let frame = translation.next_frame().await?;
        Some((frame, translation))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Streaming,
    Draining,
    Terminated,
}

type LineStream<E> = Pin<Box<dyn Stream<Item = Result<String, E>> + Send>>;

struct StreamingTranslation<E> {
    lines: LineStream<E>,
    pipeline: TurnPipeline,
    envelope: OutboundEnvelope,
    options: TranslateOptions,
    phase: Phase,
    outcome: RequestOutcome,
    queued: VecDeque<Bytes>,
    fragments: Vec<String>,
    started: Instant,
}

impl<E: Display + Send + 'static> StreamingTranslation<E> {
    fn new<S>(byte_stream: S, envelope: OutboundEnvelope, options: TranslateOptions) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    {
        Self {
            lines: Box::pin(line_stream(byte_stream, options.trailing_policy)),
            pipeline: TurnPipeline::new(options.strip_trailing_newline),
            envelope,
            options,
            phase: Phase::Start,
            outcome: RequestOutcome::Completed,
            queued: VecDeque::with_capacity(4),
            fragments: Vec::with_capacity(2),
            started: Instant::now(),
        }
    }

    async fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return Some(frame);
            }
            match self.phase {
                Phase::Start => {
                    let frame = self.envelope.role_chunk();
                    self.queue(frame);
                    self.phase = Phase::Streaming;
                }
                Phase::Streaming => match self.lines.as_mut().next().await {
                    Some(Ok(line)) => {
                        self.pipeline.push_line(&line, Some(&mut self.fragments));
                        self.queue_fragments().await;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "upstream stream interrupted; closing client stream");
                        self.outcome = RequestOutcome::UpstreamInterrupted;
                        self.pipeline.abort(Some(&mut self.fragments));
                        self.queue_fragments().await;
                        self.phase = Phase::Draining;
                    }
                    None => {
                        self.pipeline.finish(Some(&mut self.fragments));
                        self.queue_fragments().await;
                        self.phase = Phase::Draining;
                    }
                },
                Phase::Draining => {
                    self.queue_closing_frames();
                    self.phase = Phase::Terminated;
                }
                Phase::Terminated => return None,
            }
        }
    }

    async fn queue_fragments(&mut self) {
        let fragments = std::mem::take(&mut self.fragments);
        for fragment in &fragments {
            if !self.options.chunk_delay.is_zero() {
                tokio::time::sleep(self.options.chunk_delay).await;
            }
            let frame = self.envelope.content_chunk(fragment);
            self.queue(frame);
        }
        self.fragments = fragments;
        self.fragments.clear();
    }

    fn queue_closing_frames(&mut self) {
        let snapshot = self.pipeline.state.snapshot();
        let terminal = self.envelope.terminal_chunk(snapshot.finish_reason);
        self.queue(terminal);
        if self.options.include_usage {
            let usage = self.envelope.usage_chunk(&self.pipeline.state.snapshot());
            self.queue(usage);
        }
        self.queued.push_back(done_frame());
        self.log_completion(self.outcome);
    }

    fn queue(&mut self, frame: Result<Bytes, serde_json::Error>) {
        match frame {
            Ok(frame) => self.queued.push_back(frame),
            Err(err) => error!(error = %err, "failed to serialize stream chunk"),
        }
    }
}

impl<E> StreamingTranslation<E> {
    /// Outcome to report when the consumer drops the stream before the
    /// closing frames were produced.
    fn cancelled_outcome(&self) -> Option<RequestOutcome> {
        (self.phase != Phase::Terminated).then_some(RequestOutcome::ClientCancelled)
    }

    fn log_completion(&self, outcome: RequestOutcome) {
        let snapshot = self.pipeline.state.snapshot();
        log_request_complete(
            &self.envelope.model,
            true,
            snapshot.prompt_tokens,
            snapshot.completion_tokens,
            outcome,
            self.started,
        );
    }
}

impl<E> Drop for StreamingTranslation<E> {
    fn drop(&mut self) {
        if let Some(outcome) = self.cancelled_outcome() {
            self.log_completion(outcome);
        }
    }
}
