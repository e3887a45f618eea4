use std::time::{Duration, Instant};

use tracing::info;
use tracing_subscriber::EnvFilter;

/// How a translated request ended, as reported in the completion log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed,
    /// The upstream body broke off; the client still received a closed response.
    UpstreamInterrupted,
    /// The client went away before the closing frames were sent.
    ClientCancelled,
}

impl RequestOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RequestOutcome::Completed => "completed",
            RequestOutcome::UpstreamInterrupted => "upstream_interrupted",
            RequestOutcome::ClientCancelled => "client_cancelled",
        }
    }
}

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(tracing_level))
        .unwrap_or_else(|_| EnvFilter::new("INFO"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Log token usage for a finished request, computing duration from start time.
pub fn log_request_complete(
    model: &str,
    stream: bool,
    prompt_tokens: u64,
    completion_tokens: u64,
    outcome: RequestOutcome,
    start_time: Instant,
) {
    log_request_usage(
        model,
        stream,
        prompt_tokens,
        completion_tokens,
        outcome,
        start_time.elapsed(),
    );
}

fn log_request_usage(
    model: &str,
    stream: bool,
    prompt_tokens: u64,
    completion_tokens: u64,
    outcome: RequestOutcome,
    duration: Duration,
) {
    info!(
        model = model,
        stream = stream,
        prompt_tokens = prompt_tokens,
        completion_tokens = completion_tokens,
        total_tokens = prompt_tokens.saturating_add(completion_tokens),
        outcome = outcome.as_str(),
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
