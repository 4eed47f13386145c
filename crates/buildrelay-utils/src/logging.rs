//! Tracing setup and the structured log helpers used by the pipeline.
//!
//! Every state transition and outbound call is logged with `task_id` and
//! `round` fields so a single task can be followed through the worker pool.

use std::io::IsTerminal;

use tracing::{Level, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::redaction::redact_error_message;
use crate::types::{TaskKey, TaskStatus};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `verbose` selects between
/// `buildrelay=debug,info` and `buildrelay=info,warn`. Logs go to stderr so
/// stdout stays clean for JSON status output.
pub fn init_tracing(verbose: bool, format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("buildrelay=debug,info")
            } else {
                EnvFilter::try_new("buildrelay=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_span_list(false),
                )
                .try_init()?;
        }
        LogFormat::Compact => {
            let span_events = if verbose {
                FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            };
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(use_color())
                        .with_target(verbose)
                        .with_thread_ids(false)
                        .with_line_number(false)
                        .with_file(false)
                        .with_span_events(span_events)
                        .compact(),
                )
                .try_init()?;
        }
    }

    Ok(())
}

/// Span wrapping one worker's run of one task-round.
#[must_use]
pub fn task_span(key: &TaskKey, nonce: &str) -> tracing::Span {
    span!(
        Level::INFO,
        "task",
        task_id = %key.task_id,
        round = key.round.number(),
        nonce = %nonce,
    )
}

/// Log a committed state transition.
pub fn log_transition(key: &TaskKey, from: TaskStatus, to: TaskStatus) {
    info!(
        task_id = %key.task_id,
        round = key.round.number(),
        from = %from,
        to = %to,
        "Task transitioned"
    );
}

/// Log a failed outbound call with its message redacted.
pub fn log_call_failure(key: &TaskKey, target: &str, attempt: u32, message: &str) {
    warn!(
        task_id = %key.task_id,
        round = key.round.number(),
        target = %target,
        attempt,
        error = %redact_error_message(message),
        "Outbound call failed"
    );
}
