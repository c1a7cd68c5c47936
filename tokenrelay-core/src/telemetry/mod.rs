//! Structured logging for the relay.
//! Everything goes through `tracing`; a subscriber is installed by the binary via [`init_tracing`].

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_level` when set. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(default_level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))
}

/// Log the per-request relay summary. Failures are logged at WARN.
pub fn emit_relay(log: &RelayLog) {
    match log.outcome {
        RelayOutcome::Failed => tracing::warn!(
            req.id = %log.request_id,
            llm.model = %log.model,
            prompt.chars = log.prompt_chars as u64,
            relay.fragments = log.fragments as u64,
            relay.outcome = log.outcome.as_str(),
            latency.ms = log.latency_ms,
            error.message = log.error_message.as_deref(),
            "relay finished"
        ),
        _ => tracing::info!(
            req.id = %log.request_id,
            llm.model = %log.model,
            prompt.chars = log.prompt_chars as u64,
            relay.fragments = log.fragments as u64,
            relay.outcome = log.outcome.as_str(),
            latency.ms = log.latency_ms,
            "relay finished"
        ),
    }
}
