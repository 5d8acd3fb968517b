//! Log output setup.
//!
//! Diagnostics go to stderr through `tracing`, filtered by `RUST_LOG`
//! (default `info`). Stdout is reserved for the run summary so it can be
//! piped.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines; colored when stderr is a terminal.
    Text,
    /// One JSON object per event.
    Json,
}

/// Install the global subscriber. Call once, before any run starts.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder
            .with_ansi(atty::is(atty::Stream::Stderr))
            .init(),
        LogFormat::Json => builder.json().with_current_span(false).init(),
    }
}
