use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Events logged with this target also go to the durable log.
pub const IMPORTANT: &str = "important";

const DEFAULT_FILTER: &str =
    "warn,ult_runner=debug,ult_runner_lib=debug,ult_state=info,ult_dispatch=info,ult_input=info,ult_vision=info,ult_capture=info,important=info";

pub fn open_durable_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Plain-text layer that only keeps `important` events.
pub fn durable_layer<S>(file: File) -> impl tracing_subscriber::Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .with_filter(filter_fn(|meta| meta.target() == IMPORTANT))
}

/// Console output filtered by `RUST_LOG`, plus the durable log at `log_file`.
pub fn init(log_file: &Path) -> Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let file = open_durable_log(log_file)?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(console_filter))
        .with(durable_layer(file))
        .try_init()
        .context("Failed to install the tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durable_log_keeps_only_important_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner-logs.log");
        let subscriber =
            tracing_subscriber::registry().with(durable_layer(open_durable_log(&path).unwrap()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Screen: mainMenu");
            tracing::error!(target: "important", "Emulator restart failed");
        });

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Emulator restart failed"));
        assert!(!text.contains("mainMenu"));
    }

    #[test]
    fn test_durable_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner-logs.log");
        std::fs::write(&path, "earlier run\n").unwrap();

        let subscriber =
            tracing_subscriber::registry().with(durable_layer(open_durable_log(&path).unwrap()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "important", "Suspicious pick");
        });

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("earlier run\n"));
        assert!(text.contains("Suspicious pick"));
    }
}
