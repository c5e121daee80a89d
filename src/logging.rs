//! Two-file structured logging plus panic capture.
//!
//! `outpost.log` receives the process log (INFO and above) and
//! `outpost-error.log` receives error-severity entries only; both are
//! append-only with timestamped lines. A stderr layer honoring `RUST_LOG`
//! is kept for interactive runs. Uncaught panics are routed into the error
//! log instead of dying silently on an unobserved console.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Initialize the global subscriber and the panic hook.
pub fn init(log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let process_log = open_append(&log_dir.join("outpost.log"))?;
    let error_log = open_append(&log_dir.join("outpost-error.log"))?;

    let process_layer = fmt::layer()
        .with_writer(process_log)
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);
    let error_layer = fmt::layer()
        .with_writer(error_log)
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        );

    tracing_subscriber::registry()
        .with(process_layer)
        .with(error_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    install_panic_hook();
    Ok(())
}

fn open_append(path: &Path) -> anyhow::Result<Arc<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        let location = info
            .location()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(location = %location, "uncaught panic: {message}");
        default_hook(info);
    }));
}
