//! Logging system configuration and initialization.
//!
//! tracing-based setup with console output, optional rolling file output
//! and config-driven level control. `RUST_LOG` overrides the configured
//! level when present.

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writer alive for the process lifetime.
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialize the global tracing subscriber from logging config.
///
/// Safe to call once per process; later calls fail because the global
/// subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let console_layer = config
        .console_output
        .then(|| fmt::layer().with_target(true));

    let file_layer = if config.file_output {
        let appender = rolling::daily(&config.log_dir, "homecrawl.log");
        let (writer, guard) = non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        Some(fmt::layer().with_writer(writer).with_ansi(false))
    } else {
        None
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}
