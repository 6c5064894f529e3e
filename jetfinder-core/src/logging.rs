//! Logging for the engine and its CLI
//!
//! Logs go to `$XDG_STATE_HOME/jetfinder/jetfinder.log`, rotated daily.
//! Cycles log from spawned tasks, so writes go through a non-blocking worker.
//!
//! `RUST_LOG` wins over the configured level. Without it, the HTTP and TLS
//! stack is held at `logging.deps_level` so a debug session shows engine
//! cycles rather than connection pool chatter.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_FILE: &str = "jetfinder.log";

/// Crates under the backend client that get noisy below `warn`
const DEPENDENCY_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

/// Initialize the logging system
///
/// Fails with [`Error::Config`] when the configured levels do not parse.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .map_err(|e| Error::Config(format!("invalid RUST_LOG: {}", e)))?,
        _ => engine_filter(config)?,
    };

    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(
        log_file = %log_dir.join(LOG_FILE).display(),
        level = %config.level,
        deps_level = %config.deps_level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Filter built from the logging config alone
pub fn engine_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level).map_err(|e| {
        Error::Config(format!("invalid logging.level {:?}: {}", config.level, e))
    })?;

    for target in DEPENDENCY_TARGETS {
        let directive: Directive = format!("{}={}", target, config.deps_level)
            .parse()
            .map_err(|e| {
                Error::Config(format!(
                    "invalid logging.deps_level {:?}: {}",
                    config.deps_level, e
                ))
            })?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

/// Initialize logging for tests (logs to stdout)
///
/// Defaults to debug output for this crate when `RUST_LOG` is unset.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("jetfinder_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Returns the log file path
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
