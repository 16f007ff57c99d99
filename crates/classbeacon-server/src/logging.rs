//! Logging initialization.
//!
//! Production writes JSON to a daily rolling file under
//! [`ServerConfig::log_dir`] and a plain compact line to stdout. Development
//! writes pretty output with span open/close events.
//!
//! The filter comes from `RUST_LOG`, then `CLASSBEACON_LOG_LEVEL`, then `info`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use classbeacon_core::ServerConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the fallback filter directive.
pub const LOG_LEVEL_ENV: &str = "CLASSBEACON_LOG_LEVEL";

/// Prefix of rolling log file names.
const LOG_FILE_PREFIX: &str = "classbeacon";

static GUARDS: OnceLock<[WorkerGuard; 2]> = OnceLock::new();

/// Initialize the global subscriber for `server`.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(server: &ServerConfig) -> anyhow::Result<()> {
    let env_filter = build_filter(std::env::var(LOG_LEVEL_ENV).ok().as_deref())?;

    if server.production {
        let log_dir = server.log_dir.clone().unwrap_or_else(default_log_directory);
        init_production(env_filter, &log_dir);
    } else {
        init_development(env_filter);
    }

    Ok(())
}

fn build_filter(fallback: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::try_new(fallback.unwrap_or("info"))?)
}

fn init_production(env_filter: EnvFilter, log_dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("cannot create log directory {}: {e}", log_dir.display());
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(stdout_writer)
                .with_ansi(false),
        )
        .init();

    // Dropping a guard stops its writer.
    let _ = GUARDS.set([file_guard, stdout_guard]);
}

fn init_development(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
        )
        .init();
}

/// Log directory used when the config names none.
pub fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/classbeacon")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "classbeacon")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
