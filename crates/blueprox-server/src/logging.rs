//! Logging setup.
//!
//! [`LogSettings`] is resolved from the environment once at startup and then handed
//! to [`init`]:
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | filter directive, wins over everything else |
//! | `BLUEPROX_LOG_LEVEL` | filter directive when `RUST_LOG` is unset (default `info`) |
//! | `BLUEPROX_ENV=production` | JSON to daily files plus compact stdout |
//! | `BLUEPROX_LOG_DIR` | file directory in production mode |
//!
//! Development mode logs pretty output to stdout with span open/close events, which
//! makes the `scan` and `monitor_tick` spans easy to follow.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the logging mode.
pub const ENV_MODE_VAR: &str = "BLUEPROX_ENV";

/// Environment variable holding the fallback filter directive.
pub const LOG_LEVEL_VAR: &str = "BLUEPROX_LOG_LEVEL";

/// Environment variable overriding the production log directory.
pub const LOG_DIR_VAR: &str = "BLUEPROX_LOG_DIR";

const DEFAULT_DIRECTIVE: &str = "info";
const FILE_PREFIX: &str = "blueprox.log";

// Non-blocking writers flush on drop, so their guards live as long as the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Pretty stdout only.
    Development,
    /// JSON files plus compact stdout for journald.
    Production,
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Output style.
    pub mode: LogMode,
    /// Filter directive used when `RUST_LOG` is unset.
    pub directive: String,
    /// Where production log files go.
    pub directory: PathBuf,
}

impl LogSettings {
    /// Read settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mode = match lookup(ENV_MODE_VAR) {
            Some(mode) if mode.trim().eq_ignore_ascii_case("production") => LogMode::Production,
            _ => LogMode::Development,
        };
        let directive = lookup(LOG_LEVEL_VAR)
            .map(|level| level.trim().to_string())
            .filter(|level| !level.is_empty())
            .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string());
        let directory = lookup(LOG_DIR_VAR)
            .filter(|dir| !dir.trim().is_empty())
            .map_or_else(default_log_directory, PathBuf::from);

        Self {
            mode,
            directive,
            directory,
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter directive does not parse or the production log
/// directory cannot be created.
pub fn init(settings: &LogSettings) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.directive))?;

    match settings.mode {
        LogMode::Production => init_production(env_filter, settings)?,
        LogMode::Development => init_development(env_filter),
    }
    Ok(())
}

fn init_production(env_filter: EnvFilter, settings: &LogSettings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.directory)?;

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &settings.directory, FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_current_span(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/blueprox")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "blueprox")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
