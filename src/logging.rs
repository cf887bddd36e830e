use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "vocab-review.log";
const FALLBACK_FILTER: &str = "info";
// per-statement sqlx logging drowns out scheduler events at info
const QUIET_SQLX: &str = "sqlx::query=warn";

/// Keeps the non-blocking file writer flushing until dropped.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

pub fn file_logging_enabled() -> bool {
    std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// `LOG_DIR`, else a `logs` folder next to the default database.
pub fn log_dir() -> PathBuf {
    std::env::var("LOG_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_log_dir)
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vocab-review")
        .join("logs")
}

/// The configured filter, with sqlx statement logs muted unless the level
/// string names sqlx itself.
pub fn build_filter(log_level: &str) -> EnvFilter {
    let mut filter =
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER));
    if !log_level.contains("sqlx") {
        if let Ok(directive) = QUIET_SQLX.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let stdout_layer = fmt::layer().with_target(true);

    let (file_layer, guard) = match open_file_writer() {
        Some((writer, guard)) => (
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(log_level))
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard.map(|guard| FileLogGuard { _guard: guard })
}

fn open_file_writer() -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if !file_logging_enabled() {
        return None;
    }

    let dir = log_dir();
    if let Err(err) = std::fs::create_dir_all(&dir) {
        eprintln!("failed to create log directory {}: {err}", dir.display());
        return None;
    }

    let appender = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlx_statements_are_muted_by_default() {
        let filter = build_filter("debug").to_string();
        assert!(filter.contains("sqlx::query=warn"));

        let explicit = build_filter("info,sqlx=debug").to_string();
        assert!(!explicit.contains("sqlx::query=warn"));
    }

    #[test]
    fn unparsable_level_falls_back() {
        let filter = build_filter("vocab_review=[").to_string();
        assert!(filter.contains("info"));
    }

    #[test]
    fn default_dir_is_scoped_to_the_app() {
        assert!(default_log_dir().ends_with("vocab-review/logs"));
    }
}
