//! Logging setup: dual stderr + daily-rotated file output, `RUST_LOG`
//! controlled, the way the teacher's `app::main::init_logging` does it.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>>
{
    fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "decoder-demo.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    let file_layer = fmt::layer().with_writer(non_blocking_file).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Prunes rotated log files in `logs/` older than `retention_days`.
/// `retention_days = 0` disables pruning.
pub fn prune_old_logs(retention_days: u64) {
    if retention_days == 0 {
        tracing::debug!("log retention disabled (log_retention_days=0)");
        return;
    }

    let cutoff = match SystemTime::now().checked_sub(Duration::from_secs(retention_days * 24 * 60 * 60)) {
        Some(t) => t,
        None => return,
    };

    let logs_dir = Path::new("logs");
    if !logs_dir.exists() {
        return;
    }

    match fs::read_dir(logs_dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                    continue;
                };
                if !name.starts_with("decoder-demo.log.") {
                    continue;
                }
                let Ok(meta) = entry.metadata() else { continue };
                let Ok(modified) = meta.modified() else { continue };
                if modified < cutoff {
                    match fs::remove_file(&path) {
                        Ok(()) => tracing::info!(path = %path.display(), "removed old log file"),
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove old log"),
                    }
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to read logs directory for pruning"),
    }
}
