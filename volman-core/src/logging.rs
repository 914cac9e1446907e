// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::SystemTime as Timer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LoggingConfig, xdg_dir};

/// Flushes the file writer when the process exits.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_PREFIX: &str = "volman.log";
const RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config.level.as_directive();
        EnvFilter::new(format!(
            "warn,volman_core={level},volman_udisks={level},volman_monitor={level},zbus=warn"
        ))
    })
}

/// Install the global subscriber: stderr always, plus a daily file when
/// `to_disk` is set. Only the first call has an effect.
pub fn init(config: &LoggingConfig) {
    let file = if config.to_disk {
        match open_log_file(&log_dir()) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("volman: file logging disabled: {e:#}");
                None
            }
        }
    } else {
        None
    };

    let (writer, guard) = match file {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let file_layer = writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_timer(Timer)
    });
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(Timer);

    let installed = tracing_subscriber::registry()
        .with(filter(config))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if let (true, Some(guard)) = (installed, guard) {
        let _ = FILE_GUARD.set(guard);
    }
}

/// `VOLMAN_LOG_DIR`, else the `logs` directory under the XDG state home.
pub fn log_dir() -> PathBuf {
    std::env::var_os("VOLMAN_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| xdg_dir("XDG_STATE_HOME", &[".local", "state"]).join("logs"))
}

fn open_log_file(dir: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    prune_logs(dir, SystemTime::now());
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Remove rolled log files last written before the retention window.
fn prune_logs(dir: &Path, now: SystemTime) -> usize {
    let Some(cutoff) = now.checked_sub(RETENTION) else {
        return 0;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .filter(|entry| {
            entry
                .metadata()
                .ok()
                .filter(|meta| meta.is_file())
                .and_then(|meta| meta.modified().ok())
                .is_some_and(|modified| modified < cutoff)
        })
        .filter(|entry| fs::remove_file(entry.path()).is_ok())
        .count()
}
