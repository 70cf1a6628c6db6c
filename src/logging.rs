//! Logging for keyhop.
//!
//! Each run writes one log file under `~/.keyhop/logs/`; files older than the
//! retention window are pruned at startup. `-v` mirrors events to stderr.
//! `RUST_LOG` overrides both levels.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::keyhop_dir;

/// Hours a run's log file is kept.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 24;

pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

/// File logging settings from `keyhoprc`.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub retention_hours: u32,
    pub level: LevelFilter,
    /// Whether a log file is written at all.
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL,
            enabled: true,
        }
    }
}

impl LogConfig {
    /// Reads a `log_level` value; unknown names fall back to the default.
    #[must_use]
    pub fn parse_level(value: &str) -> LevelFilter {
        match value.trim().to_ascii_lowercase().as_str() {
            "warning" => LevelFilter::WARN,
            "none" | "disabled" => LevelFilter::OFF,
            other => other.parse().unwrap_or(DEFAULT_LOG_LEVEL),
        }
    }

    /// Reads a `log_retention` value in hours.
    #[must_use]
    pub fn parse_retention(value: &str) -> u32 {
        value.trim().parse().unwrap_or(DEFAULT_LOG_RETENTION_HOURS)
    }

    fn file_level(&self) -> LevelFilter {
        if self.enabled { self.level } else { LevelFilter::OFF }
    }
}

/// Stderr level for a `-v` count.
#[must_use]
pub fn stderr_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::OFF,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// `~/.keyhop/logs/`
#[must_use]
pub fn log_directory() -> PathBuf {
    keyhop_dir().join("logs")
}

/// Path of this run's log file inside `dir`.
#[must_use]
pub fn log_path_in(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("keyhop_{}.log", stamp))
}

/// Deletes `*.log` files in `dir` last modified more than `retention_hours` ago.
///
/// Returns how many files were removed.
///
/// # Errors
/// Returns error if the directory cannot be listed.
pub fn prune_logs(dir: &Path, retention_hours: u32) -> io::Result<u32> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let max_age = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_none_or(|ext| ext != "log") {
            continue;
        }

        let stale = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > max_age);
        if stale && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}

/// Installs the global subscriber.
///
/// # Errors
/// Returns error if the log directory or file cannot be created.
pub fn init(config: &LogConfig, verbosity: u8) -> io::Result<()> {
    let file_level = config.file_level();
    let console_level = stderr_level(verbosity);
    if file_level == LevelFilter::OFF && console_level == LevelFilter::OFF {
        return Ok(());
    }

    let mut pruned = 0;
    let mut log_path = None;
    let file_layer = if file_level == LevelFilter::OFF {
        None
    } else {
        let dir = log_directory();
        fs::create_dir_all(&dir)?;
        pruned = prune_logs(&dir, config.retention_hours)?;

        let path = log_path_in(&dir);
        let file = File::create(&path)?;
        log_path = Some(path);
        Some(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true),
        )
    };

    let stderr_layer = (console_level != LevelFilter::OFF).then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .without_time()
    });

    // One filter serves both layers, so it admits the more verbose level.
    let filter = EnvFilter::builder()
        .with_default_directive(file_level.max(console_level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    if let Some(path) = log_path {
        tracing::debug!(
            "log file {} (kept {} hours)",
            path.display(),
            config.retention_hours
        );
    }
    if pruned > 0 {
        tracing::debug!("pruned {} old log file(s)", pruned);
    }
    Ok(())
}
