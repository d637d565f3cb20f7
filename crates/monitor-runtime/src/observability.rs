//! Logging context.
//!
//! Built once at startup and handed to the supervisor, which flushes it
//! during teardown so the last lines of a failing run reach the log file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map upper-case level names (`WARNING`, `CRITICAL`, ...) onto `tracing`
/// filter directives.
///
/// Unknown names are passed through so `EnvFilter` directives such as
/// `monitor_device=trace` still work.
pub fn normalise_level(log_level: &str) -> String {
    match log_level.to_uppercase().as_str() {
        "DEBUG" | "CRITICAL" => "debug".to_string(),
        "INFO" => "info".to_string(),
        "WARNING" | "WARN" => "warn".to_string(),
        "ERROR" => "error".to_string(),
        _ => log_level.to_string(),
    }
}

/// Handle on the installed subscriber and its optional log file.
#[derive(Debug, Clone, Default)]
pub struct Observability {
    log_file: Option<(PathBuf, Arc<File>)>,
}

impl Observability {
    /// Install the global subscriber: stderr always, plus `log_file` when set.
    ///
    /// Falls back to `info` when the level string is not a valid directive.
    pub fn init(log_level: &str, log_file: Option<&Path>) -> anyhow::Result<Self> {
        let filter =
            EnvFilter::try_new(normalise_level(log_level)).unwrap_or_else(|_| EnvFilter::new("info"));

        let file = log_file.map(open_log_file).transpose()?;

        let stderr_layer = fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_writer(std::io::stderr);
        let file_layer = file.as_ref().map(|(_, handle)| {
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Arc::clone(handle))
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
            .context("a global tracing subscriber is already installed")?;

        Ok(Self { log_file: file })
    }

    /// A context that owns no sink; used when logging is set up elsewhere.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_ref().map(|(path, _)| path.as_path())
    }

    /// Push buffered log lines to disk. Never fails.
    pub fn flush(&self) {
        if let Some((path, file)) = &self.log_file {
            if let Err(e) = file.sync_data() {
                eprintln!("failed to sync log file {}: {e}", path.display());
            }
        }
    }
}

fn open_log_file(path: &Path) -> anyhow::Result<(PathBuf, Arc<File>)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok((path.to_path_buf(), Arc::new(file)))
}
