use std::path::Path;

use anyhow::Context;
use monitor_core::settings::EffectiveConfig;
use tokio::signal::unix::{signal, SignalKind};

// ── Directory bootstrap ────────────────────────────────────────────────────────

/// Ensure the directories holding the time-series files and the database exist.
///
/// `output` is a file prefix, so only its parent is created.
pub fn ensure_directories(config: &EffectiveConfig) -> anyhow::Result<()> {
    let parents = [Some(config.output.as_path()), config.db_path.as_deref()];
    for dir in parents.into_iter().flatten().filter_map(non_empty_parent) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

// ── Signals ────────────────────────────────────────────────────────────────────

/// Resolve on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Ctrl+C received"),
        () = terminate => tracing::info!("SIGTERM received"),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
