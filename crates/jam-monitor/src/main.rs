mod bootstrap;

use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;

use monitor_core::notifications::NotificationSink;
use monitor_core::settings::{ConfigResolver, Settings};
use monitor_data::ReadingStore;
use monitor_device::DeviceSession;
use monitor_runtime::observability::Observability;
use monitor_runtime::supervisor::{MonitorSupervisor, RunReport, SupervisorOptions, SupervisorState};

#[tokio::main]
async fn main() -> ExitCode {
    let settings = Settings::parse();

    let observability =
        match Observability::init(&settings.effective_log_level(), settings.log_file.as_deref()) {
            Ok(observability) => observability,
            Err(e) => {
                eprintln!("jam-monitor: failed to set up logging: {e:#}");
                return ExitCode::FAILURE;
            }
        };

    tracing::info!("jam-monitor v{} starting", env!("CARGO_PKG_VERSION"));

    match run(&settings, observability).await {
        Ok(report) if failed_to_start(&report) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runtime failures have been notified and torn down; only a monitor that
/// never got its device counts as a failed start.
fn failed_to_start(report: &RunReport) -> bool {
    report.final_state == SupervisorState::Failed && !report.started
}

/// Everything before [`MonitorSupervisor::run`] that can fail returns `Err`,
/// which exits with status 1 before any notification is possible.
async fn run(settings: &Settings, observability: Observability) -> anyhow::Result<RunReport> {
    let config = ConfigResolver::resolve(settings)?;
    config.ensure_device_present()?;

    tracing::info!(
        device = %config.device_path.display(),
        baud_rate = config.baud_rate,
        output = %config.output.display(),
        db_path = ?config.db_path,
        slack = config.slack_url.is_some(),
        quiet = config.quiet,
        jam_threshold = config.jam_threshold,
        recovery_threshold = config.recovery_threshold,
        "configuration resolved"
    );

    bootstrap::ensure_directories(&config)?;
    let store = ReadingStore::open(&config.output, config.db_path.as_deref())?;
    let session = DeviceSession::new(&config.device_path, config.baud_rate);
    let notifier = NotificationSink::new(config.slack_url.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    let signals = tokio::spawn(async move {
        bootstrap::shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let mut supervisor = MonitorSupervisor::new(
        session,
        store,
        SupervisorOptions::from(&config),
        observability,
    );
    let report = supervisor.run(&notifier, stop_rx).await;
    drop(supervisor);

    signals.abort();
    // Give queued notifications (notably the fatal one) a chance to go out.
    notifier.shutdown().await;

    tracing::info!(
        final_state = %report.final_state,
        readings = report.readings_persisted,
        reconnects = report.reconnects,
        jamming_episodes = report.jamming_episodes,
        "monitor finished"
    );
    Ok(report)
}
