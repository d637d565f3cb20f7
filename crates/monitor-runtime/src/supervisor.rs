//! Monitoring supervisor.
//!
//! [`MonitorSupervisor`] owns one [`Device`] and one [`ReadingSink`] and runs
//! the read → persist → evaluate → notify loop until a stop is requested or
//! an unrecoverable error occurs. Connection losses are handled in place by
//! releasing the device and re-acquiring it with exponential back-off.
//!
//! Whatever way the loop ends, [`MonitorSupervisor::teardown`] closes the
//! device and the sink exactly once.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

use monitor_core::error::{DeviceError, MonitorError};
use monitor_core::models::Reading;
use monitor_core::notifications::Notify;
use monitor_core::settings::EffectiveConfig;
use monitor_data::ReadingSink;
use monitor_device::Device;

use crate::alert::{AlertTracker, AlertTransition};
use crate::observability::Observability;

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Reconnecting,
    Stopping,
    Stopped,
    Failed,
}

impl SupervisorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Reconnecting => "reconnecting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Smallest first back-off step.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1);

/// Back-off schedule for re-acquiring a lost device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Failed acquire attempts tolerated per outage; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the `attempt`-th acquire (0-based), doubling up to `max_delay`.
    ///
    /// A zero `initial_delay` is raised to [`MIN_RECONNECT_DELAY`] so the
    /// schedule still grows.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay
            .max(MIN_RECONNECT_DELAY)
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Readings strictly above this raise a jamming alert.
    pub jam_threshold: u8,
    /// Readings at or below this clear it.
    pub recovery_threshold: u8,
    /// Suppress lifecycle notifications (start, reconnect).
    pub quiet: bool,
    /// Used in notification texts, usually the device path.
    pub device_label: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            jam_threshold: 50,
            recovery_threshold: 50,
            quiet: false,
            device_label: "device".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl From<&EffectiveConfig> for SupervisorOptions {
    fn from(config: &EffectiveConfig) -> Self {
        Self {
            jam_threshold: config.jam_threshold,
            recovery_threshold: config.recovery_threshold,
            quiet: config.quiet,
            device_label: config.device_path.display().to_string(),
            reconnect: ReconnectPolicy {
                initial_delay: config.reconnect_delay,
                max_attempts: config.max_reconnects,
                ..ReconnectPolicy::default()
            },
        }
    }
}

/// Summary of one [`MonitorSupervisor::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub final_state: SupervisorState,
    /// Whether the initial acquire succeeded.
    pub started: bool,
    pub readings_persisted: u64,
    /// Outages recovered from or given up on.
    pub reconnects: u32,
    pub jamming_episodes: u32,
    /// Every state change in order, starting from `Starting`.
    pub transitions: Vec<(SupervisorState, SupervisorState)>,
    pub error: Option<MonitorError>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            final_state: SupervisorState::Starting,
            started: false,
            readings_persisted: 0,
            reconnects: 0,
            jamming_episodes: 0,
            transitions: Vec::new(),
            error: None,
        }
    }

    /// Number of recorded `from → to` transitions.
    pub fn count_transition(&self, from: SupervisorState, to: SupervisorState) -> usize {
        self.transitions
            .iter()
            .filter(|&&(f, t)| f == from && t == to)
            .count()
    }
}

// ── Notification texts ────────────────────────────────────────────────────────

pub mod messages {
    use monitor_core::error::MonitorError;

    pub fn started(device: &str) -> String {
        format!("Starting Jammer monitor on {device}")
    }

    pub fn jamming_detected(jam_ind: u8, threshold: u8) -> String {
        format!("Jamming detected! jamInd={jam_ind} (threshold {threshold})")
    }

    pub fn connection_lost(reason: &str) -> String {
        format!("Lost connection to serial device: {reason}")
    }

    pub fn connection_restored(device: &str, attempts: u32) -> String {
        let plural = if attempts == 1 { "" } else { "s" };
        format!("Reconnected to {device} after {attempts} attempt{plural}")
    }

    pub fn exception(err: &MonitorError) -> String {
        format!("Exception occurred: {err}")
    }
}

// ── MonitorSupervisor ─────────────────────────────────────────────────────────

/// Drives one device into one sink. Run it once; teardown is final.
pub struct MonitorSupervisor<D: Device, S: ReadingSink> {
    device: D,
    sink: S,
    options: SupervisorOptions,
    alerts: AlertTracker,
    observability: Observability,
    state: SupervisorState,
    report: RunReport,
    torn_down: bool,
}

impl<D: Device, S: ReadingSink> MonitorSupervisor<D, S> {
    pub fn new(device: D, sink: S, options: SupervisorOptions, observability: Observability) -> Self {
        let alerts = AlertTracker::new(options.jam_threshold, options.recovery_threshold);
        Self {
            device,
            sink,
            options,
            alerts,
            observability,
            state: SupervisorState::Starting,
            report: RunReport::new(),
            torn_down: false,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run until `stop` turns `true` or a fatal error occurs, then tear down.
    ///
    /// Never returns an error: fatal conditions are logged, notified once and
    /// recorded in the report.
    pub async fn run<N>(&mut self, notifier: &N, mut stop: watch::Receiver<bool>) -> RunReport
    where
        N: Notify + ?Sized,
    {
        match self.drive(notifier, &mut stop).await {
            Ok(()) => {
                self.transition(SupervisorState::Stopping);
                tracing::info!("stop requested; shutting down monitor");
            }
            Err(err) => {
                self.transition(SupervisorState::Failed);
                tracing::error!(error = %err, "Exception occurred in monitor");
                notifier.notify(&messages::exception(&err));
                self.report.error = Some(err);
            }
        }

        self.teardown();

        if self.state == SupervisorState::Stopping {
            self.transition(SupervisorState::Stopped);
        }
        self.report.final_state = self.state;
        self.report.jamming_episodes = self.alerts.episodes();
        self.report.clone()
    }

    /// Close the device, then the sink, then flush logs. Idempotent and
    /// infallible: failures are logged so later resources are still released.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.device.close();
        if let Err(e) = self.sink.close() {
            tracing::error!(error = %e, "failed to close reading store");
        }
        tracing::debug!("monitor teardown complete");
        self.observability.flush();
    }

    // ── Private implementation ────────────────────────────────────────────

    async fn drive<N>(&mut self, notifier: &N, stop: &mut watch::Receiver<bool>) -> Result<(), MonitorError>
    where
        N: Notify + ?Sized,
    {
        let acquired = tokio::select! {
            biased;
            () = stop_requested(stop) => return Ok(()),
            result = self.device.acquire() => result,
        };
        acquired.map_err(|e| MonitorError::Fatal(format!("Failed to start monitor: {e}")))?;

        self.report.started = true;
        self.transition(SupervisorState::Running);
        tracing::info!(device = %self.options.device_label, "Starting Jammer Monitor!");
        if !self.options.quiet {
            notifier.notify(&messages::started(&self.options.device_label));
        }

        loop {
            let next = tokio::select! {
                biased;
                () = stop_requested(stop) => return Ok(()),
                result = self.device.next_reading() => result,
            };

            match next.map_err(MonitorError::from) {
                Ok(reading) => self.handle_reading(&reading, notifier)?,
                Err(MonitorError::ConnectionLost(reason)) => {
                    if !self.reconnect(notifier, stop, &reason).await? {
                        return Ok(());
                    }
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }

    /// Persist first, then evaluate, so an alert always refers to a stored reading.
    fn handle_reading<N>(&mut self, reading: &Reading, notifier: &N) -> Result<(), MonitorError>
    where
        N: Notify + ?Sized,
    {
        self.sink.append(reading)?;
        self.report.readings_persisted += 1;
        tracing::debug!(
            jam_ind = reading.jam_ind,
            jamming_state = reading.jamming_state().map(|s| s.as_str()),
            "reading persisted"
        );

        match self.alerts.observe(reading.jam_ind) {
            Some(AlertTransition::Raised { jam_ind, threshold }) => {
                tracing::warn!(jam_ind, threshold, "jamming detected");
                notifier.notify(&messages::jamming_detected(jam_ind, threshold));
            }
            Some(AlertTransition::Cleared { jam_ind, peak }) => {
                tracing::info!(jam_ind, peak, "jamming cleared");
            }
            None => {}
        }
        Ok(())
    }

    /// Re-acquire the device after a connection loss.
    ///
    /// Returns `Ok(true)` once streaming again, `Ok(false)` if a stop arrived
    /// first, and a fatal error when the device fails in a non-recoverable way
    /// or the attempt budget runs out.
    async fn reconnect<N>(
        &mut self,
        notifier: &N,
        stop: &mut watch::Receiver<bool>,
        reason: &str,
    ) -> Result<bool, MonitorError>
    where
        N: Notify + ?Sized,
    {
        self.transition(SupervisorState::Reconnecting);
        self.report.reconnects += 1;
        tracing::warn!(%reason, "lost connection to serial device; reconnecting");
        notifier.notify(&messages::connection_lost(reason));
        self.device.release();

        let mut attempts: u32 = 0;
        loop {
            if self.options.reconnect.exhausted(attempts) {
                return Err(MonitorError::Fatal(format!(
                    "Gave up reconnecting to {} after {attempts} attempts (lost: {reason})",
                    self.options.device_label
                )));
            }

            let delay = self.options.reconnect.delay_for(attempts);
            tokio::select! {
                biased;
                () = stop_requested(stop) => return Ok(false),
                () = tokio::time::sleep(delay) => {}
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                () = stop_requested(stop) => return Ok(false),
                result = self.device.acquire() => result,
            };

            match result {
                Ok(()) => {
                    self.transition(SupervisorState::Running);
                    tracing::info!(attempts, "reconnected to serial device");
                    if !self.options.quiet {
                        notifier.notify(&messages::connection_restored(
                            &self.options.device_label,
                            attempts,
                        ));
                    }
                    return Ok(true);
                }
                Err(e @ (DeviceError::Unavailable { .. } | DeviceError::ConnectionLost(_))) => {
                    tracing::debug!(
                        attempts,
                        error = %e,
                        next_delay_ms = self.options.reconnect.delay_for(attempts).as_millis() as u64,
                        "reconnect attempt failed"
                    );
                    self.device.release();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.state == next {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "supervisor state");
        self.report.transitions.push((self.state, next));
        self.state = next;
    }
}

impl<D: Device, S: ReadingSink> Drop for MonitorSupervisor<D, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Resolves once the stop flag is `true`; pends forever if the sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let sender_gone = stop.wait_for(|stopped| *stopped).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
