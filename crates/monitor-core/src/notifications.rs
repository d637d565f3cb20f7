//! Outbound notifications for the jamming monitor.
//!
//! The supervisor only ever sees the [`Notify`] capability: a single
//! `notify(message)` call that can never fail. [`NotificationSink`] is the
//! production implementation, delivering messages to a Slack-compatible
//! webhook from a background task so a slow or unreachable endpoint never
//! stalls the device read loop.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Prefix prepended to every delivered message.
pub const MESSAGE_PREFIX: &str = "jamMon: ";

/// Per-request timeout for webhook delivery.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long [`NotificationSink::shutdown`] waits for queued messages.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Maximum number of undelivered messages held in memory.
const QUEUE_CAPACITY: usize = 32;

// ── Notify ────────────────────────────────────────────────────────────────────

/// A fire-and-forget "send message" capability.
///
/// Implementations must not block for long and must never panic: the
/// supervisor calls this while it is already handling another failure.
pub trait Notify: Send + Sync {
    fn notify(&self, message: &str);
}

impl<F> Notify for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, message: &str) {
        self(message)
    }
}

// ── NotificationSink ──────────────────────────────────────────────────────────

/// Webhook-backed [`Notify`] implementation.
///
/// Built once from configuration. Without an endpoint every call is a no-op.
///
/// # Example
///
/// ```no_run
/// use monitor_core::notifications::{NotificationSink, Notify};
///
/// # async fn demo() {
/// let sink = NotificationSink::new(Some("https://hooks.slack.com/services/T/B/X".into()));
/// sink.notify("Starting Jammer monitor");
/// sink.shutdown().await;
/// # }
/// ```
pub struct NotificationSink {
    /// Queue feeding the delivery task; `None` when no endpoint is configured.
    tx: Option<mpsc::Sender<String>>,
    /// Background delivery task.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationSink {
    /// Bind `url` into a sink.
    ///
    /// Must be called from within a tokio runtime when `url` is `Some`, since
    /// the delivery task is spawned immediately.
    pub fn new(url: Option<String>) -> Self {
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            tracing::info!("no notification endpoint configured; notifications disabled");
            return Self::disabled();
        };

        let client = match reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "failed to build HTTP client; notifications disabled");
                return Self::disabled();
            }
        };

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = tokio::spawn(delivery_loop(client, url, rx));

        Self {
            tx: Some(tx),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// A sink that drops every message.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            worker: Mutex::new(None),
        }
    }

    /// `true` when messages are actually delivered somewhere.
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Stop accepting messages and wait (bounded) for queued ones to go out.
    pub async fn shutdown(mut self) {
        // Dropping the sender lets the delivery loop drain and exit.
        self.tx = None;

        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(worker) = worker else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, worker).await {
            Ok(Ok(())) => tracing::debug!("notification queue drained"),
            Ok(Err(e)) => tracing::warn!(error = %e, "notification task ended abnormally"),
            Err(_) => tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "pending notifications dropped at shutdown"
            ),
        }
    }
}

impl Notify for NotificationSink {
    fn notify(&self, message: &str) {
        let Some(tx) = &self.tx else {
            tracing::debug!(text = message, "notification skipped; no endpoint");
            return;
        };

        match tx.try_send(format!("{MESSAGE_PREFIX}{message}")) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(text = message, "notification queue full; message dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(text = message, "notification task gone; message dropped");
            }
        }
    }
}

// ── Delivery ──────────────────────────────────────────────────────────────────

async fn delivery_loop(client: reqwest::Client, url: String, mut rx: mpsc::Receiver<String>) {
    while let Some(text) = rx.recv().await {
        match post_message(&client, &url, &text).await {
            Ok(()) => tracing::debug!(text, "notification delivered"),
            Err(e) => tracing::warn!(error = %e, text, "notification delivery failed"),
        }
    }
}

/// POST `{"text": text}` to a Slack-style incoming webhook.
pub async fn post_message(
    client: &reqwest::Client,
    url: &str,
    text: &str,
) -> Result<(), reqwest::Error> {
    let payload = serde_json::json!({ "text": text });
    client
        .post(url)
        .json(&payload)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
