//! Device layer for the jamming monitor.
//!
//! [`ubx`] turns the receiver's byte stream into frames and MON-HW reports;
//! [`session::DeviceSession`] owns the serial handle and its connection
//! lifecycle. The supervisor only depends on the [`Device`] trait.

use std::future::Future;

use monitor_core::error::DeviceError;
use monitor_core::models::{ConnectionState, Reading};

pub mod session;
pub mod ubx;

pub use session::DeviceSession;

/// A reconnectable source of jamming readings.
///
/// `release` drops the OS handle but keeps the session usable for another
/// `acquire`; `close` is terminal. Both are idempotent and never fail.
pub trait Device: Send {
    /// Open the device and start streaming.
    fn acquire(&mut self) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Wait for the next decoded reading.
    ///
    /// Must be cancel-safe: dropping the future loses no buffered data.
    fn next_reading(&mut self) -> impl Future<Output = Result<Reading, DeviceError>> + Send;

    /// Release the handle after a connection loss, ready for `acquire`.
    fn release(&mut self);

    /// Release the handle for good.
    fn close(&mut self);

    fn state(&self) -> ConnectionState;
}
