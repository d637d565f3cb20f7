//! Runtime layer for the jamming monitor.
//!
//! Owns the supervisor state machine that drives a device session, persists
//! readings, raises jamming alerts and handles reconnects and shutdown.

pub mod alert;
pub mod observability;
pub mod supervisor;

pub use monitor_core as core;
pub use monitor_data as data;
pub use monitor_device as device;
