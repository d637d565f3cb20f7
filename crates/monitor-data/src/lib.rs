//! Persistence layer for the jamming monitor.
//!
//! Readings are appended to a per-day JSONL time-series file and, when a
//! database path is configured, to a SQLite `readings` table.

pub mod jsonl;
pub mod sqlite;
pub mod store;

pub use monitor_core as core;
pub use store::{ReadingSink, ReadingStore};
