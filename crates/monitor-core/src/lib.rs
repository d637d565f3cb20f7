//! Shared building blocks for the jamming monitor.
//!
//! Holds the configuration resolver, the error taxonomy, the reading and
//! state models, and the outbound notification sink.

pub mod error;
pub mod models;
pub mod notifications;
pub mod settings;
