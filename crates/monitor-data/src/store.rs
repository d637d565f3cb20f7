//! The persistence sink consumed by the supervisor.

use std::path::Path;

use monitor_core::error::PersistenceError;
use monitor_core::models::Reading;

use crate::jsonl::DailyJsonlWriter;
use crate::sqlite::SqliteStore;

/// Append-only destination for readings.
pub trait ReadingSink: Send {
    /// Persist one reading. Any error is fatal to the caller.
    fn append(&mut self, reading: &Reading) -> Result<(), PersistenceError>;

    /// Flush and release all handles. Must be idempotent.
    fn close(&mut self) -> Result<(), PersistenceError>;
}

/// Flat-file time series plus an optional SQLite table.
pub struct ReadingStore {
    jsonl: DailyJsonlWriter,
    db: Option<SqliteStore>,
    closed: bool,
}

impl ReadingStore {
    /// Prepare the store. The database (if any) is opened eagerly so a bad
    /// path is reported at startup; the time-series file opens on first append.
    pub fn open(output: &Path, db_path: Option<&Path>) -> Result<Self, PersistenceError> {
        let db = db_path.map(SqliteStore::open).transpose()?;
        Ok(Self {
            jsonl: DailyJsonlWriter::new(output),
            db,
            closed: false,
        })
    }

    pub fn database(&self) -> Option<&SqliteStore> {
        self.db.as_ref()
    }
}

impl ReadingSink for ReadingStore {
    fn append(&mut self, reading: &Reading) -> Result<(), PersistenceError> {
        if self.closed {
            return Err(PersistenceError::Closed);
        }
        self.jsonl.append(reading)?;
        if let Some(db) = self.db.as_mut() {
            db.append(reading)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), PersistenceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Close both even if the first fails.
        let file_result = self.jsonl.close();
        let db_result = self.db.as_mut().map_or(Ok(()), SqliteStore::close);

        if let Err(e) = &file_result {
            tracing::warn!(error = %e, "failed to close time-series file");
        }
        if let Err(e) = &db_result {
            tracing::warn!(error = %e, "failed to close database");
        }
        file_result.and(db_result)
    }
}
