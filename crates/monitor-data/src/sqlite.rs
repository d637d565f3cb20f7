//! SQLite storage for readings.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use monitor_core::error::PersistenceError;
use monitor_core::models::Reading;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS readings (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT    NOT NULL,
    jam_ind   INTEGER NOT NULL,
    flags     INTEGER
);
CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings (timestamp);
";

fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> PersistenceError {
    move |e| PersistenceError::Database {
        context,
        details: e.to_string(),
    }
}

/// Append-only `readings` table in a SQLite file.
pub struct SqliteStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let conn = Connection::open(path).map_err(db_err("open database"))?;
        conn.execute_batch(SCHEMA).map_err(db_err("create schema"))?;
        tracing::info!(path = %path.display(), "sqlite store ready");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Some(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<&Connection, PersistenceError> {
        self.conn.as_ref().ok_or(PersistenceError::Closed)
    }

    pub fn append(&mut self, reading: &Reading) -> Result<(), PersistenceError> {
        self.conn()?
            .execute(
                "INSERT INTO readings (timestamp, jam_ind, flags) VALUES (?1, ?2, ?3)",
                params![reading.timestamp.to_rfc3339(), reading.jam_ind, reading.flags],
            )
            .map_err(db_err("insert reading"))?;
        Ok(())
    }

    /// All stored readings in insertion order.
    pub fn readings(&self) -> Result<Vec<Reading>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT timestamp, jam_ind, flags FROM readings ORDER BY id")
            .map_err(db_err("prepare select"))?;
        let rows = stmt
            .query_map([], |row| {
                let ts: String = row.get(0)?;
                let jam_ind: u8 = row.get(1)?;
                let flags: Option<u8> = row.get(2)?;
                Ok((ts, jam_ind, flags))
            })
            .map_err(db_err("select readings"))?;

        let mut out = Vec::new();
        for row in rows {
            let (ts, jam_ind, flags) = row.map_err(db_err("read row"))?;
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| PersistenceError::Database {
                    context: "parse timestamp",
                    details: e.to_string(),
                })?
                .with_timezone(&Utc);
            out.push(Reading::new(timestamp, jam_ind, flags));
        }
        Ok(out)
    }

    /// Close the connection. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<(), PersistenceError> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| db_err("close database")(e)),
            None => Ok(()),
        }
    }
}
