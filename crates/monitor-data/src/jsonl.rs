//! Per-day JSONL time-series files.
//!
//! Each reading becomes one line in `<output>-<YYYY-MM-DD>.jsonl`, where the
//! date is the reading's UTC date, so a long run rolls over to a fresh file
//! every day.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use monitor_core::error::PersistenceError;
use monitor_core::models::{JammingState, Reading};

/// One line of the time-series file.
#[derive(Debug, Serialize)]
struct Record {
    timestamp: DateTime<Utc>,
    jam_ind: u8,
    flags: Option<u8>,
    jamming_state: Option<JammingState>,
}

impl From<&Reading> for Record {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            jam_ind: reading.jam_ind,
            flags: reading.flags,
            jamming_state: reading.jamming_state(),
        }
    }
}

struct OpenDay {
    date: NaiveDate,
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Appends readings to the file for the reading's day.
pub struct DailyJsonlWriter {
    base: PathBuf,
    current: Option<OpenDay>,
}

impl DailyJsonlWriter {
    /// `base` is the output prefix, e.g. `data/output`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            current: None,
        }
    }

    /// File that holds the readings of `date`.
    pub fn path_for(base: &Path, date: NaiveDate) -> PathBuf {
        let mut name = base
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "output".into());
        name.push(format!("-{}.jsonl", date.format("%Y-%m-%d")));
        base.with_file_name(name)
    }

    pub fn append(&mut self, reading: &Reading) -> Result<(), PersistenceError> {
        let date = reading.timestamp.date_naive();
        if self.current.as_ref().map(|day| day.date) != Some(date) {
            self.roll_to(date)?;
        }

        let Some(day) = self.current.as_mut() else {
            return Err(PersistenceError::Closed);
        };
        serde_json::to_writer(&mut day.writer, &Record::from(reading))?;
        day.writer
            .write_all(b"\n")
            .and_then(|()| day.writer.flush())
            .map_err(|e| PersistenceError::io(&day.path, e))
    }

    /// Flush and release the open file. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<(), PersistenceError> {
        match self.current.take() {
            Some(mut day) => day
                .writer
                .flush()
                .map_err(|e| PersistenceError::io(&day.path, e)),
            None => Ok(()),
        }
    }

    fn roll_to(&mut self, date: NaiveDate) -> Result<(), PersistenceError> {
        self.close()?;

        let path = Self::path_for(&self.base, date);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;

        tracing::info!(path = %path.display(), "writing time-series to file");
        self.current = Some(OpenDay {
            date,
            path,
            writer: BufWriter::new(file),
        });
        Ok(())
    }
}
