//! Durable log of every accepted radio poll.
//!
//! A recording is a CSV file plus a JSON sidecar written when the session
//! ends:
//! - `PHY_TEST_<YYYY-MM-DD_HH-MM-SS>.csv`: one row per accepted response,
//!   flushed before the row is shown on screen.
//! - `PHY_TEST_<...>.json`: id, target, timing and row counters.

use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::parser::{RADIO_LOG_HEADER, RadioRecord};

// ---------------------------------------------------------------------------
// Recording metadata (sidecar JSON)
// ---------------------------------------------------------------------------

/// Metadata written next to the CSV when a recording ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    pub version: u32,
    pub id: String,
    pub target: String,
    pub csv_file: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub rows: u64,
    pub discarded: u64,
    pub unparsable: u64,
    pub linkscope_version: String,
}

// ---------------------------------------------------------------------------
// RadioLogWriter
// ---------------------------------------------------------------------------

/// Append-only CSV writer for one remote-shell session.
pub struct RadioLogWriter {
    path: PathBuf,
    csv_writer: BufWriter<File>,
    rows: u64,
    discarded: u64,
    unparsable: u64,
    started_at: OffsetDateTime,
    started_instant: Instant,
    record_id: String,
    target: String,
}

impl RadioLogWriter {
    /// Create `output_dir` if needed and open a fresh timestamped log with
    /// its header row.
    pub fn create(output_dir: &Path, target: &str) -> Result<Self> {
        let started_at = OffsetDateTime::now_utc();
        let stamp = format_file_stamp(started_at);

        fs::create_dir_all(output_dir).map_err(|source| Error::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let (path, file) = open_unique(output_dir, &format!("PHY_TEST_{stamp}"))?;

        let mut csv_writer = BufWriter::new(file);
        let io_err = |source| Error::Io {
            path: path.clone(),
            source,
        };
        writeln!(csv_writer, "{}", RADIO_LOG_HEADER.join(",")).map_err(io_err)?;
        csv_writer.flush().map_err(io_err)?;

        Ok(Self {
            path,
            csv_writer,
            rows: 0,
            discarded: 0,
            unparsable: 0,
            started_at,
            started_instant: Instant::now(),
            record_id: Uuid::new_v4().to_string(),
            target: target.to_string(),
        })
    }

    /// Append one record and flush it to disk.
    pub fn write_record(&mut self, record: &RadioRecord) -> io::Result<()> {
        let row: Vec<Cow<'_, str>> = record.csv_fields().into_iter().map(csv_escape).collect();
        writeln!(self.csv_writer, "{}", row.join(","))?;
        self.csv_writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn note_discarded(&mut self) {
        self.discarded += 1;
    }

    pub fn note_unparsable(&mut self) {
        self.unparsable += 1;
    }

    /// Flush and write the JSON sidecar. Returns the CSV path.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.csv_writer.flush()?;

        let meta = RecordMeta {
            version: 1,
            id: self.record_id,
            target: self.target,
            csv_file: self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            started_at: format_iso8601(self.started_at),
            ended_at: format_iso8601(OffsetDateTime::now_utc()),
            duration_ms: self.started_instant.elapsed().as_millis() as u64,
            rows: self.rows,
            discarded: self.discarded,
            unparsable: self.unparsable,
            linkscope_version: crate::VERSION.to_string(),
        };

        let json = serde_json::to_string_pretty(&meta).map_err(io::Error::other)?;
        fs::write(self.path.with_extension("json"), json)?;

        Ok(self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Open `<stem>.csv`, or `<stem>_2.csv`, `<stem>_3.csv`, ... if taken.
fn open_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File)> {
    let mut n = 1;
    loop {
        let name = if n == 1 {
            format!("{stem}.csv")
        } else {
            format!("{stem}_{n}.csv")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && n < 100 => n += 1,
            Err(source) => return Err(Error::Io { path, source }),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Quote a CSV field if it contains a separator, quote or line break.
fn csv_escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Log file name stamp, UTC. Example: `2026-02-15_01-30-00`
fn format_file_stamp(at: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}_{:02}-{:02}-{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Whole-second RFC 3339 timestamp for the sidecar.
fn format_iso8601(at: OffsetDateTime) -> String {
    let at = at.replace_nanosecond(0).unwrap_or(at);
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
