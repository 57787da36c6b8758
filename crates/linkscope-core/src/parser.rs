//! Parsers for the three text protocols linkscope understands.
//!
//! - **Status lines** printed by the bandwidth-test process on stdout.
//! - **CSV log** written by the same process when run with the `log` profile.
//! - **Shell blocks** returned by the router for one poll command.
//!
//! Each grammar is a small declarative table consumed by one generic
//! classifier. None of them fail for a whole stream: bad lines or rows are
//! reported individually and the caller keeps going.

use crate::error::ParseError;
use crate::metric::{
    PACKET_LOSS_RATE, QUEUE_DELAY, RSRP, RSRQ, RSSI, RTT, RX, SINR, TRANSMIT_RATE, TX,
};

/// One metric value; `None` is a legal, slot-occupying absent sample.
pub type Reading = (&'static str, Option<f64>);

// ---------------------------------------------------------------------------
// Status lines
// ---------------------------------------------------------------------------

/// Substring → metric, tried in order; the first label found in a line wins.
const STATUS_LABELS: &[(&str, &str)] = &[
    ("Estimated queue delay [s]", QUEUE_DELAY),
    ("RTT [s]", RTT),
    ("Total transmit bitrate [bps]", TRANSMIT_RATE),
    ("Packet loss", PACKET_LOSS_RATE),
];

/// Classify one stdout line.
///
/// Returns `Ok(None)` for lines that carry no known label. A recognized line
/// whose value (the text after the last `:`) is not a number is an error for
/// that line only.
pub fn parse_status_line(line: &str) -> Result<Option<(&'static str, f64)>, ParseError> {
    let line = line.trim();
    let Some(&(_, metric)) = STATUS_LABELS.iter().find(|(label, _)| line.contains(label)) else {
        return Ok(None);
    };

    let text = line.rsplit_once(':').map_or("", |(_, v)| v).trim();
    text.parse::<f64>()
        .map(|v| Some((metric, v)))
        .map_err(|_| ParseError::Number {
            metric,
            text: text.to_string(),
        })
}

// ---------------------------------------------------------------------------
// CSV log
// ---------------------------------------------------------------------------

/// Column index → metric, fixed by the bandwidth-test log format.
const LOG_COLUMNS: &[(usize, &str)] = &[
    (1, QUEUE_DELAY),
    (2, RTT),
    (3, TRANSMIT_RATE),
    (11, PACKET_LOSS_RATE),
];

/// One data row of the log, with its zero-based position after the header.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub index: usize,
    pub readings: Vec<Reading>,
}

/// Everything recovered from one full read of the log file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogBatch {
    /// Rows that parsed cleanly, in file order.
    pub rows: Vec<LogRow>,
    /// Data lines that are final (newline-terminated, or the tail when
    /// `include_tail` was set). Rows past this count may still be growing.
    pub committed: usize,
    /// Indices of rows with fewer columns than the header.
    pub short_rows: Vec<usize>,
    pub errors: Vec<ParseError>,
}

/// Parse the full contents of the CSV log.
///
/// The header row only fixes the expected column count. An unterminated last
/// line is treated as a write in progress unless `include_tail` is set.
pub fn parse_log(text: &str, include_tail: bool) -> LogBatch {
    let mut batch = LogBatch::default();
    let mut lines = text.split_inclusive('\n');

    let header_columns = match lines.next() {
        Some(h) if h.ends_with('\n') || include_tail => split_row(h).len(),
        _ => return batch,
    };
    let schema_columns = LOG_COLUMNS.iter().map(|&(c, _)| c + 1).max().unwrap_or(0);
    let min_columns = header_columns.max(schema_columns);

    for (index, raw) in lines.enumerate() {
        if !raw.ends_with('\n') && !include_tail {
            break;
        }
        batch.committed = index + 1;

        let fields = split_row(raw);
        if fields.len() == 1 && fields[0].is_empty() {
            continue;
        }
        if fields.len() < min_columns {
            batch.short_rows.push(index);
            continue;
        }

        match row_readings(index, &fields) {
            Ok(readings) => batch.rows.push(LogRow { index, readings }),
            Err(e) => batch.errors.push(e),
        }
    }

    batch
}

fn split_row(raw: &str) -> Vec<&str> {
    raw.trim_end_matches(['\r', '\n'])
        .split(',')
        .map(str::trim)
        .collect()
}

fn row_readings(row: usize, fields: &[&str]) -> Result<Vec<Reading>, ParseError> {
    LOG_COLUMNS
        .iter()
        .map(|&(column, metric)| {
            let text = fields[column];
            if text.is_empty() {
                return Ok((metric, None));
            }
            text.parse::<f64>()
                .map(|v| (metric, Some(v)))
                .map_err(|_| ParseError::Column {
                    row,
                    column,
                    metric,
                    text: text.to_string(),
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Shell blocks
// ---------------------------------------------------------------------------

/// Number of positional lines every poll response must start with.
pub const BLOCK_POSITIONAL_LINES: usize = 6;

/// Keys scanned in the free-form tail of a poll response.
const BLOCK_KEYS: &[&str] = &[RSSI, RSRP, SINR, RSRQ];

/// Header of the persisted radio log, in column order.
pub const RADIO_LOG_HEADER: [&str; 10] = [
    "TIME_STAMP",
    "LATITUDE",
    "LONGITUDE",
    "ACCURACY",
    "TX",
    "RX",
    "RSSI",
    "RSRP",
    "SINR",
    "RSRQ",
];

/// One complete poll response from the router.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadioRecord {
    pub timestamp: String,
    pub latitude: String,
    pub longitude: String,
    pub accuracy: String,
    pub tx: String,
    pub rx: String,
    pub rssi: Option<String>,
    pub rsrp: Option<String>,
    pub sinr: Option<String>,
    pub rsrq: Option<String>,
}

impl RadioRecord {
    /// Field values in [`RADIO_LOG_HEADER`] order; missing keys are empty.
    pub fn csv_fields(&self) -> [&str; 10] {
        fn opt(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or("")
        }
        [
            self.timestamp.as_str(),
            self.latitude.as_str(),
            self.longitude.as_str(),
            self.accuracy.as_str(),
            self.tx.as_str(),
            self.rx.as_str(),
            opt(&self.rssi),
            opt(&self.rsrp),
            opt(&self.sinr),
            opt(&self.rsrq),
        ]
    }

    /// The charted metrics of this record, as one time-aligned group.
    /// Values that are missing or not numeric become absent samples.
    pub fn readings(&self) -> Vec<Reading> {
        let num = |v: Option<&str>| v.and_then(leading_number);
        vec![
            (RSSI, num(self.rssi.as_deref())),
            (RSRP, num(self.rsrp.as_deref())),
            (SINR, num(self.sinr.as_deref())),
            (RSRQ, num(self.rsrq.as_deref())),
            (TX, num(Some(self.tx.as_str()))),
            (RX, num(Some(self.rx.as_str()))),
        ]
    }

    fn set_key(&mut self, key: &str, value: String) {
        match key {
            RSSI => self.rssi = Some(value),
            RSRP => self.rsrp = Some(value),
            SINR => self.sinr = Some(value),
            RSRQ => self.rsrq = Some(value),
            _ => {}
        }
    }
}

/// First whitespace-separated token parsed as f64 (`"-65 dBm"` → -65).
fn leading_number(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Result of classifying one poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Record(RadioRecord),
    /// Fewer positional lines than required.
    Unparsable { lines: usize },
    /// The shell printed its prompt where data was expected.
    Discard,
}

/// Parser for router poll responses.
#[derive(Debug, Clone)]
pub struct ShellBlockParser {
    poll_command: String,
    prompt_sentinel: String,
}

impl ShellBlockParser {
    pub fn new(poll_command: impl Into<String>, prompt_sentinel: impl Into<String>) -> Self {
        Self {
            poll_command: poll_command.into().trim().to_string(),
            prompt_sentinel: prompt_sentinel.into(),
        }
    }

    /// Classify one response. Echoes of the poll command are ignored.
    pub fn parse(&self, response: &str) -> BlockOutcome {
        let lines: Vec<&str> = response
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| self.poll_command.is_empty() || !l.contains(self.poll_command.as_str()))
            .collect();

        let head = &lines[..lines.len().min(BLOCK_POSITIONAL_LINES)];
        if !self.prompt_sentinel.is_empty()
            && head.iter().any(|l| l.starts_with(self.prompt_sentinel.as_str()))
        {
            return BlockOutcome::Discard;
        }
        if lines.len() < BLOCK_POSITIONAL_LINES {
            return BlockOutcome::Unparsable { lines: lines.len() };
        }

        let mut record = RadioRecord {
            timestamp: lines[0].to_string(),
            latitude: lines[1].to_string(),
            longitude: lines[2].to_string(),
            accuracy: lines[3].to_string(),
            tx: lines[4].to_string(),
            rx: lines[5].to_string(),
            ..Default::default()
        };

        for line in &lines[BLOCK_POSITIONAL_LINES..] {
            if let Some((key, value)) = line.split_once(':')
                && let Some(key) = BLOCK_KEYS.iter().find(|k| **k == key.trim())
            {
                record.set_key(key, value.trim().to_string());
            }
        }

        BlockOutcome::Record(record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
