//! Periodic re-read of the bandwidth-test CSV log.
//!
//! Every poll reads the whole file and appends only rows that were not seen
//! before. All new rows of one poll land in the store as a single update.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::process::ChildProcess;
use super::{Producer, SourceContext};
use crate::error::{Error, ParseError, Result};
use crate::parser::{LogBatch, parse_log};

/// Polls the log written by the `log` profile.
pub struct LogPoller {
    process: Arc<ChildProcess>,
    path: PathBuf,
    interval: Duration,
}

impl LogPoller {
    pub fn new(process: Arc<ChildProcess>, path: PathBuf, interval: Duration) -> Self {
        Self {
            process,
            path,
            interval,
        }
    }
}

/// Row cursor across polls.
#[derive(Debug, Default)]
struct Cursor {
    /// Data rows already consumed.
    consumed: usize,
}

enum Ingest {
    Continue,
    Superseded,
}

impl Cursor {
    fn ingest(&mut self, batch: &LogBatch, ctx: &SourceContext) -> Ingest {
        if batch.committed < self.consumed {
            info!(
                "log shrank from {} to {} rows, reading it from the start",
                self.consumed, batch.committed
            );
            self.consumed = 0;
        }
        let from = self.consumed;

        let fresh: Vec<_> = batch.rows.iter().filter(|r| r.index >= from).collect();
        let samples: usize = fresh.iter().map(|r| r.readings.len()).sum();
        if !ctx
            .writer
            .append_groups(fresh.iter().map(|r| r.readings.as_slice()))
        {
            return Ingest::Superseded;
        }
        ctx.stats.samples(samples);

        for _ in batch.short_rows.iter().filter(|&&i| i >= from) {
            ctx.stats.skipped();
        }
        for e in &batch.errors {
            if let ParseError::Column { row, .. } = e
                && *row < from
            {
                continue;
            }
            ctx.stats.parse_error();
            debug!("skipping log row: {e}");
        }

        self.consumed = self.consumed.max(batch.committed);
        Ingest::Continue
    }
}

impl Producer for LogPoller {
    fn name(&self) -> &'static str {
        "log-poller"
    }

    fn run(self: Box<Self>, ctx: &SourceContext) -> Result<()> {
        let mut cursor = Cursor::default();

        loop {
            if ctx.stop.wait_timeout(self.interval) {
                return Ok(());
            }
            // Checked before reading so rows written just before exit are
            // still picked up by the final read.
            let exited = self.process.try_wait().is_some();

            match read_log(&self.path) {
                Ok(Some(text)) => {
                    ctx.stats.chunk();
                    let batch = parse_log(&text, exited);
                    if let Ingest::Superseded = cursor.ingest(&batch, ctx) {
                        return Ok(());
                    }
                }
                Ok(None) => debug!("{} not written yet", self.path.display()),
                Err(e) => warn!("cannot read {}: {e}", self.path.display()),
            }

            if exited {
                if ctx.finished() {
                    return Ok(());
                }
                let reason = self.process.describe_exit();
                info!("log source ended: {reason}");
                return Err(Error::SourceExited { reason });
            }
        }
    }
}

/// Whole file as text. A missing file is not an error.
fn read_log(path: &Path) -> io::Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{PACKET_LOSS_RATE, RTT, SessionKind};
    use crate::signal::StopSignal;
    use crate::sources::LoopStats;
    use crate::store::SeriesStore;

    const HEADER: &str = "ts,qd,rtt,rate,c4,c5,c6,c7,c8,c9,c10,loss\n";

    fn row(rtt: f64) -> String {
        format!("t,0.1,{rtt},2000,4,5,6,7,8,9,10,0.01\n")
    }

    fn context(store: &Arc<SeriesStore>) -> SourceContext {
        SourceContext {
            writer: store.begin_session(SessionKind::Bandwidth.metrics()),
            stop: Arc::new(StopSignal::new()),
            stats: Arc::new(LoopStats::default()),
            transport: Arc::default(),
        }
    }

    #[test]
    fn ingest_appends_only_new_rows() {
        let store = Arc::new(SeriesStore::new(100));
        let ctx = context(&store);
        let mut cursor = Cursor::default();

        let text = format!("{HEADER}{}{}", row(1.0), row(2.0));
        cursor.ingest(&parse_log(&text, false), &ctx);
        assert_eq!(store.snapshot().series(RTT), &[Some(1.0), Some(2.0)]);
        assert_eq!(store.snapshot().updates, 1);

        // Same content again: nothing new.
        cursor.ingest(&parse_log(&text, false), &ctx);
        assert_eq!(store.snapshot().series(RTT).len(), 2);
        assert_eq!(store.snapshot().updates, 1);

        let text = format!("{text}{}", row(3.0));
        cursor.ingest(&parse_log(&text, false), &ctx);
        let snap = store.snapshot();
        assert_eq!(snap.series(RTT), &[Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(snap.series(PACKET_LOSS_RATE).len(), 3);
        assert_eq!(snap.updates, 2);
    }

    #[test]
    fn ingest_waits_for_unterminated_row() {
        let store = Arc::new(SeriesStore::new(100));
        let ctx = context(&store);
        let mut cursor = Cursor::default();

        let partial = format!("{HEADER}{}t,0.1,2.0,20", row(1.0));
        cursor.ingest(&parse_log(&partial, false), &ctx);
        assert_eq!(store.snapshot().series(RTT), &[Some(1.0)]);

        let complete = format!("{HEADER}{}{}", row(1.0), row(2.0));
        cursor.ingest(&parse_log(&complete, false), &ctx);
        assert_eq!(store.snapshot().series(RTT), &[Some(1.0), Some(2.0)]);
    }

    #[test]
    fn ingest_restarts_when_file_is_replaced() {
        let store = Arc::new(SeriesStore::new(100));
        let ctx = context(&store);
        let mut cursor = Cursor::default();

        let text = format!("{HEADER}{}{}", row(1.0), row(2.0));
        cursor.ingest(&parse_log(&text, false), &ctx);

        let text = format!("{HEADER}{}", row(9.0));
        cursor.ingest(&parse_log(&text, false), &ctx);
        assert_eq!(
            store.snapshot().series(RTT),
            &[Some(1.0), Some(2.0), Some(9.0)]
        );
    }

    #[test]
    fn ingest_counts_bad_rows_once() {
        let store = Arc::new(SeriesStore::new(100));
        let ctx = context(&store);
        let mut cursor = Cursor::default();

        let text = format!("{HEADER}t,1\nt,0.1,x,2000,4,5,6,7,8,9,10,0.01\n{}", row(1.0));
        cursor.ingest(&parse_log(&text, false), &ctx);
        cursor.ingest(&parse_log(&text, false), &ctx);

        let counters = ctx.stats.counters();
        assert_eq!(counters.skipped, 1);
        assert_eq!(counters.parse_errors, 1);
        assert_eq!(store.snapshot().series(RTT), &[Some(1.0)]);
    }

    #[test]
    fn read_log_missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_log(&tmp.path().join("absent.csv")).unwrap().is_none());
    }
}
