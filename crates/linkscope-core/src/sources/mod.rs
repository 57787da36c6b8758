//! Sample producers.
//!
//! A producer owns one transport (a child's stdout, a log file on disk, or a
//! remote shell), turns what it reads into samples and appends them through
//! the session's [`StoreWriter`]. Producers run on their own thread and stop
//! when the [`StopSignal`] fires, their writer is retired, or the transport
//! ends.

pub mod fake;
pub mod logfile;
pub mod process;
pub mod remote;
pub mod stream;

use std::fs;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};

use log::info;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::signal::StopSignal;
use crate::store::StoreWriter;

use self::logfile::LogPoller;
use self::process::ChildProcess;
use self::remote::{Connector, RadioPoller};
use self::stream::StatusStream;

// ---------------------------------------------------------------------------
// Producer trait
// ---------------------------------------------------------------------------

/// Everything a running producer shares with its controller.
pub struct SourceContext {
    pub writer: StoreWriter,
    pub stop: Arc<StopSignal>,
    pub stats: Arc<LoopStats>,
    /// Where the producer publishes the external process it reads from.
    pub transport: Arc<TransportSlot>,
}

impl SourceContext {
    /// True once the producer should stop appending: stop requested or a
    /// newer session owns the store.
    pub fn finished(&self) -> bool {
        self.stop.is_set() || !self.writer.is_current()
    }
}

/// One acquisition loop.
///
/// `Ok(())` means the loop ended because it was asked to. Any error ends the
/// session and is shown to the operator.
pub trait Producer: Send {
    /// Short name for logs and thread names.
    fn name(&self) -> &'static str;

    fn run(self: Box<Self>, ctx: &SourceContext) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transport slot
// ---------------------------------------------------------------------------

/// The external process behind a session, shared so the controller can
/// signal it while the producer is blocked on it.
///
/// Closing the slot hands the process to the controller and refuses later
/// attaches: a producer still connecting when its session is torn down must
/// release its transport itself.
#[derive(Debug, Default)]
pub struct TransportSlot {
    inner: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    process: Option<Arc<ChildProcess>>,
    closed: bool,
}

impl TransportSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publish `process`. Returns false if the slot is already closed.
    pub fn attach(&self, process: Arc<ChildProcess>) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.process = Some(process);
        true
    }

    /// Close the slot and take the attached process, if any.
    pub fn close(&self) -> Option<Arc<ChildProcess>> {
        let mut state = self.lock();
        state.closed = true;
        state.process.take()
    }
}

// ---------------------------------------------------------------------------
// Loop statistics
// ---------------------------------------------------------------------------

/// Counters updated by the producer and read by the dashboard.
#[derive(Debug, Default)]
pub struct LoopStats {
    chunks: AtomicU64,
    samples: AtomicU64,
    parse_errors: AtomicU64,
    skipped: AtomicU64,
}

/// Plain copy of [`LoopStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopCounters {
    /// Lines, log reads or shell responses consumed.
    pub chunks: u64,
    /// Individual metric values appended.
    pub samples: u64,
    pub parse_errors: u64,
    /// Chunks dropped on purpose: short rows, prompt echoes, unparsable blocks.
    pub skipped: u64,
}

impl LoopStats {
    pub fn chunk(&self) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples(&self, n: usize) {
        self.samples.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> LoopCounters {
        LoopCounters {
            chunks: self.chunks.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

/// A producer ready to run, plus the slot holding its external process.
/// Local processes are attached here; remote shells attach on connect.
pub struct Launched {
    pub producer: Box<dyn Producer>,
    pub transport: Arc<TransportSlot>,
}

/// Allocate the transport for `config` and build its producer.
///
/// Local processes are spawned here so a bad program path fails `start`
/// directly. Remote shells connect on the producer thread.
pub fn launch(config: &SessionConfig, connector: &Arc<dyn Connector>) -> Result<Launched> {
    let transport = Arc::new(TransportSlot::default());
    match config {
        SessionConfig::Bandwidth(c) => {
            let reads_log = c.profile.reads_log();
            if reads_log {
                remove_stale_log(&c.log_path())?;
            }

            let spawned = ChildProcess::spawn(
                &c.program,
                &c.argv(),
                c.working_dir.as_deref(),
                !reads_log,
            )?;
            let process = Arc::new(spawned.process);
            transport.attach(Arc::clone(&process));

            let producer: Box<dyn Producer> = if reads_log {
                Box::new(LogPoller::new(
                    Arc::clone(&process),
                    c.log_path(),
                    c.log_poll_interval,
                ))
            } else {
                let stdout = spawned
                    .stdout
                    .ok_or_else(|| Error::transport("process stdout was not captured"))?;
                Box::new(StatusStream::new(Arc::clone(&process), stdout))
            };

            Ok(Launched {
                producer,
                transport,
            })
        }
        SessionConfig::Radio(c) => Ok(Launched {
            producer: Box::new(RadioPoller::new(c.clone(), Arc::clone(connector))),
            transport,
        }),
    }
}

/// Rows left over from an earlier run would otherwise be read as samples of
/// this session.
fn remove_stale_log(path: &std::path::Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("removed previous log {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = LoopStats::default();
        stats.chunk();
        stats.chunk();
        stats.samples(4);
        stats.parse_error();
        stats.skipped();
        assert_eq!(
            stats.counters(),
            LoopCounters {
                chunks: 2,
                samples: 4,
                parse_errors: 1,
                skipped: 1,
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn closed_slot_hands_over_process_once() {
        let spawned = ChildProcess::spawn(
            std::path::Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
            None,
            false,
        )
        .unwrap();
        let process = Arc::new(spawned.process);
        let slot = TransportSlot::default();
        assert!(slot.attach(Arc::clone(&process)));

        let taken = slot.close().expect("attached process");
        taken.interrupt(std::time::Duration::from_millis(300));
        assert!(process.try_wait().is_some());

        assert!(slot.close().is_none());
        assert!(!slot.attach(process));
    }

    #[test]
    fn remove_stale_log_tolerates_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("MWA_Demo1.csv");
        remove_stale_log(&path).unwrap();

        fs::write(&path, "old\n").unwrap();
        remove_stale_log(&path).unwrap();
        assert!(!path.exists());
    }
}
