//! Session lifecycle.
//!
//! A [`Controller`] owns the store, at most one running session and its
//! status. Starting a session fully stops the previous one first, so two
//! producers never hold resources at the same time.
//!
//! ```text
//! Idle ──start──▶ Running ──stop──▶ Stopping ──▶ Idle
//!                    │
//!                    ├──terminate──▶ Terminating ──▶ Idle (producer detached)
//!                    └──transport failure──▶ Idle (last_error set)
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{info, warn};
use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::metric::SessionKind;
use crate::signal::StopSignal;
use crate::sources::remote::{Connector, SshConnector};
use crate::sources::{LoopCounters, LoopStats, SourceContext, TransportSlot, launch};
use crate::store::{DEFAULT_CAPACITY, SeriesStore, Snapshot};

/// Wait between SIGINT and kill on terminate.
const TERMINATE_GRACE: Duration = Duration::from_millis(300);

/// Longest wait for a terminated producer to let go of its source before a
/// new session may start.
const RETIRE_WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Terminating,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Terminating => write!(f, "terminating"),
        }
    }
}

#[derive(Debug)]
struct Status {
    state: SessionState,
    last_error: Option<String>,
    /// Session the status belongs to. A producer that outlived its session
    /// must not overwrite the status of the next one.
    session_id: u64,
}

fn lock_status(status: &Mutex<Status>) -> MutexGuard<'_, Status> {
    match status.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct ActiveSession {
    id: u64,
    stop: Arc<StopSignal>,
    transport: Arc<TransportSlot>,
    handle: JoinHandle<()>,
    shutdown_grace: Duration,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns the store and drives one acquisition session at a time.
pub struct Controller {
    store: Arc<SeriesStore>,
    connector: Arc<dyn Connector>,
    status: Arc<Mutex<Status>>,
    stats: Arc<LoopStats>,
    current: Option<ActiveSession>,
    /// Producer of a terminated session, not yet joined.
    retired: Option<JoinHandle<()>>,
    kind: Option<SessionKind>,
    description: Option<String>,
    next_id: u64,
}

impl Controller {
    /// Controller using the system ssh client for remote sessions.
    pub fn new(capacity: usize) -> Self {
        Self::with_connector(capacity, Arc::new(SshConnector))
    }

    pub fn with_connector(capacity: usize, connector: Arc<dyn Connector>) -> Self {
        Self {
            store: Arc::new(SeriesStore::new(capacity)),
            connector,
            status: Arc::new(Mutex::new(Status {
                state: SessionState::Idle,
                last_error: None,
                session_id: 0,
            })),
            stats: Arc::new(LoopStats::default()),
            current: None,
            retired: None,
            kind: None,
            description: None,
            next_id: 1,
        }
    }

    /// Validate `config`, stop any running session, wait for a terminated
    /// one to release its source, reset the store and launch a new producer.
    pub fn start(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        self.stop()?;
        self.reap_retired()?;

        let id = self.next_id;
        self.next_id += 1;
        let kind = config.kind();
        let description = config.describe();

        let writer = self.store.begin_session(kind.metrics());
        self.kind = Some(kind);
        self.description = Some(description.clone());
        self.stats = Arc::new(LoopStats::default());

        let launched = match launch(&config, &self.connector) {
            Ok(l) => l,
            Err(e) => {
                self.store.seal();
                self.set_status(id, SessionState::Idle, Some(e.to_string()));
                warn!("session {id} ({description}) failed to start: {e}");
                return Err(e);
            }
        };

        let stop = Arc::new(StopSignal::new());
        let ctx = SourceContext {
            writer,
            stop: Arc::clone(&stop),
            stats: Arc::clone(&self.stats),
            transport: Arc::clone(&launched.transport),
        };
        self.set_status(id, SessionState::Running, None);

        let status = Arc::clone(&self.status);
        let producer = launched.producer;
        let name = producer.name();
        let handle = thread::Builder::new()
            .name(format!("acquisition-{name}"))
            .spawn(move || {
                let result = producer.run(&ctx);
                let mut st = lock_status(&status);
                if st.session_id != id {
                    return;
                }
                match result {
                    Ok(()) => info!("session {id}: {name} finished"),
                    Err(e) => {
                        warn!("session {id}: {name} failed: {e}");
                        st.last_error = Some(e.to_string());
                    }
                }
                if st.state == SessionState::Running {
                    st.state = SessionState::Idle;
                }
            })
            .map_err(|e| Error::transport(format!("cannot start acquisition thread: {e}")));

        let handle = match handle {
            Ok(h) => h,
            Err(e) => {
                if let Some(p) = launched.transport.close() {
                    p.kill();
                }
                self.store.seal();
                self.set_status(id, SessionState::Idle, Some(e.to_string()));
                return Err(e);
            }
        };

        info!("session {id} started: {kind} {description}");
        self.current = Some(ActiveSession {
            id,
            stop,
            transport: launched.transport,
            handle,
            shutdown_grace: match &config {
                SessionConfig::Bandwidth(c) => c.shutdown_grace,
                SessionConfig::Radio(_) => Duration::ZERO,
            },
        });
        Ok(())
    }

    /// Stop the running session and wait for its producer to exit. The
    /// store keeps the session's data. No-op when idle.
    pub fn stop(&mut self) -> Result<()> {
        let Some(active) = self.current.take() else {
            return Ok(());
        };
        self.set_state(active.id, SessionState::Stopping);
        info!("session {} stopping", active.id);

        active.stop.set();
        if let Some(process) = active.transport.close() {
            process.shutdown(active.shutdown_grace);
        }
        let joined = active.handle.join();
        self.store.seal();
        self.set_state(active.id, SessionState::Idle);

        match joined {
            Ok(()) => {
                info!("session {} stopped", active.id);
                Ok(())
            }
            Err(_) => Err(Error::transport("acquisition thread panicked")),
        }
    }

    /// Emergency teardown: signal the producer, interrupt and kill the
    /// process, retire the writer, and return without joining. The next
    /// `start` waits for the producer to exit.
    pub fn terminate(&mut self) {
        let Some(active) = self.current.take() else {
            return;
        };
        self.set_state(active.id, SessionState::Terminating);
        warn!("session {} terminating", active.id);

        active.stop.set();
        self.store.seal();
        if let Some(process) = active.transport.close() {
            process.interrupt(TERMINATE_GRACE);
        }
        // Its writer is retired and its status updates are ignored; only
        // the thread itself is left to reap.
        self.retired = Some(active.handle);
        self.set_state(active.id, SessionState::Idle);
    }

    /// Join the producer of a terminated session, waiting at most
    /// `RETIRE_WAIT`.
    fn reap_retired(&mut self) -> Result<()> {
        let Some(handle) = self.retired.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + RETIRE_WAIT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                self.retired = Some(handle);
                return Err(Error::transport(
                    "terminated session is still releasing its source",
                ));
            }
            thread::sleep(Duration::from_millis(10));
        }
        if handle.join().is_err() {
            warn!("terminated acquisition thread panicked");
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn state(&self) -> SessionState {
        lock_status(&self.status).state
    }

    pub fn last_error(&self) -> Option<String> {
        lock_status(&self.status).last_error.clone()
    }

    /// Kind of the current or most recent session.
    pub fn kind(&self) -> Option<SessionKind> {
        self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn counters(&self) -> LoopCounters {
        self.stats.counters()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Write the current snapshot to `dir/linkscope-snapshot-<epoch>.json`.
    pub fn export_snapshot(&self, dir: &Path) -> Result<PathBuf> {
        let exported_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let export = SnapshotExport {
            kind: self.kind,
            description: self.description.as_deref(),
            state: self.state(),
            exported_at,
            counters: self.counters(),
            snapshot: self.snapshot(),
        };

        let path = dir.join(format!("linkscope-snapshot-{exported_at}.json"));
        let io_err = |source| Error::Io {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(&export)
            .map_err(|e| io_err(std::io::Error::other(e)))?;
        fs::write(&path, json).map_err(io_err)?;
        info!("snapshot exported to {}", path.display());
        Ok(path)
    }

    fn set_status(&self, id: u64, state: SessionState, last_error: Option<String>) {
        let mut st = lock_status(&self.status);
        st.session_id = id;
        st.state = state;
        st.last_error = last_error;
    }

    fn set_state(&self, id: u64, state: SessionState) {
        let mut st = lock_status(&self.status);
        if st.session_id == id {
            st.state = state;
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("stopping session on shutdown: {e}");
        }
        if let Err(e) = self.reap_retired() {
            warn!("{e}");
        }
    }
}

#[derive(Serialize)]
struct SnapshotExport<'a> {
    kind: Option<SessionKind>,
    description: Option<&'a str>,
    state: SessionState,
    exported_at: u64,
    counters: LoopCounters,
    snapshot: Snapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandwidthConfig, RadioConfig};
    use crate::metric::RSSI;
    use crate::sources::fake::{FakeConnector, FakeShell};

    const PROMPT: &str = "root@RUTX50:~# ";

    fn radio(dir: &Path) -> SessionConfig {
        SessionConfig::Radio(RadioConfig {
            output_dir: dir.to_path_buf(),
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(2),
            ..RadioConfig::default()
        })
    }

    fn record(rssi: i32) -> String {
        format!("t\n1\n2\n3\n100\n200\nRSSI: {rssi}\n{PROMPT}")
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn invalid_config_is_rejected_before_anything_starts() {
        let mut controller = Controller::with_connector(10, Arc::new(FakeConnector::refusing("x")));
        let err = controller
            .start(SessionConfig::Bandwidth(BandwidthConfig::default()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.kind().is_none());
    }

    #[test]
    fn spawn_failure_is_returned_and_recorded() {
        let mut controller = Controller::with_connector(10, Arc::new(FakeConnector::refusing("x")));
        let config = SessionConfig::Bandwidth(BandwidthConfig {
            receiver: "10.0.0.2".into(),
            port: "5000".into(),
            program: PathBuf::from("/nonexistent/scream_bw_test_tx"),
            ..BandwidthConfig::default()
        });
        let err = controller.start(config).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.last_error().unwrap().contains("spawn"));
    }

    #[test]
    fn connect_failure_surfaces_through_last_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut controller =
            Controller::with_connector(10, Arc::new(FakeConnector::refusing("auth failed")));
        controller.start(radio(tmp.path())).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            controller.state() == SessionState::Idle
        }));
        assert!(controller.last_error().unwrap().contains("auth failed"));
    }

    #[test]
    fn stop_keeps_last_session_data() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = FakeShell::new(PROMPT)
            .respond(record(-60))
            .respond(record(-61))
            .hang_when_empty();
        let mut controller = Controller::with_connector(10, Arc::new(FakeConnector::new(shell)));
        controller.start(radio(tmp.path())).unwrap();
        assert_eq!(controller.state(), SessionState::Running);

        assert!(wait_until(Duration::from_secs(5), || {
            controller.snapshot().series(RSSI).len() == 2
        }));
        controller.stop().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.last_error().is_none());
        assert_eq!(
            controller.snapshot().series(RSSI),
            &[Some(-60.0), Some(-61.0)]
        );

        // Idempotent.
        controller.stop().unwrap();
    }

    #[test]
    fn restart_resets_store() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = FakeShell::new(PROMPT).respond(record(-60)).hang_when_empty();
        let mut controller = Controller::with_connector(10, Arc::new(FakeConnector::new(shell)));

        controller.start(radio(tmp.path())).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            controller.snapshot().updates == 1
        }));
        let first_epoch = controller.snapshot().epoch;

        controller.start(radio(tmp.path())).unwrap();
        let snap = controller.snapshot();
        assert!(snap.epoch > first_epoch);
        assert!(snap.updates <= 1);
        controller.stop().unwrap();
    }

    #[test]
    fn terminate_returns_without_joining() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = FakeShell::new(PROMPT).hang_when_empty();
        let mut controller = Controller::with_connector(10, Arc::new(FakeConnector::new(shell)));
        controller.start(radio(tmp.path())).unwrap();

        let start = Instant::now();
        controller.terminate();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(controller.state(), SessionState::Idle);

        // Further terminates and stops are no-ops.
        controller.terminate();
        controller.stop().unwrap();
    }

    #[test]
    fn terminate_then_start_waits_for_old_producer() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = FakeShell::new(PROMPT).hang_when_empty();
        let connector = Arc::new(FakeConnector::new(shell));
        let mut controller = Controller::with_connector(10, connector.clone());

        controller.start(radio(tmp.path())).unwrap();
        assert!(wait_until(Duration::from_secs(5), || connector.live() == 1));

        controller.terminate();
        controller.start(radio(tmp.path())).unwrap();
        // The old shell is gone before start returns.
        assert!(connector.live() <= 1);
        assert!(wait_until(Duration::from_secs(5), || connector.live() == 1));
        assert_eq!(connector.peak(), 1);
        controller.stop().unwrap();
        assert_eq!(connector.live(), 0);
    }

    #[test]
    fn restart_releases_old_shell_first() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = FakeShell::new(PROMPT).hang_when_empty();
        let connector = Arc::new(FakeConnector::new(shell));
        let mut controller = Controller::with_connector(10, connector.clone());

        for _ in 0..3 {
            controller.start(radio(tmp.path())).unwrap();
            assert!(wait_until(Duration::from_secs(5), || connector.live() == 1));
        }
        assert_eq!(connector.peak(), 1);
        controller.stop().unwrap();
        assert_eq!(connector.live(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn terminate_interrupts_remote_transport() {
        use crate::sources::process::ChildProcess;

        let tmp = tempfile::tempdir().unwrap();
        let spawned = ChildProcess::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
            None,
            false,
        )
        .unwrap();
        let process = Arc::new(spawned.process);
        let shell = FakeShell::new(PROMPT)
            .hang_when_empty()
            .with_process(Arc::clone(&process));
        let connector = Arc::new(FakeConnector::new(shell));
        let mut controller = Controller::with_connector(10, connector.clone());

        controller.start(radio(tmp.path())).unwrap();
        // The log is opened after the shell is connected and published.
        assert!(wait_until(Duration::from_secs(5), || {
            fs::read_dir(tmp.path()).unwrap().count() > 0
        }));

        controller.terminate();
        assert!(process.try_wait().is_some());
    }

    #[test]
    fn export_snapshot_writes_json() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = FakeShell::new(PROMPT).respond(record(-60)).hang_when_empty();
        let mut controller = Controller::with_connector(10, Arc::new(FakeConnector::new(shell)));
        controller.start(radio(tmp.path())).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            controller.snapshot().updates == 1
        }));
        controller.stop().unwrap();

        let path = controller.export_snapshot(tmp.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("linkscope-snapshot-"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["kind"], "Radio");
        assert_eq!(json["snapshot"]["series"]["RSSI"][0], -60.0);
        assert!(json["snapshot"]["series"]["RSRP"][0].is_null());
    }
}
