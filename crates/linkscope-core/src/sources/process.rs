//! Handle to the spawned bandwidth-test process.
//!
//! The child runs in its own process group so signals reach anything it
//! forks, and so every writer of its stdout pipe dies together. That is what
//! unblocks a producer parked in a read when the session stops.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, Result};

const WAIT_POLL: Duration = Duration::from_millis(20);

/// A running child plus the pipes the caller asked for.
#[derive(Debug)]
pub struct Spawned {
    pub process: ChildProcess,
    pub stdout: Option<ChildStdout>,
}

/// Shared handle to one child process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Mutex<Child>,
    pid: u32,
    program: String,
}

impl ChildProcess {
    /// Spawn `program args…` in `cwd`. Stdout is piped only when
    /// `capture_stdout` is set; stderr is always drained into the log.
    pub fn spawn(
        program: &Path,
        args: &[String],
        cwd: Option<&Path>,
        capture_stdout: bool,
    ) -> Result<Spawned> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(if capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        isolate(&mut cmd);

        let program_name = program.display().to_string();
        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: program_name.clone(),
            source,
        })?;

        let pid = child.id();
        info!("spawned {program_name} (pid {pid}) {}", args.join(" "));

        let stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(stderr, pid);
        }

        Ok(Spawned {
            process: Self::adopt(child, program_name),
            stdout,
        })
    }

    /// Take ownership of a child spawned elsewhere, after its pipes were
    /// taken.
    pub(crate) fn adopt(child: Child, program: String) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
            program,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn lock(&self) -> MutexGuard<'_, Child> {
        match self.child.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Exit status if the child has exited. Errors count as exited.
    pub fn try_wait(&self) -> Option<ExitStatus> {
        match self.lock().try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!("pid {}: wait failed: {e}", self.pid);
                Some(ExitStatus::default())
            }
        }
    }

    /// Poll for exit for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(WAIT_POLL);
        }
    }

    /// Send `sig` to the child's process group if it is still running.
    /// The lock is held across the check so the pid cannot be reaped and
    /// reused in between.
    #[cfg(unix)]
    pub fn signal(&self, sig: libc::c_int) -> bool {
        let mut child = self.lock();
        if !matches!(child.try_wait(), Ok(None)) {
            return false;
        }
        // SAFETY: kill(2) with a negative pid targets the process group we
        // created at spawn; the child is alive and unreaped while we hold
        // the lock, so the group id still belongs to it.
        unsafe { libc::kill(-(self.pid as libc::pid_t), sig) == 0 }
    }

    /// Force the child (and its group) down and reap it.
    pub fn kill(&self) {
        let mut child = self.lock();
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        #[cfg(unix)]
        {
            // SAFETY: see `signal`; the child is still unreaped.
            unsafe {
                libc::kill(-(self.pid as libc::pid_t), libc::SIGKILL);
            }
        }
        if let Err(e) = child.kill() {
            debug!("pid {}: kill: {e}", self.pid);
        }
        let _ = child.wait();
    }

    /// Ask the child to exit (SIGTERM), wait up to `grace`, then kill it.
    pub fn shutdown(&self, grace: Duration) {
        #[cfg(unix)]
        {
            if self.signal(libc::SIGTERM)
                && let Some(status) = self.wait_timeout(grace)
            {
                info!("{} (pid {}) exited: {status}", self.program, self.pid);
                return;
            }
        }
        #[cfg(not(unix))]
        let _ = grace;
        self.kill();
    }

    /// Emergency stop: SIGINT, a short wait, then kill.
    pub fn interrupt(&self, grace: Duration) {
        #[cfg(unix)]
        {
            if self.signal(libc::SIGINT) && self.wait_timeout(grace).is_some() {
                return;
            }
        }
        #[cfg(not(unix))]
        let _ = grace;
        self.kill();
    }

    /// Human-readable exit description, waiting briefly for the status.
    pub fn describe_exit(&self) -> String {
        match self.wait_timeout(Duration::from_millis(500)) {
            Some(status) => format!("{} {status}", self.program),
            None => format!("{} closed its output", self.program),
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Start `cmd` in a process group of its own, so group signals reach
/// everything it forks.
pub(crate) fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Forward the child's stderr to the debug log until it closes.
fn drain_stderr(stderr: ChildStderr, pid: u32) {
    let spawned = thread::Builder::new()
        .name(format!("stderr-{pid}"))
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => debug!(
                        "pid {pid} stderr: {}",
                        String::from_utf8_lossy(&buf).trim_end()
                    ),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("pid {pid}: cannot drain stderr: {e}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Read;

    fn sh(script: &str, capture: bool) -> Spawned {
        ChildProcess::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), script.to_string()],
            None,
            capture,
        )
        .unwrap()
    }

    #[test]
    fn spawn_missing_program_is_spawn_error() {
        let err = ChildProcess::spawn(Path::new("/nonexistent/tool"), &[], None, true).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn captures_stdout() {
        let spawned = sh("echo hello", true);
        let mut out = String::new();
        spawned.stdout.unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello\n");
        assert!(spawned.process.wait_timeout(Duration::from_secs(5)).is_some());
    }

    #[test]
    fn shutdown_unblocks_reader_of_grandchild_pipe() {
        // `sleep` inherits stdout; only a group signal closes the pipe.
        let spawned = sh("sleep 30; echo late", true);
        let mut stdout = spawned.stdout.unwrap();
        let reader = thread::spawn(move || {
            let mut out = String::new();
            let _ = stdout.read_to_string(&mut out);
            out
        });

        let start = Instant::now();
        spawned.process.shutdown(Duration::from_secs(2));
        let out = reader.join().unwrap();
        assert!(out.is_empty());
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(spawned.process.try_wait().is_some());
    }

    #[test]
    fn interrupt_stops_process() {
        let spawned = sh("sleep 30", false);
        spawned.process.interrupt(Duration::from_millis(500));
        assert!(spawned.process.try_wait().is_some());
        assert!(!spawned.process.signal(libc::SIGTERM));
    }
}
