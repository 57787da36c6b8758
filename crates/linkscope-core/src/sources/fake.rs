//! Scripted remote shell for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::process::ChildProcess;
use super::remote::{Connector, RemoteShell};
use crate::config::RadioConfig;
use crate::error::{Error, Result};

/// A shell that prints `greeting` on connect and answers each command with
/// the next scripted response.
#[derive(Clone, Default)]
pub struct FakeShell {
    responses: VecDeque<String>,
    hang_when_empty: bool,
    response_delay: Option<Duration>,
    pending: VecDeque<String>,
    sent: Arc<Mutex<Vec<String>>>,
    process: Option<Arc<ChildProcess>>,
}

impl FakeShell {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            pending: VecDeque::from([greeting.into()]),
            ..Default::default()
        }
    }

    /// Queue the output for the next command.
    pub fn respond(mut self, output: impl Into<String>) -> Self {
        self.responses.push_back(output.into());
        self
    }

    /// Once the script runs out, stay silent instead of closing.
    pub fn hang_when_empty(mut self) -> Self {
        self.hang_when_empty = true;
        self
    }

    /// Delay every response by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }

    /// Report `process` as the local process carrying this shell.
    pub fn with_process(mut self, process: Arc<ChildProcess>) -> Self {
        self.process = Some(process);
        self
    }

    /// Commands received so far, shared between clones.
    pub fn sent(&self) -> Vec<String> {
        match self.sent.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl RemoteShell for FakeShell {
    fn send(&mut self, command: &str) -> io::Result<()> {
        match self.sent.lock() {
            Ok(mut g) => g.push(command.to_string()),
            Err(poisoned) => poisoned.into_inner().push(command.to_string()),
        }
        if let Some(output) = self.responses.pop_front() {
            self.pending.push_back(output);
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        if let Some(output) = self.pending.pop_front() {
            if let Some(delay) = self.response_delay {
                thread::sleep(delay.min(timeout));
            }
            return Ok(Some(output));
        }
        if self.hang_when_empty || !self.responses.is_empty() {
            thread::sleep(timeout);
            return Ok(None);
        }
        Err(io::ErrorKind::UnexpectedEof.into())
    }

    fn process(&self) -> Option<Arc<ChildProcess>> {
        self.process.clone()
    }
}

/// A connected copy of the script; counts itself while alive.
struct Tracked {
    shell: FakeShell,
    live: Arc<AtomicUsize>,
}

impl RemoteShell for Tracked {
    fn send(&mut self, command: &str) -> io::Result<()> {
        self.shell.send(command)
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        self.shell.recv(timeout)
    }

    fn process(&self) -> Option<Arc<ChildProcess>> {
        self.shell.process()
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hands out copies of one scripted shell, or refuses every connection.
/// Tracks how many handed-out shells are alive at once.
#[derive(Default)]
pub struct FakeConnector {
    shell: Option<FakeShell>,
    refusal: String,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(shell: FakeShell) -> Self {
        Self {
            shell: Some(shell),
            ..Default::default()
        }
    }

    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            refusal: reason.into(),
            ..Default::default()
        }
    }

    /// Shells handed out and not yet dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most shells ever alive at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect(&self, config: &RadioConfig) -> Result<Box<dyn RemoteShell>> {
        match &self.shell {
            Some(shell) => {
                let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                Ok(Box::new(Tracked {
                    shell: shell.clone(),
                    live: Arc::clone(&self.live),
                }))
            }
            None => Err(Error::Connect {
                target: config.target(),
                reason: self.refusal.clone(),
            }),
        }
    }
}
