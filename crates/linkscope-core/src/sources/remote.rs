//! Closed-loop polling of a router over an interactive shell.
//!
//! One cycle sends the poll command, collects output until the shell prompt
//! comes back, then classifies the response. Accepted records are written to
//! the on-disk log before they reach the store, so nothing appears on screen
//! that is missing from the log.

use std::io::{self, Read, Write};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::process::{self, ChildProcess};
use super::{Producer, SourceContext};
use crate::config::RadioConfig;
use crate::error::{Error, Result};
use crate::parser::{BlockOutcome, ShellBlockParser};
use crate::recorder::RadioLogWriter;

/// Longest single wait inside a read, so stop requests are seen promptly.
const RECV_SLICE: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// An open interactive shell.
pub trait RemoteShell: Send {
    /// Send one command line.
    fn send(&mut self, command: &str) -> io::Result<()>;

    /// Wait up to `timeout` for output. `Ok(None)` means nothing arrived;
    /// an error means the shell is gone.
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Local process carrying the shell, if any, so a session teardown can
    /// signal it without waiting for the producer.
    fn process(&self) -> Option<Arc<ChildProcess>> {
        None
    }
}

/// Opens shells. Swapped for a scripted fake in tests.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &RadioConfig) -> Result<Box<dyn RemoteShell>>;
}

// ---------------------------------------------------------------------------
// System ssh client
// ---------------------------------------------------------------------------

/// Runs the system `ssh` client with a forced pseudo-terminal. A password, if
/// configured, is handed to `sshpass` through its environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl SshConnector {
    fn command(config: &RadioConfig) -> Command {
        let mut cmd = match &config.password {
            Some(password) => {
                let mut c = Command::new("sshpass");
                c.arg("-e").env("SSHPASS", password).arg("ssh");
                c
            }
            None => Command::new("ssh"),
        };
        cmd.arg("-tt")
            .args(["-p", &config.port.to_string()])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args([
                "-o",
                &format!("ConnectTimeout={}", config.connect_timeout.as_secs().max(1)),
            ])
            .args(["-o", "ServerAliveInterval=5"])
            .arg(format!("{}@{}", config.user, config.host));
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process::isolate(&mut cmd);
        cmd
    }
}

impl Connector for SshConnector {
    fn connect(&self, config: &RadioConfig) -> Result<Box<dyn RemoteShell>> {
        let target = config.target();
        let client = if config.password.is_some() { "sshpass" } else { "ssh" };
        let mut child = Self::command(config).spawn().map_err(|e| Error::Connect {
            target: target.clone(),
            reason: if e.kind() == io::ErrorKind::NotFound {
                format!("{client} not found in PATH")
            } else {
                e.to_string()
            },
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let process = Arc::new(ChildProcess::adopt(child, client.to_string()));
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            process.kill();
            return Err(Error::Connect {
                target,
                reason: "ssh pipes unavailable".into(),
            });
        };

        let (tx, rx) = mpsc::channel();
        spawn_reader("ssh-stdout", stdout, tx.clone());
        if let Some(stderr) = stderr {
            // ssh reports auth and network failures on stderr.
            spawn_reader("ssh-stderr", stderr, tx);
        }

        info!("ssh session to {target} (pid {})", process.pid());
        Ok(Box::new(SshShell {
            process,
            stdin,
            rx,
        }))
    }
}

/// Forward everything read from `source` until it closes.
fn spawn_reader<R: Read + Send + 'static>(
    name: &str,
    mut source: R,
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
) {
    let spawned = thread::Builder::new().name(name.into()).spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(Err(io::ErrorKind::UnexpectedEof.into()));
                    break;
                }
                Ok(n) => {
                    if tx.send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    if let Err(e) = spawned {
        warn!("cannot start {name} reader: {e}");
    }
}

struct SshShell {
    process: Arc<ChildProcess>,
    stdin: ChildStdin,
    rx: Receiver<io::Result<Vec<u8>>>,
}

impl RemoteShell for SshShell {
    fn send(&mut self, command: &str) -> io::Result<()> {
        self.stdin.write_all(command.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::ErrorKind::UnexpectedEof.into()),
        }
    }

    fn process(&self) -> Option<Arc<ChildProcess>> {
        Some(Arc::clone(&self.process))
    }
}

impl Drop for SshShell {
    fn drop(&mut self) {
        self.process.kill();
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Closed-loop poller: the next command goes out only after the previous
/// response is complete.
pub struct RadioPoller {
    config: RadioConfig,
    connector: Arc<dyn Connector>,
    parser: ShellBlockParser,
}

impl RadioPoller {
    pub fn new(config: RadioConfig, connector: Arc<dyn Connector>) -> Self {
        let parser = ShellBlockParser::new(&*config.poll_command, &*config.prompt_sentinel);
        Self {
            config,
            connector,
            parser,
        }
    }

    fn poll_loop(
        &self,
        shell: &mut dyn RemoteShell,
        log: &mut RadioLogWriter,
        ctx: &SourceContext,
    ) -> Result<()> {
        while !ctx.finished() {
            shell
                .send(&self.config.poll_command)
                .map_err(|e| Error::transport(format!("sending poll command: {e}")))?;

            let Some(response) = read_response(
                shell,
                ctx,
                self.config.prompt_suffix,
                self.config.response_timeout,
            )?
            else {
                return Ok(());
            };
            ctx.stats.chunk();

            match self.parser.parse(&response) {
                BlockOutcome::Record(record) => {
                    log.write_record(&record).map_err(|source| Error::Io {
                        path: log.path().to_path_buf(),
                        source,
                    })?;
                    let readings = record.readings();
                    if !ctx.writer.append_group(&readings) {
                        return Ok(());
                    }
                    ctx.stats.samples(readings.len());
                }
                BlockOutcome::Unparsable { lines } => {
                    log.note_unparsable();
                    ctx.stats.skipped();
                    debug!("unparsable response ({lines} lines)");
                }
                BlockOutcome::Discard => {
                    log.note_discarded();
                    ctx.stats.skipped();
                    debug!("discarded prompt echo");
                }
            }
        }
        Ok(())
    }
}

impl Producer for RadioPoller {
    fn name(&self) -> &'static str {
        "radio-poller"
    }

    fn run(self: Box<Self>, ctx: &SourceContext) -> Result<()> {
        let target = self.config.target();
        let mut shell = self.connector.connect(&self.config)?;
        if let Some(process) = shell.process()
            && !ctx.transport.attach(Arc::clone(&process))
        {
            // Torn down while connecting.
            process.kill();
            return Ok(());
        }

        // Login banner up to the first prompt.
        let greeting = read_response(
            &mut *shell,
            ctx,
            self.config.prompt_suffix,
            self.config.connect_timeout,
        )
        .map_err(|e| Error::Connect {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        if greeting.is_none() {
            return Ok(());
        }
        info!("connected to {target}");

        let mut log = RadioLogWriter::create(&self.config.output_dir, &target)?;
        info!("recording to {}", log.path().display());

        let result = self.poll_loop(&mut *shell, &mut log, ctx);
        drop(shell);

        match log.finish() {
            Ok(path) => info!("radio log saved to {}", path.display()),
            Err(e) => warn!("finishing radio log: {e}"),
        }
        result
    }
}

/// Collect output until it ends with a prompt line. Returns the output with
/// the prompt line removed, or `None` if the session finished while waiting.
fn read_response(
    shell: &mut dyn RemoteShell,
    ctx: &SourceContext,
    prompt_suffix: char,
    timeout: Duration,
) -> Result<Option<String>> {
    let deadline = Instant::now() + timeout;
    let mut buf = String::new();
    loop {
        if ctx.finished() {
            return Ok(None);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::transport(format!(
                "no prompt within {}s",
                timeout.as_secs_f64()
            )));
        }
        match shell.recv(remaining.min(RECV_SLICE)) {
            Ok(Some(chunk)) => {
                buf.push_str(&chunk);
                if buf.trim_end().ends_with(prompt_suffix) {
                    return Ok(Some(strip_prompt_line(&buf)));
                }
            }
            Ok(None) => {}
            Err(_) if ctx.finished() => return Ok(None),
            Err(e) => return Err(Error::transport(format!("remote shell closed: {e}"))),
        }
    }
}

fn strip_prompt_line(buf: &str) -> String {
    let trimmed = buf.trim_end();
    match trimmed.rfind('\n') {
        Some(i) => trimmed[..i].to_string(),
        None => String::new(),
    }
}
