//! Line-by-line status output of the bandwidth-test process.

use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

use log::{debug, info};

use super::process::ChildProcess;
use super::{Producer, SourceContext};
use crate::error::{Error, Result};
use crate::parser::parse_status_line;

/// Reads the child's stdout and appends each recognised status line.
pub struct StatusStream<R> {
    process: Arc<ChildProcess>,
    output: R,
}

impl<R: Read + Send> StatusStream<R> {
    pub fn new(process: Arc<ChildProcess>, output: R) -> Self {
        Self { process, output }
    }
}

impl<R: Read + Send> Producer for StatusStream<R> {
    fn name(&self) -> &'static str {
        "status-stream"
    }

    fn run(self: Box<Self>, ctx: &SourceContext) -> Result<()> {
        let Self { process, output } = *self;
        let mut reader = BufReader::new(output);
        let mut buf = Vec::with_capacity(256);

        loop {
            if ctx.finished() {
                return Ok(());
            }

            buf.clear();
            let n = match reader.read_until(b'\n', &mut buf) {
                Ok(n) => n,
                // The pipe errors out when the child is torn down under us.
                Err(_) if ctx.finished() => return Ok(()),
                Err(e) => return Err(Error::transport(format!("reading process output: {e}"))),
            };
            if n == 0 {
                break;
            }

            ctx.stats.chunk();
            let line = String::from_utf8_lossy(&buf);
            match parse_status_line(&line) {
                Ok(Some((metric, value))) => {
                    if !ctx.writer.append(metric, Some(value)) {
                        return Ok(());
                    }
                    ctx.stats.samples(1);
                }
                Ok(None) => {}
                Err(e) => {
                    ctx.stats.parse_error();
                    debug!("skipping status line: {e}");
                }
            }
        }

        if ctx.finished() {
            return Ok(());
        }
        let reason = process.describe_exit();
        info!("status stream ended: {reason}");
        Err(Error::SourceExited { reason })
    }
}
