use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const LOG_TAIL: usize = 2000;

#[derive(Debug)]
pub(crate) enum ProcessEnd {
    Exited { status: ExitStatus, log_tail: String },
    TimedOut,
    Cancelled,
}

/// Runs `command` to completion, killing it when `timeout` elapses or `cancel`
/// trips. Output goes to `log_path` so a chatty build cannot block on a pipe.
pub(crate) fn run_supervised(
    mut command: Command,
    log_path: &Path,
    timeout: Duration,
    cancel: &CancelToken,
    on_kill: impl Fn(),
) -> std::io::Result<ProcessEnd> {
    let log = File::create(log_path)?;
    command
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log);
    let mut child = command.spawn()?;
    let started = Instant::now();
    debug!(pid = child.id(), "build process started");
    loop {
        if let Some(status) = child.try_wait()? {
            debug!(
                pid = child.id(),
                %status,
                elapsed_ms = started.elapsed().as_millis(),
                "build process exited"
            );
            return Ok(ProcessEnd::Exited {
                status,
                log_tail: read_tail(log_path),
            });
        }
        let end = if cancel.is_cancelled() {
            Some(ProcessEnd::Cancelled)
        } else if started.elapsed() >= timeout {
            Some(ProcessEnd::TimedOut)
        } else {
            None
        };
        if let Some(end) = end {
            warn!(pid = child.id(), reason = ?end, "stopping build process");
            on_kill();
            let _ = child.kill();
            let _ = child.wait();
            return Ok(end);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn read_tail(path: &Path) -> String {
    let contents = fs::read(path).unwrap_or_default();
    let start = contents.len().saturating_sub(LOG_TAIL);
    String::from_utf8_lossy(&contents[start..]).trim().to_string()
}
