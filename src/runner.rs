//! Subprocess execution
//!
//! `run_streaming` supervises IaC tools: stdout and stderr are each drained
//! by a dedicated reader thread, one whole line at a time, and both readers
//! finish before the exit status is returned. `run_capture` is for short
//! provider CLI calls whose output is parsed.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use orgtree::render_command;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Run `command`, calling `on_line` for every output line.
///
/// With a `timeout`, the child is killed once it expires and
/// [`orgtree::Error::Timeout`] is returned.
pub fn run_streaming(
    mut command: Command,
    timeout: Option<Duration>,
    on_line: &(dyn Fn(Stream, &str) + Sync),
) -> orgtree::Result<ExitStatus> {
    let rendered = render_command(&command);
    log::debug!("Running: {rendered}");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            io::Error::new(e.kind(), format!("failed to start `{rendered}`: {e}"))
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let outcome = thread::scope(|scope| {
        let out = scope.spawn(|| drain(stdout, Stream::Stdout, on_line));
        let err = scope.spawn(|| drain(stderr, Stream::Stderr, on_line));

        let waited = match timeout {
            Some(timeout) => wait_with_deadline(&mut child, timeout),
            None => Ok(None),
        };

        // Readers end once both pipes close.
        let _ = out.join();
        let _ = err.join();

        match waited {
            Ok(Some(status)) => Ok(Some(status)),
            Ok(None) if timeout.is_none() => child.wait().map(Some),
            other => other,
        }
    });

    match outcome? {
        Some(status) => {
            log::debug!("`{rendered}` exited with {status}");
            Ok(status)
        }
        None => Err(orgtree::Error::Timeout {
            what: format!("`{rendered}`"),
            after: timeout.unwrap_or_default(),
        }),
    }
}

/// Wait for `child` until `timeout` expires. Returns `None` after killing
/// it on expiry.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            log::warn!("Killing process {} after {}s", child.id(), timeout.as_secs());
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(WAIT_INTERVAL);
    }
}

/// Forward each line of `pipe` until EOF. Invalid UTF-8 is replaced lossily.
fn drain<R: Read>(pipe: Option<R>, stream: Stream, on_line: &(dyn Fn(Stream, &str) + Sync)) {
    let Some(pipe) = pipe else {
        return;
    };
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                on_line(stream, &String::from_utf8_lossy(&buf));
            }
            Err(e) => {
                log::debug!("Stopped reading {stream:?}: {e}");
                break;
            }
        }
    }
}

/// Run a command and capture stdout.
///
/// Returns the trimmed stdout on success, or the trimmed stderr (or spawn
/// error) as the message on failure.
pub fn run_capture(command: &mut Command) -> Result<String, String> {
    let rendered = render_command(command);
    log::trace!("Capturing: {rendered}");

    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("failed to execute `{rendered}`: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(stderr.trim().to_string())
    }
}
