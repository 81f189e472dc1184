//! Child process supervision with a wall-clock timeout and bounded capture.
//!
//! On unix the child leads its own process group. A timeout kills the whole
//! group, and stragglers left behind by a child that exited normally are
//! killed too, so nothing the child spawned can keep the output pipes open.

use std::io::{Read, Write};
use std::mem;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long output readers may keep draining after the child has been reaped.
const READER_GRACE: Duration = Duration::from_secs(1);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub timeout: Duration,
}

impl CommandOutput {
    /// True when the child exited with status zero before the timeout.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Render stdout and stderr as one log, with truncation and timeout notices.
    pub fn combined_log(&self, label: &str) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str(&format!(
                "\n[{label} timed out after {:?}]\n",
                self.timeout
            ));
        } else {
            match self.status.code() {
                Some(code) => buf.push_str(&format!("\n[{label} exit status {code}]\n")),
                None => buf.push_str(&format!("\n[{label} terminated by signal]\n")),
            }
        }
        buf
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Input is written and output is read on helper threads while the child runs, so neither a
/// child that never reads stdin nor one that floods stdout can stall the timeout.
/// `output_limit_bytes` bounds the amount of stdout/stderr stored in memory (bytes beyond this
/// are discarded while still draining the pipe). A timed-out child is killed together with
/// everything it spawned and reported with `timed_out = true`; only spawn and wait failures
/// are errors.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    own_process_group(&mut cmd);

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = StreamReader::spawn(stdout, output_limit_bytes);
    let stderr_reader = StreamReader::spawn(stderr, output_limit_bytes);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Detached: the write ends with EPIPE once the child is gone.
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                warn!(err = %e, "child closed stdin before reading all input");
            }
        });
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => {
            kill_process_group(&child);
            status
        }
        None => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing"
            );
            timed_out = true;
            if !kill_process_group(&child) {
                child.kill().context("kill command")?;
            }
            child.wait().context("wait command after kill")?
        }
    };

    let drain_deadline = Instant::now() + READER_GRACE;
    let (stdout, stdout_truncated) = stdout_reader.finish(drain_deadline).context("join stdout")?;
    let (stderr, stderr_truncated) = stderr_reader.finish(drain_deadline).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        timeout,
    })
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// SIGKILL the child's process group. Returns false when the group could not be signalled.
#[cfg(unix)]
fn kill_process_group(child: &Child) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return false;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => true,
        Err(errno) => {
            warn!(err = %errno, pgid, "failed to kill process group");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) -> bool {
    false
}

#[derive(Default)]
struct Capture {
    buf: Vec<u8>,
    truncated: usize,
    error: Option<String>,
}

/// Background reader for one output pipe.
///
/// The capture is shared so whatever arrived before the drain deadline is kept even when
/// a process outside the child's group still holds the pipe open.
struct StreamReader {
    capture: Arc<Mutex<Capture>>,
    done: Receiver<()>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let capture = Arc::new(Mutex::new(Capture::default()));
        let (tx, done) = mpsc::channel();
        let shared = Arc::clone(&capture);
        thread::spawn(move || {
            read_stream_limited(reader, limit, &shared);
            let _ = tx.send(());
        });
        Self { capture, done }
    }

    fn finish(self, deadline: Instant) -> Result<(Vec<u8>, usize)> {
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(wait) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => {
                warn!("output pipe still open after the child exited, keeping partial output");
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
        let mut capture = self
            .capture
            .lock()
            .map_err(|_| anyhow!("output reader thread panicked"))?;
        if let Some(err) = capture.error.take() {
            return Err(anyhow!("read output: {err}"));
        }
        Ok((mem::take(&mut capture.buf), capture.truncated))
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, capture: &Mutex<Capture>) {
    let mut chunk = [0u8; 8192];

    loop {
        let read = reader.read(&mut chunk);
        let Ok(mut guard) = capture.lock() else {
            return;
        };
        let n = match read {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                guard.error = Some(e.to_string());
                return;
            }
        };
        let remaining = limit.saturating_sub(guard.buf.len());
        let keep = n.min(remaining);
        guard.buf.extend_from_slice(&chunk[..keep]);
        guard.truncated += n - keep;
    }
}
