//! Helpers for running child processes with timeouts and bounded output.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last few lines of stderr, for error messages.
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }

    /// Describe a non-successful run, or `None` when the command succeeded.
    pub fn failure(&self, label: &str, timeout: Duration) -> Option<String> {
        if self.timed_out {
            return Some(format!("{label} timed out after {}s", timeout.as_secs()));
        }
        if self.status.success() {
            return None;
        }
        let tail = self.stderr_tail(5);
        if tail.trim().is_empty() {
            Some(format!("{label} failed with status {:?}", self.status.code()))
        } else {
            Some(format!(
                "{label} failed with status {:?}: {}",
                self.status.code(),
                tail.trim()
            ))
        }
    }
}

/// Spawned child with its output pipes taken.
struct Spawned {
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

fn spawn_piped(mut cmd: Command, stdin: Option<&[u8]>) -> Result<Spawned> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    Ok(Spawned {
        child,
        stdout,
        stderr,
    })
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let Spawned {
        mut child,
        stdout,
        stderr,
    } = spawn_piped(cmd, stdin)?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;
    finish(status, timed_out, stdout_handle, stderr_handle)
}

/// Run a command with a timeout, handing each stdout line to `on_line` as it arrives.
///
/// `on_line` runs on the calling thread. Lines still count toward the stored
/// stdout, which stays bounded by `output_limit_bytes`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_lines(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    on_line: &mut dyn FnMut(&str),
) -> Result<CommandOutput> {
    let deadline = Instant::now() + timeout;
    let Spawned {
        mut child,
        stdout,
        stderr,
    } = spawn_piped(cmd, stdin)?;

    let (tx, rx) = mpsc::channel::<String>();
    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, output_limit_bytes, &tx));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut deadline_hit = false;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(line) => on_line(&line),
            Err(RecvTimeoutError::Timeout) => {
                deadline_hit = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let (status, timed_out) = if deadline_hit {
        warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
        child.kill().context("kill command")?;
        (child.wait().context("wait command after kill")?, true)
    } else {
        wait_or_kill(
            &mut child,
            deadline.saturating_duration_since(Instant::now()),
        )?
    };
    finish(status, timed_out, stdout_handle, stderr_handle)
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Ok((status, false)),
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            child.kill().context("kill command")?;
            Ok((child.wait().context("wait command after kill")?, true))
        }
    }
}

type ReaderHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

fn finish(
    status: ExitStatus,
    timed_out: bool,
    stdout_handle: ReaderHandle,
    stderr_handle: ReaderHandle,
) -> Result<CommandOutput> {
    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

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
    })
}

fn join_output(handle: ReaderHandle) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    tx: &mpsc::Sender<String>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        // Receiver is gone once the caller gave up waiting; keep draining.
        let _ = tx.send(String::from_utf8_lossy(&line).trim_end().to_string());

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
