//! Child processes with a timeout, bounded output and cooperative cancellation.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How often a running child is checked against its deadline and the token.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a reader may keep draining after the child has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Limits applied to a single child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLimits {
    /// Maximum time before killing the command.
    pub timeout: Duration,
    /// Maximum bytes kept from each of stdout and stderr.
    pub output_limit_bytes: usize,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.cancelled && self.status.success()
    }

    /// Stdout as text, with a trailing notice when bytes were dropped.
    pub fn stdout_text(&self, label: &str) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            text.push_str(&format!(
                "\n[{label} output truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        text
    }

    /// Last non-empty stderr line, for error messages.
    pub fn stderr_tail(&self) -> Option<String> {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

/// Build a [`Command`] from a configured argv (`["program", "arg", ...]`).
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
    if program.trim().is_empty() {
        return Err(anyhow!("command program must be non-empty"));
    }
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Run a command, feeding `stdin` and capturing stdout/stderr without risking pipe deadlocks.
///
/// Input is written and output is read on helper threads while the child runs;
/// bytes beyond `output_limit_bytes` are discarded while the pipe is still drained.
/// The child is killed when the timeout elapses or `cancel` fires, and the output
/// is flagged accordingly instead of returning an error.
///
/// Pipes inherited by a grandchild can stay open after the child exits. Readers
/// get `OUTPUT_DRAIN_GRACE` to reach EOF, after which the output read so far is
/// returned and the reader threads are detached.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), output_limit_bytes = limits.output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: CommandLimits,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
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

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;
    let stdout_reader = StreamReader::spawn(stdout, limit);
    let stderr_reader = StreamReader::spawn(stderr, limit);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Detached: a child that never reads keeps this blocked until the pipe closes.
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                warn!(err = %e, "child closed stdin before reading all input");
            }
        });
    }

    let deadline = Instant::now() + limits.timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        let now = Instant::now();
        let slice = deadline.saturating_duration_since(now).min(POLL_INTERVAL);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
        if cancel.is_cancelled() {
            warn!("command cancelled, killing");
            cancelled = true;
        } else if Instant::now() >= deadline {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
        } else {
            continue;
        }
        child.kill().context("kill command")?;
        break child.wait().context("wait command after kill")?;
    };

    let (stdout, stdout_truncated) = stdout_reader.finish("stdout")?;
    let (stderr, stderr_truncated) = stderr_reader.finish("stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// One output pipe drained on its own thread into a shared buffer.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    done: mpsc::Receiver<Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&captured);
        thread::spawn(move || {
            // The receiver is gone once the caller stopped waiting.
            let _ = tx.send(read_stream_limited(reader, limit, &sink));
        });
        Self { captured, done }
    }

    /// Wait up to `OUTPUT_DRAIN_GRACE` for EOF, then take what was read.
    fn finish(self, stream: &str) -> Result<(Vec<u8>, usize)> {
        match self.done.recv_timeout(OUTPUT_DRAIN_GRACE) {
            Ok(result) => result.with_context(|| format!("read {stream}"))?,
            Err(RecvTimeoutError::Timeout) => {
                warn!(stream, "pipe still open after child exit, keeping partial output");
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("{stream} reader thread panicked"));
            }
        }
        let mut captured = self
            .captured
            .lock()
            .map_err(|_| anyhow!("{stream} buffer poisoned"))?;
        Ok((std::mem::take(&mut captured.bytes), captured.truncated))
    }
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    sink: &Mutex<Captured>,
) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = sink.lock().map_err(|_| anyhow!("output buffer poisoned"))?;
        let remaining = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(remaining);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn limits(timeout_ms: u64, output_limit_bytes: usize) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_millis(timeout_ms),
            output_limit_bytes,
        }
    }

    #[test]
    fn command_from_argv_rejects_empty() {
        assert!(command_from_argv(&[]).is_err());
        assert!(command_from_argv(&[" ".to_string()]).is_err());
        let cmd = command_from_argv(&["sh".to_string(), "-c".to_string()]).expect("cmd");
        assert_eq!(cmd.get_program(), "sh");
        assert_eq!(cmd.get_args().count(), 1);
    }

    #[test]
    fn echoes_stdin_to_stdout() {
        let output = run_command(
            sh("cat"),
            Some(b"hello"),
            limits(5_000, 1024),
            &CancellationToken::new(),
        )
        .expect("run");
        assert!(output.succeeded());
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn truncates_stdout_beyond_limit() {
        let output = run_command(
            sh("printf 'abcdef'"),
            None,
            limits(5_000, 4),
            &CancellationToken::new(),
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 2);
        assert!(output.stdout_text("executor").contains("truncated 2 bytes"));
    }

    #[test]
    fn kills_on_timeout() {
        let started = Instant::now();
        let output = run_command(
            sh("sleep 6; echo done"),
            None,
            limits(300, 1024),
            &CancellationToken::new(),
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.succeeded());
        assert!(output.stdout.is_empty());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn kills_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        let output = run_command(
            sh("sleep 6; echo done"),
            None,
            limits(10_000, 1024),
            &cancel,
        )
        .expect("run");
        assert!(output.cancelled);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn cancel_mid_run_stops_waiting() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let started = Instant::now();
        let output = run_command(sh("sleep 6"), None, limits(10_000, 1024), &cancel).expect("run");
        canceller.join().expect("canceller");
        assert!(output.cancelled);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn unread_stdin_does_not_delay_the_timeout() {
        let input = vec![b'x'; 256 * 1024];
        let started = Instant::now();
        let output = run_command(
            sh("sleep 8"),
            Some(&input),
            limits(500, 1024),
            &CancellationToken::new(),
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn large_stdin_is_fully_delivered() {
        let input = vec![b'y'; 256 * 1024];
        let output = run_command(
            sh("wc -c"),
            Some(&input),
            limits(5_000, 1024),
            &CancellationToken::new(),
        )
        .expect("run");
        assert!(output.succeeded());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "262144");
    }

    #[test]
    fn reports_stderr_tail_on_failure() {
        let output = run_command(
            sh("echo first >&2; echo 'boom' >&2; exit 3"),
            None,
            limits(5_000, 1024),
            &CancellationToken::new(),
        )
        .expect("run");
        assert!(!output.succeeded());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr_tail().as_deref(), Some("boom"));
    }
}
