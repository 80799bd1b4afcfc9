//! ffprobe process spawning with a bounded lifetime.
//!
//! Spawns ffprobe as a child process with stdout/stderr piped, drains both pipes
//! on background threads, and polls the child until it exits, the deadline passes
//! or the caller cancels. The child is killed and reaped on every exit path.

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use super::path_to_string;
use crate::error::AppError;

/// Fixed flag set: quiet logging, JSON report, format + streams + embedded error.
pub const FFPROBE_ARGS: &[&str] = &[
    "-v",
    "quiet",
    "-print_format",
    "json",
    "-show_format",
    "-show_streams",
    "-show_error",
];

/// How often the child is polled for exit, deadline and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Full argument list for probing `input`; the input path is always last.
pub fn build_ffprobe_args(input: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = FFPROBE_ARGS.iter().map(OsString::from).collect();
    args.push(input.as_os_str().to_os_string());
    args
}

/// Per-call cancellation flag. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Guard that cancels the token when dropped.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

pub struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Raw bytes ffprobe wrote before exiting successfully.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProbeOutput {
    /// Stdout then stderr as lossy text, empty channels skipped.
    pub fn captured_text(&self) -> String {
        captured_text(&self.stdout, &self.stderr)
    }
}

fn captured_text(stdout: &[u8], stderr: &[u8]) -> String {
    [stdout, stderr]
        .iter()
        .map(|b| String::from_utf8_lossy(b).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Owns the child until it has been reaped. Kills it first if it is still running.
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Kill (if still running) and wait. Safe to call more than once.
    fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                log::warn!(
                    target: "media_probe::ffmpeg::runner",
                    "Terminating ffprobe process (pid={})",
                    child.id()
                );
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }

    fn release(&mut self) {
        self.child = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Drain `reader` on a background thread; the bytes arrive on the receiver at EOF.
fn read_stream<R: Read + Send + 'static>(
    mut reader: R,
    max_bytes: Option<usize>,
) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut collected = Vec::new();
        let mut chunk = [0_u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    collected.extend_from_slice(&chunk[..n]);
                    if let Some(limit) = max_bytes
                        && collected.len() > limit
                    {
                        let excess = collected.len() - limit;
                        collected.drain(..excess);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(collected);
    });
    rx
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

fn wait_bounded(
    guard: &mut ChildGuard,
    deadline: Instant,
    cancel: Option<&CancelToken>,
) -> Result<WaitOutcome, AppError> {
    loop {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Ok(WaitOutcome::Cancelled);
        }
        let Some(child) = guard.child_mut() else {
            return Err(AppError::from("ffprobe process handle was lost"));
        };
        match child.try_wait() {
            Ok(Some(status)) => return Ok(WaitOutcome::Exited(status)),
            Ok(None) => {}
            Err(e) => {
                return Err(AppError::from(format!(
                    "Error waiting for ffprobe process: {}",
                    e
                )));
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Wait for a reader's bytes under the same deadline and token as the child.
/// A descendant that inherited the pipe can keep it open after ffprobe exits.
fn collect_bounded(
    rx: &Receiver<Vec<u8>>,
    deadline: Instant,
    cancel: Option<&CancelToken>,
) -> Result<Vec<u8>, WaitOutcome> {
    loop {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(WaitOutcome::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(WaitOutcome::TimedOut);
        }
        match rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
            Ok(bytes) => return Ok(bytes),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(Vec::new()),
        }
    }
}

/// Run ffprobe against `input` and block until it exits, times out or is cancelled.
///
/// - Launch failure or non-zero exit: `AppError::Execution` with everything captured.
/// - Deadline passed: `AppError::TimedOut`; the child is killed and reaped.
/// - `cancel` set: `AppError::Aborted`; the child is killed and reaped.
pub fn run_ffprobe_blocking(
    ffprobe: &Path,
    input: &Path,
    timeout: Duration,
    cancel: Option<&CancelToken>,
) -> Result<ProbeOutput, AppError> {
    let input_str = path_to_string(input);
    log::debug!(
        target: "media_probe::ffmpeg::runner",
        "Spawning ffprobe: path={}, input={}, timeout={:?}",
        ffprobe.display(),
        input_str,
        timeout
    );

    let mut cmd = Command::new(ffprobe);
    cmd.args(build_ffprobe_args(input))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd.spawn().map_err(|e| {
        log::error!(
            target: "media_probe::ffmpeg::runner",
            "Failed to spawn ffprobe at {}: {}",
            ffprobe.display(),
            e
        );
        AppError::execution(
            input_str.clone(),
            None,
            format!("failed to spawn {}: {}", ffprobe.display(), e),
            "",
        )
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut guard = ChildGuard::new(child);
    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        guard.terminate();
        return Err(AppError::from("Failed to capture ffprobe output"));
    };

    let stdout_rx = read_stream(stdout, None);
    let stderr_rx = read_stream(stderr, Some(MAX_STDERR_BYTES));
    let deadline = Instant::now() + timeout;

    let interrupted = |outcome: WaitOutcome| match outcome {
        WaitOutcome::Cancelled => {
            log::warn!(
                target: "media_probe::ffmpeg::runner",
                "ffprobe was aborted: {}",
                input_str
            );
            AppError::aborted()
        }
        _ => {
            log::warn!(
                target: "media_probe::ffmpeg::runner",
                "ffprobe timed out after {:?}: {}",
                timeout,
                input_str
            );
            AppError::TimedOut(timeout)
        }
    };

    let status = match wait_bounded(&mut guard, deadline, cancel)? {
        WaitOutcome::Exited(status) => {
            guard.release();
            status
        }
        outcome => {
            guard.terminate();
            // Readers are abandoned: a grandchild may still hold the pipes open.
            return Err(interrupted(outcome));
        }
    };

    let stdout = collect_bounded(&stdout_rx, deadline, cancel).map_err(&interrupted)?;
    let stderr = collect_bounded(&stderr_rx, deadline, cancel).map_err(&interrupted)?;

    if status.success() {
        log::debug!(
            target: "media_probe::ffmpeg::runner",
            "ffprobe completed: {} bytes of report for {}",
            stdout.len(),
            input_str
        );
        Ok(ProbeOutput { stdout, stderr })
    } else {
        let code = status.code();
        let output = captured_text(&stdout, &stderr);
        log::error!(
            target: "media_probe::ffmpeg::runner",
            "ffprobe failed (code={:?}) for {}: {}",
            code,
            input_str,
            output.lines().rev().take(3).collect::<Vec<_>>().join("; ")
        );
        let reason = match code {
            Some(c) => format!("exit status {}", c),
            None => "terminated by signal".to_string(),
        };
        Err(AppError::execution(input_str, code, reason, output))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_end_with_input_path() {
        let args = build_ffprobe_args(Path::new("/movies/clip one.mp4"));
        assert_eq!(args.len(), FFPROBE_ARGS.len() + 1);
        assert_eq!(
            args.last().map(|a| a.as_os_str()),
            Some(Path::new("/movies/clip one.mp4").as_os_str())
        );
        assert_eq!(args[0], "-v");
        assert_eq!(args[1], "quiet");
        assert!(args.iter().any(|a| a == "-show_error"));
    }

    #[test]
    fn cancel_token_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        {
            let _guard = token.drop_guard();
        }
        assert!(other.is_cancelled());
    }

    #[test]
    fn captured_text_skips_empty_channels() {
        assert_eq!(captured_text(b"", b"  oops \n"), "oops");
        assert_eq!(captured_text(b"{}", b"warn"), "{}\nwarn");
        assert_eq!(captured_text(b"", b""), "");
    }

    #[test]
    #[serial_test::serial]
    fn missing_binary_is_execution_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("no-such-ffprobe");
        let err = run_ffprobe_blocking(
            &missing,
            Path::new("clip.mp4"),
            Duration::from_secs(5),
            None,
        )
        .expect_err("spawn should fail");
        match err {
            AppError::Execution { code, reason, .. } => {
                assert_eq!(code, None);
                assert!(reason.contains("failed to spawn"), "reason: {}", reason);
            }
            other => panic!("expected Execution, got {:?}", other),
        }
    }

    #[cfg(unix)]
    mod process {
        use super::super::test_scripts::write_fake_ffprobe;
        use super::*;
        use serial_test::serial;

        #[test]
        #[serial]
        fn success_returns_stdout_and_passes_input_last() {
            let dir = tempfile::tempdir().expect("tempdir");
            let ffprobe = write_fake_ffprobe(
                dir.path(),
                r#"for last; do :; done; printf '{"input":"%s","argc":%d}' "$last" "$#""#,
            );
            let out = run_ffprobe_blocking(
                &ffprobe,
                Path::new("/movies/clip.mp4"),
                Duration::from_secs(10),
                None,
            )
            .expect("fake ffprobe succeeds");
            let text = String::from_utf8(out.stdout).expect("utf8");
            assert_eq!(
                text,
                format!(r#"{{"input":"/movies/clip.mp4","argc":{}}}"#, FFPROBE_ARGS.len() + 1)
            );
        }

        #[test]
        #[serial]
        fn non_zero_exit_carries_captured_output() {
            let dir = tempfile::tempdir().expect("tempdir");
            let ffprobe = write_fake_ffprobe(
                dir.path(),
                "echo \"$0: No such file or directory\" >&2; exit 1",
            );
            let err = run_ffprobe_blocking(
                &ffprobe,
                Path::new("/movies/missing.mp4"),
                Duration::from_secs(10),
                None,
            )
            .expect_err("non-zero exit");
            match &err {
                AppError::Execution { code, output, path, .. } => {
                    assert_eq!(*code, Some(1));
                    assert!(output.contains("No such file or directory"), "output: {}", output);
                    assert_eq!(path, "/movies/missing.mp4");
                }
                other => panic!("expected Execution, got {:?}", other),
            }
            assert!(err.to_string().contains("No such file or directory"));
        }

        #[test]
        #[serial]
        fn timeout_kills_the_child() {
            let dir = tempfile::tempdir().expect("tempdir");
            let ffprobe = write_fake_ffprobe(dir.path(), "exec sleep 30");
            let started = Instant::now();
            let err = run_ffprobe_blocking(
                &ffprobe,
                Path::new("clip.mp4"),
                Duration::from_millis(200),
                None,
            )
            .expect_err("should time out");
            assert!(matches!(err, AppError::TimedOut(d) if d == Duration::from_millis(200)));
            assert!(
                started.elapsed() < Duration::from_secs(10),
                "timeout took {:?}",
                started.elapsed()
            );
        }

        #[test]
        #[serial]
        fn cancellation_aborts_the_child() {
            let dir = tempfile::tempdir().expect("tempdir");
            let ffprobe = write_fake_ffprobe(dir.path(), "exec sleep 30");
            let token = CancelToken::new();
            let canceller = {
                let token = token.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(100));
                    token.cancel();
                })
            };
            let started = Instant::now();
            let err = run_ffprobe_blocking(
                &ffprobe,
                Path::new("clip.mp4"),
                Duration::from_secs(30),
                Some(&token),
            )
            .expect_err("should abort");
            canceller.join().expect("canceller thread");
            assert!(matches!(err, AppError::Aborted));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        #[serial]
        fn stderr_is_captured_on_success() {
            let dir = tempfile::tempdir().expect("tempdir");
            let ffprobe = write_fake_ffprobe(dir.path(), "printf '{}'; echo warning >&2");
            let out = run_ffprobe_blocking(
                &ffprobe,
                Path::new("clip.mp4"),
                Duration::from_secs(10),
                None,
            )
            .expect("success");
            assert_eq!(out.captured_text(), "{}\nwarning");
        }

        #[test]
        #[serial]
        fn lingering_grandchild_does_not_outlive_the_deadline() {
            let dir = tempfile::tempdir().expect("tempdir");
            let ffprobe = write_fake_ffprobe(dir.path(), "sleep 5 & printf '{}'; exit 0");
            let started = Instant::now();
            let err = run_ffprobe_blocking(
                &ffprobe,
                Path::new("clip.mp4"),
                Duration::from_millis(500),
                None,
            )
            .expect_err("pipes held past the deadline");
            assert!(matches!(err, AppError::TimedOut(_)), "got {:?}", err);
            assert!(
                started.elapsed() < Duration::from_secs(3),
                "took {:?}",
                started.elapsed()
            );
        }

        #[test]
        #[serial]
        fn cancel_while_draining_pipes_aborts() {
            let dir = tempfile::tempdir().expect("tempdir");
            let ffprobe = write_fake_ffprobe(dir.path(), "sleep 5 & printf '{}'; exit 0");
            let token = CancelToken::new();
            let canceller = {
                let token = token.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(300));
                    token.cancel();
                })
            };
            let started = Instant::now();
            let err = run_ffprobe_blocking(
                &ffprobe,
                Path::new("clip.mp4"),
                Duration::from_secs(30),
                Some(&token),
            )
            .expect_err("should abort");
            canceller.join().expect("canceller thread");
            assert!(matches!(err, AppError::Aborted), "got {:?}", err);
            assert!(started.elapsed() < Duration::from_secs(3));
        }

        #[test]
        #[serial]
        fn stderr_keeps_only_the_tail() {
            let dir = tempfile::tempdir().expect("tempdir");
            let ffprobe = write_fake_ffprobe(
                dir.path(),
                "head -c 200000 /dev/zero | tr '\\0' 'x' >&2; echo ' last line' >&2; exit 1",
            );
            let err = run_ffprobe_blocking(
                &ffprobe,
                Path::new("clip.mp4"),
                Duration::from_secs(10),
                None,
            )
            .expect_err("non-zero exit");
            match err {
                AppError::Execution { output, .. } => {
                    assert!(output.len() <= MAX_STDERR_BYTES, "kept {} bytes", output.len());
                    assert!(output.len() > MAX_STDERR_BYTES / 2, "kept {} bytes", output.len());
                    assert!(output.ends_with("last line"), "tail was dropped");
                }
                other => panic!("expected Execution, got {:?}", other),
            }
        }
    }
}
