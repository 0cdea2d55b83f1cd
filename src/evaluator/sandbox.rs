//! # Secure Evaluator
//!
//! `SecureEvaluator` runs each candidate in a fresh worker process. The
//! controlling process only ever sees the bytes the worker writes to stdout,
//! so a candidate that loops forever, segfaults, aborts or exhausts memory
//! costs one failed evaluation and nothing else.
//!
//! One evaluation goes like this:
//!
//! 1. The candidate function is spliced into the task template.
//! 2. A worker is spawned from the task's [`WorkerCommand`] inside a private
//!    temporary directory and its own process group, optionally under a
//!    `ulimit -v` memory cap.
//! 3. The [`WorkerRequest`] is written to its stdin on a helper thread.
//! 4. The process is polled until it exits or the deadline passes. A worker
//!    still running at the deadline is killed together with everything it
//!    forked, and the call reports
//!    [`FailureKind::Timeout`](super::FailureKind::Timeout).
//!
//! Only the last [`STDOUT_TAIL`] bytes of stdout and [`STDERR_TAIL`] bytes of
//! stderr are kept; the rest is read and discarded, so a worker that floods
//! its pipes never grows the controller's memory.
//! 5. Stdout is decoded into a [`WorkerResponse`]. When acceleration was
//!    requested and the worker reports that compiling failed, the candidate is
//!    run once more without acceleration within the time that is left.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::protocol::{decode_response, WorkerRequest, WorkerResponse};
use super::{Evaluate, EvaluationFailure};
use crate::candidate::Candidate;
use crate::error::{OptionExt, Result, SearchError};
use crate::evolution::options::seconds;
use crate::task::{TaskSpec, WorkerCommand};

/// Bytes of worker stdout kept for response decoding.
pub const STDOUT_TAIL: usize = 256 * 1024;
/// Bytes of worker stderr kept for failure messages.
pub const STDERR_TAIL: usize = 2000;
const READ_CHUNK: usize = 8 * 1024;

/// Limits applied to every worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxOptions {
    /// Wall-clock limit of one evaluation, acceleration retry included.
    #[serde(with = "seconds")]
    pub timeout: Duration,
    /// Request JIT compilation first and fall back when it fails.
    pub accelerate: bool,
    /// Virtual memory cap in MiB, enforced with `ulimit -v` (Unix only).
    pub memory_limit_mb: Option<u64>,
    /// How often a running worker is polled for exit.
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    /// How long to wait for the output pipes to close after the worker exited.
    #[serde(with = "seconds")]
    pub output_grace: Duration,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            accelerate: false,
            memory_limit_mb: None,
            poll_interval: Duration::from_millis(10),
            output_grace: Duration::from_secs(1),
        }
    }
}

impl SandboxOptions {
    /// Creates options with the given timeout and defaults for the rest.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns `SearchError::Configuration` for a zero timeout, poll interval
    /// or memory limit.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(SearchError::Configuration(
                "Evaluation timeout must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SearchError::Configuration(
                "Worker poll interval must be greater than zero".to_string(),
            ));
        }
        if self.memory_limit_mb == Some(0) {
            return Err(SearchError::Configuration(
                "Worker memory limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Process-isolated evaluator for generated code.
#[derive(Debug, Clone)]
pub struct SecureEvaluator {
    task: TaskSpec,
    command: WorkerCommand,
    options: SandboxOptions,
}

impl SecureEvaluator {
    /// Creates an evaluator for `task`.
    ///
    /// # Errors
    ///
    /// - `SearchError::Task` if the task declares no evaluation entry point.
    /// - `SearchError::Configuration` if `options` are invalid.
    pub fn new(task: TaskSpec, options: SandboxOptions) -> Result<Self> {
        options.validate()?;
        let command = task
            .entry_point()
            .filter(|command| !command.program.trim().is_empty())
            .cloned()
            .ok_or_else_search(|| {
                SearchError::Task(format!(
                    "task `{}` does not declare an evaluation entry point",
                    task.name()
                ))
            })?;

        Ok(Self {
            task,
            command,
            options,
        })
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    fn command(&self, workdir: &std::path::Path) -> Command {
        let mut command = match self.options.memory_limit_mb {
            Some(limit) if cfg!(unix) => {
                let mut shell = Command::new("/bin/sh");
                shell
                    .arg("-c")
                    .arg(format!("ulimit -v {}; exec \"$0\" \"$@\"", limit * 1024))
                    .arg(&self.command.program)
                    .args(&self.command.args);
                shell
            }
            _ => {
                let mut direct = Command::new(&self.command.program);
                direct.args(&self.command.args);
                direct
            }
        };

        command
            .envs(&self.command.env)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }

    /// Runs one worker until it answers, dies or reaches `deadline`.
    fn run_worker(
        &self,
        request: &WorkerRequest,
        deadline: Instant,
    ) -> std::result::Result<WorkerResponse, EvaluationFailure> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| EvaluationFailure::spawn(format!("cannot encode request: {}", e)))?;
        let workdir = tempfile::tempdir()
            .map_err(|e| EvaluationFailure::spawn(format!("cannot create work dir: {}", e)))?;

        let mut child = self.command(workdir.path()).spawn().map_err(|e| {
            EvaluationFailure::spawn(format!("cannot start `{}`: {}", self.command.program, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            thread::spawn(move || {
                // A worker that exits without reading closes the pipe; that is
                // reported through its exit status, not here.
                let _ = stdin.write_all(&payload);
            });
        }
        let stdout = drain(child.stdout.take(), STDOUT_TAIL);
        let stderr = drain(child.stderr.take(), STDERR_TAIL);

        let status = self.wait_until(&mut child, deadline)?;

        let stdout = stdout.recv_timeout(self.options.output_grace).unwrap_or_default();
        let stderr = stderr.recv_timeout(self.options.output_grace).unwrap_or_default();

        if let Some(response) = decode_response(&stdout) {
            return Ok(response);
        }

        if let Some(signal) = terminating_signal(&status) {
            return Err(EvaluationFailure::crash(format!(
                "worker terminated by signal {}{}",
                signal,
                stderr_suffix(&stderr)
            )));
        }
        if !status.success() {
            return Err(EvaluationFailure::runtime(format!(
                "worker exited with {}{}",
                status,
                stderr_suffix(&stderr)
            )));
        }
        Err(EvaluationFailure::runtime(format!(
            "worker produced no response{}",
            stderr_suffix(&stderr)
        )))
    }

    fn wait_until(
        &self,
        child: &mut Child,
        deadline: Instant,
    ) -> std::result::Result<ExitStatus, EvaluationFailure> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        kill_worker(child);
                        return Err(EvaluationFailure::timeout(self.options.timeout));
                    }
                    thread::sleep(self.options.poll_interval);
                }
                Err(e) => {
                    kill_worker(child);
                    return Err(EvaluationFailure::crash(format!(
                        "cannot observe worker: {}",
                        e
                    )));
                }
            }
        }
    }

    fn request(
        &self,
        candidate: &Candidate,
        program: String,
        accelerate: bool,
        left: Duration,
    ) -> WorkerRequest {
        WorkerRequest {
            task: self.task.name().to_string(),
            function_name: self.task.signature().name().to_string(),
            program,
            source: candidate.source().to_string(),
            accelerate,
            timeout_secs: left.as_secs_f64(),
        }
    }
}

impl Evaluate for SecureEvaluator {
    fn evaluate(&self, candidate: &Candidate) -> std::result::Result<f64, EvaluationFailure> {
        let program = self
            .task
            .assemble_program(candidate.source())
            .map_err(|e| EvaluationFailure::runtime(e.to_string()))?;
        let deadline = Instant::now() + self.options.timeout;

        let first = self.request(
            candidate,
            program.clone(),
            self.options.accelerate,
            self.options.timeout,
        );
        let mut response = self.run_worker(&first, deadline)?;

        if let WorkerResponse::AccelerationFailed { message } = &response {
            debug!(candidate = %candidate.id(), %message, "acceleration failed, retrying unaccelerated");
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(EvaluationFailure::timeout(self.options.timeout));
            }
            response = self.run_worker(&self.request(candidate, program, false, left), deadline)?;
        }

        match response {
            WorkerResponse::Ok { score: Some(score) } if score.is_finite() => Ok(score),
            WorkerResponse::Ok { score: Some(score) } => Err(EvaluationFailure::invalid_score(
                format!("non-finite score {}", score),
            )),
            WorkerResponse::Ok { score: None } => Err(EvaluationFailure::invalid_score(
                "worker returned no numeric score",
            )),
            WorkerResponse::Error { message } => Err(EvaluationFailure::runtime(message)),
            WorkerResponse::AccelerationFailed { message } => {
                warn!(candidate = %candidate.id(), "worker requested acceleration fallback twice");
                Err(EvaluationFailure::runtime(message))
            }
        }
    }
}

/// Kills the worker's process group, then reaps the worker.
///
/// The worker leads its own group, and its pid cannot be reused before it is
/// reaped, so the group kill only reaches processes it started.
#[cfg(unix)]
fn kill_worker(child: &mut Child) {
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !killed {
        warn!(pid = child.id(), "cannot kill worker process group");
        let _ = child.kill();
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_worker(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Reads a pipe to the end on a detached thread, keeping the last `limit`
/// bytes.
///
/// A grandchild that inherited the pipe can keep it open after the worker is
/// gone, so the caller waits on the channel with a timeout instead of joining.
fn drain<R>(pipe: Option<R>, limit: usize) -> mpsc::Receiver<String>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    if let Some(pipe) = pipe {
        thread::spawn(move || {
            let bytes = read_tail(pipe, limit);
            let _ = tx.send(String::from_utf8_lossy(&bytes).into_owned());
        });
    }
    rx
}

/// Reads `pipe` until it closes or fails and returns at most its last
/// `limit` bytes.
fn read_tail<R: Read>(mut pipe: R, limit: usize) -> Vec<u8> {
    let mut tail = Vec::with_capacity(limit.min(READ_CHUNK) * 2);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                // Trim lazily; the buffer stays below twice the limit plus a chunk.
                if tail.len() > limit * 2 {
                    tail.drain(..tail.len() - limit);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    if tail.len() > limit {
        tail.drain(..tail.len() - limit);
    }
    tail
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let start = trimmed
        .char_indices()
        .rev()
        .nth(STDERR_TAIL.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!(": {}", &trimmed[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Direction;

    fn task() -> TaskSpec {
        TaskSpec::new("t", "d", "def f(x):\n    return x\n", "f", Direction::Maximize).unwrap()
    }

    #[test]
    fn test_missing_entry_point_is_task_error() {
        let result = SecureEvaluator::new(task(), SandboxOptions::default());
        assert!(matches!(result, Err(SearchError::Task(_))));

        let blank = task().with_entry_point(WorkerCommand::new(" ", Vec::<String>::new()));
        assert!(matches!(
            SecureEvaluator::new(blank, SandboxOptions::default()),
            Err(SearchError::Task(_))
        ));
    }

    #[test]
    fn test_options_validate() {
        assert!(SandboxOptions::default().validate().is_ok());
        assert!(SandboxOptions::with_timeout(Duration::ZERO).validate().is_err());

        let options = SandboxOptions {
            memory_limit_mb: Some(0),
            ..SandboxOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_deserialize_seconds() {
        let options: SandboxOptions =
            serde_json::from_str(r#"{"timeout": 2.5, "accelerate": true}"#).unwrap();
        assert_eq!(options.timeout, Duration::from_millis(2500));
        assert!(options.accelerate);
        assert_eq!(options.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_read_tail_keeps_last_bytes() {
        let flood: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let tail = read_tail(flood.as_slice(), 1000);
        assert_eq!(tail.as_slice(), &flood[flood.len() - 1000..]);

        assert_eq!(read_tail(&b"short"[..], 1000), b"short".to_vec());
        assert!(read_tail(&b""[..], 10).is_empty());
    }

    #[test]
    fn test_stderr_suffix_keeps_tail() {
        assert_eq!(stderr_suffix("  \n"), "");
        let long = "x".repeat(STDERR_TAIL + 50);
        assert_eq!(stderr_suffix(&long).len(), STDERR_TAIL + 2);
    }
}
