//! Engine process supervision
//!
//! One [`supervise`] call owns one engine subprocess from spawn to terminal
//! outcome. Two timers bound the run: an initial-response timer armed at
//! spawn and disarmed permanently by the first output chunk longer than ten
//! bytes, and an inactivity timer rearmed on every chunk. Either timer
//! firing kills the process group and fails the call; a clean exit hands the
//! accumulated output to the parser.
//!
//! The race between a timer and the natural process exit is resolved by
//! [`ResolutionGuard`], a `{Running → TimedOut | Exited}` state machine with
//! one compare-and-swap transition, so exactly one terminal outcome wins.
//! All chunk handling (timer rearm included) happens on a single select
//! loop, which keeps each chunk's processing fully ordered relative to the
//! next chunk's arrival.
//!
//! Cleanup is structural: timers die with the loop, the scratch input file
//! is removed on drop, and `kill_on_drop` backstops the child on every
//! early-return path.

use std::io::Write;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};

use crate::elapsed::format_duration;
use crate::error::{Error, Result};
use crate::invocation::{InputChannel, InvocationRequest, InvocationResult, TimeLimit};
use crate::parser;

/// A first chunk must exceed this many bytes to disarm the initial timer;
/// shorter fragments (a stray newline, a partial spinner frame) do not count
/// as a response.
pub const INITIAL_DISARM_THRESHOLD_BYTES: usize = 10;

const READ_CHUNK_SIZE: usize = 8192;
const OUTPUT_BUFFER_INITIAL_CAPACITY: usize = 8 * 1024;

/// Which supervision timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Initial,
    Inactivity,
}

/// Terminal outcome of one supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    TimedOut(TimeoutKind),
    Exited,
}

/// Observable state of the resolution guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Running,
    Resolved(Outcome),
}

const STATE_RUNNING: u8 = 0;
const STATE_TIMED_OUT_INITIAL: u8 = 1;
const STATE_TIMED_OUT_INACTIVITY: u8 = 2;
const STATE_EXITED: u8 = 3;

/// Single-transition guard for the timer-vs-exit race.
///
/// Starts `Running`; the first [`ResolutionGuard::resolve`] wins and every
/// later attempt reports `false`, so a timeout kill and the natural process
/// close can never both claim the supervision.
#[derive(Debug)]
pub struct ResolutionGuard(AtomicU8);

impl Default for ResolutionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionGuard {
    pub fn new() -> Self {
        Self(AtomicU8::new(STATE_RUNNING))
    }

    /// Attempt the `Running → outcome` transition. Returns whether this
    /// caller won the race.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let target = match outcome {
            Outcome::TimedOut(TimeoutKind::Initial) => STATE_TIMED_OUT_INITIAL,
            Outcome::TimedOut(TimeoutKind::Inactivity) => STATE_TIMED_OUT_INACTIVITY,
            Outcome::Exited => STATE_EXITED,
        };
        self.0
            .compare_exchange(STATE_RUNNING, target, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn current(&self) -> Resolution {
        match self.0.load(Ordering::Acquire) {
            STATE_TIMED_OUT_INITIAL => Resolution::Resolved(Outcome::TimedOut(TimeoutKind::Initial)),
            STATE_TIMED_OUT_INACTIVITY => {
                Resolution::Resolved(Outcome::TimedOut(TimeoutKind::Inactivity))
            }
            STATE_EXITED => Resolution::Resolved(Outcome::Exited),
            _ => Resolution::Running,
        }
    }
}

/// Run one engine invocation to its terminal outcome.
///
/// Fails with [`Error::Spawn`], [`Error::InitialTimeout`],
/// [`Error::InactivityTimeout`], or [`Error::Process`]. A zero exit with
/// empty output is a valid success carrying empty text and zero usage.
pub async fn supervise(request: InvocationRequest) -> Result<InvocationResult> {
    let started = Instant::now();
    let invocation = request.id;
    debug!(
        %invocation,
        program = %request.program.display(),
        "starting engine supervision"
    );

    // Staged before spawn so the path can appear in the argument list; the
    // NamedTempFile guard removes it on drop on every exit path below.
    let scratch = match request.input_channel {
        InputChannel::ScratchFile => Some(stage_input(&request)?),
        InputChannel::Stdin => None,
    };
    let args = request.build_args(scratch.as_ref().map(|file| file.path()));

    let mut cmd = Command::new(&request.program);
    cmd.args(&args);
    cmd.envs(&request.env);
    if let Some(cwd) = &request.cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdin(match request.input_channel {
        InputChannel::Stdin => Stdio::piped(),
        InputChannel::ScratchFile => Stdio::null(),
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    // New process group so a timeout kill reaches grandchildren too.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(Error::Spawn)?;

    // Deliver the payload and close the channel immediately; no streaming
    // input. The write runs off-loop so a full pipe cannot stall the timers.
    if request.input_channel == InputChannel::Stdin {
        if let Some(mut stdin) = child.stdin.take() {
            let payload = request.prompt.clone().into_bytes();
            tokio::spawn(async move {
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            });
        }
    }

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Spawn(std::io::Error::other("stdout pipe not available")))?;

    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf).await;
        }
        buf
    });

    let guard = ResolutionGuard::new();
    let mut output: Vec<u8> = Vec::with_capacity(OUTPUT_BUFFER_INITIAL_CAPACITY);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    let mut initial_deadline = deadline_after(request.timeouts.time_to_first_byte);
    let mut inactivity_deadline = deadline_after(request.timeouts.inactivity_gap);

    // Chunk phase: accumulate output while both timers race alongside.
    loop {
        tokio::select! {
            read = stdout.read(&mut chunk) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                output.extend_from_slice(&chunk[..n]);
                if initial_deadline.is_some() && n > INITIAL_DISARM_THRESHOLD_BYTES {
                    debug!(%invocation, bytes = n, "initial response observed; first-byte timer disarmed");
                    initial_deadline = None;
                }
                inactivity_deadline = deadline_after(request.timeouts.inactivity_gap);
            }
            _ = wait_until(initial_deadline), if initial_deadline.is_some() => {
                if guard.resolve(Outcome::TimedOut(TimeoutKind::Initial)) {
                    return Err(fail_timeout(TimeoutKind::Initial, &request, &mut child, started).await);
                }
            }
            _ = wait_until(inactivity_deadline), if inactivity_deadline.is_some() => {
                if guard.resolve(Outcome::TimedOut(TimeoutKind::Inactivity)) {
                    return Err(fail_timeout(TimeoutKind::Inactivity, &request, &mut child, started).await);
                }
            }
        }
    }

    // Exit phase: output is closed but the process may linger; the
    // inactivity bound still covers the stretch before exit.
    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,
            _ = wait_until(initial_deadline), if initial_deadline.is_some() => {
                if guard.resolve(Outcome::TimedOut(TimeoutKind::Initial)) {
                    return Err(fail_timeout(TimeoutKind::Initial, &request, &mut child, started).await);
                }
            }
            _ = wait_until(inactivity_deadline), if inactivity_deadline.is_some() => {
                if guard.resolve(Outcome::TimedOut(TimeoutKind::Inactivity)) {
                    return Err(fail_timeout(TimeoutKind::Inactivity, &request, &mut child, started).await);
                }
            }
        }
    };

    let resolved = guard.resolve(Outcome::Exited);
    debug_assert!(resolved, "exit observed after a timeout resolution");

    let exit_code = status.code().unwrap_or(-1);
    if exit_code != 0 {
        let stderr_bytes = stderr_task.await.unwrap_or_default();
        let stderr_text = String::from_utf8_lossy(&stderr_bytes);
        warn!(
            %invocation,
            exit_code,
            elapsed = %format_duration(started.elapsed()),
            "engine exited with failure"
        );
        return Err(Error::process(exit_code, &stderr_text));
    }

    let raw_output = String::from_utf8_lossy(&output).into_owned();
    let outcome = parser::parse(&raw_output, &request.prompt);
    let processing_duration = started.elapsed();
    debug!(
        %invocation,
        elapsed = %format_duration(processing_duration),
        exact_usage = outcome.token_usage.exact,
        "engine supervision complete"
    );

    Ok(InvocationResult {
        id: invocation,
        raw_output,
        extracted_text: outcome.extracted_text,
        token_usage: outcome.token_usage,
        processing_duration,
        exit_code,
    })
}

/// Kill the engine, log, and build the timeout error for `kind`.
async fn fail_timeout(
    kind: TimeoutKind,
    request: &InvocationRequest,
    child: &mut Child,
    started: Instant,
) -> Error {
    warn!(
        invocation = %request.id,
        kind = ?kind,
        elapsed = %format_duration(started.elapsed()),
        "supervision timer fired; killing engine process"
    );
    kill_child_and_group(child).await;
    match kind {
        TimeoutKind::Initial => Error::InitialTimeout(
            limit_duration(request.timeouts.time_to_first_byte),
        ),
        TimeoutKind::Inactivity => Error::InactivityTimeout(
            limit_duration(request.timeouts.inactivity_gap),
        ),
    }
}

fn limit_duration(limit: TimeLimit) -> std::time::Duration {
    // A timer only fires when its bound is finite.
    limit.duration().unwrap_or_default()
}

fn deadline_after(limit: TimeLimit) -> Option<TokioInstant> {
    limit.duration().map(|d| TokioInstant::now() + d)
}

async fn wait_until(deadline: Option<TokioInstant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Stage the prompt to a uniquely-named scratch file.
fn stage_input(request: &InvocationRequest) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("conclave-input-{}-", request.id))
        .suffix(".txt")
        .tempfile()?;
    file.write_all(request.prompt.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Kill the child's whole process group, then reap it.
async fn kill_child_and_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let pid = pid as libc::pid_t;
        let pgid = unsafe { libc::getpgid(pid) };
        if pgid != -1 {
            unsafe { libc::killpg(pgid, libc::SIGKILL) };
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{InputChannel, TimeoutPolicy};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_guard_starts_running() {
        let guard = ResolutionGuard::new();
        assert_eq!(guard.current(), Resolution::Running);
    }

    #[test]
    fn test_guard_accepts_exactly_one_transition() {
        let guard = ResolutionGuard::new();
        assert!(guard.resolve(Outcome::TimedOut(TimeoutKind::Inactivity)));
        assert!(!guard.resolve(Outcome::Exited));
        assert!(!guard.resolve(Outcome::TimedOut(TimeoutKind::Initial)));
        assert_eq!(
            guard.current(),
            Resolution::Resolved(Outcome::TimedOut(TimeoutKind::Inactivity))
        );
    }

    #[test]
    fn test_guard_exit_blocks_timers() {
        let guard = ResolutionGuard::new();
        assert!(guard.resolve(Outcome::Exited));
        assert!(!guard.resolve(Outcome::TimedOut(TimeoutKind::Initial)));
        assert_eq!(guard.current(), Resolution::Resolved(Outcome::Exited));
    }

    #[test]
    fn test_guard_single_winner_under_contention() {
        let guard = std::sync::Arc::new(ResolutionGuard::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let guard = std::sync::Arc::clone(&guard);
                std::thread::spawn(move || {
                    let outcome = if i % 2 == 0 {
                        Outcome::Exited
                    } else {
                        Outcome::TimedOut(TimeoutKind::Inactivity)
                    };
                    guard.resolve(outcome)
                })
            })
            .collect();
        let wins: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_deadline_after_unbounded_is_none() {
        assert!(deadline_after(TimeLimit::Unbounded).is_none());
        assert!(deadline_after(TimeLimit::from_millis(10)).is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_structured_success() {
        let request = InvocationRequest::new("/bin/sh", "")
            .timeouts(TimeoutPolicy::from_millis(5_000, 5_000));
        let script = concat!(
            "printf '%s\\n' '{\"id\":\"0\",\"msg\":{\"type\":\"agent_message\",\"message\":\"forty-two\"}}'\n",
            "printf '%s\\n' '{\"id\":\"0\",\"msg\":{\"type\":\"token_count\",\"info\":{\"last_token_usage\":{\"input_tokens\":12,\"output_tokens\":3,\"total_tokens\":15}}}}'\n",
        );
        let result = supervise_sh(request, script).await.unwrap();

        assert_eq!(result.extracted_text, "forty-two");
        assert!(result.token_usage.exact);
        assert_eq!(result.token_usage.total, 15);
        assert_eq!(result.exit_code, 0);
    }

    /// Run a shell script under supervision, bypassing the engine argument
    /// encoding (sh is the stand-in engine in tests).
    async fn supervise_sh(
        template: InvocationRequest,
        script: &str,
    ) -> crate::Result<InvocationResult> {
        let mut request = template;
        request.program = "/bin/sh".into();
        request.model = None;
        request.bypass_approvals = false;
        request.allowed_operations = None;
        // Encode the script through a scratch file: sh <path>.
        request.input_channel = InputChannel::ScratchFile;
        request.prompt = script.to_string();
        supervise(request).await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_nonzero_exit_carries_stderr_preview() {
        let request = InvocationRequest::new("/bin/sh", "")
            .timeouts(TimeoutPolicy::from_millis(5_000, 5_000));
        let err = supervise_sh(request, "echo boom >&2; exit 3")
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Process { exit_code: 3, ref stderr_preview } if stderr_preview == "boom"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_spawn_failure() {
        let request = InvocationRequest::new("/nonexistent/engine/xyz123", "prompt");
        let err = supervise(request).await.unwrap_err();
        assert_matches!(err, Error::Spawn(_));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_empty_output_is_success() {
        let request = InvocationRequest::new("/bin/sh", "a prompt")
            .timeouts(TimeoutPolicy::from_millis(5_000, 5_000));
        let result = supervise_sh(request, "exit 0").await.unwrap();
        assert_eq!(result.extracted_text, "");
        assert_eq!(result.token_usage.total, 0);
        assert!(!result.token_usage.exact);
        assert_eq!(result.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_stdin_payload_reaches_engine() {
        // cat echoes its stdin, so the payload round-trips through the
        // default input channel.
        let request = InvocationRequest::new("/bin/cat", "payload over stdin")
            .timeouts(TimeoutPolicy::from_millis(5_000, 5_000))
            .input_channel(InputChannel::Stdin);
        let result = supervise(request).await.unwrap();
        assert_eq!(result.extracted_text, "payload over stdin");
        assert!(!result.token_usage.exact);
    }
}
