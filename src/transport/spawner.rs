//! Worker process spawner and supervisor.
//!
//! Spawns the worker with:
//! - `kill_on_drop(true)` so an orphaned handle never leaks a process.
//! - `env_clear()` + an allowlist so host secrets do not leak into the
//!   worker's environment; extra variables are injected explicitly.
//! - stderr forwarded line-by-line to `tracing` at `DEBUG`.
//!
//! [`supervise`] owns the [`Child`] afterwards: it reports the exit status,
//! and on transport close terminates the worker (SIGTERM first on Unix, kill
//! after the grace period).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Environment variables inherited by the worker by default.
///
/// Every other variable from the host environment is stripped via
/// `env_clear()` before the child is launched.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Configuration for spawning a worker process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Worker binary.
    pub command: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Directory the worker starts in.
    pub working_dir: Option<PathBuf>,
    /// Host variables copied into the worker environment when set.
    pub inherit_env: Vec<String>,
    /// Variables set explicitly.
    pub env: HashMap<String, String>,
    /// SIGTERM → kill escalation delay, and stdout drain window after exit.
    pub exit_grace: Duration,
}

impl SpawnConfig {
    /// Spawn settings for `command` with the default allowlist and grace.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            inherit_env: ALLOWED_ENV_VARS.iter().map(|&v| v.to_owned()).collect(),
            env: HashMap::new(),
            exit_grace: Duration::from_secs(2),
        }
    }
}

/// Stdio handles of a freshly spawned worker.
#[derive(Debug)]
pub struct WorkerProcess {
    /// Child process handle; hand it to [`supervise`].
    pub child: Child,
    /// Worker stdin.
    pub stdin: ChildStdin,
    /// Worker stdout.
    pub stdout: ChildStdout,
    /// Worker stderr.
    pub stderr: Option<ChildStderr>,
}

/// Spawn the worker process with piped stdio.
///
/// # Errors
///
/// - `AppError::Transport("failed to spawn worker: …")` — OS spawn failure.
/// - `AppError::Transport("failed to capture worker …")` — a pipe is missing.
pub fn spawn_worker(config: &SpawnConfig, session_id: &str) -> Result<WorkerProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    cmd.env_clear();
    for key in &config.inherit_env {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.envs(&config.env);

    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Transport(format!("failed to spawn worker: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture worker stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture worker stdout".into()))?;
    let stderr = child.stderr.take();

    info!(
        session_id,
        command = %config.command,
        pid = child.id(),
        "worker spawned"
    );

    Ok(WorkerProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Forward worker stderr lines to `tracing` until EOF.
pub async fn forward_stderr(session_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(session_id, line = %line, "worker stderr"),
            Ok(None) => break,
            Err(e) => {
                debug!(session_id, error = %e, "worker stderr read failed");
                break;
            }
        }
    }
}

/// Own the worker until it exits or the transport is closed.
///
/// - Worker exits on its own: the status is logged, then after `grace` the
///   `cancel` token fires. A worker that leaves a grandchild holding its
///   stdout open therefore still produces end-of-stream for readers.
/// - `cancel` fires first: the worker is terminated (SIGTERM on Unix,
///   escalating to kill after `grace`).
pub async fn supervise(
    session_id: String,
    mut child: Child,
    cancel: CancellationToken,
    grace: Duration,
) -> Option<ExitStatus> {
    tokio::select! {
        result = child.wait() => {
            let status = match result {
                Ok(status) => {
                    info!(session_id, status = %describe_exit(status), "worker exited");
                    Some(status)
                }
                Err(err) => {
                    warn!(session_id, %err, "error waiting for worker process");
                    None
                }
            };

            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    debug!(session_id, "worker exit drain window elapsed, closing transport");
                    cancel.cancel();
                }
            }
            status
        }
        () = cancel.cancelled() => terminate(&session_id, &mut child, grace).await,
    }
}

/// Terminate a still-running worker.
async fn terminate(session_id: &str, child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if request_exit(child) {
        if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
            info!(session_id, status = %describe_exit(status), "worker terminated");
            return Some(status);
        }
        debug!(session_id, "worker ignored SIGTERM, killing");
    }

    if let Err(err) = child.kill().await {
        warn!(session_id, %err, "failed to kill worker");
        return None;
    }
    let status = child.wait().await.ok();
    info!(session_id, "worker killed");
    status
}

/// Ask the worker to exit gracefully. Returns `false` when no signal was sent.
#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

/// Human-readable exit status.
#[must_use]
pub fn describe_exit(status: ExitStatus) -> String {
    if status.success() {
        return "exited normally (code 0)".to_owned();
    }
    status.code().map_or_else(
        || "terminated by signal".to_owned(),
        |c| format!("exited with code {c}"),
    )
}
