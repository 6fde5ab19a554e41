//! Ordered command sequences with fail-fast validation.
//!
//! A sequence is a list of `(command, notice)` steps sharing one
//! working-directory context. The context is task-local: `cd` steps move it,
//! shell steps receive it explicitly, and the process-wide current directory
//! is never touched, so concurrent sequences cannot corrupt each other.
//!
//! Shell steps are polled at a fixed interval instead of awaited outright;
//! when the ceiling is hit the child is killed and the run fails with a
//! distinct [`RunError::TimedOut`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::notify::Notifier;

/// Granularity of the child-termination poll loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ceiling on a single shell step, measured from step start.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// One `(command, notice)` unit in an executable sequence.
#[derive(Debug, Clone)]
pub struct CommandStep {
    pub command: String,
    pub notice: String,
}

impl CommandStep {
    pub fn new(command: impl Into<String>, notice: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            notice: notice.into(),
        }
    }

    /// A step with no announcement attached.
    pub fn silent(command: impl Into<String>) -> Self {
        Self::new(command, "")
    }
}

/// Exit code plus captured output of the most recent step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    /// Sentinel value held before any step has run.
    pub fn unset() -> Self {
        Self {
            code: -1,
            stdout: "NOT SET".to_string(),
            stderr: "NOT SET".to_string(),
        }
    }

    pub fn ok(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("command exited with code {code}")]
    Failed { code: i32 },
    #[error("command still running after {}s and was killed", .0.as_secs())]
    TimedOut(Duration),
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("service user {0:?} does not exist")]
    UnknownUser(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Record empty output instead of capturing (for noisy commands).
    pub skip_output: bool,
    /// Do not validate exit codes; the sequence keeps its last result anyway.
    pub ignore_result: bool,
    /// Suppress per-step notices.
    pub silent: bool,
}

pub struct TaskRunner {
    notifier: Arc<dyn Notifier>,
    service_user: Option<String>,
    base_dir: PathBuf,
    timeout: Duration,
    result: ExecutionResult,
}

impl TaskRunner {
    pub fn new(notifier: Arc<dyn Notifier>, base_dir: PathBuf, service_user: Option<String>) -> Self {
        Self {
            notifier,
            service_user,
            base_dir,
            timeout: DEFAULT_TIMEOUT,
            result: ExecutionResult::unset(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute the steps in order. On a validation failure the notifier gets
    /// the failure statement, code, and message, the remaining steps are
    /// skipped, and the error is returned; the failed result stays readable
    /// through [`TaskRunner::last_result`].
    pub async fn run(&mut self, sequence: &[CommandStep], opts: RunOptions) -> Result<(), RunError> {
        let mut cwd = self.base_dir.clone();

        for step in sequence {
            if !step.notice.is_empty() && !opts.silent {
                self.notifier.send(&step.notice).await;
            }

            if let Some(target) = parse_chdir(&step.command) {
                match enter_directory(&cwd, target).await {
                    Ok(next) => cwd = next,
                    Err(message) => {
                        self.result = ExecutionResult {
                            code: 1,
                            stdout: String::new(),
                            stderr: message,
                        };
                        if !opts.ignore_result {
                            self.validate().await?;
                        }
                        return Ok(());
                    }
                }
                continue;
            }

            debug!(command = %step.command, cwd = %cwd.display(), "running step");
            match self.spawn_step(&step.command, &cwd, opts.skip_output).await {
                Ok(result) => self.result = result,
                Err(err) => {
                    self.result = ExecutionResult {
                        code: -1,
                        stdout: String::new(),
                        stderr: err.to_string(),
                    };
                    return Err(err);
                }
            }

            if !opts.ignore_result {
                self.validate().await?;
            }
        }

        Ok(())
    }

    /// True iff the last step exited cleanly.
    pub fn check_result(&self) -> bool {
        self.result.ok()
    }

    /// Misnamed but load-bearing: returns the *stdout* field of the last
    /// result, not stderr. Existing callers read captured command output
    /// (branch names, listings) through this accessor, so the mapping is
    /// kept as-is.
    pub fn get_error(&self) -> &str {
        &self.result.stdout
    }

    pub fn last_result(&self) -> &ExecutionResult {
        &self.result
    }

    async fn validate(&self) -> Result<(), RunError> {
        if self.result.ok() {
            return Ok(());
        }

        self.notifier
            .send("An error occurred during command execution!")
            .await;
        self.notifier
            .send(&format!("Error code: {}", self.result.code))
            .await;
        self.notifier
            .send(&format!("Error message: {}", self.result.stderr))
            .await;

        Err(RunError::Failed {
            code: self.result.code,
        })
    }

    async fn spawn_step(
        &self,
        command: &str,
        cwd: &Path,
        skip_output: bool,
    ) -> Result<ExecutionResult, RunError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null());

        if skip_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        #[cfg(unix)]
        if let Some(user) = &self.service_user {
            let (uid, gid) = resolve_user(user)?;
            cmd.uid(uid).gid(gid);
        }

        let mut child = cmd.spawn().map_err(RunError::Spawn)?;

        // Drain both pipes concurrently with the poll loop; a full pipe
        // buffer would otherwise stall the child forever.
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(read_pipe(pipe)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(read_pipe(pipe)));

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(RunError::Spawn)? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(RunError::TimedOut(self.timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        Ok(ExecutionResult {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

/// Returns the target of a `cd <path>` step, or None for shell steps.
fn parse_chdir(command: &str) -> Option<&str> {
    let rest = command.trim().strip_prefix("cd")?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Resolve a chdir target against the task-local directory and make sure it
/// exists. Returns the error text recorded on failure.
async fn enter_directory(cwd: &Path, target: &str) -> Result<PathBuf, String> {
    let next = if Path::new(target).is_absolute() {
        PathBuf::from(target)
    } else {
        cwd.join(target)
    };

    match tokio::fs::metadata(&next).await {
        Ok(meta) if meta.is_dir() => Ok(next),
        Ok(_) => Err(format!(
            "An error occurred when trying to access path: {} is not a directory",
            next.display()
        )),
        Err(err) => Err(format!(
            "An error occurred when trying to access path: {}: {err}",
            next.display()
        )),
    }
}

async fn read_pipe<R: AsyncReadExt + Unpin>(mut pipe: R) -> String {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
fn resolve_user(name: &str) -> Result<(u32, u32), RunError> {
    let user = nix::unistd::User::from_name(name)
        .ok()
        .flatten()
        .ok_or_else(|| RunError::UnknownUser(name.to_string()))?;
    Ok((user.uid.as_raw(), user.gid.as_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_result_before_any_run() {
        let unset = ExecutionResult::unset();
        assert_eq!(unset.code, -1);
        assert_eq!(unset.stdout, "NOT SET");
        assert_eq!(unset.stderr, "NOT SET");
        assert!(!unset.ok());
    }

    #[test]
    fn chdir_convention_requires_prefix_and_space() {
        assert_eq!(parse_chdir("cd /srv/game"), Some("/srv/game"));
        assert_eq!(parse_chdir("  cd sub/dir "), Some("sub/dir"));
        assert_eq!(parse_chdir("cdecho"), None);
        assert_eq!(parse_chdir("echo cd /tmp"), None);
        assert_eq!(parse_chdir("cd"), None);
    }
}
