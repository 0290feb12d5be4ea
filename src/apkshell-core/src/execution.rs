//! Supervised execution of external tools.
//!
//! Both the instrumentor and the NDK build run as one all-or-nothing child
//! process:
//! - stdout/stderr are inherited, so the operator sees them verbatim
//! - the child is polled against a deadline
//! - on timeout the whole process tree is killed and reaped
//!
//! On Unix the child leads its own process group so that grandchildren
//! (make, clang, ...) die with it.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// How often the supervisor polls the child.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a supervised process.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Whether the process exited with code 0
    pub success: bool,
    /// Exit code (if exited normally)
    pub exit_code: Option<i32>,
    /// Signal number (if killed by signal)
    pub signal: Option<i32>,
    /// Whether the supervisor killed the process for exceeding its deadline
    pub timed_out: bool,
    /// Duration of execution
    pub duration: Duration,
}

impl ExecutionResult {
    fn from_status(status: ExitStatus, duration: Duration) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            success: status.success(),
            exit_code: status.code(),
            signal,
            timed_out: false,
            duration,
        }
    }

    /// One-line description of a failed run.
    pub fn describe(&self) -> String {
        if self.timed_out {
            format!("timed out after {:.1}s", self.duration.as_secs_f32())
        } else if let Some(code) = self.exit_code {
            format!("exited with code {}", code)
        } else if let Some(signal) = self.signal {
            format!("killed by signal {}", signal)
        } else {
            "terminated unexpectedly".to_string()
        }
    }
}

/// Run `program` with `args` in `cwd`, killing it once `timeout` elapses.
///
/// # Errors
/// Returns error only if the process cannot be spawned or waited on; a
/// non-zero exit or a timeout is reported through [`ExecutionResult`].
pub fn run_supervised(
    program: &Path,
    args: &[String],
    cwd: &Path,
    env: &[(String, String)],
    timeout: Duration,
) -> Result<ExecutionResult> {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(cwd);
    for (key, value) in env {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    debug!("Spawning {} {:?} (timeout {:?})", program.display(), args, timeout);

    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .context(format!("Failed to spawn: {}", program.display()))?;

    loop {
        if let Some(status) = child
            .try_wait()
            .context(format!("Failed to wait for: {}", program.display()))?
        {
            return Ok(ExecutionResult::from_status(status, start.elapsed()));
        }

        if start.elapsed() > timeout {
            warn!(
                "{} exceeded {:?}, killing process tree (pid={})",
                program.display(),
                timeout,
                child.id()
            );
            kill_tree(&mut child);
            let _ = child.wait();
            return Ok(ExecutionResult {
                success: false,
                exit_code: None,
                signal: Some(9),
                timed_out: true,
                duration: start.elapsed(),
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    // The child was spawned as its own group leader, so its pid is the pgid
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        warn!("Failed to kill process group {}: {}", pgid, e);
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}
