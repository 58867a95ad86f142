//! Invocation construction and child process launch
//!
//! [`Launcher`] binds a [`SandboxSpec`] to the enforcement binary's
//! location and hands out ready-to-spawn commands. The spawned process
//! inherits the caller's environment and standard streams unless the
//! caller redirects them; cancellation is an opt-in binding that kills
//! the child's process group when the token fires.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{CordonError, Result, SandboxSpec};

/// Default enforcement binary location
pub const DEFAULT_ENFORCER_PATH: &str = "/usr/bin/cordon-enforcer";

/// Get the enforcement binary path from the `CORDON_ENFORCER` env var or
/// the system default
pub fn default_enforcer_path() -> PathBuf {
    std::env::var("CORDON_ENFORCER")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ENFORCER_PATH))
}

/// Launches target programs under the enforcement binary
///
/// The binary's location is explicit constructor configuration rather
/// than process-wide state, so tests can point a launcher at a fake
/// binary. Launching only reads the spec; one finished spec can back any
/// number of invocations.
#[derive(Debug, Clone)]
pub struct Launcher {
    enforcer: PathBuf,
}

impl Launcher {
    /// Create a launcher for the enforcement binary at `enforcer`
    pub fn new(enforcer: impl Into<PathBuf>) -> Self {
        Self {
            enforcer: enforcer.into(),
        }
    }

    /// Location of the enforcement binary
    #[must_use]
    pub fn enforcer(&self) -> &Path {
        &self.enforcer
    }

    /// Build a command that runs `program` under the enforcement binary
    /// until natural completion
    ///
    /// The command is ready to spawn. It inherits environment and
    /// standard streams and is placed in its own process group; the
    /// child does not outlive a dropped handle.
    pub fn command<S>(
        &self,
        spec: &SandboxSpec,
        program: impl AsRef<OsStr>,
        args: impl IntoIterator<Item = S>,
    ) -> Command
    where
        S: AsRef<OsStr>,
    {
        let argv = spec.build_arguments(program, args);

        tracing::debug!(
            enforcer = %self.enforcer.display(),
            args = ?argv,
            "prepared sandbox invocation"
        );

        let mut command = Command::new(&self.enforcer);
        command.args(&argv);
        // Own process group, so a cancellation kill reaches every process
        // the enforcement binary forks
        command.process_group(0);
        command.kill_on_drop(true);
        command
    }

    /// Like [`command`](Self::command), but bound to a cancellation token
    ///
    /// The child is sent SIGKILL as soon as the token fires, whether that
    /// happens before or during the wait.
    pub fn cancellable<S>(
        &self,
        spec: &SandboxSpec,
        program: impl AsRef<OsStr>,
        args: impl IntoIterator<Item = S>,
        cancel: CancellationToken,
    ) -> CancellableCommand
    where
        S: AsRef<OsStr>,
    {
        CancellableCommand {
            command: self.command(spec, program, args),
            enforcer: self.enforcer.clone(),
            cancel,
        }
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new(default_enforcer_path())
    }
}

/// A sandbox invocation bound to a cancellation token
#[derive(Debug)]
pub struct CancellableCommand {
    command: Command,
    enforcer: PathBuf,
    cancel: CancellationToken,
}

impl CancellableCommand {
    /// Underlying command, for stream or working-directory setup before
    /// the spawn
    pub fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }

    /// Spawn the enforcement binary
    ///
    /// A failure here means no child process exists; it is reported
    /// distinctly from any runtime failure of the sandboxed program.
    pub fn spawn(self) -> Result<CancellableChild> {
        let Self {
            mut command,
            enforcer,
            cancel,
        } = self;

        let child = command
            .spawn()
            .map_err(|source| CordonError::Spawn { enforcer, source })?;

        Ok(CancellableChild { child, cancel })
    }

    /// Spawn with piped stdout/stderr and collect output until exit or
    /// cancellation
    pub async fn output(mut self) -> Result<Output> {
        self.command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.spawn()?.wait_with_output().await
    }

    /// Spawn with inherited streams and wait until exit or cancellation
    pub async fn status(self) -> Result<ExitStatus> {
        let mut child = self.spawn()?;
        child.wait().await
    }
}

/// A running sandbox bound to a cancellation token
///
/// Dropping the handle kills the enforcement binary, so the child never
/// outlives its owner.
#[derive(Debug)]
pub struct CancellableChild {
    child: Child,
    cancel: CancellationToken,
}

impl CancellableChild {
    /// OS pid of the enforcement binary, while it is running
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for natural exit or cancellation
    ///
    /// On cancellation the process group is killed and the returned
    /// status reflects the forced termination; a non-zero exit is
    /// reported through the status, never as an error.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let guard = kill_on_cancel(self.cancel.clone(), self.child.id());
        let status = self.child.wait().await;
        guard.abort();
        Ok(status?)
    }

    /// Collect captured output until natural exit or cancellation
    ///
    /// Output the child wrote before a cancellation kill landed is
    /// preserved.
    pub async fn wait_with_output(self) -> Result<Output> {
        let Self { child, cancel } = self;
        let guard = kill_on_cancel(cancel, child.id());
        let output = child.wait_with_output().await;
        guard.abort();
        Ok(output?)
    }
}

/// Watcher that kills the child's process group when the token fires
///
/// Aborted by the waiters once the child has been reaped.
fn kill_on_cancel(cancel: CancellationToken, pid: Option<u32>) -> JoinHandle<()> {
    tokio::spawn(async move {
        cancel.cancelled().await;
        if let Some(pid) = pid {
            kill_group(pid);
        }
    })
}

/// Send SIGKILL to the process group rooted at `pid`
fn kill_group(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };

    // SAFETY: kill(2) with a negated pid signals the process group the
    // child was placed in at spawn time
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    fn empty_args() -> std::iter::Empty<&'static str> {
        std::iter::empty()
    }

    /// Enforcement binary stand-in that ignores its arguments, reports
    /// readiness on stdout, and hangs.
    fn hang_script(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("hang.sh");
        std::fs::write(&path, "#!/bin/sh\necho started\nsleep 30\n").unwrap();

        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();

        path
    }

    #[tokio::test]
    async fn command_targets_enforcer_with_serialized_argv() {
        let spec = SandboxSpec::new("/srv/box").env("A=1");
        let launcher = Launcher::new("/opt/enforcer");
        let command = launcher.command(&spec, "./prog", ["x"]);

        let std_command = command.as_std();
        assert_eq!(std_command.get_program(), "/opt/enforcer");

        let args: Vec<_> = std_command.get_args().collect();
        assert_eq!(args, ["/srv/box", "--env", "A=1", "--", "./prog", "x"]);
    }

    #[tokio::test]
    async fn fake_enforcer_receives_discrete_tokens() {
        let spec = SandboxSpec::new("/srv/box");
        let output = Launcher::new("/bin/echo")
            .cancellable(&spec, "./echo", ["\"TEST\""], CancellationToken::new())
            .output()
            .await
            .unwrap();

        assert!(output.status.success());
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            "/srv/box -- ./echo \"TEST\"\n"
        );
    }

    #[tokio::test]
    async fn status_waits_for_natural_exit() {
        let spec = SandboxSpec::new("/srv/box");
        let status = Launcher::new("/bin/true")
            .cancellable(&spec, "./prog", empty_args(), CancellationToken::new())
            .status()
            .await
            .unwrap();

        assert!(status.success());
    }

    #[tokio::test]
    async fn spawn_failure_is_distinct_from_runtime_failure() {
        let spec = SandboxSpec::new("/srv/box");
        let err = Launcher::new("/nonexistent/enforcer")
            .cancellable(&spec, "./prog", empty_args(), CancellationToken::new())
            .output()
            .await
            .unwrap_err();

        assert!(matches!(err, CordonError::Spawn { .. }));
    }

    #[tokio::test]
    async fn cancellation_kills_before_natural_completion() {
        let dir = tempfile::tempdir().unwrap();
        let fake = hang_script(&dir);

        let cancel = CancellationToken::new();
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            deadline.cancel();
        });

        let spec = SandboxSpec::new("/srv/box");
        let start = Instant::now();
        let output = Launcher::new(&fake)
            .cancellable(&spec, "./prog", empty_args(), cancel)
            .output()
            .await
            .unwrap();

        // killed long before the script's 30s sleep, keeping what it
        // already wrote
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "started\n");
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let fake = hang_script(&dir);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let spec = SandboxSpec::new("/srv/box");
        let start = Instant::now();
        let output = Launcher::new(&fake)
            .cancellable(&spec, "./prog", empty_args(), cancel)
            .output()
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!output.status.success());
    }
}
