//! `tokio::process` implementation of [`ProcessControl`]

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::{ExitStatus, ProcessControl, ProcessHandle};
use crate::config::DaemonConfig;
use crate::error::{StartError, StopError};
use crate::tail::LogLevel;

struct RunningDaemon {
    handle: ProcessHandle,
    child: Child,
}

/// Launches and terminates the i2pd binary described by a [`DaemonConfig`].
///
/// Holds at most one child. The child is spawned with `kill_on_drop`, so
/// dropping the controller never leaves an orphaned daemon behind.
pub struct ProcessController {
    config: DaemonConfig,
    daemon: Mutex<Option<RunningDaemon>>,
    generation: AtomicU64,
}

impl ProcessController {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            daemon: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Handle of the process currently held, if any
    pub async fn current(&self) -> Option<ProcessHandle> {
        self.daemon.lock().await.as_ref().map(|d| d.handle)
    }

    fn spawn(&self) -> Result<Child, StartError> {
        let binary = self
            .config
            .resolve_binary()
            .ok_or_else(|| StartError::BinaryMissing(self.config.binary_path.clone()))?;

        for dir in [Some(self.config.data_dir.as_path()), self.config.log_path.parent()]
            .into_iter()
            .flatten()
            .filter(|d| !d.as_os_str().is_empty())
        {
            std::fs::create_dir_all(dir).map_err(StartError::LaunchFailed)?;
        }

        let args = self.config.command_args();
        info!(binary = %binary.display(), ?args, "Starting i2pd");

        Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(StartError::LaunchFailed)
    }
}

#[async_trait]
impl ProcessControl for ProcessController {
    fn probe_installed(&self) -> bool {
        self.config.resolve_binary().is_some()
    }

    async fn start(&self) -> Result<ProcessHandle, StartError> {
        let mut daemon = self.daemon.lock().await;

        if let Some(running) = daemon.as_mut() {
            match running.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(
                        pid = running.handle.pid,
                        status = %ExitStatus::from(status),
                        "Reaped previous daemon before start"
                    );
                }
                _ => {
                    return Err(StartError::AlreadyRunning {
                        pid: running.handle.pid,
                    });
                }
            }
        }

        let mut child = self.spawn()?;
        let Some(pid) = child.id() else {
            // Exited and reaped between spawn and id; nothing to supervise
            return Err(StartError::LaunchFailed(std::io::Error::other(
                "daemon exited immediately",
            )));
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let handle = ProcessHandle {
            pid,
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        };
        *daemon = Some(RunningDaemon { handle, child });

        info!(pid, generation = handle.generation, "i2pd started");
        Ok(handle)
    }

    async fn stop(&self, handle: ProcessHandle) -> Result<ExitStatus, StopError> {
        let mut running = {
            let mut daemon = self.daemon.lock().await;
            match daemon.take() {
                Some(running) if running.handle == handle => running,
                other => {
                    *daemon = other;
                    return Err(StopError::NotRunning);
                }
            }
        };

        match wait_with_escalation(
            &mut running.child,
            self.config.grace_period,
            self.config.stop_timeout,
        )
        .await
        {
            Ok(status) => {
                info!(pid = handle.pid, %status, "i2pd stopped");
                Ok(status)
            }
            Err(e) => {
                error!(pid = handle.pid, error = %e, "Failed to stop i2pd");
                // Keep it so a later exit poll can still reap it
                *self.daemon.lock().await = Some(running);
                Err(e)
            }
        }
    }

    async fn poll_exit_status(&self, handle: ProcessHandle) -> Option<ExitStatus> {
        let mut daemon = self.daemon.lock().await;
        let running = daemon.as_mut().filter(|d| d.handle == handle)?;

        match running.child.try_wait() {
            Ok(Some(status)) => {
                let status = ExitStatus::from(status);
                debug!(pid = handle.pid, %status, "Observed daemon exit");
                *daemon = None;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(pid = handle.pid, error = %e, "Failed to check daemon status");
                None
            }
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL and wait for the rest of
/// `timeout`.
async fn wait_with_escalation(
    child: &mut Child,
    grace: Duration,
    timeout: Duration,
) -> Result<ExitStatus, StopError> {
    if let Ok(Some(status)) = child.try_wait() {
        return Ok(status.into());
    }

    request_termination(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => return Ok(status.into()),
        Ok(Err(e)) => return Err(StopError::Wait(e)),
        Err(_) => {
            warn!(
                grace = ?grace,
                "i2pd ignored termination request, killing"
            );
        }
    }

    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Kill failed, process may have exited");
    }

    let remaining = timeout.saturating_sub(grace);
    match tokio::time::timeout(remaining, child.wait()).await {
        Ok(Ok(status)) => Ok(status.into()),
        Ok(Err(e)) => Err(StopError::Wait(e)),
        Err(_) => Err(StopError::TimedOut(timeout)),
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The pid belongs to
    // a child we have not reaped yet, so it cannot have been reused.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        debug!(
            pid,
            error = %std::io::Error::last_os_error(),
            "SIGTERM failed"
        );
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    let _ = child.start_kill();
}

/// Forward daemon console output into tracing under the `i2pd` target,
/// keeping the level the daemon printed.
async fn forward_output<R>(stream: R, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match LogLevel::detect(&line) {
                Some(LogLevel::Critical | LogLevel::Error) => {
                    error!(target: "i2pd", stream = name, "{}", line)
                }
                Some(LogLevel::Warn) => warn!(target: "i2pd", stream = name, "{}", line),
                Some(LogLevel::Info) => info!(target: "i2pd", stream = name, "{}", line),
                _ => debug!(target: "i2pd", stream = name, "{}", line),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(stream = name, error = %e, "Error reading i2pd output");
                break;
            }
        }
    }
    trace!(stream = name, "i2pd output closed");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("i2pd");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn controller(dir: &TempDir, body: &str) -> ProcessController {
        let binary = write_script(dir.path(), body);
        ProcessController::new(
            DaemonConfig::default()
                .with_binary_path(binary)
                .with_data_dir(dir.path().join("data"))
                .with_log_path(dir.path().join("log").join("i2pd.log"))
                .with_stop_timing(Duration::from_millis(300), Duration::from_secs(3)),
        )
    }

    #[test]
    fn probe_reports_missing_binary() {
        let dir = TempDir::new().unwrap();
        let controller = ProcessController::new(
            DaemonConfig::default().with_binary_path(dir.path().join("missing")),
        );
        assert!(!controller.probe_installed());
    }

    #[tokio::test]
    async fn start_missing_binary_fails() {
        let dir = TempDir::new().unwrap();
        let controller = ProcessController::new(
            DaemonConfig::default().with_binary_path(dir.path().join("missing")),
        );
        let result = controller.start().await;
        assert!(matches!(result, Err(StartError::BinaryMissing(_))));
    }

    #[tokio::test]
    async fn start_then_stop_gracefully() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir, "exec sleep 30");
        assert!(controller.probe_installed());

        let handle = controller.start().await.unwrap();
        assert_eq!(handle.generation, 1);
        assert!(dir.path().join("data").is_dir());
        assert!(dir.path().join("log").is_dir());
        assert_eq!(controller.current().await, Some(handle));

        let status = controller.stop(handle).await.unwrap();
        assert_eq!(status.signal, Some(libc::SIGTERM));
        assert!(controller.current().await.is_none());
    }

    #[tokio::test]
    async fn second_start_is_already_running() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir, "exec sleep 30");

        let handle = controller.start().await.unwrap();
        let second = controller.start().await;
        assert!(matches!(second, Err(StartError::AlreadyRunning { pid }) if pid == handle.pid));

        controller.stop(handle).await.unwrap();
    }

    #[tokio::test]
    async fn stop_escalates_when_term_ignored() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir, "trap '' TERM\nwhile true; do sleep 0.05; done");

        let handle = controller.start().await.unwrap();
        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = controller.stop(handle).await.unwrap();
        assert_eq!(status.signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn stop_with_stale_handle_is_not_running() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir, "exec sleep 30");

        let handle = controller.start().await.unwrap();
        let stale = ProcessHandle {
            pid: handle.pid,
            generation: handle.generation + 1,
        };
        assert!(matches!(
            controller.stop(stale).await,
            Err(StopError::NotRunning)
        ));

        controller.stop(handle).await.unwrap();
    }

    #[tokio::test]
    async fn poll_reports_exit_once() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir, "exit 3");

        let handle = controller.start().await.unwrap();
        let mut status = None;
        for _ in 0..100 {
            status = controller.poll_exit_status(handle).await;
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(status.map(|s| s.code), Some(Some(3)));
        assert!(controller.poll_exit_status(handle).await.is_none());
        assert!(matches!(
            controller.stop(handle).await,
            Err(StopError::NotRunning)
        ));
    }
}
