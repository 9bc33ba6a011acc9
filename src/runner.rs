//! Process launch, stream capture and exactly-once completion

use crate::invocation::{self, ConfPlacement, InvocationConfig, InvocationError};
use crate::outcome::{ProcessEnd, RunOutcome};
use crate::platform::{Platform, PlatformError};
use crate::staging::{self, IoFlags, StagingError};
use crate::toolchain::{ResolvedTool, Toolchain};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runner errors.
///
/// These cover "could not attempt the invocation"; a process that runs and
/// fails is not an error here; it surfaces through [`RunOutcome::has_error`].
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("failed to spawn {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        source: io::Error,
    },

    #[error("failed to capture child stdio")]
    Capture,

    #[error("invocation ended without delivering a result")]
    Delivery,

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// First-writer-wins claim across racing completion notifications.
///
/// Exactly one caller of [`try_claim`](Self::try_claim) observes `true`, no
/// matter how many notifications arrive or in which order.
#[derive(Debug, Default)]
struct CompletionLatch {
    claimed: AtomicBool,
}

impl CompletionLatch {
    fn new() -> Self {
        Self::default()
    }

    fn try_claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }
}

/// Resolves the exit/close notification race to a single completion reason
#[derive(Debug, Default)]
struct CompletionGuard {
    latch: CompletionLatch,
    first: Option<ProcessEnd>,
}

impl CompletionGuard {
    fn new() -> Self {
        Self::default()
    }

    /// Record a notification; only the first one sets the reason
    fn notify(&mut self, reason: ProcessEnd) {
        if self.latch.try_claim() {
            self.first = Some(reason);
        } else {
            debug!("ignoring late completion notification: {:?}", reason);
        }
    }

    fn reason(&self) -> ProcessEnd {
        self.first.clone().unwrap_or(ProcessEnd::Closed)
    }
}

/// Live handle to a non-blocking invocation.
///
/// Dropping the handle does not stop the child; killing is the caller's
/// call, via [`kill`](Self::kill).
#[derive(Debug)]
pub struct RunHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    driver: JoinHandle<()>,
}

impl RunHandle {
    /// OS process id, while the child is alive
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the driver to kill the child; completion still fires normally
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait until the completion callback has run
    pub async fn wait(self) {
        let _ = self.driver.await;
    }
}

struct Prepared {
    platform: Platform,
    tool: ResolvedTool,
    argv: Vec<String>,
}

/// Executes a bundled tool with normalized arguments and staged inputs
pub struct ToolRunner {
    toolchain: Toolchain,
    io_flags: IoFlags,
}

impl ToolRunner {
    /// Create a runner for a toolchain
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            toolchain,
            io_flags: IoFlags::default(),
        }
    }

    /// Replace the I/O-designating flag sets
    pub fn with_io_flags(mut self, io_flags: IoFlags) -> Self {
        self.io_flags = io_flags;
        self
    }

    /// Normalize, resolve and stage one invocation.
    ///
    /// Resolution runs before staging, so an unsupported platform fails
    /// with no filesystem side effects.
    fn prepare(&self, config: &InvocationConfig) -> Result<Prepared, RunnerError> {
        let platform = Platform::current();
        let tokens = invocation::normalize(config.params.clone(), self.toolchain.name())?;
        let tool = self.toolchain.resolve(platform)?;
        let staged = staging::stage(tokens, &config.path, &self.io_flags)?;

        let mut argv = staged.argv;
        if config.append_conf {
            if let Some(conf) = &tool.conf {
                let pair = [conf.flag.clone(), conf.path.to_string_lossy().into_owned()];
                match config.conf_placement {
                    ConfPlacement::Append => argv.extend(pair),
                    ConfPlacement::Prepend => {
                        argv.splice(0..0, pair);
                    }
                }
            }
        }

        if config.debug_mode {
            debug!(
                "prepared {} with argv {:?}, {} staged buffer(s)",
                tool.path.display(),
                argv,
                staged.artifacts.len()
            );
        }

        Ok(Prepared {
            platform,
            tool,
            argv,
        })
    }

    fn build_command(&self, prepared: &Prepared, config: &InvocationConfig) -> std::process::Command {
        let mut cmd = if config.use_shell {
            let line = shell_line(&prepared.tool.path, &prepared.argv);
            let mut cmd = std::process::Command::new(prepared.platform.default_shell());
            cmd.arg(prepared.platform.shell_arg());
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                cmd.raw_arg(line);
            }
            #[cfg(not(windows))]
            {
                cmd.arg(line);
            }
            cmd
        } else {
            let mut cmd = std::process::Command::new(&prepared.tool.path);
            cmd.args(&prepared.argv);
            cmd
        };

        // Inherited environment plus configured extras
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run the invocation synchronously, occupying the calling thread until
    /// the child terminates with fully drained streams.
    pub fn run_blocking(&self, config: &InvocationConfig) -> Result<RunOutcome, RunnerError> {
        let prepared = self.prepare(config)?;
        let mut cmd = self.build_command(&prepared, config);

        info!(
            "running {} with {} args (blocking)",
            prepared.tool.path.display(),
            prepared.argv.len()
        );

        let output = cmd.output().map_err(|source| RunnerError::Spawn {
            executable: prepared.tool.path.clone(),
            source,
        })?;

        let end = completion_of(&output.status, ProcessEnd::Exited);
        Ok(RunOutcome::from_captured(
            &output.stdout,
            &output.stderr,
            output.status.code(),
            end,
            config.beautify,
        ))
    }

    /// Launch the invocation without blocking.
    ///
    /// The completion callback fires exactly once, with a fully drained
    /// result, whichever termination notification arrives first. A spawn
    /// failure is returned here, synchronously; no callback fires for it.
    pub fn spawn<F>(
        &self,
        config: &InvocationConfig,
        on_complete: F,
    ) -> Result<RunHandle, RunnerError>
    where
        F: FnOnce(RunOutcome) + Send + 'static,
    {
        let prepared = self.prepare(config)?;
        let mut cmd = tokio::process::Command::from(self.build_command(&prepared, config));

        info!(
            "running {} with {} args (non-blocking)",
            prepared.tool.path.display(),
            prepared.argv.len()
        );

        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            executable: prepared.tool.path.clone(),
            source,
        })?;

        let pid = child.id();
        let stdout = child.stdout.take().ok_or(RunnerError::Capture)?;
        let stderr = child.stderr.take().ok_or(RunnerError::Capture)?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let beautify = config.beautify;
        let driver = tokio::spawn(drive(child, stdout, stderr, beautify, kill_rx, on_complete));

        Ok(RunHandle {
            pid,
            kill_tx: Some(kill_tx),
            driver,
        })
    }

    /// Launch without blocking and await the result.
    ///
    /// When the config carries a timeout, expiry kills the child and fails
    /// with [`RunnerError::Timeout`].
    pub async fn execute(&self, config: &InvocationConfig) -> Result<RunOutcome, RunnerError> {
        let (tx, rx) = oneshot::channel();
        let mut handle = self.spawn(config, move |outcome| {
            let _ = tx.send(outcome);
        })?;

        match config.timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), rx).await {
                Ok(result) => result.map_err(|_| RunnerError::Delivery),
                Err(_) => {
                    warn!("invocation exceeded {}s, killing child", secs);
                    handle.kill();
                    Err(RunnerError::Timeout(secs))
                }
            },
            None => rx.await.map_err(|_| RunnerError::Delivery),
        }
    }
}

/// Drive one spawned child to completion and deliver the result once.
///
/// Two notifications race: the process status becoming available
/// ("exited") and both capture streams draining ("closed"). The guard
/// claims the first; the outcome is built only after both have happened,
/// so partial reads never reach the caller.
async fn drive<F>(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    beautify: bool,
    mut kill_rx: oneshot::Receiver<()>,
    on_complete: F,
) where
    F: FnOnce(RunOutcome) + Send + 'static,
{
    let out_task = tokio::spawn(drain(stdout));
    let err_task = tokio::spawn(drain(stderr));
    let drained = async move {
        let out = out_task.await.unwrap_or_default();
        let err = err_task.await.unwrap_or_default();
        (out, err)
    };
    tokio::pin!(drained);

    let mut guard = CompletionGuard::new();
    let mut exit_status: Option<ExitStatus> = None;
    let mut wait_error: Option<io::Error> = None;
    let mut status_done = false;
    let mut captured: Option<(Vec<u8>, Vec<u8>)> = None;
    let mut kill_seen = false;
    let mut kill_requested = false;

    while !status_done || captured.is_none() {
        tokio::select! {
            result = child.wait(), if !status_done => {
                status_done = true;
                match result {
                    Ok(status) => {
                        guard.notify(ProcessEnd::Exited);
                        exit_status = Some(status);
                    }
                    Err(error) => {
                        // Captured, not fatal: completion still arrives
                        // through the drain notification.
                        warn!("error while waiting on child: {}", error);
                        wait_error = Some(error);
                    }
                }
            }
            bufs = &mut drained, if captured.is_none() => {
                guard.notify(ProcessEnd::Closed);
                captured = Some(bufs);
            }
            result = &mut kill_rx, if !kill_seen => {
                kill_seen = true;
                kill_requested = result.is_ok();
            }
        }

        if kill_requested {
            kill_requested = false;
            debug!("kill requested by caller");
            let _ = child.start_kill();
        }
    }

    let (stdout_bytes, mut stderr_bytes) = captured.unwrap_or_default();
    if let Some(error) = wait_error {
        stderr_bytes.extend_from_slice(format!("process error: {error}").as_bytes());
    }

    let (code, end) = match exit_status {
        Some(status) => (status.code(), completion_of(&status, guard.reason())),
        None => (None, guard.reason()),
    };

    on_complete(RunOutcome::from_captured(
        &stdout_bytes,
        &stderr_bytes,
        code,
        end,
        beautify,
    ));
}

/// Accumulate raw byte chunks in arrival order until EOF.
///
/// No upper bound is enforced; a talkative child grows the buffer without
/// limit (documented).
async fn drain<R>(mut stream: R) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    buf
}

/// Naive space-join of the command line for shell execution
fn shell_line(program: &Path, argv: &[String]) -> String {
    let mut line = program.display().to_string();
    for arg in argv {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

fn completion_of(status: &ExitStatus, first: ProcessEnd) -> ProcessEnd {
    match signal_of(status) {
        Some(signal) => ProcessEnd::Signaled(signal),
        None => first,
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|signal| format!("signal {signal}"))
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_latch_claims_exactly_once() {
        let latch = CompletionLatch::new();
        assert!(latch.try_claim());
        assert!(!latch.try_claim());
        assert!(!latch.try_claim());
    }

    #[test]
    fn test_latch_single_winner_across_threads() {
        let latch = Arc::new(CompletionLatch::new());

        let claims: Vec<bool> = (0..8)
            .map(|_| {
                let latch = Arc::clone(&latch);
                std::thread::spawn(move || latch.try_claim())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(claims.iter().filter(|&&claimed| claimed).count(), 1);
    }

    #[test]
    fn test_guard_exit_notification_first() {
        let mut guard = CompletionGuard::new();
        guard.notify(ProcessEnd::Exited);
        guard.notify(ProcessEnd::Closed);

        assert_eq!(guard.reason(), ProcessEnd::Exited);
    }

    #[test]
    fn test_guard_close_notification_first() {
        let mut guard = CompletionGuard::new();
        guard.notify(ProcessEnd::Closed);
        guard.notify(ProcessEnd::Exited);

        assert_eq!(guard.reason(), ProcessEnd::Closed);
    }

    #[test]
    fn test_guard_repeated_notifications_ignored() {
        let mut guard = CompletionGuard::new();
        guard.notify(ProcessEnd::Exited);
        guard.notify(ProcessEnd::Exited);
        guard.notify(ProcessEnd::Closed);

        assert_eq!(guard.reason(), ProcessEnd::Exited);
    }

    #[test]
    fn test_shell_line_join() {
        let line = shell_line(
            Path::new("/opt/bundle/bin/win/tool.exe"),
            &["req".to_string(), "-new".to_string()],
        );

        assert_eq!(line, "/opt/bundle/bin/win/tool.exe req -new");
    }
}
