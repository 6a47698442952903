//! Process runner with impersonation, timeout and live output capture
//!
//! A [`ProcessRunner`] starts one child process per [`ProcessSpec`], drains its
//! standard output and standard error line by line into caller-supplied
//! [`LineSink`]s while waiting for it to exit, and reports a [`ProcessOutcome`].
//! Exit wait and both drains run concurrently against the same cancellation
//! scope, so a child that fills both pipe buffers cannot deadlock the caller.

#[cfg(windows)]
mod job;
#[cfg(windows)]
mod logon;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zeroize::Zeroize;

/// Exit code reported when the process could not be started at all.
///
/// Never produced by a child that actually ran; callers must not read it as
/// an OS exit status.
pub const START_FAILED_EXIT_CODE: i32 = -1;

/// Alternate account a process is started under.
///
/// Only Windows can log a process on with a password; elsewhere a spec that
/// carries one fails to start.
pub struct Impersonation {
    user: String,
    password: SecretString,
}

impl Impersonation {
    pub fn new(user: impl Into<String>, password: SecretString) -> Self {
        Self {
            user: user.into(),
            password,
        }
    }

    /// Account name, optionally `DOMAIN\user` on Windows
    pub fn user(&self) -> &str {
        &self.user
    }

    #[cfg_attr(not(windows), allow(dead_code))]
    pub(crate) fn password(&self) -> &SecretString {
        &self.password
    }
}

impl fmt::Debug for Impersonation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Impersonation")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Single process invocation
#[derive(Debug)]
pub struct ProcessSpec {
    /// Program to start
    pub program: String,

    /// Arguments
    pub args: Vec<String>,

    /// Append `args` to the command line untouched instead of quoting each one.
    /// Only meaningful on Windows, where the child parses its own command line.
    pub verbatim_args: bool,

    /// Working directory
    pub working_dir: Option<String>,

    /// Run under another account
    pub impersonate: Option<Impersonation>,

    /// Bound on the whole invocation
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            verbatim_args: false,
            working_dir: None,
            impersonate: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn impersonate(mut self, login: Impersonation) -> Self {
        self.impersonate = Some(login);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Drop for ProcessSpec {
    fn drop(&mut self) {
        // Shell command text may embed a password.
        self.args.zeroize();
    }
}

/// How a process invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessOutcome {
    /// The process exited; `None` when it was terminated without an exit code
    Exited(Option<i32>),

    /// The process could not be started (bad program, bad credentials)
    FailedToStart,

    /// Timeout or cancellation fired before the process finished
    Cancelled,
}

impl ProcessOutcome {
    /// Exit code, with [`START_FAILED_EXIT_CODE`] for a start failure
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessOutcome::Exited(code) => *code,
            ProcessOutcome::FailedToStart => Some(START_FAILED_EXIT_CODE),
            ProcessOutcome::Cancelled => None,
        }
    }

    /// Exited normally with code zero
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited(Some(0)))
    }
}

/// Receiver of output lines, one call per line with the terminator stripped
pub trait LineSink: Send {
    fn write_line(&mut self, line: &str);
}

impl LineSink for Vec<String> {
    fn write_line(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

impl LineSink for String {
    fn write_line(&mut self, line: &str) {
        self.push_str(line);
        self.push('\n');
    }
}

impl LineSink for UnboundedSender<String> {
    fn write_line(&mut self, line: &str) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.send(line.to_string());
    }
}

type Pipe = Box<dyn AsyncRead + Send + Unpin>;

/// Started child, either through tokio or through a Windows logon.
///
/// Killing it takes down everything the child started: on Unix the child
/// leads its own process group, on Windows it runs inside a job object.
enum ChildProcess {
    Tokio {
        child: tokio::process::Child,
        #[cfg(windows)]
        job: job::KillOnCloseJob,
    },
    #[cfg(windows)]
    Logon(logon::LogonChild),
}

impl ChildProcess {
    fn take_stdout(&mut self) -> Option<Pipe> {
        match self {
            ChildProcess::Tokio { child, .. } => child.stdout.take().map(|p| Box::new(p) as Pipe),
            #[cfg(windows)]
            ChildProcess::Logon(child) => child.take_stdout(),
        }
    }

    fn take_stderr(&mut self) -> Option<Pipe> {
        match self {
            ChildProcess::Tokio { child, .. } => child.stderr.take().map(|p| Box::new(p) as Pipe),
            #[cfg(windows)]
            ChildProcess::Logon(child) => child.take_stderr(),
        }
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        match self {
            ChildProcess::Tokio { child, .. } => child.wait().await.map(|status| status.code()),
            #[cfg(windows)]
            ChildProcess::Logon(child) => child.wait().await,
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            ChildProcess::Tokio { child } => {
                let group = child.id().map_or(Ok(()), kill_process_group);
                child.kill().await?;
                group
            }
            #[cfg(windows)]
            ChildProcess::Tokio { child, job } => {
                job.terminate()?;
                child.wait().await.map(|_| ())
            }
            #[cfg(not(any(unix, windows)))]
            ChildProcess::Tokio { child } => child.kill().await,
            #[cfg(windows)]
            ChildProcess::Logon(child) => child.kill().await,
        }
    }
}

#[cfg(unix)]
impl Drop for ChildProcess {
    fn drop(&mut self) {
        // `id()` is `None` once the child has been reaped, so a recycled
        // process group is never signalled.
        let ChildProcess::Tokio { child } = self;
        if let Some(pid) = child.id() {
            let _ = kill_process_group(pid);
        }
    }
}

/// SIGKILL the process group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: u32) -> io::Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Process runner
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run a process to completion or until its timeout fires
    pub async fn run(
        &self,
        spec: ProcessSpec,
        stdout: Option<&mut dyn LineSink>,
        stderr: Option<&mut dyn LineSink>,
    ) -> ProcessOutcome {
        self.run_until(spec, stdout, stderr, &CancellationToken::new())
            .await
    }

    /// Run a process, also stopping when `cancel` fires.
    ///
    /// A stream is only redirected when a sink is supplied for it; otherwise
    /// the child inherits it. The call returns once the process has exited and
    /// both drains have seen end of stream, or as soon as the timeout or
    /// `cancel` fires, in which case the child and everything it started
    /// are killed.
    pub async fn run_until(
        &self,
        spec: ProcessSpec,
        stdout: Option<&mut dyn LineSink>,
        stderr: Option<&mut dyn LineSink>,
        cancel: &CancellationToken,
    ) -> ProcessOutcome {
        let start_time = Instant::now();

        let mut child = match spawn(&spec, stdout.is_some(), stderr.is_some()) {
            Ok(child) => child,
            Err(e) => {
                debug!(program = %spec.program, error = %e, "Process failed to start");
                return ProcessOutcome::FailedToStart;
            }
        };

        debug!(
            program = %spec.program,
            args = spec.args.len(),
            impersonated = spec.impersonate.is_some(),
            "Process started"
        );

        let stdout_pipe = child.take_stdout();
        let stderr_pipe = child.take_stderr();

        let finished = {
            let work = async {
                let (status, out_lines, err_lines) = tokio::join!(
                    child.wait(),
                    drain_lines(stdout_pipe, stdout),
                    drain_lines(stderr_pipe, stderr),
                );
                debug!(stdout_lines = out_lines, stderr_lines = err_lines, "Streams drained");
                status
            };

            tokio::select! {
                status = work => Some(status),
                _ = cancel.cancelled() => None,
                _ = deadline(spec.timeout) => None,
            }
        };

        let duration_ms = start_time.elapsed().as_millis() as u64;

        match finished {
            Some(Ok(code)) => {
                debug!(program = %spec.program, exit_code = ?code, duration_ms, "Process exited");
                ProcessOutcome::Exited(code)
            }
            Some(Err(e)) => {
                warn!(program = %spec.program, error = %e, "Waiting for process failed");
                terminate(&mut child, &spec.program).await;
                ProcessOutcome::Cancelled
            }
            None => {
                warn!(program = %spec.program, duration_ms, "Process cancelled before exit");
                terminate(&mut child, &spec.program).await;
                ProcessOutcome::Cancelled
            }
        }
    }
}

async fn terminate(child: &mut ChildProcess, program: &str) {
    if let Err(e) = child.kill().await {
        // Already gone is the common case here.
        debug!(program = %program, error = %e, "Kill after cancellation failed");
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

/// Feed every line of `pipe` to `sink` until end of stream; returns the line count
async fn drain_lines(pipe: Option<Pipe>, sink: Option<&mut dyn LineSink>) -> usize {
    let (Some(pipe), Some(sink)) = (pipe, sink) else {
        return 0;
    };

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                sink.write_line(&decode_line(&buf));
                count += 1;
            }
            Err(e) => {
                debug!(error = %e, "Stream read failed");
                break;
            }
        }
    }

    count
}

/// Strip the line terminator and decode, replacing invalid UTF-8
fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line)
}

fn spawn(spec: &ProcessSpec, capture_stdout: bool, capture_stderr: bool) -> io::Result<ChildProcess> {
    #[cfg(windows)]
    if let Some(login) = &spec.impersonate {
        return logon::spawn(spec, login, capture_stdout, capture_stderr).map(ChildProcess::Logon);
    }

    let mut cmd = TokioCommand::new(&spec.program);

    #[cfg(windows)]
    {
        if spec.verbatim_args {
            for arg in &spec.args {
                cmd.raw_arg(arg);
            }
        } else {
            cmd.args(&spec.args);
        }
        cmd.creation_flags(winapi::um::winbase::CREATE_NO_WINDOW);
    }

    #[cfg(not(windows))]
    {
        // Logging on with a password is a Windows facility only.
        if let Some(login) = &spec.impersonate {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("Cannot start a process as {} on this platform", login.user()),
            ));
        }
        cmd.args(&spec.args);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    if let Some(ref wd) = spec.working_dir {
        cmd.current_dir(wd);
    }

    cmd.stdin(Stdio::null())
        .stdout(if capture_stdout { Stdio::piped() } else { Stdio::inherit() })
        .stderr(if capture_stderr { Stdio::piped() } else { Stdio::inherit() })
        .kill_on_drop(true);

    let child = cmd.spawn()?;

    #[cfg(windows)]
    let job = {
        let job = job::KillOnCloseJob::new()?;
        if let Some(handle) = child.raw_handle() {
            job.assign(handle as winapi::um::winnt::HANDLE)?;
        }
        job
    };

    Ok(ChildProcess::Tokio {
        child,
        #[cfg(windows)]
        job,
    })
}
