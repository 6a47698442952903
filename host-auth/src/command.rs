//! Shell command execution seam used by the credential validators

use crate::config::AuthConfig;
use crate::platform::Platform;
use crate::runner::{Impersonation, ProcessOutcome, ProcessRunner};
use crate::shell::ShellCommand;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Captured result of one shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub outcome: ProcessOutcome,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.outcome.success()
    }

    /// Standard output joined back into text, one `\n` per line
    pub fn stdout_text(&self) -> String {
        self.stdout.iter().map(|line| format!("{}\n", line)).collect()
    }
}

/// Runs a raw command string through the host shell
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, impersonate: Option<Impersonation>) -> CommandOutput;
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    async fn run(&self, command: &str, impersonate: Option<Impersonation>) -> CommandOutput {
        (**self).run(command, impersonate).await
    }
}

/// [`CommandRunner`] backed by the platform shell and [`ProcessRunner`]
#[derive(Debug, Clone)]
pub struct SystemShell {
    runner: ProcessRunner,
    platform: Platform,
    shell: Option<String>,
    working_dir: Option<String>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl SystemShell {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            runner: ProcessRunner::new(),
            platform: Platform::current(),
            shell: config.shell.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.command_timeout(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop in-flight and future commands when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl CommandRunner for SystemShell {
    async fn run(&self, command: &str, impersonate: Option<Impersonation>) -> CommandOutput {
        let mut builder = ShellCommand::new(command).platform(self.platform);
        if let Some(ref shell) = self.shell {
            builder = builder.shell(shell.clone());
        }

        let mut spec = match builder.build() {
            Ok(spec) => spec,
            Err(e) => {
                error!("Cannot build shell command: {}", e);
                return CommandOutput {
                    outcome: ProcessOutcome::FailedToStart,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                };
            }
        };
        spec.working_dir = self.working_dir.clone();
        spec.impersonate = impersonate;
        spec.timeout = self.timeout;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let outcome = self
            .runner
            .run_until(spec, Some(&mut stdout), Some(&mut stderr), &self.cancel)
            .await;

        debug!(
            ?outcome,
            stdout_lines = stdout.len(),
            stderr_lines = stderr.len(),
            "Shell command finished"
        );

        CommandOutput {
            outcome,
            stdout,
            stderr,
        }
    }
}
