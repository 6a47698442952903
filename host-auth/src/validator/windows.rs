//! Windows credential validation by running `whoami` as the user

use super::whoami::parse_whoami_output;
use crate::auth::AuthResult;
use crate::command::{CommandRunner, SystemShell};
use crate::config::AuthConfig;
use crate::runner::Impersonation;
use secrecy::SecretString;
use tracing::info;

/// Lists the caller's groups and privileges as CSV tables
pub const WHOAMI_COMMAND: &str = "whoami /groups /priv /fo csv";

/// Validates by starting `whoami` under the supplied credentials; the OS
/// logon is the password check, the listing supplies the memberships.
#[derive(Debug)]
pub struct WindowsCredentialValidator<R = SystemShell> {
    runner: R,
}

impl WindowsCredentialValidator<SystemShell> {
    pub fn new(config: &AuthConfig) -> Self {
        Self::with_runner(SystemShell::new(config))
    }
}

impl<R: CommandRunner> WindowsCredentialValidator<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    pub async fn validate(&self, username: &str, password: &SecretString) -> AuthResult {
        let login = Impersonation::new(username, password.clone());
        let output = self.runner.run(WHOAMI_COMMAND, Some(login)).await;

        if !output.success() {
            info!(
                username,
                exit_code = ?output.outcome.exit_code(),
                "Credentials rejected: whoami did not run"
            );
            return AuthResult::denied(username);
        }

        let listing = parse_whoami_output(output.stdout.iter().map(String::as_str));
        info!(
            username,
            groups = listing.groups.len(),
            privileges = listing.privileges.len(),
            "Credentials accepted"
        );

        AuthResult::granted(username, listing.groups, listing.privileges)
    }
}
