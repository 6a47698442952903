//! Credential validators for the host operating system

pub mod linux;
pub mod whoami;
pub mod windows;

pub use linux::LinuxCredentialValidator;
pub use windows::WindowsCredentialValidator;

use crate::auth::AuthResult;
use crate::command::{CommandRunner, SystemShell};
use crate::config::AuthConfig;
use crate::platform::{Platform, PlatformError};
use secrecy::SecretString;

/// Validator for the host OS, chosen once at startup
#[derive(Debug)]
pub enum HostValidator<R = SystemShell> {
    Linux(LinuxCredentialValidator<R>),
    Windows(WindowsCredentialValidator<R>),
}

impl HostValidator<SystemShell> {
    /// Pick the validator for the running OS
    pub fn detect(config: &AuthConfig) -> Result<Self, PlatformError> {
        Self::for_platform(Platform::current(), config)
    }

    pub fn for_platform(platform: Platform, config: &AuthConfig) -> Result<Self, PlatformError> {
        match platform {
            Platform::Linux => Ok(HostValidator::Linux(LinuxCredentialValidator::new(config))),
            Platform::Windows => Ok(HostValidator::Windows(WindowsCredentialValidator::new(
                config,
            ))),
            other => Err(other.unsupported()),
        }
    }

    /// Same as [`HostValidator::detect`], with every helper command bound to
    /// `shell`'s cancellation scope
    pub fn with_shell(shell: SystemShell, config: &AuthConfig) -> Result<Self, PlatformError> {
        match Platform::current() {
            Platform::Linux => Ok(HostValidator::Linux(LinuxCredentialValidator::with_runner(
                shell, config,
            ))),
            Platform::Windows => Ok(HostValidator::Windows(
                WindowsCredentialValidator::with_runner(shell),
            )),
            other => Err(other.unsupported()),
        }
    }
}

impl<R: CommandRunner> HostValidator<R> {
    /// Short name of the active variant
    pub fn kind(&self) -> &'static str {
        match self {
            HostValidator::Linux(_) => "linux-shadow",
            HostValidator::Windows(_) => "windows-whoami",
        }
    }

    /// Check a username and password against the OS account database.
    ///
    /// Every credential failure is an unauthenticated [`AuthResult`], never an
    /// error.
    pub async fn validate(&self, username: &str, password: &SecretString) -> AuthResult {
        match self {
            HostValidator::Linux(validator) => validator.validate(username, password).await,
            HostValidator::Windows(validator) => validator.validate(username, password).await,
        }
    }
}
