//! Host Auth - credential validation against the OS account database
//!
//! This crate checks a username and password with the host's own tools and
//! reports the account's groups and privileges:
//! - Shell command construction per platform
//! - Process execution with impersonation, timeout and live output capture
//! - Linux: shadow file hash regeneration and group lookup
//! - Windows: impersonated `whoami` with CSV parsing

pub mod auth;
pub mod command;
pub mod config;
pub mod platform;
pub mod runner;
pub mod shell;
pub mod validator;

pub use auth::{AuthResult, Privilege};
pub use command::{CommandOutput, CommandRunner, SystemShell};
pub use config::{AuthConfig, ConfigError};
pub use platform::{Platform, PlatformError};
pub use runner::{
    Impersonation, LineSink, ProcessOutcome, ProcessRunner, ProcessSpec, START_FAILED_EXIT_CODE,
};
pub use shell::{quote_command, ShellCommand};
pub use validator::{HostValidator, LinuxCredentialValidator, WindowsCredentialValidator};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging to stderr, filtered by `RUST_LOG`
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "host_auth=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
