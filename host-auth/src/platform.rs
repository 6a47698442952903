//! Platform abstraction for OS-specific shell and validator selection

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Platform errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Operating system {0} not supported")]
    Unsupported(String),
}

/// Platform identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Linux,
    MacOS,
    Windows,
    Unknown,
}

impl Platform {
    /// Get current platform
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Unknown
        }
    }

    /// Check if platform is Unix-like
    pub fn is_unix(&self) -> bool {
        matches!(self, Platform::Linux | Platform::MacOS)
    }

    /// Check if platform is Windows
    pub fn is_windows(&self) -> bool {
        matches!(self, Platform::Windows)
    }

    /// Get platform name as string
    pub fn name(&self) -> &str {
        match self {
            Platform::Linux => "linux",
            Platform::MacOS => "macos",
            Platform::Windows => "windows",
            Platform::Unknown => "unknown",
        }
    }

    /// Default shell for platform
    pub fn default_shell(&self) -> Result<&'static str, PlatformError> {
        match self {
            Platform::Linux | Platform::MacOS => Ok("/bin/sh"),
            Platform::Windows => Ok("cmd.exe"),
            Platform::Unknown => Err(self.unsupported()),
        }
    }

    /// Flag that makes the default shell run a single command string
    pub fn shell_flag(&self) -> Result<&'static str, PlatformError> {
        match self {
            Platform::Linux | Platform::MacOS => Ok("-c"),
            Platform::Windows => Ok("/c"),
            Platform::Unknown => Err(self.unsupported()),
        }
    }

    /// External tools the platform's credential validator shells out to
    pub fn required_tools(&self) -> &'static [&'static str] {
        match self {
            Platform::Linux => &["grep", "mkpasswd", "groups"],
            Platform::Windows => &["whoami"],
            Platform::MacOS | Platform::Unknown => &[],
        }
    }

    pub(crate) fn unsupported(&self) -> PlatformError {
        PlatformError::Unsupported(format!("{} ({})", self.name(), std::env::consts::OS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let platform = Platform::current();
        assert_ne!(platform, Platform::Unknown);
    }

    #[test]
    fn test_platform_properties() {
        let platform = Platform::current();

        if cfg!(unix) {
            assert!(platform.is_unix());
            assert_eq!(platform.default_shell(), Ok("/bin/sh"));
            assert_eq!(platform.shell_flag(), Ok("-c"));
        }

        if cfg!(windows) {
            assert!(platform.is_windows());
            assert_eq!(platform.default_shell(), Ok("cmd.exe"));
            assert_eq!(platform.shell_flag(), Ok("/c"));
        }
    }

    #[test]
    fn test_unknown_platform_is_fatal() {
        let err = Platform::Unknown.default_shell().unwrap_err();
        assert!(matches!(err, PlatformError::Unsupported(_)));
        assert!(Platform::Unknown.shell_flag().is_err());
    }

    #[test]
    fn test_required_tools() {
        assert_eq!(Platform::Linux.required_tools(), &["grep", "mkpasswd", "groups"]);
        assert_eq!(Platform::Windows.required_tools(), &["whoami"]);
        assert!(Platform::MacOS.required_tools().is_empty());
    }
}
