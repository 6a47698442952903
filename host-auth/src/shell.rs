//! Shell command construction for the host platform

use crate::platform::{Platform, PlatformError};
use crate::runner::ProcessSpec;

/// Wrap a command in double quotes, backslash-escaping embedded double quotes.
///
/// No other character is escaped.
pub fn quote_command(command: &str) -> String {
    format!("\"{}\"", command.replace('"', "\\\""))
}

/// Builds the [`ProcessSpec`] that runs a raw command string through a shell
#[derive(Debug, Clone)]
pub struct ShellCommand<'a> {
    command: &'a str,
    shell: Option<String>,
    platform: Platform,
}

impl<'a> ShellCommand<'a> {
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            shell: None,
            platform: Platform::current(),
        }
    }

    /// Use this shell instead of the platform default
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Target a platform other than the host
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Shell program that will be started
    pub fn program(&self) -> Result<String, PlatformError> {
        let default_shell = self.platform.default_shell()?;
        Ok(self.shell.clone().unwrap_or_else(|| default_shell.to_string()))
    }

    /// Argument string as a command line: the shell flag followed by the
    /// quoted command, e.g. `-c "echo \"hi\""`
    pub fn command_line(&self) -> Result<String, PlatformError> {
        let flag = self.platform.shell_flag()?;
        Ok(format!("{} {}", flag, quote_command(self.command)))
    }

    /// Build the process spec.
    ///
    /// On Windows the quoted command is appended to `cmd.exe`'s command line
    /// verbatim. Unix shells receive their arguments as a vector, so the
    /// command goes to `-c` as a single argument, which is what the quoted
    /// command line decodes to.
    pub fn build(&self) -> Result<ProcessSpec, PlatformError> {
        let program = self.program()?;
        let flag = self.platform.shell_flag()?;

        let mut spec = ProcessSpec::new(program).arg(flag);
        if self.platform.is_windows() {
            spec = spec.arg(quote_command(self.command));
            spec.verbatim_args = true;
        } else {
            spec = spec.arg(self.command);
        }

        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_command() {
        assert_eq!(quote_command("echo hi"), "\"echo hi\"");
        assert_eq!(quote_command("echo \"hi\""), "\"echo \\\"hi\\\"\"");
        assert_eq!(quote_command("grep '^a:' f"), "\"grep '^a:' f\"");
    }

    #[test]
    fn test_unix_build() {
        let builder = ShellCommand::new("echo \"hi\"").platform(Platform::Linux);
        let spec = builder.build().unwrap();

        assert_eq!(spec.program, "/bin/sh");
        assert_eq!(spec.args, vec!["-c", "echo \"hi\""]);
        assert!(!spec.verbatim_args);
        assert_eq!(builder.command_line().unwrap(), "-c \"echo \\\"hi\\\"\"");
    }

    #[test]
    fn test_windows_build() {
        let builder = ShellCommand::new("whoami /groups /priv /fo csv").platform(Platform::Windows);
        let spec = builder.build().unwrap();

        assert_eq!(spec.program, "cmd.exe");
        assert_eq!(spec.args, vec!["/c", "\"whoami /groups /priv /fo csv\""]);
        assert!(spec.verbatim_args);
        assert_eq!(
            builder.command_line().unwrap(),
            "/c \"whoami /groups /priv /fo csv\""
        );
    }

    #[test]
    fn test_shell_override() {
        let spec = ShellCommand::new("true")
            .platform(Platform::Linux)
            .shell("/bin/bash")
            .build()
            .unwrap();

        assert_eq!(spec.program, "/bin/bash");
        assert_eq!(spec.args[0], "-c");
    }

    #[test]
    fn test_unknown_platform_fails_fast() {
        let result = ShellCommand::new("true").platform(Platform::Unknown).build();
        assert!(matches!(result, Err(PlatformError::Unsupported(_))));

        let result = ShellCommand::new("true")
            .platform(Platform::Unknown)
            .shell("/bin/sh")
            .build();
        assert!(result.is_err());
    }
}
