//! Linux credential validation against the shadow password file
//!
//! The stored crypt(3) hash is looked up with `grep`, regenerated from the
//! supplied password with `mkpasswd` and compared; on a match the account's
//! groups are read with `groups`. Every step is a separate shell command run
//! to completion before the next one starts.

use crate::auth::AuthResult;
use crate::command::{CommandRunner, SystemShell};
use crate::config::AuthConfig;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Why a validation attempt was turned down
#[derive(Error, Debug, Clone, PartialEq, Eq)]
enum Denial {
    #[error("no shadow entry")]
    NoShadowEntry,

    #[error("shadow entry is not in crypt format")]
    MalformedShadowEntry,

    #[error("unsupported hash scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("hash generation failed")]
    HashToolFailed,

    #[error("password mismatch")]
    Mismatch,

    #[error("group lookup failed")]
    GroupLookupFailed,
}

/// Hash scheme and the parameters needed to regenerate a hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptScheme {
    /// `$6$[rounds=N$]salt$hash`
    Sha512 { rounds: Option<String>, salt: String },
    /// `$y$params$salt$hash`; `setting` is `$y$params$salt`
    Yescrypt { setting: String },
}

/// Encrypted-password field of a shadow line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowEntry {
    pub encrypted: String,
    pub scheme: CryptScheme,
}

/// Replace `'` with `\'` for interpolation between single quotes.
///
/// This is not a complete shell escape: inside single quotes the backslash is
/// literal, so a quote in the input still ends the quoted word.
pub fn escape_single_quotes(value: &str) -> String {
    value.replace('\'', "\\'")
}

/// Parse the `grep` match for a user into its crypt scheme
fn parse_shadow_line(line: &str) -> Result<ShadowEntry, Denial> {
    let encrypted = line.split(':').nth(1).ok_or(Denial::MalformedShadowEntry)?;

    let parts: Vec<&str> = encrypted.split('$').collect();
    if parts.len() < 2 || !parts[0].is_empty() {
        return Err(Denial::MalformedShadowEntry);
    }

    let scheme = match parts[1] {
        "6" => {
            let (rounds, salt) = match parts.get(2).and_then(|p| p.strip_prefix("rounds=")) {
                Some(rounds) => (Some(rounds.to_string()), parts.get(3)),
                None => (None, parts.get(2)),
            };
            let min_parts = if rounds.is_some() { 5 } else { 4 };
            if parts.len() < min_parts {
                return Err(Denial::MalformedShadowEntry);
            }
            let salt = salt.ok_or(Denial::MalformedShadowEntry)?.to_string();
            CryptScheme::Sha512 { rounds, salt }
        }
        "y" => {
            if parts.len() < 5 {
                return Err(Denial::MalformedShadowEntry);
            }
            CryptScheme::Yescrypt {
                setting: format!("$y${}${}", parts[2], parts[3]),
            }
        }
        other => return Err(Denial::UnsupportedScheme(other.to_string())),
    };

    Ok(ShadowEntry {
        encrypted: encrypted.to_string(),
        scheme,
    })
}

/// Groups from `groups <user>` output: `<user> : <group> <group> ...`
pub fn parse_groups_output(username: &str, output: &str) -> Option<Vec<String>> {
    let tokens: Vec<&str> = output.split_whitespace().collect();

    if tokens.len() < 3 || tokens[0] != username {
        return None;
    }

    Some(tokens[2..].iter().map(|group| group.to_string()).collect())
}

/// Validates against the shadow password file
#[derive(Debug)]
pub struct LinuxCredentialValidator<R = SystemShell> {
    runner: R,
    shadow_file: String,
    hash_tool: String,
}

impl LinuxCredentialValidator<SystemShell> {
    pub fn new(config: &AuthConfig) -> Self {
        Self::with_runner(SystemShell::new(config), config)
    }
}

impl<R: CommandRunner> LinuxCredentialValidator<R> {
    pub fn with_runner(runner: R, config: &AuthConfig) -> Self {
        Self {
            runner,
            shadow_file: config.shadow_file.clone(),
            hash_tool: config.hash_tool.clone(),
        }
    }

    pub async fn validate(&self, username: &str, password: &SecretString) -> AuthResult {
        match self.check(username, password).await {
            Ok(groups) => {
                info!(username, groups = groups.len(), "Credentials accepted");
                AuthResult::granted(username, groups, Vec::new())
            }
            Err(denial) => {
                info!(username, reason = %denial, "Credentials rejected");
                AuthResult::denied(username)
            }
        }
    }

    async fn check(&self, username: &str, password: &SecretString) -> Result<Vec<String>, Denial> {
        let entry = self.shadow_entry(username).await?;
        let generated = self.generate_hash(&entry.scheme, password).await?;

        if generated.trim() != entry.encrypted.trim() {
            return Err(Denial::Mismatch);
        }

        self.groups(username).await
    }

    async fn shadow_entry(&self, username: &str) -> Result<ShadowEntry, Denial> {
        let command = format!(
            "grep '^{}:' {}",
            escape_single_quotes(username),
            self.shadow_file
        );
        let output = self.runner.run(&command, None).await;
        if !output.success() {
            return Err(Denial::NoShadowEntry);
        }

        let line = output.stdout.first().ok_or(Denial::NoShadowEntry)?;
        let entry = parse_shadow_line(line)?;
        debug!(username, scheme = scheme_name(&entry.scheme), "Shadow entry found");
        Ok(entry)
    }

    async fn generate_hash(
        &self,
        scheme: &CryptScheme,
        password: &SecretString,
    ) -> Result<Zeroizing<String>, Denial> {
        let password = Zeroizing::new(escape_single_quotes(password.expose_secret()));

        let command = Zeroizing::new(match scheme {
            CryptScheme::Sha512 {
                rounds: Some(rounds),
                salt,
            } => format!(
                "{} -m sha-512 -R {} '{}' '{}'",
                self.hash_tool, rounds, *password, salt
            ),
            CryptScheme::Sha512 { rounds: None, salt } => {
                format!("{} -m sha-512 '{}' '{}'", self.hash_tool, *password, salt)
            }
            CryptScheme::Yescrypt { setting } => {
                format!("{} '{}' '{}'", self.hash_tool, *password, setting)
            }
        });

        let output = self.runner.run(&command, None).await;
        if !output.success() {
            return Err(Denial::HashToolFailed);
        }

        Ok(Zeroizing::new(output.stdout_text()))
    }

    async fn groups(&self, username: &str) -> Result<Vec<String>, Denial> {
        let command = format!("groups '{}'", escape_single_quotes(username));
        let output = self.runner.run(&command, None).await;
        if !output.success() {
            return Err(Denial::GroupLookupFailed);
        }

        parse_groups_output(username, &output.stdout_text()).ok_or(Denial::GroupLookupFailed)
    }
}

fn scheme_name(scheme: &CryptScheme) -> &'static str {
    match scheme {
        CryptScheme::Sha512 { .. } => "sha-512",
        CryptScheme::Yescrypt { .. } => "yescrypt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockCommandRunner};
    use crate::runner::ProcessOutcome;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    fn exited(code: i32, stdout: &[&str]) -> CommandOutput {
        CommandOutput {
            outcome: ProcessOutcome::Exited(Some(code)),
            stdout: stdout.iter().map(|s| s.to_string()).collect(),
            stderr: Vec::new(),
        }
    }

    /// Stub host: alice has `$6$abcd$HASH` and password `right`
    fn stub_host() -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|command, _| {
            if command == "grep '^alice:' /etc/shadow" {
                exited(0, &["alice:$6$abcd$HASH:19000:0:99999:7:::"])
            } else if command.starts_with("grep ") {
                exited(1, &[])
            } else if command == "mkpasswd -m sha-512 'right' 'abcd'" {
                exited(0, &["$6$abcd$HASH"])
            } else if command.starts_with("mkpasswd ") {
                exited(0, &["$6$abcd$OTHER"])
            } else if command == "groups 'alice'" {
                exited(0, &["alice : wheel docker"])
            } else {
                exited(127, &[])
            }
        });
        runner
    }

    #[test]
    fn test_parse_sha512_entry() {
        let entry = parse_shadow_line("alice:$6$abcd$HASH:19000:0:99999:7:::").unwrap();
        assert_eq!(entry.encrypted, "$6$abcd$HASH");
        assert_eq!(
            entry.scheme,
            CryptScheme::Sha512 {
                rounds: None,
                salt: "abcd".to_string()
            }
        );
    }

    #[test]
    fn test_parse_sha512_rounds_entry() {
        let entry = parse_shadow_line("bob:$6$rounds=5000$salty$HASH:1::::::").unwrap();
        assert_eq!(
            entry.scheme,
            CryptScheme::Sha512 {
                rounds: Some("5000".to_string()),
                salt: "salty".to_string()
            }
        );
    }

    #[test]
    fn test_parse_yescrypt_entry() {
        let entry = parse_shadow_line("carol:$y$j9T$F5Jx5fExrKuPp53xLKQ..1$X3DX6M94c7o:19000::::::")
            .unwrap();
        assert_eq!(
            entry.scheme,
            CryptScheme::Yescrypt {
                setting: "$y$j9T$F5Jx5fExrKuPp53xLKQ..1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_non_crypt_fields() {
        assert_eq!(
            parse_shadow_line("dave:!$6$abcd$HASH:1::::::"),
            Err(Denial::MalformedShadowEntry)
        );
        assert_eq!(parse_shadow_line("dave:*:1::::::"), Err(Denial::MalformedShadowEntry));
        assert_eq!(parse_shadow_line("dave"), Err(Denial::MalformedShadowEntry));
        assert_eq!(parse_shadow_line("dave:$6$abcd:1"), Err(Denial::MalformedShadowEntry));
        assert_eq!(parse_shadow_line("dave:$y$j9T$salt:1"), Err(Denial::MalformedShadowEntry));
    }

    #[test]
    fn test_parse_rejects_unsupported_scheme() {
        assert_eq!(
            parse_shadow_line("erin:$1$salt$hash:1::::::"),
            Err(Denial::UnsupportedScheme("1".to_string()))
        );
    }

    #[test]
    fn test_parse_groups_output() {
        assert_eq!(
            parse_groups_output("alice", "alice : wheel docker\n"),
            Some(vec!["wheel".to_string(), "docker".to_string()])
        );
        assert_eq!(parse_groups_output("alice", "alice :\n"), None);
        assert_eq!(parse_groups_output("alice", "bob : wheel"), None);
        assert_eq!(parse_groups_output("alice", ""), None);
    }

    #[test]
    fn test_escape_single_quotes() {
        assert_eq!(escape_single_quotes("o'brien"), "o\\'brien");
        assert_eq!(escape_single_quotes("plain"), "plain");
    }

    #[tokio::test]
    async fn test_correct_password_authenticates() {
        let validator = LinuxCredentialValidator::with_runner(stub_host(), &AuthConfig::default());
        let result = validator.validate("alice", &secret("right")).await;

        assert!(result.authenticated());
        assert_eq!(result.groups(), ["wheel", "docker"]);
        assert!(result.privileges().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password_is_denied() {
        let validator = LinuxCredentialValidator::with_runner(stub_host(), &AuthConfig::default());
        let result = validator.validate("alice", &secret("wrong")).await;

        assert_eq!(result, AuthResult::denied("alice"));
    }

    #[tokio::test]
    async fn test_unknown_user_is_denied() {
        let validator = LinuxCredentialValidator::with_runner(stub_host(), &AuthConfig::default());
        let result = validator.validate("mallory", &secret("right")).await;

        assert!(!result.authenticated());
    }

    #[tokio::test]
    async fn test_repeated_validation_is_stable() {
        let validator = LinuxCredentialValidator::with_runner(stub_host(), &AuthConfig::default());
        let first = validator.validate("alice", &secret("right")).await;
        let second = validator.validate("alice", &secret("right")).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_short_groups_output_fails_closed() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|command, _| {
            if command.starts_with("grep ") {
                exited(0, &["alice:$6$abcd$HASH:19000:0:99999:7:::"])
            } else if command.starts_with("mkpasswd ") {
                exited(0, &["$6$abcd$HASH"])
            } else {
                exited(0, &["alice :"])
            }
        });

        let validator = LinuxCredentialValidator::with_runner(runner, &AuthConfig::default());
        let result = validator.validate("alice", &secret("right")).await;

        assert!(!result.authenticated());
    }

    #[tokio::test]
    async fn test_yescrypt_passes_full_setting() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|command, _| {
            if command.starts_with("grep ") {
                exited(0, &["carol:$y$j9T$salt$HASH:19000::::::"])
            } else if command == "mkpasswd 'pw' '$y$j9T$salt'" {
                exited(0, &["$y$j9T$salt$HASH"])
            } else if command == "groups 'carol'" {
                exited(0, &["carol : carol sudo"])
            } else {
                exited(1, &[])
            }
        });

        let validator = LinuxCredentialValidator::with_runner(runner, &AuthConfig::default());
        let result = validator.validate("carol", &secret("pw")).await;

        assert!(result.authenticated());
        assert_eq!(result.groups(), ["carol", "sudo"]);
    }

    #[tokio::test]
    async fn test_sha512_rounds_passed_to_hash_tool() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|command, _| {
            if command.starts_with("grep ") {
                exited(0, &["bob:$6$rounds=5000$salty$HASH:1::::::"])
            } else if command == "mkpasswd -m sha-512 -R 5000 'pw' 'salty'" {
                exited(0, &["$6$rounds=5000$salty$HASH"])
            } else if command.starts_with("groups ") {
                exited(0, &["bob : bob"])
            } else {
                exited(1, &[])
            }
        });

        let validator = LinuxCredentialValidator::with_runner(runner, &AuthConfig::default());
        let result = validator.validate("bob", &secret("pw")).await;

        assert!(result.authenticated());
        assert_eq!(result.groups(), ["bob"]);
    }

    #[tokio::test]
    async fn test_hash_tool_failure_is_denied() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|command, _| {
            if command.starts_with("grep ") {
                exited(0, &["alice:$6$abcd$HASH:19000:0:99999:7:::"])
            } else {
                CommandOutput {
                    outcome: ProcessOutcome::FailedToStart,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }
            }
        });

        let validator = LinuxCredentialValidator::with_runner(runner, &AuthConfig::default());
        let result = validator.validate("alice", &secret("right")).await;

        assert!(!result.authenticated());
    }

    #[tokio::test]
    async fn test_configured_paths_are_used() {
        let config = AuthConfig {
            shadow_file: "/srv/shadow".to_string(),
            hash_tool: "/opt/bin/mkpasswd".to_string(),
            ..Default::default()
        };

        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|command, _| {
            if command == "grep '^alice:' /srv/shadow" {
                exited(0, &["alice:$6$abcd$HASH:1::::::"])
            } else if command == "/opt/bin/mkpasswd -m sha-512 'right' 'abcd'" {
                exited(0, &["$6$abcd$HASH"])
            } else if command.starts_with("groups ") {
                exited(0, &["alice : users"])
            } else {
                exited(1, &[])
            }
        });

        let validator = LinuxCredentialValidator::with_runner(runner, &config);
        let result = validator.validate("alice", &secret("right")).await;

        assert!(result.authenticated());
    }
}
