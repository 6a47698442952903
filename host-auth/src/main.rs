//! Host Auth CLI

use anyhow::Context;
use clap::{Parser, Subcommand};
use host_auth::{
    init_logging, AuthConfig, HostValidator, LineSink, Platform, ProcessOutcome, ProcessRunner,
    ShellCommand, SystemShell,
};
use secrecy::SecretString;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "host-auth")]
#[command(about = "Validate credentials against the host OS account database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (YAML, or JSON with a .json extension)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-command timeout (seconds)
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show platform, shell and tool availability
    Info,

    /// Validate a user; the password is read from the first line of stdin
    Check {
        /// Account name
        username: String,
    },

    /// Run a raw command through the platform shell
    Exec {
        /// Command string
        command: String,
    },
}

/// Writes each line straight to the terminal
struct ConsoleSink {
    stderr: bool,
}

impl LineSink for ConsoleSink {
    fn write_line(&mut self, line: &str) {
        if self.stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => AuthConfig::load(path)?,
        None => AuthConfig::default(),
    };
    if let Some(secs) = cli.timeout {
        config.command_timeout_secs = Some(secs);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Info => {
            show_platform_info(&config);
        }
        Commands::Check { username } => {
            let authenticated = check_user(&config, &username, cancel).await?;
            if !authenticated {
                std::process::exit(1);
            }
        }
        Commands::Exec { command } => {
            let code = execute_command(&config, &command, cancel).await?;
            std::process::exit(code);
        }
    }

    Ok(())
}

fn show_platform_info(config: &AuthConfig) {
    let platform = Platform::current();

    println!("Platform Information:");
    println!("  OS: {} ({})", std::env::consts::OS, platform.name());
    match platform.default_shell() {
        Ok(shell) => println!("  Shell: {}", config.shell.as_deref().unwrap_or(shell)),
        Err(e) => println!("  Shell: {}", e),
    }
    match HostValidator::detect(config) {
        Ok(validator) => println!("  Validator: {}", validator.kind()),
        Err(e) => println!("  Validator: {}", e),
    }

    println!("  Tools:");
    for tool in platform.required_tools() {
        let tool = if *tool == "mkpasswd" {
            config.hash_tool.as_str()
        } else {
            tool
        };
        match which::which(tool) {
            Ok(path) => println!("    {} - {}", tool, path.display()),
            Err(_) => println!("    {} - not found", tool),
        }
    }
}

async fn check_user(
    config: &AuthConfig,
    username: &str,
    cancel: CancellationToken,
) -> anyhow::Result<bool> {
    let shell = SystemShell::new(config).with_cancellation(cancel);
    let validator = HostValidator::with_shell(shell, config)?;

    let mut line = Zeroizing::new(String::new());
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read password from stdin")?;
    let password = SecretString::from(line.trim_end_matches(['\r', '\n']).to_string());

    let result = validator.validate(username, &password).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(result.authenticated())
}

async fn execute_command(
    config: &AuthConfig,
    command: &str,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    let mut builder = ShellCommand::new(command);
    if let Some(ref shell) = config.shell {
        builder = builder.shell(shell.clone());
    }

    let mut spec = builder.build()?;
    spec.working_dir = config.working_dir.clone();
    spec.timeout = config.command_timeout();

    let mut stdout = ConsoleSink { stderr: false };
    let mut stderr = ConsoleSink { stderr: true };
    let outcome = ProcessRunner::new()
        .run_until(spec, Some(&mut stdout), Some(&mut stderr), &cancel)
        .await;

    match outcome {
        ProcessOutcome::Exited(code) => Ok(code.unwrap_or(1)),
        ProcessOutcome::FailedToStart => anyhow::bail!("Failed to start {}", command),
        ProcessOutcome::Cancelled => anyhow::bail!("Command cancelled or timed out"),
    }
}
