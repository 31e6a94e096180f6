//! Runs a command and emails its outcome.
//!
//! ```text
//! mailme --to ops@example.com --subject "Backup" --attach-logs -- ./backup.sh --full
//! ```
//!
//! The command's stdout and stderr are forwarded to the log, so they end up
//! in the attached log when `--attach-logs` is given. `mailme` exits with the
//! command's exit code.

use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use clap::Parser;
use mailme::{FileConfig, NotificationConfig, Notifier, Outcome, logging};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};

/// Exit code reported when the command could not be started.
const SPAWN_FAILED: i32 = 127;

/// Run a command and email its outcome
#[derive(Parser, Debug)]
#[command(name = "mailme", version, long_about = None)]
struct Cli {
    /// Recipient address; may be repeated
    #[arg(long = "to", value_name = "ADDRESS")]
    to: Vec<String>,

    /// Email subject
    #[arg(short, long)]
    subject: Option<String>,

    /// Attach the command's output to the email
    #[arg(long)]
    attach_logs: bool,

    /// Sender address (defaults to the SMTP username)
    #[arg(long, value_name = "ADDRESS")]
    from: Option<String>,

    /// SMTP host (default: `EMAIL_HOST` or smtp.gmail.com)
    #[arg(long)]
    host: Option<String>,

    /// SMTP port (default: `EMAIL_PORT` or 587)
    #[arg(long)]
    port: Option<u16>,

    /// SMTP username (default: `EMAIL_USER`)
    #[arg(long)]
    username: Option<String>,

    /// SMTP password (default: `EMAIL_PASSWORD`)
    #[arg(long)]
    password: Option<String>,

    /// Connect without TLS
    #[arg(long)]
    no_tls: bool,

    /// Maximum number of delivery attempts
    #[arg(long, value_name = "ATTEMPTS")]
    max_retries: Option<u32>,

    /// Configuration file (default: `MAILME_CONFIG` or ./mailme.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} {status}")]
    Exited { program: String, status: ExitStatus },
}

impl CommandError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Spawn { .. } => SPAWN_FAILED,
            Self::Exited { status, .. } => status.code().unwrap_or(1),
        }
    }
}

impl Cli {
    fn notification_config(&self) -> anyhow::Result<NotificationConfig> {
        let mut builder = NotificationConfig::builder().recipients(self.to.iter().cloned());

        // Unset flags leave the setting to the configuration file.
        if self.attach_logs {
            builder = builder.attach_logs(true);
        }
        if let Some(subject) = &self.subject {
            builder = builder.subject(subject);
        }
        if let Some(from) = &self.from {
            builder = builder.from(from);
        }
        if let Some(host) = &self.host {
            builder = builder.host(host);
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(username) = &self.username {
            builder = builder.username(username);
        }
        if let Some(password) = &self.password {
            builder = builder.password(password);
        }
        if self.no_tls {
            builder = builder.use_tls(false);
        }
        if let Some(attempts) = self.max_retries {
            builder = builder.max_retries(attempts);
        }

        if let Some(path) = find_config_file(self.config.as_deref())? {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            builder = builder.with_file(FileConfig::load(&path)?)?;
        }

        Ok(builder.build()?)
    }
}

/// Find the configuration file using the following precedence:
/// 1. `--config`
/// 2. `MAILME_CONFIG` environment variable
/// 3. ./mailme.toml, if present
fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(env_path) = std::env::var("MAILME_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "MAILME_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default = PathBuf::from("./mailme.toml");
    Ok(default.exists().then_some(default))
}

/// Logs every line read from `stream`.
async fn forward<R>(stream: R, name: &'static str, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => tracing::warn!(stream = name, "{line}"),
            Ok(Some(line)) => tracing::info!(stream = name, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(stream = name, error = %e, "Failed to read command output");
                break;
            }
        }
    }
}

async fn run(command: &[String]) -> Result<(), CommandError> {
    let (program, args) = command.split_first().ok_or_else(|| CommandError::Spawn {
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no command given"),
    })?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

    tracing::info!(program = %program, pid = ?child.id(), "Command started");

    let stdout = child.stdout.take().map(|s| tokio::spawn(forward(s, "stdout", false)));
    let stderr = child.stderr.take().map(|s| tokio::spawn(forward(s, "stderr", true)));

    let status = child.wait().await;

    for reader in [stdout, stderr].into_iter().flatten() {
        let _ = reader.await;
    }

    let status = status.map_err(|source| CommandError::Spawn {
        program: program.clone(),
        source,
    })?;

    tracing::info!(program = %program, %status, "Command finished");

    if status.success() {
        Ok(())
    } else {
        Err(CommandError::Exited {
            program: program.clone(),
            status,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let notifier = Notifier::new(cli.notification_config()?);
    let scope = notifier.open()?;

    let result = run(&cli.command).await;

    let report = scope.close_async(Outcome::from_result(&result)).await.await;
    if !report.is_sent() {
        tracing::error!(%report, "Notification was not delivered");
    }

    if let Err(e) = result {
        std::process::exit(e.exit_code());
    }

    Ok(())
}
