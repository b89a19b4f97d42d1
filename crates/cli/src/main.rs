//! CLI entrypoint and subcommand orchestration.

mod bell;
mod config;
mod console;
mod signal;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use hub::{AuthGate, ConnectionManager, SessionHandle, WebSocketTransport};
use proto::Credential;
use tracing::info;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::bell::TerminalBell;
use crate::config::Config;

const PASSWORD_ENV: &str = "AGENTDESK_PASSWORD";

/// Top-level command-line arguments for the agentdesk application.
#[derive(Parser)]
#[command(name = "agentdesk")]
#[command(about = "Live-chat agent desk", version = "0.1.0")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable debug logging to ~/.agentdesk/logs/
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands available in the application.
#[derive(Subcommand)]
enum Commands {
    /// Log in and open the chat console (default when no subcommand is given)
    Start {
        /// Agent username (overrides config)
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Check credentials against the login endpoint and exit
    Login {
        /// Agent username (overrides config)
        #[arg(short, long)]
        username: Option<String>,
    },
}

#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Start { username: None });

    // Console logs go to stderr so they never interleave with chat output on stdout.
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    let debug_writer = match (cli.debug, Config::home_dir()) {
        (true, Some(home)) => {
            let log_dir = home.join("logs");
            std::fs::create_dir_all(&log_dir).ok();
            let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            _file_guard = Some(guard);
            Some(writer)
        }
        _ => {
            _file_guard = None;
            None
        }
    };

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);
    match debug_writer {
        Some(writer) => {
            let file = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(EnvFilter::new(
                    "debug,hyper_util=info,rustls=info,reqwest=info,tungstenite=info",
                ));
            tracing_subscriber::registry()
                .with(console)
                .with(file)
                .init();
        }
        None => {
            tracing_subscriber::registry().with(console).init();
        }
    }

    if cli.debug {
        let cmd_label = match &command {
            Commands::Start { .. } => "start",
            Commands::Login { .. } => "login",
        };
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = cmd_label,
            log_level = %cli.log_level,
            "========== agentdesk session start =========="
        );
    }

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match command {
        Commands::Start { username } => cmd_start(config, username).await,
        Commands::Login { username } => cmd_login(config, username).await,
    }
}

/// Logs in over HTTP, joins the hub and runs the console until the session ends.
async fn cmd_start(config: Config, username: Option<String>) -> anyhow::Result<()> {
    let credential = read_credential(&config, username).await?;
    let handle = sign_in(&config, credential)
        .await
        .context("could not start the agent session")?;
    console::run(handle).await
}

/// Verifies credentials without opening the hub connection.
async fn cmd_login(config: Config, username: Option<String>) -> anyhow::Result<()> {
    let credential = read_credential(&config, username).await?;
    let login_url = verify_login(&config, &credential)
        .await
        .context("login failed")?;
    println!(
        "Login succeeded for {} at {login_url}",
        credential.username
    );
    Ok(())
}

/// Exchanges the credential for a token and brings the hub session live.
async fn sign_in(config: &Config, credential: Credential) -> proto::Result<SessionHandle> {
    let gate = AuthGate::new(&config.server.base_url, &config.server.login_path)?;
    let token = gate.authenticate(&credential).await?;

    let transport = WebSocketTransport::new(
        &config.server.base_url,
        &config.server.hub_path,
        config.connection.handshake_timeout(),
    );
    let mut manager = ConnectionManager::new(transport, config.connection_options());
    if config.notifications.bell {
        manager = manager.with_notifications(Arc::new(TerminalBell::stderr()));
    }

    info!(agent = %credential.username, "Connecting to chat hub");
    Ok(manager.connect(credential, token).await?)
}

/// Authenticates only; returns the login URL that accepted the credential.
async fn verify_login(config: &Config, credential: &Credential) -> proto::Result<String> {
    let gate = AuthGate::new(&config.server.base_url, &config.server.login_path)?;
    gate.authenticate(credential).await?;
    Ok(gate.login_url().to_string())
}

/// Picks the username from the flag or config; `None` when neither is set.
fn resolve_username(flag: Option<String>, config: &Config) -> Option<String> {
    flag.map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            let configured = config.agent.username.trim();
            (!configured.is_empty()).then(|| configured.to_string())
        })
}

fn password_from_env() -> Option<String> {
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|password| !password.is_empty())
}

async fn read_credential(config: &Config, username: Option<String>) -> anyhow::Result<Credential> {
    let Some(username) = resolve_username(username, config) else {
        bail!("no agent username: pass --username or set agent.username in config.toml");
    };
    let password = match password_from_env() {
        Some(password) => password,
        None => prompt_password(&username).await?,
    };
    Ok(Credential::new(username, password))
}

async fn prompt_password(username: &str) -> anyhow::Result<String> {
    use std::io::Write;

    let prompt = format!("Password for {username}: ");
    let line = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stderr = std::io::stderr();
        stderr.write_all(prompt.as_bytes())?;
        stderr.flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await
    .context("password prompt task failed")??;

    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("empty password");
    }
    Ok(password)
}
