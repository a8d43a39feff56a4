//! presenced - gateway presence daemon
//!
//! Connects with a user token, shows the configured status and custom
//! status, and keeps the session alive until interrupted.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use presence_proto::Status;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use presenced::{GatewaySession, PresenceConfig, PresenceError, Token, resolver_for, run_console};

#[derive(Debug, Parser)]
#[command(name = "presenced")]
#[command(about = "Keeps a gateway session online with a custom status")]
#[command(version)]
struct Cli {
    /// Authentication token
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Status to show: online, idle, dnd or invisible [default: online]
    #[arg(long, env = "STATUS")]
    status: Option<Status>,

    /// Custom status text [default: "24/7 Online"]
    #[arg(long, env = "CUSTOM_STATUS")]
    custom_status: Option<String>,

    /// Optional TOML config file; flags and environment override it
    #[arg(short, long, env = "PRESENCED_CONFIG")]
    config: Option<PathBuf>,

    /// Endpoint discovery URL
    #[arg(long)]
    discovery_url: Option<String>,

    /// Fixed gateway URL, skipping discovery
    #[arg(long)]
    gateway_url: Option<String>,

    /// Consecutive failed reconnects before giving up [default: 10]
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Resume sessions after a reconnect instead of identifying again
    #[arg(long)]
    resume: bool,

    /// Keep connections whose heartbeats go unacknowledged
    #[arg(long)]
    no_heartbeat_watchdog: bool,

    /// Do not read commands from stdin
    #[arg(long)]
    no_console: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn main() -> ExitCode {
    // a missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let exit = match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "presenced stopped");
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<PresenceError>()
                .map_or(1, PresenceError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    };

    // the console's blocking stdin read cannot be cancelled
    runtime.shutdown_background();
    exit
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("presenced=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(io::stderr)))
        .init();
}

fn build_config(cli: &Cli) -> Result<PresenceConfig, PresenceError> {
    let mut config = match &cli.config {
        Some(path) => PresenceConfig::read_file(path)?,
        None => PresenceConfig::new(Token::default()),
    };

    if let Some(token) = &cli.token {
        config.token = Token::new(token.as_str());
    }
    if let Some(status) = cli.status {
        config.status = status;
    }
    if let Some(text) = &cli.custom_status {
        config.custom_status.clone_from(text);
    }
    if let Some(url) = &cli.discovery_url {
        config.gateway.discovery_url.clone_from(url);
    }
    if let Some(url) = &cli.gateway_url {
        config.gateway.gateway_url = Some(url.clone());
    }
    if let Some(attempts) = cli.max_reconnect_attempts {
        config.gateway.max_reconnect_attempts = attempts;
    }
    if cli.resume {
        config.gateway.resume = true;
    }
    if cli.no_heartbeat_watchdog {
        config.gateway.heartbeat_watchdog = false;
    }

    if config.token.expose().is_empty() {
        return Err(PresenceError::Config(
            "no token configured, set DISCORD_TOKEN or --token".to_string(),
        ));
    }
    config.validate()?;
    Ok(config)
}

/// Signals that ask for a graceful shutdown.
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown signal and return its name.
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                }
                "SIGINT"
            }
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    /// Wait for the next shutdown signal and return its name.
    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
        }
        "SIGINT"
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli)?;
    let mut signals = ShutdownSignals::install().context("failed to install signal handlers")?;
    info!(
        status = %config.status,
        custom_status = %config.custom_status,
        resume = config.gateway.resume,
        heartbeat_watchdog = config.gateway.heartbeat_watchdog,
        "starting presenced"
    );

    let resolver = resolver_for(&config)?;
    let (session, handle) = GatewaySession::from_config(&config, resolver);
    let mut session_task = tokio::spawn(session.run());

    if !cli.no_console {
        let console = handle.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = run_console(console, stdin, tokio::io::stdout()).await {
                warn!(error = %e, "console stopped");
            }
        });
    }

    let joined = tokio::select! {
        joined = &mut session_task => joined,
        signal = signals.recv() => {
            info!(signal, "received shutdown signal");
            handle.shutdown().await;
            session_task.await
        }
    };

    joined.context("session task failed")??;
    info!("presenced stopped");
    Ok(())
}
