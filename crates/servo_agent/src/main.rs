//! Servo optimization agent.
//!
//! Usage:
//!     servo --account my-org my-app
//!     servo --url http://localhost:8080/servo --no-auth my-app

use anyhow::{Context, Result};
use clap::Parser;
use servo_agent::agent::Agent;
use servo_agent::config::Config;
use servo_agent::signals::{spawn_graceful_listeners, StopFlag};
use servo_agent::AgentArgs;
use servo_protocol::StopMode;
use std::os::unix::process::CommandExt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = AgentArgs::parse();

    let default_filter = if args.verbose {
        "servo=debug,servo_agent=debug"
    } else {
        "servo=info,servo_agent=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(&args).context("startup failed")?;
    info!(app = %config.app_id, url = %config.base_url, "starting servo");

    let stop = StopFlag::new();
    spawn_graceful_listeners(stop.clone()).context("failed to install signal handlers")?;
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    let mut agent = Agent::new(config, stop);
    agent.hello().await?;

    // SIGTERM/SIGINT stop immediately, abandoning any in-flight command;
    // SIGUSR1/SIGHUP let the loop finish its current command first.
    let mode = tokio::select! {
        finished = agent.run() => Some(finished?),
        _ = sigterm.recv() => {
            info!("SIGTERM received; stopping now");
            None
        }
        _ = sigint.recv() => {
            info!("SIGINT received; stopping now");
            None
        }
    };

    agent.goodbye().await;

    match mode {
        None | Some(StopMode::Exit) => Ok(()),
        Some(StopMode::Restart) => restart(),
    }
}

/// Replace this process with a fresh copy of itself, original arguments
/// included. Only returns on failure.
fn restart() -> Result<()> {
    let mut argv = std::env::args_os();
    let program = argv.next().context("empty argv")?;
    info!("restarting {}", program.to_string_lossy());
    let err = std::process::Command::new(program).args(argv).exec();
    Err(err).context("re-exec failed")
}
