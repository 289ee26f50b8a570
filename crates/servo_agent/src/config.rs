//! Runtime configuration assembled from CLI arguments and environment.

use anyhow::{Context, Result};
use servo_protocol::defaults;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::AgentArgs;

/// How much captured driver stderr to append to a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StderrMode {
    /// Everything, truncated at the canonical cap.
    #[default]
    All,
    /// First two lines only.
    Minimal,
    /// Omitted.
    None,
}

impl StderrMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StderrMode::All => "all",
            StderrMode::Minimal => "minimal",
            StderrMode::None => "none",
        }
    }
}

impl FromStr for StderrMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(StderrMode::All),
            "minimal" => Ok(StderrMode::Minimal),
            "none" => Ok(StderrMode::None),
            other => Err(format!(
                "invalid stderr mode '{other}'. Expected: all, minimal, or none"
            )),
        }
    }
}

/// Paths of the driver executables.
#[derive(Debug, Clone)]
pub struct DriverPaths {
    pub adjust: PathBuf,
    pub measure: PathBuf,
    pub environment: PathBuf,
}

impl Default for DriverPaths {
    fn default() -> Self {
        Self {
            adjust: PathBuf::from(defaults::ADJUST_DRIVER),
            measure: PathBuf::from(defaults::MEASURE_DRIVER),
            environment: PathBuf::from(defaults::ENVIRONMENT_DRIVER),
        }
    }
}

/// Resolved agent configuration (plain data).
#[derive(Debug, Clone)]
pub struct Config {
    pub app_id: String,
    pub base_url: String,
    pub auth_token: Option<String>,
    pub agent_id: String,
    pub interactive: bool,
    pub delay: Option<Duration>,
    pub retry_delay: Duration,
    pub io_timeout: Option<Duration>,
    pub stderr_mode: StderrMode,
    pub perf_expr: Option<String>,
    pub drivers: DriverPaths,
}

impl Config {
    /// Resolve arguments and environment into a runnable configuration.
    /// Fails fast on a missing account or an unreadable token file; the
    /// process must not enter the command loop half-configured.
    pub fn load(args: &AgentArgs) -> Result<Self> {
        let base_url = match &args.url {
            Some(url) => url.clone(),
            None => {
                let account = args
                    .account
                    .clone()
                    .or_else(|| std::env::var(defaults::ENV_ACCOUNT).ok())
                    .context("no --url override and no account (--account or OPTUNE_ACCOUNT)")?;
                defaults::BASE_URL_TEMPLATE
                    .replace("{account}", &account)
                    .replace("{app_id}", &args.app_id)
            }
        };

        let auth_token = if args.no_auth {
            None
        } else {
            let raw = std::fs::read_to_string(&args.auth_token).with_context(|| {
                format!("failed to read auth token from {}", args.auth_token.display())
            })?;
            Some(raw.trim().to_string())
        };

        let agent_id = args
            .agent
            .clone()
            .unwrap_or_else(|| format!("servo/{}", env!("CARGO_PKG_VERSION")));

        let stderr_mode = match std::env::var(defaults::ENV_VERBOSE_STDERR) {
            Ok(raw) => raw
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("invalid {}", defaults::ENV_VERBOSE_STDERR))?,
            Err(_) => StderrMode::default(),
        };

        Ok(Self {
            app_id: args.app_id.clone(),
            base_url,
            auth_token,
            agent_id,
            interactive: args.interactive,
            delay: args.delay.map(Duration::from_secs),
            retry_delay: env_seconds(defaults::ENV_RETRY_DELAY)
                .map(Duration::from_secs)
                .unwrap_or(defaults::DEFAULT_RETRY_DELAY),
            io_timeout: env_seconds(defaults::ENV_IO_TIMEOUT)
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            stderr_mode,
            perf_expr: std::env::var(defaults::ENV_PERF).ok(),
            drivers: DriverPaths::default(),
        })
    }
}

fn env_seconds(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}
