pub mod agent;
pub mod api;
pub mod cancel;
pub mod config;
pub mod driver;
pub mod error;
pub mod ops;
pub mod progress;
pub mod signals;

pub use agent::Agent;
pub use config::Config;

use std::path::PathBuf;

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "servo", about = "Optimization agent for remote-driven tuning")]
pub struct AgentArgs {
    /// Name/ID of the application to optimize
    pub app_id: String,

    /// Prompt before each command instead of running continuously
    #[arg(long)]
    pub interactive: bool,

    /// Fixed delay between commands, in seconds
    #[arg(long)]
    pub delay: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    pub verbose: bool,

    /// Agent identifier reported in HELLO (defaults to servo/<version>)
    #[arg(long)]
    pub agent: Option<String>,

    /// Account name (falls back to OPTUNE_ACCOUNT)
    #[arg(long)]
    pub account: Option<String>,

    /// Service URL override (replaces the account-derived endpoint)
    #[arg(long)]
    pub url: Option<String>,

    /// Path to the bearer token file
    #[arg(long, default_value = servo_protocol::defaults::DEFAULT_AUTH_TOKEN_PATH)]
    pub auth_token: PathBuf,

    /// Disable authentication entirely
    #[arg(long)]
    pub no_auth: bool,
}
