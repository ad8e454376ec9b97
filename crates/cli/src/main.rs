//! Heal probe CLI
//!
//! A command-line tool for inspecting the workload watched by the heal
//! probe, classifying restart series and triggering memory remediation.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{inspect, remediate};
use std::time::Duration;

/// Heal probe CLI
#[derive(Parser)]
#[command(name = "healctl")]
#[command(author, version, about = "CLI for the cluster DNS heal probe", long_about = None)]
pub struct Cli {
    /// Probe API endpoint URL (can also be set via HEALCTL_API_URL env var)
    #[arg(long, env = "HEALCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List service and pod addresses of the watched workload
    Addresses,

    /// Show the current memory usage of a pod
    Memory {
        /// Pod name
        pod: String,
    },

    /// Classify restart timestamps as out-of-memory or not
    Classify {
        /// Restart timestamps in RFC 3339 format
        #[arg(required = true)]
        restarts: Vec<String>,

        /// Pod the restarts belong to
        #[arg(long)]
        pod: Option<String>,
    },

    /// Raise the deployment memory limit and wait for the rollout
    Remediate {
        /// Pod whose restarts triggered the remediation
        pod: String,

        /// Multiplier applied to the baseline memory limit
        #[arg(long)]
        factor: Option<i64>,

        /// Seconds to wait for the probe to finish the rollout
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show probe health and readiness
    Health,
}

/// Remediation waits for a rollout, which may take up to ten minutes
const DEFAULT_REMEDIATION_TIMEOUT_SECS: u64 = 660;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let api_url = config.api_url(cli.api_url.as_deref());
    let format = cli.format.unwrap_or_else(|| {
        config
            .default_format
            .as_deref()
            .and_then(|f| output::OutputFormat::from_str(f, true).ok())
            .unwrap_or_default()
    });

    // Execute command
    match cli.command {
        Commands::Addresses => {
            let client = client::ApiClient::new(&api_url)?;
            inspect::show_addresses(&client, format).await?;
        }
        Commands::Memory { pod } => {
            let client = client::ApiClient::new(&api_url)?;
            inspect::show_memory(&client, &pod, format).await?;
        }
        Commands::Classify { restarts, pod } => {
            let client = client::ApiClient::new(&api_url)?;
            remediate::classify(&client, pod, &restarts, format).await?;
        }
        Commands::Remediate {
            pod,
            factor,
            timeout,
        } => {
            let timeout = timeout
                .or(config.remediation_timeout_secs)
                .unwrap_or(DEFAULT_REMEDIATION_TIMEOUT_SECS);
            let client =
                client::ApiClient::with_timeout(&api_url, Duration::from_secs(timeout))?;
            remediate::remediate(&client, &pod, factor, format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&api_url)?;
            inspect::show_health(&client, format).await?;
        }
    }

    Ok(())
}
