//! Idle Resource Scanner CLI
//!
//! A command-line tool for triggering scans, inspecting the result cache
//! and checking the health of the idle-scanner daemon.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cache, health, scan};
use output::{print_error, print_info, print_success, OutputFormat};

/// Idle Resource Scanner CLI
#[derive(Parser)]
#[command(name = "idlescan")]
#[command(author, version, about = "CLI for the Idle Resource Scanner", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via IDLESCAN_API_URL env var)
    #[arg(long, env = "IDLESCAN_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, value_enum)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a tenant for idle resources
    Scan {
        /// Tenant to scan
        tenant_id: String,

        /// Metric window in days (daemon default if not specified)
        #[arg(long, short)]
        window_days: Option<u32>,

        /// Ignore any cached result and query the backend
        #[arg(long)]
        force: bool,

        /// Also list evaluated resources that are in use
        #[arg(long)]
        show_busy: bool,
    },

    /// List tenants and their last scan state
    Tenants,

    /// Inspect or clear cached scan results
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Show daemon health and readiness
    Health,

    /// Manage stored CLI settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache freshness for a tenant
    Status {
        /// Tenant ID
        tenant_id: String,
    },

    /// Drop the cached scan for a tenant
    Clear {
        /// Tenant ID
        tenant_id: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective settings
    Show,

    /// Store default settings
    Set {
        /// Default API endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        /// Default output format
        #[arg(long, value_enum)]
        default_format: Option<OutputFormat>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = config::Config::load()?;
    let format = settings.format(cli.format);
    let api_url = settings.api_url(cli.api_url.as_deref());
    let connect = || client::ApiClient::new(&api_url);

    match cli.command {
        Commands::Scan {
            tenant_id,
            window_days,
            force,
            show_busy,
        } => {
            scan::run_scan(&connect()?, &tenant_id, window_days, force, show_busy, format).await?;
        }
        Commands::Tenants => {
            scan::list_tenants(&connect()?, format).await?;
        }
        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Status { tenant_id } => {
                cache::show_status(&connect()?, &tenant_id, format).await?;
            }
            CacheCommands::Clear { tenant_id } => {
                cache::clear(&connect()?, &tenant_id, format).await?;
            }
        },
        Commands::Health => {
            health::show_health(&connect()?, format).await?;
        }
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => {
                print_info(&format!(
                    "Config file: {}",
                    config::Config::config_path()?.display()
                ));
                println!("api_url:        {}", api_url);
                println!("default_format: {:?}", format);
            }
            ConfigCommands::Set {
                api_url,
                default_format,
            } => {
                if api_url.is_some() {
                    settings.api_url = api_url;
                }
                if default_format.is_some() {
                    settings.default_format = default_format;
                }
                let path = settings.save()?;
                print_success(&format!("Saved settings to {}", path.display()));
            }
        },
    }

    Ok(())
}
