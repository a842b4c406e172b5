mod config;
mod credits;
mod error;
mod models;
mod server;
mod service;
mod source;

use clap::{Parser, Subcommand};
use config::{config_path, ensure_initialized, load_config, AppConfig};
use error::AppError;
use server::AppState;
use service::UsageService;
use source::HttpUsageSource;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "credit-meter")]
#[command(about = "Per-message credit usage for the current billing period")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a default config file if none exists.
    Init,
    /// Serve GET /usage over HTTP.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Fetch the current period once and print the usage JSON.
    Usage {
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Score a message text with the credit calculator.
    Score {
        text: String,
        #[arg(long)]
        explain: bool,
    },
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("credit_meter={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn usage_service(cfg: &AppConfig) -> Result<UsageService, AppError> {
    let source = HttpUsageSource::new(cfg)?;
    Ok(UsageService::new(Arc::new(source)).with_max_concurrent_lookups(cfg.max_concurrent_lookups))
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized credit-meter config at {}.", config_path()?.display());
        }
        Commands::Serve { host, port } => {
            let mut cfg = load_config()?;
            if let Some(host) = host {
                cfg.host = host;
            }
            if let Some(port) = port {
                cfg.port = port;
            }
            init_tracing(&cfg.log_level);

            let state = AppState {
                service: Arc::new(usage_service(&cfg)?),
                expose_error_details: cfg.expose_error_details,
            };
            server::serve(&cfg, state).await?;
        }
        Commands::Usage { base_url } => {
            let mut cfg = load_config()?;
            if let Some(base_url) = base_url {
                cfg.base_url = base_url;
                cfg.validate()?;
            }
            init_tracing(&cfg.log_level);

            let result = usage_service(&cfg)?.current_period_usage().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Score { text, explain } => {
            if explain {
                let breakdown = credits::credit_breakdown(&text);
                println!("{}", serde_json::to_string_pretty(&breakdown)?);
            } else {
                println!("{:.2}", credits::calculate_message_credits(&text));
            }
        }
    }

    Ok(())
}
