use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use windgate::ratelimit::MemoryStore;
use windgate::{Context, RateLimitKey, RateLimiter, ServiceConfig};

#[derive(Parser, Debug)]
#[command(name = "windgate", version, about = "Windowed rate limiting over a shared store")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a burst of requests against an in-memory store and print each decision
    Simulate {
        #[arg(long, default_value = "demo-user")]
        identifier: String,
        #[arg(long, default_value = "api")]
        resource: String,
        #[arg(long, default_value = "read")]
        operation: String,
        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: u32,
        /// Check each request and record it separately instead of the atomic path
        #[arg(long)]
        split: bool,
    },
    /// Print the effective configuration
    ShowConfig,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    let config = ServiceConfig::load(cli.config.as_deref())?;
    info!(fail_open = config.limiter.fail_open, "Configuration loaded");

    match cli.command {
        Command::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Command::Simulate {
            identifier,
            resource,
            operation,
            requests,
            split,
        } => {
            let strategy = config.strategy.build()?;
            let limiter = RateLimiter::with_config(Arc::new(MemoryStore::new()), strategy, config.limiter);
            let key = RateLimitKey::new(identifier, resource, operation);
            let ctx = Context::background();

            let mut admitted = 0u32;
            for _ in 0..requests {
                let decision = if split {
                    let decision = limiter.check_limit(&ctx, &key).await?;
                    if decision.allowed {
                        limiter.record_request(&ctx, &key).await?;
                    }
                    decision
                } else {
                    limiter.check_and_increment(&ctx, &key).await?
                };
                if decision.allowed {
                    admitted += 1;
                }
                println!("{}", serde_json::to_string(&decision)?);
            }

            let usage = limiter.get_usage(&ctx, &key).await?;
            println!("{}", serde_json::to_string_pretty(&usage)?);
            info!(admitted = admitted, requested = requests, "Simulation finished");
        }
    }

    Ok(())
}
