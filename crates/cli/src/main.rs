//! Lux CLI - Database migrations and checkout operator tools.
//!
//! # Usage
//!
//! ```bash
//! # Run checkout database migrations
//! lux-cli migrate
//!
//! # Show webhook deliveries that have not been processed
//! lux-cli webhooks backlog --limit 20
//!
//! # Re-run the handler for one logged delivery
//! lux-cli webhooks replay 6f1c0d2e9a8b4c7d
//!
//! # Show recent payment failures, optionally for one user
//! lux-cli failures list --user u-42
//!
//! # Load products and carts for local testing
//! lux-cli seed crates/cli/seed/demo.yaml
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `webhooks` - Inspect and replay the webhook log
//! - `failures` - Inspect recorded payment failures
//! - `seed` - Seed stock levels and carts from YAML

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "lux-cli")]
#[command(author, version, about = "Lux checkout CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Inspect and replay logged webhook deliveries
    Webhooks {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// Inspect recorded payment failures
    Failures {
        #[command(subcommand)]
        action: FailureAction,
    },
    /// Seed stock levels and carts from a YAML file
    Seed {
        /// Path to the seed file
        file: String,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// List deliveries that are unprocessed or ended in an error
    Backlog {
        /// Maximum number of rows to show
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// Re-run the handler for one logged delivery
    Replay {
        /// Webhook log row ID
        log_id: String,
    },
}

#[derive(Subcommand)]
enum FailureAction {
    /// List recent payment failures
    List {
        /// Maximum number of rows to show
        #[arg(short, long, default_value_t = 50)]
        limit: i64,

        /// Only show failures for this user
        #[arg(short, long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Webhooks { action } => match action {
            WebhookAction::Backlog { limit } => commands::webhooks::backlog(limit).await?,
            WebhookAction::Replay { log_id } => commands::webhooks::replay(&log_id).await?,
        },
        Commands::Failures { action } => match action {
            FailureAction::List { limit, user } => {
                commands::failures::list(limit, user.as_deref()).await?;
            }
        },
        Commands::Seed { file } => commands::seed::run(&file).await?,
    }
    Ok(())
}
