use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use kitwatch_core::PersistedItem;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "kitwatch")]
#[command(about = "Watch marketplace listings for wanted football kits")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every query variant once and store new matching listings.
    Run,
    /// Print stored items not yet notified, as JSON.
    Pending,
    /// Print items added since the last notification, as JSON.
    SinceLast,
    /// Flag every pending item as notified.
    MarkSent,
}

fn print_items(items: &[PersistedItem]) -> Result<()> {
    let json = serde_json::to_string_pretty(items).context("serializing items")?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = kitwatch_sync::run_once_from_env().await?;
            println!(
                "run complete: run_id={} variants={} failed={} fetched={} new_items={} report={}",
                summary.run_id,
                summary.variants.len(),
                summary.variants_failed(),
                summary.listings_fetched,
                summary.accepted.len(),
                summary.reports_dir.as_deref().unwrap_or("-")
            );
        }
        Commands::Pending => {
            let store = kitwatch_sync::open_store_from_env()?;
            print_items(&store.unsent_items()?)?;
        }
        Commands::SinceLast => {
            let store = kitwatch_sync::open_store_from_env()?;
            let since = store.last_notified_at()?;
            info!(since = ?since, "listing items added since last notification");
            print_items(&store.items_added_since(since)?)?;
        }
        Commands::MarkSent => {
            let mut store = kitwatch_sync::open_store_from_env()?;
            let marked = store.mark_all_sent(Utc::now())?;
            println!("marked {marked} item(s) as notified");
        }
    }

    Ok(())
}
