use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glanz_adapters::{load_listing_page, ListingAdapter};
use glanz_storage::{MemoryProductSink, PgProductStore};
use glanz_sync::{ImportConfig, ImportPipeline, ImportRunSummary};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "glanz-cli")]
#[command(about = "Import Glanzbruch category listings into the products table")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch the listing page and insert its products
    Import {
        /// Parse and print records without touching the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Create the products table if it does not exist
    Migrate,
    /// Print stored products of one category
    List {
        /// Category to list (default: GLANZ_CATEGORY)
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Run the extractor on a saved HTML page
    Parse {
        file: PathBuf,
        /// URL recorded as the page origin (default: GLANZ_LISTING_URL)
        #[arg(long)]
        url: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(summary: &ImportRunSummary) {
    println!(
        "import complete: run_id={} listings={} skipped={} inserted={}",
        summary.run_id, summary.listings_found, summary.skipped, summary.inserted
    );
}

async fn connect_store(config: &ImportConfig) -> Result<PgProductStore> {
    let database_url = config.require_database_url()?;
    PgProductStore::connect(database_url)
        .await
        .context("connecting to product store")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = ImportConfig::from_env();

    match cli.command.unwrap_or(Commands::Import { dry_run: false }) {
        Commands::Import { dry_run: false } => {
            let summary = glanz_sync::run_import_once_from_env().await?;
            print_summary(&summary);
        }
        Commands::Import { dry_run: true } => {
            let pipeline = ImportPipeline::new(&config)?;
            let mut sink = MemoryProductSink::new();
            let summary = pipeline.run_once(&mut sink).await?;
            println!("{}", serde_json::to_string_pretty(sink.products())?);
            print_summary(&summary);
        }
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            let result = store.migrate().await;
            store.close().await;
            result?;
            println!("migrate complete");
        }
        Commands::List { category } => {
            let category = category.unwrap_or_else(|| config.category.clone());
            let store = connect_store(&config).await?;
            let result = store.list_by_category(&category).await;
            store.close().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Parse { file, url } => {
            let pipeline = ImportPipeline::new(&config)?;
            let url = url.unwrap_or_else(|| config.listing_url.clone());
            let page = load_listing_page(&file, &url)?;
            let parsed = pipeline.adapter().parse_listing(&page)?;
            for rejected in &parsed.rejected {
                warn!(position = rejected.position, error = %rejected.error, "listing rejected");
            }
            println!("{}", serde_json::to_string_pretty(&parsed.products)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_defaults_to_import() {
        let cli = Cli::try_parse_from(["glanz-cli"]).unwrap();
        assert!(cli.command.is_none());
        let cli = Cli::try_parse_from(["glanz-cli", "import", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Import { dry_run: true })));
    }
}
