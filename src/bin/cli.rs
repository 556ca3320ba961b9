//! txauctions CLI
//!
//! Ingests Texas auction listings and prints the ranked views.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use txauctions::{
    error::{AppError, Result},
    geo::{Geocoder, NominatimClient},
    models::{AuctionSummary, Config},
    pipeline::{self, ProximityRequest, RankedPage, Rankings},
    services::build_adapters,
    storage::{self, AuctionStore},
    utils::report,
};

/// Texas auction aggregator
#[derive(Parser, Debug)]
#[command(
    name = "txauctions",
    version,
    about = "Aggregates Texas auction listings and ranks them by end time or distance"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Database URL, overriding the configuration
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema and register configured sources
    Init,

    /// Run one ingestion pass over all enabled sources
    Ingest,

    /// Ingest now and then every `ingestion.interval_days`
    Schedule,

    /// List active auctions ending soonest
    EndingSoon {
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Defaults to `ranking.page_size`
        #[arg(long)]
        page_size: Option<u32>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List active auctions nearest to a ZIP code
    Nearby {
        /// Defaults to `ranking.default_zip`
        #[arg(long)]
        zip: Option<String>,

        /// Radius in miles; defaults to `ranking.default_max_distance_miles`
        #[arg(long)]
        max_distance: Option<f64>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long)]
        page_size: Option<u32>,

        #[arg(long)]
        json: bool,
    },

    /// Delete ended or removed auctions that ended long ago
    Cleanup {
        #[arg(long, default_value_t = 90)]
        older_than_days: i64,
    },

    /// Re-geocode a ZIP code, replacing the cached coordinates
    RefreshGeocode { zip: String },

    /// Validate configuration and source selectors
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

async fn open_store(config: &Config) -> Result<Arc<dyn AuctionStore>> {
    let store = storage::connect(&config.database.url, &config.database).await?;
    store.create_schema().await?;
    log::debug!("Using {} store", store.dialect_name());
    Ok(store)
}

fn build_geocoder(config: &Config, store: &Arc<dyn AuctionStore>) -> Result<Geocoder> {
    let client = NominatimClient::new(&config.geocoder)?;
    Ok(Geocoder::new(
        Arc::clone(store).geocode_cache(),
        Arc::new(client),
        Duration::from_secs(config.geocoder.timeout_secs),
    ))
}

async fn ingest_once(config: &Config, store: &Arc<dyn AuctionStore>) -> Result<()> {
    report::header("Ingestion");
    let adapters = build_adapters(config)?;
    let geocoder = build_geocoder(config, store)?;

    let summary = pipeline::run_ingestion(
        store.as_ref(),
        Some(&geocoder),
        &adapters,
        &config.ingestion,
        config.http.max_concurrent,
    )
    .await;

    if summary.aborted {
        return Err(AppError::config(
            "ingestion aborted after repeated database failures",
        ));
    }
    if !summary.is_success() {
        log::warn!("{} sources failed", summary.sources_failed);
    }
    Ok(())
}

fn print_page(page: &RankedPage, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(page)?);
        return Ok(());
    }

    if page.auctions.is_empty() {
        println!("No auctions found.");
    }
    for auction in &page.auctions {
        println!("{}", format_row(auction));
    }
    if page.partial {
        println!("(partial results: some locations could not be geocoded)");
    }
    Ok(())
}

fn format_row(auction: &AuctionSummary) -> String {
    let price = auction
        .current_price
        .map_or_else(|| "-".to_string(), |p| format!("${p:.2}"));
    let distance = auction
        .distance_miles
        .map_or_else(String::new, |d| format!("{d:>6.1} mi  "));
    let place = match (&auction.city, &auction.zip_code) {
        (Some(city), _) => city.clone(),
        (None, Some(zip)) => zip.clone(),
        (None, None) => "-".to_string(),
    };
    format!(
        "{}{}  {:>12}  {}  [{}, {}]  {}",
        distance,
        auction.end_date.format("%Y-%m-%d %H:%M UTC"),
        price,
        auction.title,
        place,
        auction.source_name,
        auction.url
    )
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::load_or_default(&cli.config)
    };
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    match cli.command {
        Command::Init => {
            config.validate()?;
            let store = open_store(&config).await?;
            for source in &config.sources {
                let id = store.ensure_source(&source.info()).await?;
                report::sub_item(&format!("{} -> source #{}", source.name, id));
            }
            log::info!("Schema ready ({} sources registered)", config.sources.len());
        }

        Command::Ingest => {
            config.validate()?;
            let store = open_store(&config).await?;
            ingest_once(&config, &store).await?;
        }

        Command::Schedule => {
            config.validate()?;
            let store = open_store(&config).await?;
            let mut ticker = tokio::time::interval(config.ingestion.interval());
            log::info!(
                "Scheduling ingestion every {} days",
                config.ingestion.interval_days
            );

            loop {
                ticker.tick().await;
                // One failed run must not stop the schedule.
                if let Err(e) = ingest_once(&config, &store).await {
                    log::error!("Scheduled ingestion failed: {}", e);
                }
            }
        }

        Command::EndingSoon {
            page,
            page_size,
            json,
        } => {
            let store = open_store(&config).await?;
            let rankings = Rankings::new(Arc::clone(&store), build_geocoder(&config, &store)?);
            let page_size = page_size.unwrap_or(config.ranking.page_size);
            print_page(&rankings.ending_soon(page, page_size).await, json)?;
        }

        Command::Nearby {
            zip,
            max_distance,
            page,
            page_size,
            json,
        } => {
            let store = open_store(&config).await?;
            let rankings = Rankings::new(Arc::clone(&store), build_geocoder(&config, &store)?);
            let request = ProximityRequest {
                zip: zip.unwrap_or_else(|| config.ranking.default_zip.clone()),
                max_miles: max_distance.unwrap_or(config.ranking.default_max_distance_miles),
                page,
                page_size: page_size.unwrap_or(config.ranking.page_size),
            };
            print_page(&rankings.nearby(&request).await, json)?;
        }

        Command::Cleanup { older_than_days } => {
            let cutoff = storage::cleanup_cutoff(Utc::now(), older_than_days)?;
            let store = open_store(&config).await?;
            let purged = store.purge_ended_before(cutoff).await?;
            log::info!(
                "Purged {} auctions that ended before {}",
                purged,
                cutoff.format("%Y-%m-%d")
            );
        }

        Command::RefreshGeocode { zip } => {
            let store = open_store(&config).await?;
            let coords = build_geocoder(&config, &store)?.refresh(&zip).await?;
            log::info!("{} -> {}, {}", zip, coords.latitude, coords.longitude);
        }

        Command::Validate => pipeline::run_validate(&config)?,
    }

    Ok(())
}
