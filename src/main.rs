//! itbi-insights - Niterói ITBI ingestion and insight pipeline
//!
//! Stages, each runnable on its own or chained by `run`:
//! discover → download → consolidate → geocode → insights.
//! Every stage reads and writes plain files under the data directory, so a
//! crashed or interrupted run resumes from the last completed stage.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use itbi_insights::config::{
    self, BASE_URL, CONSOLIDATED_FILE, GEOCACHE_FILE, GEOCODED_FILE, HTTP_TIMEOUT_SECS,
    HTTP_USER_AGENT, INSIGHTS_FILE,
};
use itbi_insights::services::aggregator::aggregate;
use itbi_insights::services::consolidate::{
    consolidate, neighborhood_counts, read_consolidated, read_geocoded, write_consolidated,
    write_geocoded,
};
use itbi_insights::services::discovery::discover_csv_urls;
use itbi_insights::services::download::download_all;
use itbi_insights::services::exporter::{InsightDocument, WINDOWS_MONTHS};
use itbi_insights::services::features::extract;
use itbi_insights::services::geocache::AddressCache;
use itbi_insights::services::geocoder::{GeocodeResolver, NominatimBackend};
use itbi_insights::services::price_index::StaticPriceIndex;
use itbi_insights::services::scoring::FORMULA_V0_1;
use itbi_insights::types::{GeocodedRecord, Granularity};

#[derive(Parser)]
#[command(name = "itbi-insights", version, about = "Niterói ITBI ingestion and insight pipeline")]
struct Cli {
    /// Data directory. Overrides ITBI_DATA_DIR and the config file.
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover the per-year CSV links on the publisher page.
    Discover {
        /// Print the discovered links as JSON on stdout.
        #[arg(long)]
        json: bool,
    },
    /// Download the annual CSVs into the data directory.
    Download {
        /// Restrict to these years (comma-separated). Default: all discovered.
        #[arg(long, value_delimiter = ',')]
        years: Vec<i32>,
        /// Re-download files that already exist locally.
        #[arg(long)]
        force: bool,
    },
    /// Clean and merge the annual CSVs into one consolidated table.
    Consolidate,
    /// Resolve coordinates for the consolidated table.
    Geocode {
        /// Back up and discard the address cache before starting.
        #[arg(long)]
        reset_cache: bool,
        /// Cap the number of fresh (non-cached) resolutions this run.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Aggregate, extract features, score and export the insight document.
    Insights {
        /// Geocoded table to read. Default: <data-dir>/consolidado_geo.csv.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Output JSON path. Default: <data-dir>/itbi_insights.json.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the whole pipeline end to end.
    Run {
        /// Cap the number of fresh geocoding resolutions.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = config::resolve_data_dir(cli.data_dir.as_deref());
    info!("itbi-insights {}", env!("CARGO_PKG_VERSION"));
    info!(data_dir = %data_dir.display(), "data directory resolved");

    match cli.command {
        Command::Discover { json } => cmd_discover(json).await,
        Command::Download { years, force } => cmd_download(&data_dir, &years, force).await,
        Command::Consolidate => cmd_consolidate(&data_dir),
        Command::Geocode { reset_cache, limit } => {
            cmd_geocode(&data_dir, reset_cache, limit).await
        }
        Command::Insights { input, output } => cmd_insights(&data_dir, input, output),
        Command::Run { limit } => {
            cmd_download(&data_dir, &[], false).await?;
            cmd_consolidate(&data_dir)?;
            cmd_geocode(&data_dir, false, limit).await?;
            cmd_insights(&data_dir, None, None)
        }
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(HTTP_USER_AGENT)
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .context("failed to build HTTP client")
}

async fn cmd_discover(json: bool) -> Result<()> {
    let client = http_client()?;
    let urls = discover_csv_urls(&client, BASE_URL).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&urls)?);
    } else {
        for (year, url) in &urls {
            println!("{year}: {url}");
        }
    }
    Ok(())
}

async fn cmd_download(data_dir: &Path, years: &[i32], force: bool) -> Result<()> {
    let client = http_client()?;
    let mut urls = discover_csv_urls(&client, BASE_URL).await;
    if !years.is_empty() {
        urls.retain(|year, _| years.contains(year));
    }

    let present = download_all(&client, &urls, data_dir, force).await;
    info!(files = present.len(), "download stage finished");
    Ok(())
}

fn cmd_consolidate(data_dir: &Path) -> Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(data_dir)
        .with_context(|| format!("cannot list data directory {}", data_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("transacoes_imobiliarias_") && n.ends_with(".csv"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let records = consolidate(&paths)?;
    write_consolidated(&records, &data_dir.join(CONSOLIDATED_FILE))?;

    let counts = neighborhood_counts(&records);
    let mut top: Vec<_> = counts.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (neighborhood, rows) in top.iter().take(10) {
        info!(%neighborhood, rows, "top neighborhood by row count");
    }
    Ok(())
}

async fn cmd_geocode(data_dir: &Path, reset_cache: bool, limit: Option<usize>) -> Result<()> {
    let cache_path = data_dir.join(GEOCACHE_FILE);

    if reset_cache {
        if let Some(backup) = AddressCache::reset(&cache_path)? {
            info!(backup = %backup.display(), "address cache backed up and reset");
        }
    }

    let cache = AddressCache::open(&cache_path)?;
    info!(cached_addresses = cache.len(), "address cache loaded");

    let records = read_consolidated(&data_dir.join(CONSOLIDATED_FILE))?;
    let backend = NominatimBackend::new().map_err(|e| anyhow::anyhow!(e))?;
    let mut resolver = GeocodeResolver::new(backend, cache);

    let geocoded = resolver.geocode_records(records, limit).await?;
    write_geocoded(geocoded, &data_dir.join(GEOCODED_FILE))?;
    Ok(())
}

fn cmd_insights(data_dir: &Path, input: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let input = input.unwrap_or_else(|| data_dir.join(GEOCODED_FILE));
    let output = output.unwrap_or_else(|| data_dir.join(INSIGHTS_FILE));

    let records = read_geocoded(&input)?;
    let insights = build_insights(&records);

    let document = InsightDocument::new(FORMULA_V0_1.version, insights);
    let written = document.write(&output)?;
    info!(file = %written.display(), insights = document.insights.len(), "insight document exported");
    Ok(())
}

/// Aggregate at both granularities, extract features over every window and
/// score. Street features benchmark against the neighborhood series.
fn build_insights(records: &[GeocodedRecord]) -> Vec<itbi_insights::services::scoring::ScoredInsight> {
    let index = StaticPriceIndex::builtin();

    let street_series = aggregate(records, Granularity::Street, &index);
    let neighborhood_series = aggregate(records, Granularity::Neighborhood, &index);
    info!(
        street_points = street_series.len(),
        neighborhood_points = neighborhood_series.len(),
        "monthly series aggregated"
    );

    let mut insights = Vec::new();
    for window in WINDOWS_MONTHS {
        let street_features = extract(
            &street_series,
            Granularity::Street,
            window,
            Some(&neighborhood_series),
        );
        let neighborhood_features =
            extract(&neighborhood_series, Granularity::Neighborhood, window, None);

        insights.extend(FORMULA_V0_1.score_all(street_features));
        insights.extend(FORMULA_V0_1.score_all(neighborhood_features));
    }
    insights
}
