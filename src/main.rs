use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use festival_calendar::calendar::{self, CalendarSource};
use festival_calendar::scraping::{self, FestivalScraper, ScrapeContext};
use festival_calendar::{AppConfig, HttpCache, HttpTransport, OfflineTransport};

#[derive(Parser)]
#[command(name = "festival-calendar")]
#[command(about = "Scrape Montréal festival programs and render a combined calendar")]
struct Cli {
    /// Config file (defaults to the data directory's config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Festival year to scrape, overriding the config
    #[arg(long, global = true)]
    year: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered sources
    List,
    /// Scrape sources into their show files
    Scrape {
        /// Source ids; all sources when omitted
        ids: Vec<String>,
    },
    /// Render the combined calendar from existing show files
    Render,
    /// Drop every cached response
    CacheClear,
    /// Write the effective config to disk
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("festival_calendar=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).map_err(|e| anyhow!(e))?;
    if let Some(year) = cli.year {
        config.year = year;
    }

    match cli.command {
        Commands::List => {
            for info in scraping::list_scrapers() {
                println!("{:<22} {:<28} {}", info.id, info.name, info.url);
            }
            Ok(())
        }
        Commands::Scrape { ids } => {
            let scrapers = resolve_scrapers(&ids)?;
            // Extractors do blocking I/O; the whole run stays off the async workers.
            tokio::task::spawn_blocking(move || scrape(&config, scrapers))
                .await
                .context("scrape task panicked")?
        }
        Commands::Render => render(&config),
        Commands::CacheClear => {
            let cache = HttpCache::open(
                &config.cache_path,
                Box::new(OfflineTransport),
                config.rate_limit(),
            )?;
            let removed = cache.clear()?;
            println!("Removed {removed} cached responses from {}", config.cache_path.display());
            Ok(())
        }
        Commands::InitConfig => {
            let path = config
                .save(cli.config.as_deref())
                .map_err(|e| anyhow!(e))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn resolve_scrapers(ids: &[String]) -> Result<Vec<Box<dyn FestivalScraper>>> {
    if ids.is_empty() {
        return Ok(scraping::active_scrapers());
    }
    ids.iter()
        .map(|id| {
            scraping::find_scraper(id).ok_or_else(|| {
                let known: Vec<String> =
                    scraping::list_scrapers().into_iter().map(|info| info.id).collect();
                anyhow!("unknown source {id:?}; known sources: {}", known.join(", "))
            })
        })
        .collect()
}

/// Runs each source in turn against one shared cache. A failing source is reported and the
/// rest still run; the command fails if any did.
fn scrape(config: &AppConfig, scrapers: Vec<Box<dyn FestivalScraper>>) -> Result<()> {
    let transport = HttpTransport::new(config.request_timeout(), &config.user_agent)?;
    let cache = HttpCache::open(&config.cache_path, Box::new(transport), config.rate_limit())?;
    let ctx = ScrapeContext::new(Arc::new(cache), config.year, config.detail_workers);

    let mut failed = Vec::new();
    let names: Vec<&str> = scrapers.iter().map(|scraper| scraper.name()).collect();
    let outcomes = scraping::run_all(&scrapers, &ctx, |id| config.shows_path(id));
    for (name, (id, outcome)) in names.into_iter().zip(outcomes) {
        match outcome {
            Ok(report) => {
                println!("{name}: scraped {} events", report.shows.len());
                if !report.skipped.is_empty() {
                    println!("  skipped {} listings", report.skipped.len());
                }
            }
            Err(err) => {
                eprintln!("{name}: failed: {err:#}");
                failed.push(id);
            }
        }
    }

    if !failed.is_empty() {
        bail!("{} source(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

fn render(config: &AppConfig) -> Result<()> {
    let combined = calendar::load_combined(CalendarSource::registry(config));
    if combined.by_date.is_empty() {
        bail!(
            "no shows found under {}; run `festival-calendar scrape` first",
            config.shows_dir.display()
        );
    }
    let index = calendar::write_site(&combined, config)?;
    info!(
        events = combined.total_events(),
        days = combined.dates().len(),
        "rendered calendar"
    );
    println!("Wrote {}", index.display());
    Ok(())
}
