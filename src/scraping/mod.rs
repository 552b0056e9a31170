pub mod base;
pub mod cinemania;
pub mod dates;
pub mod fantasia;
pub mod fireworks;
pub mod haiti_en_folie;
pub mod italfest;
pub mod mutek;
pub mod nuits_d_afrique;
pub mod presence_autochtone;
pub mod shakespeare;
pub mod theatre_de_verdure;
pub mod wild_pride;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{FetchError, HttpCache, Request};
use crate::collection;
use crate::models::{ModelError, Show};
use crate::utils;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("unparsable date text: {0:?}")]
    UnparsableDate(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("excluded: {0}")]
    Excluded(String),
    #[error("page layout changed: {0}")]
    Layout(String),
    #[error("worker pool failed: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("detail worker panicked: {0}")]
    WorkerPanicked(String),
}

impl ExtractError {
    /// Errors that mean the whole source is broken rather than one listing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExtractError::Layout(_) | ExtractError::Runtime(_))
    }
}

/// Everything an extractor needs for one run; one cache per run, passed explicitly.
#[derive(Clone)]
pub struct ScrapeContext {
    pub cache: Arc<HttpCache>,
    pub year: i32,
    pub detail_workers: usize,
}

impl ScrapeContext {
    pub fn new(cache: Arc<HttpCache>, year: i32, detail_workers: usize) -> Self {
        Self {
            cache,
            year,
            detail_workers,
        }
    }

    pub fn fetch(&self, request: &Request) -> Result<String, FetchError> {
        self.cache.fetch(request)
    }

    pub fn fetch_url(&self, url: &str) -> Result<String, FetchError> {
        self.cache.fetch(&Request::get(url))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub label: String,
    pub reason: String,
    /// The error says the source itself is broken, not just this listing.
    pub fatal: bool,
}

/// Shows produced by one source run plus the listings that were left out and why.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub shows: Vec<Show>,
    pub skipped: Vec<Skipped>,
}

impl ScrapeReport {
    pub fn record(&mut self, label: &str, outcome: Result<Show, ExtractError>) {
        match outcome {
            Ok(show) => self.shows.push(show),
            Err(err) => self.skip(label, &err),
        }
    }

    pub fn record_all(&mut self, label: &str, outcome: Result<Vec<Show>, ExtractError>) {
        match outcome {
            Ok(shows) => self.shows.extend(shows),
            Err(err) => self.skip(label, &err),
        }
    }

    pub fn skip(&mut self, label: &str, err: &ExtractError) {
        warn!(item = %utils::truncate_chars(label, 300), error = %err, "skipping listing");
        self.skipped.push(Skipped {
            label: label.to_string(),
            reason: err.to_string(),
            fatal: err.is_fatal(),
        });
    }

    pub fn first_fatal(&self) -> Option<&Skipped> {
        self.skipped.iter().find(|skip| skip.fatal)
    }

    pub fn merge(&mut self, other: ScrapeReport) {
        self.shows.extend(other.shows);
        self.skipped.extend(other.skipped);
    }
}

pub trait FestivalScraper: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn url(&self) -> &'static str;
    /// Display color for this source on the combined calendar.
    fn color(&self) -> &'static str;
    fn extract(&self, ctx: &ScrapeContext) -> Result<ScrapeReport, ExtractError>;
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct ScraperInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub color: String,
}

pub fn active_scrapers() -> Vec<Box<dyn FestivalScraper>> {
    vec![
        Box::new(fantasia::Fantasia),
        Box::new(shakespeare::Shakespeare),
        Box::new(mutek::Mutek),
        Box::new(theatre_de_verdure::TheatreDeVerdure),
        Box::new(fireworks::Fireworks),
        Box::new(nuits_d_afrique::NuitsDAfrique),
        Box::new(haiti_en_folie::HaitiEnFolie),
        Box::new(italfest::Italfest),
        Box::new(wild_pride::WildPride),
        Box::new(presence_autochtone::PresenceAutochtone),
        Box::new(cinemania::Cinemania),
    ]
}

pub fn list_scrapers() -> Vec<ScraperInfo> {
    active_scrapers()
        .into_iter()
        .map(|scraper| ScraperInfo {
            id: scraper.id().to_string(),
            name: scraper.name().to_string(),
            url: scraper.url().to_string(),
            color: scraper.color().to_string(),
        })
        .collect()
}

pub fn find_scraper(id: &str) -> Option<Box<dyn FestivalScraper>> {
    active_scrapers()
        .into_iter()
        .find(|scraper| scraper.id() == id)
}

/// Runs one source and writes its show file. An empty result, or a listing that failed with a
/// fatal error, is treated as a broken source and leaves any previously written file untouched.
pub fn run_and_save(
    scraper: &dyn FestivalScraper,
    ctx: &ScrapeContext,
    path: &Path,
) -> anyhow::Result<ScrapeReport> {
    info!(source = scraper.id(), "scraping");
    let mut report = scraper
        .extract(ctx)
        .with_context(|| format!("{} scrape failed", scraper.name()))?;
    if let Some(skip) = report.first_fatal() {
        bail!("{} scrape failed at {}: {}", scraper.name(), skip.label, skip.reason);
    }
    report.shows = base::fail_if_empty(scraper.id(), std::mem::take(&mut report.shows))?;
    collection::save(&report.shows, path)?;
    info!(
        source = scraper.id(),
        shows = report.shows.len(),
        skipped = report.skipped.len(),
        path = %path.display(),
        "saved shows"
    );
    Ok(report)
}

pub fn run_single(id: &str, ctx: &ScrapeContext, path: &Path) -> anyhow::Result<ScrapeReport> {
    let scraper = find_scraper(id).ok_or_else(|| anyhow!("unknown source id: {id}"))?;
    run_and_save(scraper.as_ref(), ctx, path)
}

/// Runs every scraper in order; one source failing does not stop the others.
pub fn run_all<F>(
    scrapers: &[Box<dyn FestivalScraper>],
    ctx: &ScrapeContext,
    path_for: F,
) -> Vec<(&'static str, anyhow::Result<ScrapeReport>)>
where
    F: Fn(&str) -> PathBuf,
{
    scrapers
        .iter()
        .map(|scraper| {
            let outcome = run_and_save(scraper.as_ref(), ctx, &path_for(scraper.id()));
            if let Err(err) = &outcome {
                warn!(source = scraper.id(), error = %format!("{err:#}"), "source failed");
            }
            (scraper.id(), outcome)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cache::OfflineTransport;

    /// A context whose cache already holds `pages` and never touches the network.
    pub(crate) fn offline_context(pages: &[(String, String)]) -> ScrapeContext {
        let cache = HttpCache::open_in_memory(Box::new(OfflineTransport)).expect("cache");
        for (identity, body) in pages {
            cache.put(identity, body).expect("seed cache");
        }
        ScrapeContext::new(Arc::new(cache), 2025, 4)
    }
}
