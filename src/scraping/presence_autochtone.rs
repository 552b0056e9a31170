use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::base;
use super::dates::{self, BILINGUAL_GRAMMAR};
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::models::{Show, Showtime};

const URL: &str = "https://presenceautochtone.ca/en/the-festival/calendar/";
const SOURCE_ID: &str = "presence-autochtone";
const SOURCE_NAME: &str = "Présence Autochtone";
const COLOR: &str = "#6d4c41";

static CONTAINER_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".uk-filter-container").expect("presence container selector"));
static EVENT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".uk-box-content").expect("presence event selector"));
static TIME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".uk-time").expect("presence time selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".uk-h4").expect("presence title selector"));
static LOCATION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".uk-location").expect("presence location selector"));
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:&|\band\b|\bet\b|,)\s*").expect("presence separator regex")
});

pub struct PresenceAutochtone;

impl FestivalScraper for PresenceAutochtone {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn url(&self) -> &'static str {
        URL
    }

    fn color(&self) -> &'static str {
        COLOR
    }

    fn extract(&self, ctx: &ScrapeContext) -> Result<ScrapeReport, ExtractError> {
        let html = ctx.fetch_url(URL)?;
        parse_document(&html, ctx.year)
    }
}

pub(crate) fn parse_document(html: &str, year: i32) -> Result<ScrapeReport, ExtractError> {
    let document = Html::parse_document(html);
    let container = document
        .select(&CONTAINER_SELECTOR)
        .next()
        .ok_or_else(|| ExtractError::Layout("calendar filter container not found".into()))?;

    let mut report = ScrapeReport::default();
    for event in container.select(&EVENT_SELECTOR) {
        // Boxes without a date are section banners, not events.
        let Some(when) = base::first_text(&event, &TIME_SELECTOR) else {
            continue;
        };
        report.record(&base::inner_text(event), parse_event(event, &when, year));
    }
    Ok(report)
}

fn parse_event(event: ElementRef<'_>, when: &str, year: i32) -> Result<Show, ExtractError> {
    let starts = parse_starts(when, year);
    if starts.is_empty() {
        return Err(ExtractError::UnparsableDate(when.to_string()));
    }

    let anchor = base::require(event.select(&TITLE_SELECTOR).next(), "title")?;
    let title = base::inner_text(anchor);
    let link = base::absolute_url(URL, anchor.value().attr("href").map(str::to_string));
    let link = base::require(link, "link")?;
    let venue = base::first_text(&event, &LOCATION_SELECTOR).unwrap_or_default();

    let showtimes = starts
        .into_iter()
        .map(|start| Showtime::new(start, venue.as_str()))
        .collect();
    Ok(Show::new(title, link, showtimes)?)
}

/// `"August 8, de 19 h à 21 h & 22 h"`: one day, then start times separated by `&`, `and` or
/// commas. End times are ignored.
fn parse_starts(text: &str, year: i32) -> Vec<NaiveDateTime> {
    let Some(date) = dates::find_month_day(&BILINGUAL_GRAMMAR, text, year) else {
        return Vec::new();
    };
    let Some((_, times)) = text.split_once(',') else {
        return Vec::new();
    };
    SEPARATOR_RE
        .split(times)
        .filter_map(dates::find_time)
        .map(|time| date.and_time(time))
        .collect()
}
