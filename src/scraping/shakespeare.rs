use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::base;
use super::dates::{self, ENGLISH_GRAMMAR};
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::models::{Show, Showtime};

const URL: &str = "https://www.repercussiontheatre.com/summer-tour-2025/";
const SOURCE_ID: &str = "shakespeare";
const SOURCE_NAME: &str = "Shakespeare in the Park";
const COLOR: &str = "#27ae60";
const TITLE: &str = "The Importance of Being Earnest";
const COMPANY: &str = "Repercussion Theatre";
/// The first two text blocks on the tour page are the introduction.
const INTRO_BLOCKS: usize = 2;

static BLOCK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.et_pb_text_inner").expect("shakespeare block selector"));
static DATE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h3").expect("shakespeare date selector"));
static VENUE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h6").expect("shakespeare venue selector"));

pub struct Shakespeare;

impl FestivalScraper for Shakespeare {
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

/// The whole tour is one show; each tour stop is a showtime.
pub(crate) fn parse_document(html: &str, year: i32) -> Result<ScrapeReport, ExtractError> {
    let document = Html::parse_document(html);
    let blocks: Vec<ElementRef<'_>> = document.select(&BLOCK_SELECTOR).collect();
    if blocks.len() <= INTRO_BLOCKS {
        return Err(ExtractError::Layout("tour date blocks not found".into()));
    }

    let mut report = ScrapeReport::default();
    let mut showtimes = Vec::new();
    for block in blocks.into_iter().skip(INTRO_BLOCKS) {
        let Some(date_text) = base::first_text(&block, &DATE_SELECTOR) else {
            continue;
        };
        match parse_stop(block, &date_text, year) {
            Ok(showtime) => showtimes.push(showtime),
            Err(err) => report.skip(&base::inner_text(block), &err),
        }
    }

    let show = Show::new(TITLE, URL, showtimes).map(|show| show.with_extra("company", COMPANY));
    report.record(TITLE, show.map_err(ExtractError::from));
    Ok(report)
}

fn parse_stop(block: ElementRef<'_>, date_text: &str, year: i32) -> Result<Showtime, ExtractError> {
    let datetime = parse_stop_datetime(date_text, year)
        .ok_or_else(|| ExtractError::UnparsableDate(date_text.to_string()))?;

    let parts: Vec<String> = block
        .select(&VENUE_SELECTOR)
        .map(base::inner_text)
        .map(|text| text.trim_end_matches(',').trim().to_string())
        .collect();
    let park = base::require(parts.first().cloned(), "park")?;
    let city = parts.get(1).cloned().unwrap_or_default();

    Ok(Showtime::new(datetime, parts.join(" / "))
        .with_extra("city", city)
        .with_extra("park", park))
}

/// `"July 24, 7pm"`: the page never states the year.
fn parse_stop_datetime(text: &str, year: i32) -> Option<NaiveDateTime> {
    let date = dates::find_month_day(&ENGLISH_GRAMMAR, text, year)?;
    let time = dates::find_time(text)?;
    Some(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"
    <html><body>
    <div class="et_pb_text_inner"><h2>Summer Tour 2025</h2></div>
    <div class="et_pb_text_inner"><p>Bring a blanket!</p></div>
    <div class="et_pb_text_inner">
        <h3>July 8, 7pm</h3>
        <h6>Parc Jean-Drapeau,</h6>
        <h6>Montréal</h6>
    </div>
    <div class="et_pb_text_inner"><p>Rain date policy</p></div>
    <div class="et_pb_text_inner">
        <h3>July 24, 7:30pm</h3>
        <h6>Centennial Park</h6>
        <h6>Dollard-des-Ormeaux</h6>
    </div>
    <div class="et_pb_text_inner">
        <h3>Date to be confirmed</h3>
        <h6>Parc Lafontaine</h6>
    </div>
    </body></html>
    "#;

    #[test]
    fn parses_tour_stops_as_one_show() {
        let report = parse_document(SAMPLE_HTML, 2025).expect("parse html");
        assert_eq!(report.shows.len(), 1);
        assert_eq!(report.skipped.len(), 1, "the undated stop is reported");

        let show = &report.shows[0];
        assert_eq!(show.title(), TITLE);
        assert_eq!(show.extra()["company"], COMPANY);

        let stops = show.showtimes();
        assert_eq!(stops.len(), 2);
        assert_eq!(
            stops[0].datetime().format("%Y-%m-%d %H:%M").to_string(),
            "2025-07-08 19:00"
        );
        assert_eq!(stops[0].venue(), "Parc Jean-Drapeau / Montréal");
        assert_eq!(stops[0].extra()["park"], "Parc Jean-Drapeau");
        assert_eq!(stops[0].extra()["city"], "Montréal");
        assert_eq!(
            stops[1].datetime().format("%Y-%m-%d %H:%M").to_string(),
            "2025-07-24 19:30"
        );
    }

    #[test]
    fn missing_blocks_is_a_layout_error() {
        let err = parse_document("<html><body><p>Coming soon</p></body></html>", 2025)
            .expect_err("layout changed");
        assert!(err.is_fatal());
    }
}
