use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use scraper::Html;

use super::base;
use super::dates::{self, ENGLISH_GRAMMAR};
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::cache::Request;
use crate::models::{Show, Showtime};

const URL: &str = "https://www.sixflags.com/larondeen/linternational-des-feux/program";
const REFERER: &str = "https://www.sixflags.com/larondeen/events/linternational-des-feux";
const SOURCE_ID: &str = "fireworks";
const SOURCE_NAME: &str = "Fireworks";
const COLOR: &str = "#e67e22";
const PROGRAM_HEADING: &str = "Program";
const SHOW_HOUR: u32 = 22;

pub struct Fireworks;

impl FestivalScraper for Fireworks {
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
        let request = Request::get(URL)
            .header("Referer", REFERER)
            .header("Sec-Fetch-Dest", "document");
        let html = ctx.fetch(&request)?;
        parse_document(&html, ctx.year)
    }
}

/// The program page has no useful markup; it is read as text lines where each competitor's
/// name sits right above its `"Month D, YYYY"` date, followed by a ticket link.
pub(crate) fn parse_document(html: &str, year: i32) -> Result<ScrapeReport, ExtractError> {
    let document = Html::parse_document(html);
    let lines = base::text_lines(document.root_element(), true);
    let start = lines
        .iter()
        .position(|line| line == PROGRAM_HEADING)
        .ok_or_else(|| ExtractError::Layout("program heading not found".into()))?;
    let lines = &lines[start..];

    let year_marker = format!(", {year}");
    let mut report = ScrapeReport::default();
    let mut entries: BTreeSet<(NaiveDate, String, String)> = BTreeSet::new();
    for (idx, line) in lines.iter().enumerate().skip(1) {
        if !line.contains(&year_marker) || line.contains("summer") {
            continue;
        }
        let date_text = line.replace(" ,", ",");
        let title = lines[idx - 1].clone();
        let Some(date) = dates::find_month_day(&ENGLISH_GRAMMAR, &date_text, year) else {
            report.skip(&title, &ExtractError::UnparsableDate(date_text));
            continue;
        };
        let link = lines[idx..]
            .iter()
            .find(|candidate| candidate.contains("http"))
            .cloned()
            .unwrap_or_else(|| URL.to_string());
        entries.insert((date, title, link));
    }

    let show_time = NaiveTime::from_hms_opt(SHOW_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);
    for (date, title, link) in entries {
        let show = Show::new(title.as_str(), link, vec![Showtime::new(date.and_time(show_time), "")]);
        report.record(&title, show.map_err(ExtractError::from));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"
    <html><body>
    <nav><a href="/larondeen">Home</a></nav>
    <h1>L'International des Feux Loto-Québec</h1>
    <p>Every summer, July 5, 2025 to August 2, 2025</p>
    <h2>Program</h2>
    <div class="card">
        <h3>Italy</h3>
        <p>Saturday, July 5 , 2025</p>
        <a href="https://www.sixflags.com/larondeen/tickets/italy">Buy tickets</a>
    </div>
    <div class="card">
        <h3>Canada</h3>
        <p>Thursday, July 10, 2025</p>
        <a href="https://www.sixflags.com/larondeen/tickets/canada">Buy tickets</a>
    </div>
    <div class="card">
        <h3>Italy</h3>
        <p>Saturday, July 5, 2025</p>
        <a href="https://www.sixflags.com/larondeen/tickets/italy">Buy tickets</a>
    </div>
    <p>Closing summer show, August 2, 2025</p>
    </body></html>
    "#;

    #[test]
    fn parses_program_lines() {
        let report = parse_document(SAMPLE_HTML, 2025).expect("parse html");
        let summary: Vec<(String, String, String)> = report
            .shows
            .iter()
            .map(|show| {
                (
                    show.title().to_string(),
                    show.first_datetime().format("%Y-%m-%d %H:%M").to_string(),
                    show.link().to_string(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (
                    "Italy".to_string(),
                    "2025-07-05 22:00".to_string(),
                    "https://www.sixflags.com/larondeen/tickets/italy".to_string()
                ),
                (
                    "Canada".to_string(),
                    "2025-07-10 22:00".to_string(),
                    "https://www.sixflags.com/larondeen/tickets/canada".to_string()
                ),
            ]
        );
        assert!(report.shows[0].showtimes()[0].venue().is_empty());
    }

    #[test]
    fn missing_program_heading_is_fatal() {
        let err = parse_document("<html><body><h2>Tickets</h2></body></html>", 2025)
            .expect_err("layout changed");
        assert!(err.is_fatal());
    }
}
