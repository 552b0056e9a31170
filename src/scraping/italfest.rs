use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;

use super::base;
use super::dates::{self, ENGLISH_GRAMMAR};
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::models::{Show, Showtime};

const URL: &str = "https://italfestmtl.ca/wp-json/wp/v2/evenements?per_page=100&lang=en";
const SOURCE_ID: &str = "italfest";
const SOURCE_NAME: &str = "Italfest";
const COLOR: &str = "#2ecc71";
const DESCRIPTION_CHARS: usize = 500;

static HEADING_OR_LIST_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6, ul").expect("italfest details selector")
});
static ITEM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li").expect("italfest list item selector"));
static AND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\band\b|\bet\b").expect("italfest and regex"));
static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+\d{3,}.*").expect("italfest address regex"));

pub struct Italfest;

impl FestivalScraper for Italfest {
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
        let body = ctx.fetch_url(URL)?;
        let (events, mut report) = parse_events(&body)?;

        let labels: Vec<String> = events.iter().map(|event| event.link.clone()).collect();
        let detail_ctx = ctx.clone();
        let year = ctx.year;
        let shows = base::fan_out(events, ctx.detail_workers, move |event: Event| {
            let page = detail_ctx.fetch_url(&event.link)?;
            event.into_show(&page, year)
        })?;
        for (label, show) in labels.iter().zip(shows) {
            report.record(label, show);
        }
        Ok(report)
    }
}

#[derive(Deserialize)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Deserialize)]
struct WpEvent {
    title: Rendered,
    #[serde(default)]
    link: String,
    content: Option<Rendered>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Event {
    title: String,
    link: String,
    description: String,
}

impl Event {
    fn into_show(self, detail_html: &str, year: i32) -> Result<Show, ExtractError> {
        let showtimes = parse_detail(detail_html, year);
        Ok(Show::new(self.title, self.link, showtimes)?
            .with_extra("description", self.description))
    }
}

pub(crate) fn parse_events(body: &str) -> Result<(Vec<Event>, ScrapeReport), ExtractError> {
    let raw: Vec<Value> = serde_json::from_str(body)?;
    let mut report = ScrapeReport::default();
    let mut events = Vec::new();
    for item in raw {
        match serde_json::from_value::<WpEvent>(item.clone()) {
            Ok(event) => events.push(to_event(event)),
            Err(err) => report.skip(&item.to_string(), &ExtractError::from(err)),
        }
    }
    Ok((events, report))
}

fn to_event(event: WpEvent) -> Event {
    let content = event
        .content
        .map(|content| html_text(&content.rendered))
        .unwrap_or_default();
    Event {
        title: html_text(&event.title.rendered),
        link: event.link,
        description: content.chars().take(DESCRIPTION_CHARS).collect(),
    }
}

/// WordPress returns entity-encoded HTML even for titles.
fn html_text(rendered: &str) -> String {
    base::inner_text(Html::parse_fragment(rendered).root_element())
}

/// The event page lists date and time, then the venue, in the first list after "Details".
pub(crate) fn parse_detail(html: &str, year: i32) -> Vec<Showtime> {
    let document = Html::parse_document(html);
    let mut seen_heading = false;
    let details = document.select(&HEADING_OR_LIST_SELECTOR).find(|el| {
        if el.value().name() == "ul" {
            return seen_heading;
        }
        if base::inner_text(*el).to_lowercase().contains("details") {
            seen_heading = true;
        }
        false
    });
    let Some(details) = details else {
        return Vec::new();
    };

    let items: Vec<String> = details.select(&ITEM_SELECTOR).take(2).map(base::inner_text).collect();
    let Some(when) = items.first() else {
        return Vec::new();
    };
    let venue = items.get(1).map(|text| clean_venue(text)).unwrap_or_default();
    parse_when(when, year)
        .into_iter()
        .map(|datetime| Showtime::new(datetime, venue.as_str()))
        .collect()
}

/// `"Saturday, August 9th, 2025 at 7 pm and 9 pm"`: one date, one showtime per time listed.
fn parse_when(text: &str, year: i32) -> Vec<chrono::NaiveDateTime> {
    let Some(date) = dates::find_month_day(&ENGLISH_GRAMMAR, text, year) else {
        return Vec::new();
    };
    AND_RE
        .split(text)
        .filter_map(dates::find_time)
        .map(|time| date.and_time(time))
        .collect()
}

fn clean_venue(text: &str) -> String {
    ADDRESS_RE.replace(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::testing::offline_context;

    const SAMPLE_EVENTS: &str = r#"[
        {
            "title": { "rendered": "Opera in the Park &#8211; La Traviata" },
            "link": "https://italfestmtl.ca/en/evenements/opera/",
            "content": { "rendered": "<p>An evening of   Verdi under the stars.</p>" }
        },
        {
            "title": { "rendered": "Cooking demo" },
            "link": "https://italfestmtl.ca/en/evenements/cooking/",
            "content": { "rendered": "<p>Nonna's secrets.</p>" }
        },
        { "link": "https://italfestmtl.ca/en/evenements/broken/" }
    ]"#;

    const SAMPLE_DETAIL: &str = r#"
    <html><body>
        <h2>About</h2>
        <ul><li>Not this list</li></ul>
        <h3>Event Details</h3>
        <div>
            <ul>
                <li><strong>Date:</strong> Saturday, August 9th, 2025 at 7 pm and 9 h 30</li>
                <li>Parc Dante 6851 Rue Dante, Montréal</li>
            </ul>
        </div>
    </body></html>
    "#;

    #[test]
    fn parses_wordpress_events() {
        let (events, report) = parse_events(SAMPLE_EVENTS).expect("parse json");
        assert_eq!(events.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(events[0].title, "Opera in the Park – La Traviata");
        assert_eq!(events[0].description, "An evening of Verdi under the stars.");
    }

    #[test]
    fn detail_page_yields_one_showtime_per_time() {
        let showtimes = parse_detail(SAMPLE_DETAIL, 2025);
        let times: Vec<String> = showtimes
            .iter()
            .map(|s| s.datetime().format("%Y-%m-%d %H:%M").to_string())
            .collect();
        assert_eq!(times, vec!["2025-08-09 19:00", "2025-08-09 09:30"]);
        assert_eq!(showtimes[0].venue(), "Parc Dante");
    }

    #[test]
    fn events_without_schedule_are_skipped() {
        let ctx = offline_context(&[
            (URL.to_string(), SAMPLE_EVENTS.to_string()),
            (
                "https://italfestmtl.ca/en/evenements/opera/".to_string(),
                SAMPLE_DETAIL.to_string(),
            ),
            (
                "https://italfestmtl.ca/en/evenements/cooking/".to_string(),
                "<html><body><p>Details to come</p></body></html>".to_string(),
            ),
        ]);
        let report = Italfest.extract(&ctx).expect("extract");
        assert_eq!(report.shows.len(), 1);
        assert_eq!(report.shows[0].showtimes().len(), 2);
        assert_eq!(report.skipped.len(), 2);
    }
}
