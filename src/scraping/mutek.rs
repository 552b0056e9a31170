use chrono::NaiveDate;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use super::base;
use super::dates;
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::models::{Show, Showtime};

const URL: &str = "https://montreal.mutek.org";
const PROGRAM_URL: &str = "https://montreal.mutek.org/ajax/programs/920";
const SOURCE_ID: &str = "mutek";
const SOURCE_NAME: &str = "MUTEK";
const COLOR: &str = "#8e44ad";
const FESTIVAL_DAYS: [u32; 6] = [19, 20, 21, 22, 23, 24];
const FESTIVAL_MONTH: u32 = 8;

static SHOW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".single-show").expect("mutek show selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".single-show__title span").expect("mutek title selector"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".single-show__title").expect("mutek link selector"));
static ARTIST_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".single-show__artist span").expect("mutek artist selector"));
static COUNTRY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("sup").expect("mutek country selector"));
static LOCATION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".single-show__location").expect("mutek location selector"));
static CTA_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".single-show__ctas .btn-label").expect("mutek cta selector"));
static DATE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".single-show__date p").expect("mutek date selector"));

pub struct Mutek;

impl FestivalScraper for Mutek {
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
        let mut report = ScrapeReport::default();
        for day in FESTIVAL_DAYS {
            let Some(date) = NaiveDate::from_ymd_opt(ctx.year, FESTIVAL_MONTH, day) else {
                continue;
            };
            let body = ctx.fetch_url(&day_url(date))?;
            report.merge(parse_day(&body, date)?);
        }
        Ok(report)
    }
}

fn day_url(date: NaiveDate) -> String {
    format!("{PROGRAM_URL}?date={}", date.format("%d.%m"))
}

#[derive(Deserialize)]
struct DayPayload {
    #[serde(default)]
    html: String,
}

pub(crate) fn parse_day(body: &str, date: NaiveDate) -> Result<ScrapeReport, ExtractError> {
    let payload: DayPayload = serde_json::from_str(body)?;
    let fragment = Html::parse_fragment(&payload.html);

    let mut report = ScrapeReport::default();
    for card in fragment.select(&SHOW_SELECTOR) {
        let label = base::inner_text(card);
        report.record(&label, parse_show(card, date));
    }
    Ok(report)
}

fn parse_show(card: ElementRef<'_>, date: NaiveDate) -> Result<Show, ExtractError> {
    let title = base::require(base::first_text(&card, &TITLE_SELECTOR), "title")?;
    let link = base::absolute_url(URL, base::first_attr(&card, &LINK_SELECTOR, "href"));
    let link = base::require(link, "link")?;
    let venue = base::first_text(&card, &LOCATION_SELECTOR).unwrap_or_default();

    // "6:30 pm_11:00 pm"
    let hours = card
        .select(&DATE_SELECTOR)
        .nth(1)
        .map(base::inner_text)
        .ok_or(ExtractError::MissingField("time"))?;
    let mut bounds = hours.split('_').map(str::trim);
    let start = bounds
        .next()
        .and_then(dates::parse_clock)
        .ok_or_else(|| ExtractError::UnparsableDate(hours.clone()))?;
    let mut showtime = Showtime::new(date.and_time(start), venue);
    if let Some(end) = bounds.next().and_then(dates::parse_clock) {
        showtime = showtime.with_extra("end_time", end.format("%H:%M").to_string());
    }

    let ticket_status = match base::first_text(&card, &CTA_SELECTOR).as_deref() {
        Some("Free") => "free",
        _ => "ticketed",
    };

    Ok(Show::new(title, link, vec![showtime])?
        .with_extra("artists", artists(card))
        .with_extra("ticket_status", ticket_status))
}

/// `"Caterina Barbieri<sup>IT</sup>"` becomes `"Caterina Barbieri (IT)"`.
fn artists(card: ElementRef<'_>) -> String {
    card.select(&ARTIST_SELECTOR)
        .map(|artist| {
            let name = base::inner_text(artist);
            match base::first_text(&artist, &COUNTRY_SELECTOR) {
                Some(country) => {
                    let bare = name.trim_end_matches(country.as_str()).trim();
                    format!("{bare} ({country})")
                }
                None => name,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
