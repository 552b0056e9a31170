use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::base;
use super::dates::{self, BILINGUAL_GRAMMAR};
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::models::{Show, Showtime};

const URL: &str = "https://www.festivalnuitsdafrique.com/en/programmation-festival-nuits-dafrique-2025-gratuit/?category=664&concert=yes";
const SITE: &str = "https://www.festivalnuitsdafrique.com";
const SOURCE_ID: &str = "nuits-d-afrique";
const SOURCE_NAME: &str = "Nuits d'Afrique";
const COLOR: &str = "#d35400";

static CARD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-card").expect("nuits card selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-card-title").expect("nuits title selector"));
static OVERLAY_SPAN_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-card-overlay span").expect("nuits overlay selector"));
static TIME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".event-card-overlay .event-time").expect("nuits time selector"));
static DESCRIPTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".text-container").expect("nuits description selector"));
static FALLBACK_DESCRIPTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".description").expect("nuits fallback description selector"));
static IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".img-cont img").expect("nuits image selector"));

pub struct NuitsDAfrique;

impl FestivalScraper for NuitsDAfrique {
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
        let (cards, mut report) = parse_listing(&html, ctx.year);

        let labels: Vec<String> = cards.iter().map(|card| card.link.clone()).collect();
        let detail_ctx = ctx.clone();
        let shows = base::fan_out(cards, ctx.detail_workers, move |card: Card| {
            let page = detail_ctx.fetch_url(&card.link)?;
            card.into_show(&parse_detail(&page))
        })?;
        for (label, show) in labels.iter().zip(shows) {
            report.record(label, show);
        }
        Ok(report)
    }
}

/// What the listing card tells us before the detail page is fetched.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Card {
    title: String,
    link: String,
    datetime: NaiveDateTime,
}

impl Card {
    fn into_show(self, detail: &Detail) -> Result<Show, ExtractError> {
        Ok(
            Show::new(self.title, self.link, vec![Showtime::new(self.datetime, "")])?
                .with_extra("image", detail.image.as_str())
                .with_extra("description", detail.description.as_str()),
        )
    }
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct Detail {
    description: String,
    image: String,
}

pub(crate) fn parse_listing(html: &str, year: i32) -> (Vec<Card>, ScrapeReport) {
    let document = Html::parse_document(html);
    let mut report = ScrapeReport::default();
    let mut cards = Vec::new();
    for card in document.select(&CARD_SELECTOR) {
        match parse_card(card, year) {
            Ok(parsed) => cards.push(parsed),
            Err(err) => report.skip(&base::inner_text(card), &err),
        }
    }
    (cards, report)
}

fn parse_card(card: ElementRef<'_>, year: i32) -> Result<Card, ExtractError> {
    let title = base::require(base::first_text(&card, &TITLE_SELECTOR), "title")?;
    let href = card.value().attr("href").map(str::to_string);
    let link = base::require(base::absolute_url(SITE, href), "link")?;

    let spans: Vec<String> = card.select(&OVERLAY_SPAN_SELECTOR).map(base::inner_text).collect();
    let (Some(day), Some(month)) = (spans.get(1), spans.get(2)) else {
        return Err(ExtractError::MissingField("date"));
    };
    let time_text = base::require(base::first_text(&card, &TIME_SELECTOR), "time")?;
    let datetime = card_datetime(day, month, &time_text, year)
        .ok_or_else(|| ExtractError::UnparsableDate(format!("{day} {month} {time_text}")))?;

    Ok(Card {
        title,
        link,
        datetime,
    })
}

fn card_datetime(day: &str, month: &str, time: &str, year: i32) -> Option<NaiveDateTime> {
    let day: u32 = day.trim().parse().ok()?;
    let month = BILINGUAL_GRAMMAR.month_number(month)?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_time(dates::find_time(time)?))
}

pub(crate) fn parse_detail(html: &str) -> Detail {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let description = base::first_text(&root, &DESCRIPTION_SELECTOR)
        .or_else(|| base::first_text(&root, &FALLBACK_DESCRIPTION_SELECTOR))
        .unwrap_or_default();
    let image = base::first_attr(&root, &IMAGE_SELECTOR, "src")
        .and_then(|src| base::absolute_url(SITE, Some(src)))
        .unwrap_or_default();
    Detail { description, image }
}
