use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::base;
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::models::{Show, Showtime};

const URL: &str =
    "https://montreal.ca/calendrier?dc_relation.url=/lieux/theatre-de-verdure&shownResults=25";
const SITE: &str = "https://montreal.ca";
const SOURCE_ID: &str = "theatre-de-verdure";
const SOURCE_NAME: &str = "Theatre de Verdure";
const COLOR: &str = "#16a085";

static LIST_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".list-group").expect("verdure list selector"));
static ITEM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".list-group-item-action").expect("verdure item selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".list-group-item-title").expect("verdure title selector"));
static TIME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("verdure time selector"));

pub struct TheatreDeVerdure;

impl FestivalScraper for TheatreDeVerdure {
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
        parse_document(&html)
    }
}

pub(crate) fn parse_document(html: &str) -> Result<ScrapeReport, ExtractError> {
    let document = Html::parse_document(html);
    if document.select(&LIST_SELECTOR).next().is_none() {
        return Err(ExtractError::Layout("calendar list not found".into()));
    }

    let mut report = ScrapeReport::default();
    for item in document.select(&ITEM_SELECTOR) {
        report.record(&base::inner_text(item), parse_item(item));
    }
    Ok(report)
}

fn parse_item(item: ElementRef<'_>) -> Result<Show, ExtractError> {
    let title = base::require(base::first_text(&item, &TITLE_SELECTOR), "title")?;
    let href = item.value().attr("href").map(str::to_string);
    let link = base::require(base::absolute_url(SITE, href), "link")?;
    let stamp = base::require(base::first_attr(&item, &TIME_SELECTOR, "datetime"), "datetime")?;
    let datetime =
        base::parse_local_datetime(&stamp).ok_or(ExtractError::UnparsableDate(stamp))?;

    Ok(Show::new(title, link, vec![Showtime::new(datetime, "")])?)
}
