use std::borrow::Cow;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::base;
use super::dates::BILINGUAL_GRAMMAR;
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::models::{Extra, Show};

const URL: &str = "https://wildpride.ca";
const SOURCE_ID: &str = "wild-pride";
const SOURCE_NAME: &str = "Wild Pride";
const COLOR: &str = "#e84393";

static CONTENT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.bcontent").expect("wild pride content selector"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("wild pride link selector"));

pub struct WildPride;

impl FestivalScraper for WildPride {
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
        parse_document(&repair_mojibake(&html), ctx.year)
    }
}

/// The site serves UTF-8 that arrives decoded as Latin-1 (`"Ã©"` for `"é"`). Re-encodes the
/// text to bytes and decodes it again; anything that is not such a round trip is left alone.
pub(crate) fn repair_mojibake(text: &str) -> Cow<'_, str> {
    if !text.contains('Ã') && !text.contains('â') {
        return Cow::Borrowed(text);
    }
    let bytes: Option<Vec<u8>> = text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect();
    match bytes.map(String::from_utf8) {
        Some(Ok(repaired)) => Cow::Owned(repaired),
        _ => Cow::Borrowed(text),
    }
}

/// Listings are `<h3>` title / `<div>` details pairs directly under the content block.
pub(crate) fn parse_document(html: &str, year: i32) -> Result<ScrapeReport, ExtractError> {
    let document = Html::parse_document(html);
    let content = document
        .select(&CONTENT_SELECTOR)
        .next()
        .ok_or_else(|| ExtractError::Layout("div.bcontent not found".into()))?;
    let children: Vec<ElementRef<'_>> = content.children().filter_map(ElementRef::wrap).collect();

    let mut report = ScrapeReport::default();
    for pair in children.chunks_exact(2) {
        let [heading, details] = pair else {
            continue;
        };
        if heading.value().name() != "h3" || details.value().name() != "div" {
            continue;
        }
        report.record(&base::inner_text(*heading), parse_listing(*heading, *details, year));
    }
    Ok(report)
}

fn parse_listing(
    heading: ElementRef<'_>,
    details: ElementRef<'_>,
    year: i32,
) -> Result<Show, ExtractError> {
    let (title, link) = match heading.select(&LINK_SELECTOR).next() {
        Some(anchor) => (
            base::inner_text(anchor),
            base::absolute_url(URL, anchor.value().attr("href").map(str::to_string)),
        ),
        None => {
            let text = base::inner_text(heading);
            let title = text.split(" by ").next().unwrap_or_default().trim().to_string();
            (title, None)
        }
    };

    let lines = base::text_lines(details, false);
    let field = |idx: usize| lines.get(idx).cloned().unwrap_or_default();
    let when = field(0);
    let showtimes = BILINGUAL_GRAMMAR.parse(&when, year, "");
    if showtimes.is_empty() {
        return Err(ExtractError::UnparsableDate(when));
    }

    let mut extra = Extra::new();
    extra.insert("location".into(), field(1).into());
    extra.insert("audience".into(), field(2).into());
    extra.insert("price".into(), field(3).into());

    Ok(Show::new(title, link.unwrap_or_else(|| URL.to_string()), showtimes)?.with_extras(extra))
}
