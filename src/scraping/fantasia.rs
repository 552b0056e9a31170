use chrono::{NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;

use super::base;
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::cache::Request;
use crate::models::{Show, Showtime};

const URL: &str = "https://fantasiafestival.com";
const SOURCE_ID: &str = "fantasia";
const SOURCE_NAME: &str = "Fantasia";
const COLOR: &str = "#c0392b";
/// Program pages are keyed by local midnight expressed as a UTC epoch, shifted to Montréal.
const UTC_SHIFT_SECS: i64 = 5 * 3600;

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("fantasia link selector"));
static DIRECTOR_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".block--media__content__visible .small").expect("fantasia director selector")
});
static SPECS_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".block--media__specs span").expect("fantasia specs selector"));
static DESCRIPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".block--media__content__hidden").expect("fantasia description selector")
});
static IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img").expect("fantasia image selector"));

pub struct Fantasia;

impl FestivalScraper for Fantasia {
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
        for day in festival_days(ctx.year) {
            let body = ctx.fetch(&day_request(day))?;
            report.merge(parse_day(&body)?);
        }
        report.shows = base::dedupe_last_wins(report.shows);
        Ok(report)
    }
}

fn festival_days(year: i32) -> Vec<NaiveDate> {
    let (Some(start), Some(end)) = (
        NaiveDate::from_ymd_opt(year, 7, 16),
        NaiveDate::from_ymd_opt(year, 8, 3),
    ) else {
        return Vec::new();
    };
    start.iter_days().take_while(|day| *day <= end).collect()
}

pub(crate) fn day_request(day: NaiveDate) -> Request {
    let midnight = day.and_time(chrono::NaiveTime::MIN);
    let timestamp = Utc.from_utc_datetime(&midnight).timestamp() + UTC_SHIFT_SECS;
    Request::get(format!("{URL}/en/api/horaire/{timestamp}/program")).header(
        "Referer",
        format!("{URL}/en/schedule?date={}", day.format("%Y-%m-%d")),
    )
}

#[derive(Debug, Deserialize)]
struct ProgramItem {
    #[serde(default)]
    titre: String,
    #[serde(rename = "exactTime", default)]
    exact_time: String,
    #[serde(default)]
    html: String,
}

/// One day of the program API. Days without screenings come back as an empty payload.
pub(crate) fn parse_day(body: &str) -> Result<ScrapeReport, ExtractError> {
    let value: Value = serde_json::from_str(body)?;
    let mut report = ScrapeReport::default();
    let Some(items) = value.get("data").and_then(Value::as_array) else {
        return Ok(report);
    };

    for raw in items {
        let outcome = serde_json::from_value::<ProgramItem>(raw.clone())
            .map_err(ExtractError::from)
            .and_then(|item| parse_item(&item));
        let label = match &outcome {
            Ok(_) => String::new(),
            Err(_) => raw.to_string(),
        };
        report.record(&label, outcome);
    }
    Ok(report)
}

fn parse_item(item: &ProgramItem) -> Result<Show, ExtractError> {
    let fragment = Html::parse_fragment(&item.html);
    let root = fragment.root_element();

    let link = base::require(base::first_attr(&root, &LINK_SELECTOR, "href"), "link")?;
    let datetime = base::parse_local_datetime(&item.exact_time)
        .ok_or_else(|| ExtractError::UnparsableDate(item.exact_time.clone()))?;

    let specs: Vec<String> = root.select(&SPECS_SELECTOR).map(base::inner_text).collect();
    let duration = specs
        .get(1)
        .filter(|text| text.contains("mins"))
        .and_then(|text| text.split_whitespace().next())
        .and_then(|minutes| minutes.parse::<u64>().ok());

    let mut show = Show::new(
        item.titre.as_str(),
        base::absolute_url(URL, Some(link)).unwrap_or_default(),
        vec![Showtime::new(datetime, "")],
    )?
    .with_extra(
        "director",
        base::first_text(&root, &DIRECTOR_SELECTOR).unwrap_or_default(),
    )
    .with_extra("country", specs.first().cloned().unwrap_or_default())
    .with_extra(
        "description",
        base::first_text(&root, &DESCRIPTION_SELECTOR).unwrap_or_default(),
    )
    .with_extra("image", image_url(&root));
    if let Some(minutes) = duration {
        show = show.with_extra("duration", minutes);
    }
    Ok(show)
}

fn image_url(root: &scraper::ElementRef<'_>) -> String {
    let Some(img) = root.select(&IMAGE_SELECTOR).next() else {
        return String::new();
    };
    let src = img
        .value()
        .attr("data-srcset")
        .filter(|s| !s.is_empty())
        .or_else(|| img.value().attr("src"))
        .unwrap_or_default();
    if src.is_empty() || src.starts_with("http") {
        src.to_string()
    } else {
        format!("{URL}{src}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection;
    use crate::scraping::testing::offline_context;
    use serde_json::json;

    const SAMPLE_HTML: &str = r#"
    <div class="block--media">
        <a href="https://fantasiafestival.com/en/film/dead-talents-society">
            <img data-srcset="/media/films/dead-talents.jpg" src="/media/films/dead-talents-small.jpg">
        </a>
        <div class="block--media__content">
            <div class="block--media__content__visible">
                <h3>Dead Talents Society</h3>
                <p class="small">John Hsu</p>
            </div>
            <div class="block--media__specs"><span>Taiwan</span><span>110 mins</span></div>
            <div class="block--media__content__hidden">
                A ghost who cannot scare anyone   enrols in a haunting academy.
            </div>
        </div>
    </div>
    "#;

    fn day_body(items: Value) -> String {
        json!({ "data": items }).to_string()
    }

    fn screening(time: &str) -> Value {
        json!({ "titre": "Dead Talents Society", "exactTime": time, "html": SAMPLE_HTML })
    }

    #[test]
    fn parses_program_item() {
        let report = parse_day(&day_body(json!([screening("2025-07-17T00:30:00+00:00")])))
            .expect("parse day");
        assert!(report.skipped.is_empty());
        let show = &report.shows[0];
        assert_eq!(show.title(), "Dead Talents Society");
        assert_eq!(
            show.link(),
            "https://fantasiafestival.com/en/film/dead-talents-society"
        );
        assert_eq!(
            show.first_datetime().format("%Y-%m-%d %H:%M").to_string(),
            "2025-07-16 20:30"
        );
        assert_eq!(show.extra()["director"], "John Hsu");
        assert_eq!(show.extra()["country"], "Taiwan");
        assert_eq!(show.extra()["duration"], 110);
        assert_eq!(
            show.extra()["image"],
            "https://fantasiafestival.com/media/films/dead-talents.jpg"
        );
        assert_eq!(
            show.extra()["description"],
            "A ghost who cannot scare anyone enrols in a haunting academy."
        );
    }

    #[test]
    fn bad_items_are_skipped_not_fatal() {
        let items = json!([
            screening("2025-07-18 19:00:00"),
            { "titre": "No Link", "exactTime": "2025-07-18 21:00:00", "html": "<p>TBA</p>" },
            { "titre": "No Time", "exactTime": "soon", "html": SAMPLE_HTML },
        ]);
        let report = parse_day(&day_body(items)).expect("parse day");
        assert_eq!(report.shows.len(), 1);
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn empty_days_yield_nothing() {
        assert!(parse_day("[]").expect("empty array").shows.is_empty());
        assert!(parse_day(r#"{"data": null}"#).expect("null data").shows.is_empty());
    }

    #[test]
    fn day_requests_use_shifted_epoch() {
        let day = NaiveDate::from_ymd_opt(2025, 7, 16).expect("date");
        let request = day_request(day);
        assert_eq!(
            request.url(),
            "https://fantasiafestival.com/en/api/horaire/1752642000/program"
        );
        assert_eq!(festival_days(2025).len(), 19);
    }

    #[test]
    fn warm_cache_replay_is_byte_identical() {
        let repeated = screening("2025-07-20 19:00:00");
        let pages: Vec<(String, String)> = festival_days(2025)
            .into_iter()
            .enumerate()
            .map(|(idx, day)| {
                let body = match idx {
                    0 => day_body(json!([screening("2025-07-16 21:00:00"), repeated.clone()])),
                    1 => day_body(json!([repeated.clone()])),
                    _ => day_body(json!([])),
                };
                (day_request(day).identity(), body)
            })
            .collect();
        let ctx = offline_context(&pages);

        let first = Fantasia.extract(&ctx).expect("first run");
        let second = Fantasia.extract(&ctx).expect("second run");
        assert_eq!(first.shows.len(), 2, "overlapping windows collapse");

        let a = collection::to_json_string(&first.shows).expect("json");
        let b = collection::to_json_string(&second.shows).expect("json");
        assert_eq!(a, b);
    }
}
