use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use super::base;
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::models::{Extra, Show, Showtime};

const URL: &str = "https://montreal.haitienfolie.com/wp-json/festival/v1/events?per_page=100";
const POST_URL: &str = "https://montreal.haitienfolie.com/index.php";
const SOURCE_ID: &str = "haiti-en-folie";
const SOURCE_NAME: &str = "Haïti en Folie";
const COLOR: &str = "#2980b9";
const ONLINE_VENUE: &str = "EN LIGNE";

pub struct HaitiEnFolie;

impl FestivalScraper for HaitiEnFolie {
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
        parse_events(&body, ctx.year)
    }
}

/// The API answers either a bare event array or `{ "event": [...], "place": [...] }`.
pub(crate) fn parse_events(body: &str, year: i32) -> Result<ScrapeReport, ExtractError> {
    let data: Value = serde_json::from_str(body)?;
    let (events, venues) = match &data {
        Value::Array(events) => (events.as_slice(), HashMap::new()),
        Value::Object(map) => (event_list(map), venue_names(map)),
        _ => return Err(ExtractError::Layout("unexpected events payload".into())),
    };

    let year_prefix = year.to_string();
    let mut report = ScrapeReport::default();
    for event in events {
        if !field(event, "date").starts_with(&year_prefix) {
            debug!(title = %field(event, "title"), "skipping event from another edition");
            continue;
        }
        let outcome = parse_event(event, &venues);
        let label = field(event, "title");
        match outcome {
            Err(err) => report.skip(&format!("{label} {event}"), &err),
            ok => report.record(&label, ok),
        }
    }
    Ok(report)
}

fn event_list(map: &Map<String, Value>) -> &[Value] {
    ["event", "events", "data"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn venue_names(map: &Map<String, Value>) -> HashMap<String, String> {
    map.get("place")
        .and_then(Value::as_array)
        .map(|places| {
            places
                .iter()
                .map(|place| (field(place, "id"), field(place, "title")))
                .filter(|(id, name)| !id.is_empty() && !name.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Reads a string-ish field; the API mixes numbers and strings for ids.
fn field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

fn parse_event(event: &Value, venues: &HashMap<String, String>) -> Result<Show, ExtractError> {
    let title = field(event, "title");
    let date = field(event, "date");
    let start = field(event, "start_time");
    if start.is_empty() {
        return Err(ExtractError::MissingField("start_time"));
    }
    let datetime = base::parse_date_and_time(&date, &start)
        .ok_or_else(|| ExtractError::UnparsableDate(format!("{date} {start}")))?;

    let venue_id = field(event, "venue_id");
    let venue = venues.get(&venue_id).cloned().unwrap_or(venue_id);
    if venue == ONLINE_VENUE {
        return Err(ExtractError::Excluded("online-only event".into()));
    }

    let post_id = field(event, "wp_post_id");
    let link = if post_id.is_empty() {
        URL.to_string()
    } else {
        format!("{POST_URL}?p={post_id}")
    };

    let mut extra = Extra::new();
    extra.insert("festival".into(), SOURCE_NAME.into());
    for (source_key, key) in [
        ("description", "description"),
        ("sub_title", "sub_title"),
        ("subject", "subject"),
        ("type", "type"),
        ("photo_small", "image"),
        ("photo_big", "image_large"),
    ] {
        extra.insert(key.into(), field(event, source_key).into());
    }

    Ok(Show::new(title, link, vec![Showtime::new(datetime, venue)])?.with_extras(extra))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JSON: &str = r#"{
        "event": [
            {
                "title": "Soirée Konpa",
                "date": "2025-07-18",
                "start_time": "21:30:00",
                "venue_id": 12,
                "wp_post_id": 4410,
                "description": " Le meilleur du konpa. ",
                "type": "Concert",
                "sub_title": "",
                "photo_small": "https://montreal.haitienfolie.com/img/konpa-s.jpg"
            },
            {
                "title": "Table ronde",
                "date": "2025-07-19",
                "start_time": "14:00:00",
                "venue_id": "99"
            },
            {
                "title": "Conférence virtuelle",
                "date": "2025-07-20",
                "start_time": "19:00:00",
                "venue_id": 7
            },
            {
                "title": "Édition passée",
                "date": "2024-07-20",
                "start_time": "19:00:00"
            },
            {
                "title": "Sans heure",
                "date": "2025-07-21"
            }
        ],
        "place": [
            { "id": 12, "title": "Parc La Fontaine" },
            { "id": "7", "title": "EN LIGNE" }
        ]
    }"#;

    #[test]
    fn parses_events_with_venue_lookup() {
        let report = parse_events(SAMPLE_JSON, 2025).expect("parse json");
        assert_eq!(report.shows.len(), 2);
        assert_eq!(report.skipped.len(), 2, "online event and missing start time");

        let konpa = &report.shows[0];
        assert_eq!(konpa.link(), "https://montreal.haitienfolie.com/index.php?p=4410");
        assert_eq!(konpa.showtimes()[0].venue(), "Parc La Fontaine");
        assert_eq!(
            konpa.first_datetime().format("%Y-%m-%d %H:%M").to_string(),
            "2025-07-18 21:30"
        );
        assert_eq!(konpa.extra()["festival"], "Haïti en Folie");
        assert_eq!(konpa.extra()["description"], "Le meilleur du konpa.");
        assert_eq!(konpa.extra()["type"], "Concert");
        assert!(konpa.extra().get("sub_title").is_none());

        let round_table = &report.shows[1];
        assert_eq!(round_table.showtimes()[0].venue(), "99");
        assert_eq!(round_table.link(), URL);
    }

    #[test]
    fn online_events_are_excluded_with_reason() {
        let report = parse_events(SAMPLE_JSON, 2025).expect("parse json");
        assert!(report
            .skipped
            .iter()
            .any(|skip| skip.reason.contains("online-only")));
    }

    #[test]
    fn bare_arrays_are_accepted() {
        let body = r#"[{ "title": "Bal", "date": "2025-07-22", "start_time": "20:00:00" }]"#;
        let report = parse_events(body, 2025).expect("parse json");
        assert_eq!(report.shows.len(), 1);
        assert_eq!(report.shows[0].showtimes()[0].venue(), "");
    }
}
