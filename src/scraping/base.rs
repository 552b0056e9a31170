use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use futures::{
    stream::{self, StreamExt},
    FutureExt,
};
use scraper::{ElementRef, Node, Selector};
use tokio::runtime::{Builder, Handle};
use tracing::warn;

use super::dates;
use super::ExtractError;
use crate::models::Show;

/// Every festival is in Montréal; offset-aware timestamps are stored as wall-clock time here.
pub const TIMEZONE: Tz = chrono_tz::America::Montreal;

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(inner_text)
        .filter(|text| !text.is_empty())
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

pub fn absolute_url(base: &str, href: Option<String>) -> Option<String> {
    let href = href?;
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let base_url = reqwest::Url::parse(base).ok()?;
    base_url.join(href).ok().map(|u| u.to_string())
}

pub fn require<T>(value: Option<T>, field: &'static str) -> Result<T, ExtractError> {
    value.ok_or(ExtractError::MissingField(field))
}

/// Document text as the browser would lay it out in source order, split into trimmed non-empty
/// lines. With `links_as_urls`, every `<a href>` is replaced by its target.
pub fn text_lines(root: ElementRef<'_>, links_as_urls: bool) -> Vec<String> {
    let mut buffer = String::new();
    collect_text(root, links_as_urls, &mut buffer);
    buffer
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn collect_text(element: ElementRef<'_>, links_as_urls: bool, buffer: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => buffer.push_str(text),
            Node::Element(el) => {
                if matches!(el.name(), "script" | "style") {
                    continue;
                }
                if links_as_urls && el.name() == "a" {
                    if let Some(href) = el.attr("href") {
                        buffer.push_str(href);
                        continue;
                    }
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, links_as_urls, buffer);
                }
            }
            _ => {}
        }
    }
}

/// Parses ISO 8601 timestamps as sources publish them. Offset-aware values are converted to
/// Montréal wall-clock time; naive values are taken as already local.
pub fn parse_local_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(to_local(dt));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M%z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(to_local(dt));
        }
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    None
}

fn to_local(dt: DateTime<FixedOffset>) -> NaiveDateTime {
    dt.with_timezone(&TIMEZONE).naive_local()
}

/// Combines an ISO date (`2025-07-18`) with a clock time in any of the usual forms.
pub fn parse_date_and_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S")
        .ok()
        .or_else(|| dates::parse_clock(time))?;
    Some(date.and_time(time))
}

/// Keeps one show per `(title, first showtime)`. A later duplicate replaces the earlier one in
/// its original position.
pub fn dedupe_last_wins(shows: Vec<Show>) -> Vec<Show> {
    let mut positions: HashMap<(String, NaiveDateTime), usize> = HashMap::new();
    let mut unique: Vec<Show> = Vec::with_capacity(shows.len());
    for show in shows {
        let key = (show.title().to_string(), show.first_datetime());
        match positions.get(&key) {
            Some(&idx) => unique[idx] = show,
            None => {
                positions.insert(key, unique.len());
                unique.push(show);
            }
        }
    }
    unique
}

/// Runs `work` over `items` on at most `workers` blocking threads and returns one outcome per
/// item, in input order. A worker that panics yields `ExtractError::WorkerPanicked` for its item.
/// Uses the ambient tokio runtime when there is one.
pub fn fan_out<T, R, F>(
    items: Vec<T>,
    workers: usize,
    work: F,
) -> std::io::Result<Vec<Result<R, ExtractError>>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Result<R, ExtractError> + Send + Sync + 'static,
{
    let run = in_order(items, workers.max(1), Arc::new(work));
    if let Ok(handle) = Handle::try_current() {
        return Ok(handle.block_on(run));
    }
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(run))
}

async fn in_order<T, R, F>(
    items: Vec<T>,
    workers: usize,
    work: Arc<F>,
) -> Vec<Result<R, ExtractError>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Result<R, ExtractError> + Send + Sync + 'static,
{
    let outcomes = stream::iter(items.into_iter().enumerate())
        .map(|(idx, item)| {
            let work = Arc::clone(&work);
            tokio::task::spawn_blocking(move || work(item)).map(move |joined| (idx, joined))
        })
        .buffer_unordered(workers)
        .map(|(idx, joined)| {
            let outcome = joined.unwrap_or_else(|err| {
                warn!(item = idx, error = %err, "detail worker panicked");
                Err(ExtractError::WorkerPanicked(err.to_string()))
            });
            (idx, outcome)
        });
    let mut done: Vec<(usize, Result<R, ExtractError>)> = outcomes.collect().await;
    done.sort_by_key(|(idx, _)| *idx);
    done.into_iter().map(|(_, outcome)| outcome).collect()
}

pub fn fail_if_empty<T>(source_id: &str, shows: Vec<T>) -> Result<Vec<T>> {
    if shows.is_empty() {
        Err(anyhow!("no shows scraped for {source_id}"))
    } else {
        Ok(shows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Showtime;
    use scraper::Html;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, 0))
            .expect("valid datetime")
    }

    #[test]
    fn resolves_relative_links() {
        assert_eq!(
            absolute_url("https://montreal.ca/calendrier", Some("/evenements/x".into())).as_deref(),
            Some("https://montreal.ca/evenements/x")
        );
        assert_eq!(
            absolute_url("https://a.ca/", Some("https://b.ca/y".into())).as_deref(),
            Some("https://b.ca/y")
        );
        assert_eq!(absolute_url("https://a.ca/", Some("  ".into())), None);
    }

    #[test]
    fn offset_timestamps_become_montreal_wall_clock() {
        assert_eq!(
            parse_local_datetime("2025-07-20T00:30:00+00:00"),
            Some(at(2025, 7, 19, 20, 30))
        );
        assert_eq!(
            parse_local_datetime("2025-08-12T19:00:00-04:00"),
            Some(at(2025, 8, 12, 19, 0))
        );
        assert_eq!(
            parse_local_datetime("2025-11-05 18:15:00"),
            Some(at(2025, 11, 5, 18, 15))
        );
        assert_eq!(parse_local_datetime("next tuesday"), None);
    }

    #[test]
    fn combines_date_and_clock() {
        assert_eq!(
            parse_date_and_time("2025-07-18", "21:30:00"),
            Some(at(2025, 7, 18, 21, 30))
        );
        assert_eq!(
            parse_date_and_time("2025-07-18", "8:30 pm"),
            Some(at(2025, 7, 18, 20, 30))
        );
        assert_eq!(parse_date_and_time("2025-07-18", ""), None);
    }

    #[test]
    fn dedupe_keeps_last_in_first_position() {
        let make = |title: &str, dt, link: &str| {
            Show::new(title, link, vec![Showtime::new(dt, "")]).expect("valid show")
        };
        let a = at(2025, 7, 16, 19, 0);
        let b = at(2025, 7, 17, 19, 0);
        let shows = vec![
            make("Alpha", a, "https://old"),
            make("Beta", b, "https://b"),
            make("Alpha", a, "https://new"),
            make("Alpha", b, "https://other-day"),
        ];

        let unique = dedupe_last_wins(shows);
        let summary: Vec<(&str, &str)> = unique.iter().map(|s| (s.title(), s.link())).collect();
        assert_eq!(
            summary,
            vec![
                ("Alpha", "https://new"),
                ("Beta", "https://b"),
                ("Alpha", "https://other-day"),
            ]
        );
    }

    #[test]
    fn text_lines_flattens_markup_and_links() {
        let html = Html::parse_fragment(
            "<div><p>Program</p>\n<p>Italy\n<b>July 5</b>, 2025</p>\n<a href=\"https://t.ca/it\">Tickets</a><script>var x;</script></div>",
        );
        let root = html.root_element();
        assert_eq!(
            text_lines(root, true),
            vec!["Program", "Italy", "July 5, 2025", "https://t.ca/it"]
        );
        assert_eq!(text_lines(root, false).last().map(String::as_str), Some("Tickets"));
    }

    #[test]
    fn fan_out_preserves_input_order() {
        let items: Vec<u64> = (0..20).collect();
        let results = fan_out(items, 4, |n| {
            std::thread::sleep(std::time::Duration::from_millis(20 - n));
            Ok(n * 10)
        })
        .expect("runtime");
        let values: Vec<u64> = results.into_iter().map(|r| r.expect("no failures")).collect();
        assert_eq!(values, (0..20).map(|n| n * 10).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_worker_becomes_an_item_error() {
        let results = fan_out(vec![1u32, 2, 3], 2, |n| {
            if n == 2 {
                panic!("detail page exploded");
            }
            Ok(n)
        })
        .expect("runtime");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().ok(), Some(&1));
        assert!(matches!(results[1], Err(ExtractError::WorkerPanicked(_))));
        assert_eq!(results[2].as_ref().ok(), Some(&3));
    }

    #[test]
    fn empty_results_are_an_error() {
        assert!(fail_if_empty::<u8>("mutek", Vec::new()).is_err());
        assert_eq!(fail_if_empty("mutek", vec![1]).expect("non-empty"), vec![1]);
    }
}
