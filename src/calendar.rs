//! Combined calendar: flattens every source's show file into per-day occurrences and renders
//! them as one static page.

use std::{
    collections::{BTreeMap, HashSet},
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::{info, warn};

use crate::collection;
use crate::config::AppConfig;
use crate::models::{Extra, Show};
use crate::scraping;
use crate::utils;

const GOOGLE_CALENDAR_URL: &str = "https://calendar.google.com/calendar/u/0/r/eventedit";
const UNKNOWN_VENUE: &str = "TBD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSource {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub color: String,
}

impl CalendarSource {
    /// Every registered source with its show file under the configured shows directory.
    pub fn registry(config: &AppConfig) -> Vec<CalendarSource> {
        scraping::list_scrapers()
            .into_iter()
            .map(|info| CalendarSource {
                path: config.shows_path(&info.id),
                id: info.id,
                name: info.name,
                color: info.color,
            })
            .collect()
    }
}

/// One showtime of one show, with the show's fields and the showtime's venue and extras merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub title: String,
    pub link: String,
    pub datetime: NaiveDateTime,
    pub venue: String,
    pub extra: Extra,
}

impl Occurrence {
    pub fn date(&self) -> NaiveDate {
        self.datetime.date()
    }

    pub fn time(&self) -> String {
        self.datetime.format("%H:%M").to_string()
    }

    pub fn description(&self) -> Option<&str> {
        self.extra
            .get("description")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    }
}

pub fn flatten(shows: &[Show]) -> Vec<Occurrence> {
    shows
        .iter()
        .flat_map(|show| {
            show.showtimes().iter().map(move |showtime| {
                let mut extra = show.extra().clone();
                for (key, value) in showtime.extra() {
                    extra.insert(key.clone(), value.clone());
                }
                Occurrence {
                    title: show.title().to_string(),
                    link: show.link().to_string(),
                    datetime: showtime.datetime(),
                    venue: showtime.venue().to_string(),
                    extra,
                }
            })
        })
        .collect()
}

/// Groups occurrences by calendar date. Within a date they are ordered by time, ties keep input
/// order, and exact repeats (same title, link, time and venue) keep only the first.
pub fn group_by_date(occurrences: Vec<Occurrence>) -> BTreeMap<NaiveDate, Vec<Occurrence>> {
    let mut occurrences = occurrences;
    occurrences.sort_by_key(|occurrence| occurrence.datetime);

    let mut seen: HashSet<(String, String, NaiveDateTime, String)> = HashSet::new();
    let mut by_date: BTreeMap<NaiveDate, Vec<Occurrence>> = BTreeMap::new();
    for occurrence in occurrences {
        let key = (
            occurrence.title.clone(),
            occurrence.link.clone(),
            occurrence.datetime,
            occurrence.venue.clone(),
        );
        if !seen.insert(key) {
            continue;
        }
        by_date.entry(occurrence.date()).or_default().push(occurrence);
    }
    by_date
}

pub fn load_shows(path: &Path) -> Result<BTreeMap<NaiveDate, Vec<Occurrence>>> {
    let shows = collection::load(path)?;
    Ok(group_by_date(flatten(&shows)))
}

/// Every day from the earliest to the latest date, inclusive. Empty input gives an empty range.
pub fn build_date_range<I>(dates: I) -> Vec<NaiveDate>
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut bounds: Option<(NaiveDate, NaiveDate)> = None;
    for date in dates {
        bounds = Some(match bounds {
            Some((min, max)) => (min.min(date), max.max(date)),
            None => (date, date),
        });
    }
    match bounds {
        Some((start, end)) => start.iter_days().take_while(|day| *day <= end).collect(),
        None => Vec::new(),
    }
}

/// One source's occurrences on one day.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDay {
    pub source: usize,
    pub occurrences: Vec<Occurrence>,
}

#[derive(Debug, Default)]
pub struct CombinedCalendar {
    pub sources: Vec<CalendarSource>,
    pub by_date: BTreeMap<NaiveDate, Vec<SourceDay>>,
}

impl CombinedCalendar {
    pub fn dates(&self) -> Vec<NaiveDate> {
        build_date_range(self.by_date.keys().copied())
    }

    pub fn total_events(&self) -> usize {
        self.by_date
            .values()
            .flat_map(|days| days.iter())
            .map(|day| day.occurrences.len())
            .sum()
    }

    pub fn source(&self, day: &SourceDay) -> &CalendarSource {
        &self.sources[day.source]
    }
}

/// Loads every source in registry order. Sources whose file is missing or unreadable are left out.
pub fn load_combined(sources: Vec<CalendarSource>) -> CombinedCalendar {
    let mut by_date: BTreeMap<NaiveDate, Vec<SourceDay>> = BTreeMap::new();
    for (idx, source) in sources.iter().enumerate() {
        if !source.path.exists() {
            warn!(source = %source.id, path = %source.path.display(), "no show file, skipping");
            continue;
        }
        let grouped = match load_shows(&source.path) {
            Ok(grouped) => grouped,
            Err(err) => {
                warn!(source = %source.id, error = %err, "unreadable show file, skipping");
                continue;
            }
        };
        for (date, occurrences) in grouped {
            by_date.entry(date).or_default().push(SourceDay {
                source: idx,
                occurrences,
            });
        }
    }
    CombinedCalendar { sources, by_date }
}

/// Prefilled "add to Google Calendar" link with a two-hour slot.
pub fn google_calendar_link(occurrence: &Occurrence, source_name: &str) -> String {
    let start = occurrence.datetime;
    let end = start + Duration::hours(2);
    let stamp = |dt: NaiveDateTime| dt.format("%Y%m%dT%H%M%S").to_string();

    let mut details = occurrence.link.clone();
    if let Some(description) = occurrence.description() {
        details.push_str("\n\n");
        details.push_str(description);
    }

    let mut params = vec![
        ("text", format!("{} ({source_name})", occurrence.title)),
        ("dates", format!("{}/{}", stamp(start), stamp(end))),
        ("details", details),
    ];
    if !occurrence.venue.is_empty() && occurrence.venue != UNKNOWN_VENUE {
        params.push(("location", occurrence.venue.clone()));
    }

    match reqwest::Url::parse_with_params(GOOGLE_CALENDAR_URL, &params) {
        Ok(url) => url.to_string(),
        Err(err) => {
            warn!(error = %err, "could not build calendar link");
            GOOGLE_CALENDAR_URL.to_string()
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Montréal festivals</title>
  <link rel="stylesheet" href="static/style.css">
</head>
<body>
"#;

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Renders the month grid: blank cells up to the weekday of the first date, then one cell per
/// day with each source's occurrences in that source's color.
pub fn render_html(calendar: &CombinedCalendar) -> Result<String, std::fmt::Error> {
    let dates = calendar.dates();
    let mut html = String::from(PAGE_HEAD);

    writeln!(html, "<ul class=\"legend\">")?;
    for source in &calendar.sources {
        writeln!(
            html,
            "  <li><span class=\"swatch\" style=\"background:{}\"></span>{}</li>",
            escape_html(&source.color),
            escape_html(&source.name)
        )?;
    }
    writeln!(html, "</ul>")?;

    writeln!(html, "<div class=\"calendar\">")?;
    for weekday in WEEKDAYS {
        writeln!(html, "  <div class=\"weekday\">{weekday}</div>")?;
    }
    if let Some(first) = dates.first() {
        for _ in 0..first.weekday().num_days_from_monday() {
            writeln!(html, "  <div class=\"day empty\"></div>")?;
        }
    }
    for date in &dates {
        render_day(&mut html, calendar, *date)?;
    }
    writeln!(html, "</div>")?;
    writeln!(html, "</body>\n</html>")?;
    Ok(html)
}

fn render_day(html: &mut String, calendar: &CombinedCalendar, date: NaiveDate) -> std::fmt::Result {
    writeln!(
        html,
        "  <div class=\"day\" id=\"{}\">",
        date.format("%Y-%m-%d")
    )?;
    writeln!(
        html,
        "    <h2>{}</h2>",
        date.format("%a %b %-d")
    )?;
    for day in calendar.by_date.get(&date).into_iter().flatten() {
        let source = calendar.source(day);
        for occurrence in &day.occurrences {
            writeln!(
                html,
                "    <div class=\"event\" style=\"border-color:{}\">",
                escape_html(&source.color)
            )?;
            writeln!(html, "      <span class=\"time\">{}</span>", occurrence.time())?;
            writeln!(
                html,
                "      <a class=\"title\" href=\"{}\">{}</a>",
                escape_html(&occurrence.link),
                escape_html(&occurrence.title)
            )?;
            if !occurrence.venue.is_empty() {
                writeln!(
                    html,
                    "      <span class=\"venue\">{}</span>",
                    escape_html(&occurrence.venue)
                )?;
            }
            writeln!(
                html,
                "      <span class=\"source\">{}</span>",
                escape_html(&source.name)
            )?;
            writeln!(
                html,
                "      <a class=\"add\" href=\"{}\">+ Calendar</a>",
                escape_html(&google_calendar_link(occurrence, &source.name))
            )?;
            writeln!(html, "    </div>")?;
        }
    }
    writeln!(html, "  </div>")
}

pub fn copy_assets(from: &Path, to: &Path) -> Result<usize> {
    utils::copy_dir(from, to)
        .with_context(|| format!("copying assets from {} to {}", from.display(), to.display()))
}

/// Writes `index.html` (and assets, when configured) into the site directory.
pub fn write_site(calendar: &CombinedCalendar, config: &AppConfig) -> Result<PathBuf> {
    let html = render_html(calendar).context("rendering calendar")?;
    fs::create_dir_all(&config.site_dir)
        .with_context(|| format!("creating {}", config.site_dir.display()))?;
    let index = config.site_dir.join("index.html");
    fs::write(&index, html).with_context(|| format!("writing {}", index.display()))?;

    if let Some(assets) = &config.assets_dir {
        let copied = copy_assets(assets, &config.site_dir.join("static"))?;
        info!(files = copied, "copied static assets");
    }
    Ok(index)
}
