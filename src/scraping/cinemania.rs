use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};

use super::base;
use super::dates;
use super::{ExtractError, FestivalScraper, ScrapeContext, ScrapeReport};
use crate::cache::Request;
use crate::models::{Extra, Show, Showtime};

const URL: &str = "https://festivalcinemania.com";
const GRAPHQL_URL: &str = "https://festivalcinemania.com/graphql";
const SOURCE_ID: &str = "cinemania";
const SOURCE_NAME: &str = "Cinemania";
const COLOR: &str = "#34495e";
const EDITION_ID: u32 = 10;
const DIRECTOR_ROLES: [&str; 3] = ["Réalisateur", "Réalisatrice", "Director"];

const LISTING_QUERY: &str = r#"query listingPrograms($lang: [String], $venue: [String], $editionID: [QueryArgument], $currentdate: [QueryArgument], $currentID: QueryArgument, $limit: Int = 99) {
  programs: entries(
    section: "program_zf"
    site: $lang
    relatedToEntries: [{slug: $venue, site: $lang}]
    program_edition_id: $editionID
    program_date_start: $currentdate
    limit: $limit
    id: ["not", $currentID]
    orderBy: "program_date_start ASC"
  ) {
    ...Program
    __typename
  }
}

fragment Program on program_zf_program_zf_Entry {
  id
  typeHandle
  url
  title
  program_ticket_url
  program_ticket_code
  program_date_start
  program_date_end
  program_name
  program_description
  program_description_short
  select_venue {
    ...Venue
    __typename
  }
  program_films(orderBy: "heure ASC") {
    ... on program_films_bloc_program_films_BlockType {
      id
      film {
        ...Movie
        __typename
      }
      mention
      heure
      __typename
    }
    __typename
  }
  __typename
}

fragment Movie on film_zf_film_zf_Entry {
  id
  url
  slug
  typeHandle
  title
  select_category {
    ... on category_zf_default_Entry {
      id
      slug
      title
      __typename
    }
    __typename
  }
  select_generic {
    ... on generic_zf_default_Entry {
      id
      generic_id
      generic_post
      generic_name_first
      generic_name_last
      __typename
    }
    __typename
  }
  select_section {
    ... on section_zf_section_zf_Entry {
      id
      slug
      title
      __typename
    }
    __typename
  }
  select_country {
    ... on country_zf_default_Entry {
      id
      slug
      title
      __typename
    }
    __typename
  }
  film_image {
    ... on film_image_bloc_film_image_BlockType {
      image {
        url
        alt
        title
        __typename
      }
      principal
      poster
      __typename
    }
    __typename
  }
  __typename
}

fragment Venue on venue_zf_venue_zf_Entry {
  id
  typeHandle
  url
  slug
  title
  venue_name
  venue_address
  __typename
}"#;

pub struct Cinemania;

impl FestivalScraper for Cinemania {
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
            report.merge(parse_programs(&body)?);
        }
        Ok(report)
    }
}

fn festival_days(year: i32) -> Vec<NaiveDate> {
    let (Some(start), Some(end)) = (
        NaiveDate::from_ymd_opt(year, 11, 5),
        NaiveDate::from_ymd_opt(year, 11, 16),
    ) else {
        return Vec::new();
    };
    start.iter_days().take_while(|day| *day <= end).collect()
}

/// One GraphQL query per day; each body hashes to its own cache identity.
pub(crate) fn day_request(day: NaiveDate) -> Request {
    let date = day.format("%Y-%m-%d");
    let body = json!({
        "operationName": "listingPrograms",
        "variables": {
            "limit": 99,
            "lang": "en",
            "currentdate": ["and", format!(">= {date} 00:00:00"), format!("<= {date} 23:59:59")],
            "venue": null,
            "editionID": EDITION_ID,
        },
        "query": LISTING_QUERY,
    });
    let referer = format!(
        "{URL}/en/schedule?day={}",
        day.format("%A-%B-%-d").to_string().to_lowercase()
    );
    Request::post_json(GRAPHQL_URL, body)
        .header("Accept", "*/*")
        .header("Accept-Language", "en-CA,en-US;q=0.7,en;q=0.3")
        .header("Referer", referer)
        .header("Origin", URL)
}

pub(crate) fn parse_programs(body: &str) -> Result<ScrapeReport, ExtractError> {
    let data: Value = serde_json::from_str(body)?;
    let mut report = ScrapeReport::default();
    let Some(programs) = data.pointer("/data/programs").and_then(Value::as_array) else {
        return Ok(report);
    };
    for program in programs {
        let label = text(program, "title");
        let label = if label.is_empty() { program.to_string() } else { label };
        report.record_all(&label, parse_program(program));
    }
    Ok(report)
}

/// A program with several films (a shorts block) becomes one show; otherwise every film in it
/// is its own show at the film's own start time.
fn parse_program(program: &Value) -> Result<Vec<Show>, ExtractError> {
    let program_date = text(program, "program_date_start");
    let venue = program
        .get("select_venue")
        .and_then(first_or_self)
        .map(|venue| {
            let name = text(venue, "venue_name");
            if name.is_empty() {
                text(venue, "title")
            } else {
                name
            }
        })
        .unwrap_or_default();
    let ticket_url = text(program, "program_ticket_url");
    let films: Vec<&Value> = program
        .get("program_films")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().collect())
        .unwrap_or_default();

    if films.len() > 1 {
        let start = base::parse_local_datetime(&program_date)
            .ok_or(ExtractError::UnparsableDate(program_date))?;
        return Ok(vec![program_show(program, &films, start, &venue, &ticket_url)?]);
    }

    let mut shows = Vec::new();
    for entry in films {
        let Some(film) = entry.get("film").and_then(first_or_self) else {
            continue;
        };
        let heure = text(entry, "heure");
        let start = film_start(&program_date, &heure)
            .ok_or_else(|| ExtractError::UnparsableDate(format!("{program_date} {heure}")))?;
        shows.push(film_show(film, start, &venue, &ticket_url)?);
    }
    Ok(shows)
}

fn program_show(
    program: &Value,
    films: &[&Value],
    start: NaiveDateTime,
    venue: &str,
    ticket_url: &str,
) -> Result<Show, ExtractError> {
    let mut titles = Vec::new();
    let mut directors = BTreeSet::new();
    let mut countries = BTreeSet::new();
    let mut categories = BTreeSet::new();
    for film in films.iter().filter_map(|entry| entry.get("film").and_then(first_or_self)) {
        titles.push(Value::from(text(film, "title")));
        directors.extend(directors_of(film));
        countries.extend(titles_of(film, "select_country"));
        categories.extend(titles_of(film, "select_category"));
    }

    let mut extra = Extra::new();
    extra.insert("director".into(), join(directors).into());
    extra.insert("country".into(), join(countries).into());
    extra.insert("category".into(), join(categories).into());
    extra.insert("ticket_url".into(), ticket_url.into());

    Ok(Show::new(
        text(program, "title"),
        text(program, "url"),
        vec![Showtime::new(start, venue)],
    )?
    .with_extras(extra)
    .with_extra("films", titles))
}

fn film_show(
    film: &Value,
    start: NaiveDateTime,
    venue: &str,
    ticket_url: &str,
) -> Result<Show, ExtractError> {
    let mut extra = Extra::new();
    if let Some(category) = titles_of(film, "select_category").into_iter().next() {
        extra.insert("category".into(), category.into());
    }
    if let Some(section) = titles_of(film, "select_section").into_iter().next() {
        extra.insert("section".into(), section.into());
    }
    extra.insert("country".into(), titles_of(film, "select_country").join(", ").into());
    extra.insert("director".into(), directors_of(film).join(", ").into());
    extra.insert("image".into(), poster_url(film).unwrap_or_default().into());
    extra.insert("ticket_url".into(), ticket_url.into());

    Ok(Show::new(
        text(film, "title"),
        text(film, "url"),
        vec![Showtime::new(start, venue)],
    )?
    .with_extras(extra))
}

/// The program date carries the day; the film's `heure` carries the time of day.
fn film_start(program_date: &str, heure: &str) -> Option<NaiveDateTime> {
    let day = base::parse_local_datetime(program_date)?.date();
    let time = base::parse_local_datetime(heure)
        .map(|dt| dt.time())
        .or_else(|| NaiveTime::parse_from_str(heure.trim(), "%H:%M:%S").ok())
        .or_else(|| dates::parse_clock(heure))?;
    Some(day.and_time(time))
}

fn directors_of(film: &Value) -> Vec<String> {
    film.get("select_generic")
        .and_then(Value::as_array)
        .map(|people| {
            people
                .iter()
                .filter(|person| DIRECTOR_ROLES.contains(&text(person, "generic_post").as_str()))
                .map(|person| {
                    format!(
                        "{} {}",
                        text(person, "generic_name_first"),
                        text(person, "generic_name_last")
                    )
                    .trim()
                    .to_string()
                })
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn titles_of(film: &Value, key: &str) -> Vec<String> {
    film.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| text(item, "title"))
                .filter(|title| !title.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn poster_url(film: &Value) -> Option<String> {
    film.get("film_image")?
        .as_array()?
        .iter()
        .filter(|block| block.get("poster").map(is_truthy).unwrap_or(false))
        .find_map(|block| block.get("image").and_then(first_or_self))
        .map(|image| text(image, "url"))
}

/// Craft returns relations either as a list or as a single object.
fn first_or_self(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(value),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    }
}

fn text(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn join(items: BTreeSet<String>) -> String {
    items.into_iter().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JSON: &str = r#"{
        "data": {
            "programs": [
                {
                    "title": "Les Barbares",
                    "url": "https://festivalcinemania.com/en/program/les-barbares",
                    "program_ticket_url": "https://tickets.example/123",
                    "program_date_start": "2025-11-05T19:00:00-05:00",
                    "select_venue": [{ "title": "imperial", "venue_name": "Cinéma Impérial" }],
                    "program_films": [
                        {
                            "heure": "19:15",
                            "film": [{
                                "title": "The Barbarians",
                                "url": "https://festivalcinemania.com/en/film/les-barbares",
                                "select_category": [{ "title": "Comedy" }, { "title": "Drama" }],
                                "select_section": [{ "title": "Opening Night" }],
                                "select_country": [{ "title": "France" }],
                                "select_generic": [
                                    { "generic_post": "Réalisatrice", "generic_name_first": "Julie", "generic_name_last": "Delpy" },
                                    { "generic_post": "Actor", "generic_name_first": "Sandrine", "generic_name_last": "Kiberlain" }
                                ],
                                "film_image": [
                                    { "poster": false, "image": [{ "url": "https://img/still.jpg" }] },
                                    { "poster": true, "image": [{ "url": "https://img/poster.jpg" }] }
                                ]
                            }]
                        }
                    ]
                },
                {
                    "title": "Shorts Program 1",
                    "url": "https://festivalcinemania.com/en/program/shorts-1",
                    "program_date_start": "2025-11-05T21:30:00-05:00",
                    "select_venue": { "title": "Cinémathèque" },
                    "program_films": [
                        { "heure": "21:30", "film": { "title": "Short A", "select_country": [{ "title": "Québec" }],
                          "select_generic": [{ "generic_post": "Director", "generic_name_first": "Ann", "generic_name_last": "B" }] } },
                        { "heure": "21:50", "film": [{ "title": "Short B", "select_country": [{ "title": "Belgique" }, { "title": "Québec" }] }] }
                    ]
                },
                {
                    "title": "Broken",
                    "program_date_start": "not a date",
                    "program_films": [{ "heure": "20:00", "film": [{ "title": "X", "url": "https://x" }] }]
                }
            ]
        }
    }"#;

    #[test]
    fn single_film_programs_become_film_shows() {
        let report = parse_programs(SAMPLE_JSON).expect("parse json");
        assert_eq!(report.shows.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].label, "Broken");

        let film = &report.shows[0];
        assert_eq!(film.title(), "The Barbarians");
        assert_eq!(
            film.first_datetime().format("%Y-%m-%d %H:%M").to_string(),
            "2025-11-05 19:15"
        );
        assert_eq!(film.showtimes()[0].venue(), "Cinéma Impérial");
        assert_eq!(film.extra()["category"], "Comedy");
        assert_eq!(film.extra()["section"], "Opening Night");
        assert_eq!(film.extra()["director"], "Julie Delpy");
        assert_eq!(film.extra()["image"], "https://img/poster.jpg");
        assert_eq!(film.extra()["ticket_url"], "https://tickets.example/123");
    }

    #[test]
    fn multi_film_programs_collapse_to_one_show() {
        let report = parse_programs(SAMPLE_JSON).expect("parse json");
        let shorts = &report.shows[1];
        assert_eq!(shorts.title(), "Shorts Program 1");
        assert_eq!(
            shorts.first_datetime().format("%Y-%m-%d %H:%M").to_string(),
            "2025-11-05 21:30"
        );
        assert_eq!(shorts.showtimes()[0].venue(), "Cinémathèque");
        assert_eq!(shorts.extra()["films"], json!(["Short A", "Short B"]));
        assert_eq!(shorts.extra()["country"], "Belgique, Québec");
        assert_eq!(shorts.extra()["director"], "Ann B");
        assert!(shorts.extra().get("ticket_url").is_none());
    }

    #[test]
    fn each_day_is_its_own_cache_identity() {
        let days = festival_days(2025);
        assert_eq!(days.len(), 12);
        let first = day_request(days[0]);
        let second = day_request(days[1]);
        assert_ne!(first.identity(), second.identity());
        assert!(first.identity().starts_with("https://festivalcinemania.com/graphql_POST_"));
    }

    #[test]
    fn missing_programs_is_an_empty_day() {
        let report = parse_programs(r#"{"data": {"programs": []}}"#).expect("parse json");
        assert!(report.shows.is_empty());
        let report = parse_programs(r#"{"errors": [{"message": "boom"}]}"#).expect("parse json");
        assert!(report.shows.is_empty());
    }
}
