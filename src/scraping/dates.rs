//! Free-text schedule parsing.
//!
//! Listings describe their dates in prose: `"August 1,8, and 15 at 16h to 20h, August 2 and
//! 9 at 12h to 17h"`, `"1er et 8 août de 19 h à minuit"`. A [`Grammar`] turns such text into
//! concrete [`Showtime`]s in three stages:
//!
//! 1. **Segmentation**: split before every month mention (or before the day list that
//!    precedes it, for day-first text). Commas inside a day list never split.
//! 2. **Time extraction**: ordered patterns, first match wins for the start time:
//!    "show starts at H", a parenthetical time, "from H to H2", "at H", any clock token,
//!    and finally a bare trailing numeral after the day list.
//! 3. **Day expansion**: every day number in the segment's date clause, under the segment's
//!    month and the target year, gets one showtime at the extracted time.
//!
//! Segments with no time, or that say the time is unknown, produce nothing. An end time is
//! kept as `end_time` metadata on the showtime and never moves the calendar date.

use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::{Match, Regex};

use crate::models::Showtime;

/// One clock-time token: `16h`, `19 h 30`, `7pm`, `7:30 p.m.`, `20:00`, `midnight`.
const TIME_TOKEN: &str = r"(?:\bmidnight\b|\bminuit\b|\bnoon\b|\bmidi\b|\b\d{1,2}(?::\d{2})?\s*[ap]\.?\s?m\b\.?|\b\d{1,2}\s*h(?:\s*\d{2})?\b|\b\d{1,2}:\d{2}\b)";

const DAY_TOKEN: &str = r"\b(\d{1,2})(?:st|nd|rd|th|er|e)?\b";

static CLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{1,2})\s*(?:(?::|h)\s*(\d{2})?)?\s*(?:([ap])\.?\s?m\.?)?$")
        .expect("valid clock regex")
});
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("(?i){TIME_TOKEN}")).expect("valid time regex"));
static DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("(?i){DAY_TOKEN}")).expect("valid day regex"));
static DAY_RUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b\d{1,2}(?:st|nd|rd|th|er|e)?\b\s*(?:,|&|\band\b|\bet\b)?\s*)+$")
        .expect("valid day run regex")
});
static LEADING_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.?\s*\d{1,2}\b").expect("valid leading day regex"));

/// The words a source writes its schedules with.
pub struct Vocabulary {
    pub months: &'static [(&'static str, u32)],
    pub show_start: &'static [&'static str],
    pub range_from: &'static [&'static str],
    pub range_to: &'static [&'static str],
    pub at: &'static [&'static str],
    pub unknown_time: &'static [&'static str],
}

const ENGLISH_MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sept", 9),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

pub const ENGLISH: Vocabulary = Vocabulary {
    months: ENGLISH_MONTHS,
    show_start: &["show starts at", "show starts", "show begins at", "show at", "show:"],
    range_from: &["from", "between"],
    range_to: &["to", "until", "till", "-", "–", "—"],
    at: &["at", "@"],
    unknown_time: &["register to find out time", "tba", "tbd", "time to be announced"],
};

pub const BILINGUAL: Vocabulary = Vocabulary {
    months: &[
        ("january", 1),
        ("february", 2),
        ("march", 3),
        ("april", 4),
        ("may", 5),
        ("june", 6),
        ("july", 7),
        ("august", 8),
        ("september", 9),
        ("october", 10),
        ("november", 11),
        ("december", 12),
        ("janvier", 1),
        ("février", 2),
        ("fevrier", 2),
        ("mars", 3),
        ("avril", 4),
        ("mai", 5),
        ("juin", 6),
        ("juillet", 7),
        ("août", 8),
        ("aout", 8),
        ("septembre", 9),
        ("octobre", 10),
        ("novembre", 11),
        ("décembre", 12),
        ("decembre", 12),
        ("aug", 8),
        ("jul", 7),
        ("sept", 9),
    ],
    show_start: &[
        "show starts at",
        "show starts",
        "show begins at",
        "show at",
        "début du spectacle à",
        "début du spectacle",
        "spectacle à",
    ],
    range_from: &["from", "between", "de", "entre"],
    range_to: &["to", "until", "à", "jusqu'à", "-", "–", "—"],
    at: &["at", "@", "à", "dès"],
    unknown_time: &[
        "register to find out time",
        "inscrivez-vous pour connaître l'heure",
        "tba",
        "tbd",
        "à confirmer",
        "à déterminer",
    ],
};

pub static ENGLISH_GRAMMAR: Lazy<Grammar> =
    Lazy::new(|| Grammar::new(&ENGLISH).expect("english grammar"));
pub static BILINGUAL_GRAMMAR: Lazy<Grammar> =
    Lazy::new(|| Grammar::new(&BILINGUAL).expect("bilingual grammar"));

/// A start time and optional advisory end time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpec {
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
}

/// A slice of schedule text that mentions exactly one month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub month: u32,
    pub text: &'a str,
}

pub struct Grammar {
    months: &'static [(&'static str, u32)],
    month_re: Regex,
    show_start_re: Regex,
    range_re: Regex,
    at_re: Regex,
    unknown_re: Regex,
}

impl Grammar {
    pub fn new(vocabulary: &Vocabulary) -> Result<Self, regex::Error> {
        let month_names: Vec<&str> = vocabulary.months.iter().map(|(name, _)| *name).collect();
        Ok(Self {
            months: vocabulary.months,
            month_re: Regex::new(&format!(r"(?i)\b(?:{})\b\.?", alternation(&month_names)))?,
            show_start_re: Regex::new(&format!(
                r"(?i)(?:^|\W)(?:{})\s*({TIME_TOKEN})",
                alternation(vocabulary.show_start)
            ))?,
            range_re: Regex::new(&format!(
                r"(?i)(?:(?:{})\s+)?({TIME_TOKEN})\s*(?:{})\s*({TIME_TOKEN})",
                alternation(vocabulary.range_from),
                alternation(vocabulary.range_to)
            ))?,
            at_re: Regex::new(&format!(
                r"(?i)(?:^|\W)(?:{})\s*({TIME_TOKEN})",
                alternation(vocabulary.at)
            ))?,
            unknown_re: Regex::new(&format!(
                r"(?i)(?:^|\W)(?:{})(?:\W|$)",
                alternation(vocabulary.unknown_time)
            ))?,
        })
    }

    /// Parses a whole schedule description into showtimes sorted by timestamp.
    pub fn parse(&self, text: &str, year: i32, venue: &str) -> Vec<Showtime> {
        let mut showtimes: Vec<Showtime> = self
            .segments(text)
            .into_iter()
            .flat_map(|segment| self.parse_segment(segment, year, venue))
            .collect();
        showtimes.sort_by_key(|s| s.datetime());
        showtimes.dedup_by_key(|s| s.datetime());
        showtimes
    }

    /// Stage 1: one segment per month mention. Text before the first month is dropped.
    pub fn segments<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let mut starts: Vec<(usize, u32)> = Vec::new();
        for found in self.month_re.find_iter(text) {
            let Some(month) = self.month_number(found.as_str()) else {
                continue;
            };
            let floor = starts.last().map(|(start, _)| *start).unwrap_or(0);
            starts.push((self.segment_start(text, floor, &found), month));
        }

        starts
            .iter()
            .enumerate()
            .map(|(idx, (start, month))| {
                let end = starts.get(idx + 1).map(|(s, _)| *s).unwrap_or(text.len());
                Segment {
                    month: *month,
                    text: text[*start..end].trim_end_matches(|c: char| {
                        c.is_whitespace() || c == ',' || c == ';'
                    }),
                }
            })
            .collect()
    }

    /// Stage 2, patterns (a) to (d). The bare-numeral fallback needs the day list and lives in
    /// [`Grammar::parse_segment`].
    pub fn extract_time(&self, text: &str) -> Option<TimeSpec> {
        let range = self
            .range_re
            .captures(text)
            .and_then(|caps| Some((parse_clock(&caps[1])?, parse_clock(&caps[2])?)));

        let announced = self
            .show_start_re
            .captures(text)
            .and_then(|caps| parse_clock(&caps[1]))
            .or_else(|| parenthetical_time(text));
        if let Some(start) = announced {
            return Some(TimeSpec {
                start,
                end: range.map(|(_, end)| end),
            });
        }

        if let Some((start, end)) = range {
            return Some(TimeSpec {
                start,
                end: Some(end),
            });
        }

        self.at_re
            .captures(text)
            .and_then(|caps| parse_clock(&caps[1]))
            .or_else(|| find_time(text))
            .map(|start| TimeSpec { start, end: None })
    }

    /// Stages 2 and 3 for one segment.
    pub fn parse_segment(&self, segment: Segment<'_>, year: i32, venue: &str) -> Vec<Showtime> {
        if self.unknown_re.is_match(segment.text) {
            return Vec::new();
        }

        let clause_end = TIME_RE
            .find(segment.text)
            .map(|m| m.start())
            .unwrap_or(segment.text.len());
        let date_clause = &segment.text[..clause_end];
        let mut days: Vec<Match<'_>> = DAY_RE
            .captures_iter(date_clause)
            .filter_map(|caps| caps.get(1))
            .collect();

        let spec = match self.extract_time(segment.text) {
            Some(spec) => spec,
            None => match bare_trailing_hour(date_clause, &days) {
                Some(start) => {
                    days.pop();
                    TimeSpec { start, end: None }
                }
                None => return Vec::new(),
            },
        };

        days.iter()
            .filter_map(|day| day.as_str().parse::<u32>().ok())
            .filter_map(|day| NaiveDate::from_ymd_opt(year, segment.month, day))
            .map(|date| {
                let showtime = Showtime::new(date.and_time(spec.start), venue);
                match spec.end {
                    Some(end) => showtime.with_extra("end_time", end.format("%H:%M").to_string()),
                    None => showtime,
                }
            })
            .collect()
    }

    pub fn month_number(&self, name: &str) -> Option<u32> {
        let key = name.trim().trim_end_matches('.').to_lowercase();
        self.months
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, month)| *month)
    }

    /// Day-first text ("1er et 8 août") starts its segment at the day list before the month.
    /// The day list never reaches back past the previous segment's last clock token, so the
    /// minutes of "20 h 30, 2 et 9 août" stay with the earlier segment.
    fn segment_start(&self, text: &str, floor: usize, month: &Match<'_>) -> usize {
        if LEADING_DAY_RE.is_match(&text[month.end()..]) {
            return month.start().max(floor);
        }
        let from = TIME_RE
            .find_iter(&text[floor..month.start()])
            .last()
            .map(|time| floor + time.end())
            .unwrap_or(floor);
        DAY_RUN_RE
            .find(&text[from..month.start()])
            .map(|run| from + run.start())
            .unwrap_or(month.start())
    }
}

/// Parses one clock token into a time of day.
pub fn parse_clock(token: &str) -> Option<NaiveTime> {
    let token = token.trim();
    match token.to_lowercase().as_str() {
        "midnight" | "minuit" => return NaiveTime::from_hms_opt(0, 0, 0),
        "noon" | "midi" => return NaiveTime::from_hms_opt(12, 0, 0),
        _ => {}
    }

    let caps = CLOCK_RE.captures(token)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    if let Some(period) = caps.get(3) {
        if hour == 0 || hour > 12 {
            return None;
        }
        let pm = period.as_str().eq_ignore_ascii_case("p");
        hour = match (pm, hour) {
            (false, 12) => 0,
            (true, 12) => 12,
            (true, h) => h + 12,
            (false, h) => h,
        };
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// First clock token anywhere in `text`.
pub fn find_time(text: &str) -> Option<NaiveTime> {
    TIME_RE.find_iter(text).find_map(|m| parse_clock(m.as_str()))
}

/// Finds `"<Month> <day>[, <year>]"` and resolves it, falling back to `default_year`.
pub fn find_month_day(grammar: &Grammar, text: &str, default_year: i32) -> Option<NaiveDate> {
    static YEAR_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*,?\s*(\d{4})\b").expect("valid year regex"));

    for month in grammar.month_re.find_iter(text) {
        let Some(month_number) = grammar.month_number(month.as_str()) else {
            continue;
        };
        let rest = &text[month.end()..];
        let Some(day) = DAY_RE
            .captures(rest)
            .filter(|caps| caps.get(0).map(|m| rest[..m.start()].trim().is_empty()) == Some(true))
            .and_then(|caps| caps[1].parse::<u32>().ok())
        else {
            continue;
        };
        let after_day = DAY_RE.find(rest).map(|m| &rest[m.end()..]).unwrap_or("");
        let year = YEAR_RE
            .captures(after_day)
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(default_year);
        if let Some(date) = NaiveDate::from_ymd_opt(year, month_number, day) {
            return Some(date);
        }
    }
    None
}

fn parenthetical_time(text: &str) -> Option<NaiveTime> {
    static PAREN_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\(([^()]*)\)").expect("valid parenthetical regex"));
    PAREN_RE
        .captures_iter(text)
        .find_map(|caps| find_time(&caps[1]))
}

/// `"August 9 20"`: a last number separated from the day list only by whitespace is an hour.
fn bare_trailing_hour(date_clause: &str, days: &[Match<'_>]) -> Option<NaiveTime> {
    let [.., previous, last] = days else {
        return None;
    };
    let gap = &date_clause[previous.end()..last.start()];
    let gap_is_blank = gap
        .trim_start_matches(|c: char| c.is_alphabetic())
        .trim()
        .is_empty()
        && !gap.contains(',');
    let tail = date_clause[last.end()..].trim_matches(|c: char| c.is_whitespace() || c == '.');
    if !gap_is_blank || !tail.is_empty() {
        return None;
    }
    let hour: u32 = last.as_str().parse().ok()?;
    NaiveTime::from_hms_opt(hour, 0, 0)
}

fn alternation(words: &[&str]) -> String {
    let mut sorted: Vec<&str> = words.to_vec();
    sorted.sort_by_key(|word| std::cmp::Reverse(word.chars().count()));
    sorted
        .iter()
        .map(|word| regex::escape(word))
        .collect::<Vec<_>>()
        .join("|")
}
