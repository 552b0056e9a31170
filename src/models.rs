use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Open, source-specific metadata merged flat into the serialized record.
pub type Extra = Map<String, Value>;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SHOWTIME_FIELDS: [&str; 2] = ["datetime", "venue"];
const SHOW_FIELDS: [&str; 3] = ["title", "link", "showtimes"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("show has no title")]
    EmptyTitle,
    #[error("show '{0}' has no link")]
    EmptyLink(String),
    #[error("show '{0}' has no showtimes")]
    NoShowtimes(String),
}

/// One concrete occurrence of a show. `venue` is empty when unknown.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Showtime {
    #[serde(with = "datetime_format")]
    datetime: NaiveDateTime,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    venue: String,
    #[serde(flatten)]
    extra: Extra,
}

impl Showtime {
    pub fn new(datetime: NaiveDateTime, venue: impl Into<String>) -> Self {
        Self {
            datetime,
            venue: venue.into().trim().to_string(),
            extra: Extra::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        insert_unreserved(&mut self.extra, &SHOWTIME_FIELDS, key, value.into());
        self
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn extra(&self) -> &Extra {
        &self.extra
    }
}

/// A listing with one or more occurrences.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Show {
    title: String,
    link: String,
    showtimes: Vec<Showtime>,
    #[serde(flatten)]
    extra: Extra,
}

impl Show {
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        showtimes: Vec<Showtime>,
    ) -> Result<Self, ModelError> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(ModelError::EmptyTitle);
        }
        let link = link.into().trim().to_string();
        if link.is_empty() {
            return Err(ModelError::EmptyLink(title));
        }
        if showtimes.is_empty() {
            return Err(ModelError::NoShowtimes(title));
        }
        Ok(Self {
            title,
            link,
            showtimes,
            extra: Extra::new(),
        })
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        insert_unreserved(&mut self.extra, &SHOW_FIELDS, key, value.into());
        self
    }

    /// Adds every entry of `extra`, skipping empty strings.
    pub fn with_extras(mut self, extra: Extra) -> Self {
        for (key, value) in extra {
            if matches!(&value, Value::String(s) if s.is_empty()) {
                continue;
            }
            insert_unreserved(&mut self.extra, &SHOW_FIELDS, &key, value);
        }
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn showtimes(&self) -> &[Showtime] {
        &self.showtimes
    }

    pub fn extra(&self) -> &Extra {
        &self.extra
    }

    pub fn first_datetime(&self) -> NaiveDateTime {
        self.showtimes[0].datetime
    }
}

fn insert_unreserved(extra: &mut Extra, reserved: &[&str], key: &str, value: Value) {
    if reserved.contains(&key) {
        warn!(key, "ignoring extra field that would shadow a fixed field");
        return;
    }
    extra.insert(key.to_string(), value);
}

mod datetime_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::DATETIME_FORMAT;

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(DATETIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, DATETIME_FORMAT).map_err(serde::de::Error::custom)
    }
}
