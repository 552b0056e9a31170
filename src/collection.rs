//! Per-source show files: the only hand-off between scraping and rendering.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::models::Show;
use crate::utils;

/// Serializes shows as a 2-space indented JSON array with every object's keys sorted.
pub fn to_json_string(shows: &[Show]) -> Result<String> {
    let value = serde_json::to_value(shows).context("serializing shows")?;
    serde_json::to_string_pretty(&sorted(value)).context("formatting shows")
}

pub fn save(shows: &[Show], path: &Path) -> Result<()> {
    let contents = to_json_string(shows)?;
    utils::ensure_parent(path);
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

pub fn load(path: &Path) -> Result<Vec<Show>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (key, value) in entries {
                out.insert(key, sorted(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Showtime;
    use chrono::NaiveDate;

    fn sample() -> Vec<Show> {
        let dt = NaiveDate::from_ymd_opt(2025, 7, 18)
            .and_then(|d| d.and_hms_opt(21, 30, 0))
            .expect("valid datetime");
        vec![Show::new(
            "Haïti Chérie",
            "https://example.com/haiti",
            vec![Showtime::new(dt, "Scène TD").with_extra("end_time", "23:00")],
        )
        .expect("valid show")
        .with_extra("description", "Konpa")]
    }

    #[test]
    fn output_is_sorted_indented_and_unescaped() {
        let json = to_json_string(&sample()).expect("json");
        let expected = r#"[
  {
    "description": "Konpa",
    "link": "https://example.com/haiti",
    "showtimes": [
      {
        "datetime": "2025-07-18 21:30:00",
        "end_time": "23:00",
        "venue": "Scène TD"
      }
    ],
    "title": "Haïti Chérie"
  }
]"#;
        assert_eq!(json, expected);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("shows/haiti-en-folie.json");
        save(&sample(), &path).expect("save");

        let loaded = load(&path).expect("load");
        assert_eq!(loaded, sample());
        let again = to_json_string(&loaded).expect("json");
        assert_eq!(again, fs::read_to_string(&path).expect("read"));
    }
}
