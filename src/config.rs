use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::utils;

const DEFAULT_YEAR: i32 = 2025;
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RATE_LIMIT_MS: u64 = 100;
const DEFAULT_DETAIL_WORKERS: usize = 8;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:143.0) Gecko/20100101 Firefox/143.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub cache_path: PathBuf,
    pub shows_dir: PathBuf,
    pub site_dir: PathBuf,
    pub assets_dir: Option<PathBuf>,
    pub year: i32,
    pub request_timeout_secs: u64,
    pub rate_limit_ms: u64,
    pub detail_workers: usize,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_path: utils::cache_path(),
            shows_dir: utils::shows_dir(),
            site_dir: utils::site_dir(),
            assets_dir: None,
            year: DEFAULT_YEAR,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            detail_workers: DEFAULT_DETAIL_WORKERS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the config file (missing file means defaults), then applies `FESTCAL_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(utils::config_path);
        let mut config = read_config(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, String> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(utils::config_path);
        write_config(&path, self)?;
        Ok(path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn shows_path(&self, source_id: &str) -> PathBuf {
        self.shows_dir.join(format!("{source_id}.json"))
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("FESTCAL_CACHE_PATH") {
            self.cache_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("FESTCAL_SHOWS_DIR") {
            self.shows_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("FESTCAL_SITE_DIR") {
            self.site_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("FESTCAL_ASSETS_DIR") {
            self.assets_dir = Some(PathBuf::from(value));
        }
        if let Some(year) = lookup("FESTCAL_YEAR").and_then(|s| s.parse().ok()) {
            self.year = year;
        }
        if let Some(secs) = lookup("FESTCAL_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(ms) = lookup("FESTCAL_RATE_LIMIT_MS").and_then(|s| s.parse().ok()) {
            self.rate_limit_ms = ms;
        }
        if let Some(workers) = lookup("FESTCAL_DETAIL_WORKERS").and_then(|s| s.parse().ok()) {
            self.detail_workers = workers;
        }
        if let Some(value) = lookup("FESTCAL_USER_AGENT") {
            self.user_agent = value;
        }
    }
}

fn read_config(path: &Path) -> Result<AppConfig, String> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|err| err.to_string())?;
    serde_json::from_str(&contents).map_err(|err| format!("{}: {err}", path.display()))
}

fn write_config(path: &Path, config: &AppConfig) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            return Err(err.to_string());
        }
    }
    let contents = serde_json::to_string_pretty(config).map_err(|err| err.to_string())?;
    fs::write(path, contents).map_err(|err| err.to_string())
}
