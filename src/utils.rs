use dirs::data_dir;
use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

static DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let base = data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    base.join("festival-calendar")
});

pub fn data_root() -> PathBuf {
    DATA_ROOT.clone()
}

pub fn cache_path() -> PathBuf {
    data_root().join("cache.sqlite")
}

pub fn config_path() -> PathBuf {
    data_root().join("config.json")
}

pub fn shows_dir() -> PathBuf {
    data_root().join("shows")
}

pub fn site_dir() -> PathBuf {
    data_root().join("site")
}

pub fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %err, "failed to create parent directory");
        }
    }
}

/// Recursively copies `from` into `to`, returning the number of files copied.
pub fn copy_dir(from: &Path, to: &Path) -> std::io::Result<usize> {
    fs::create_dir_all(to)?;
    let mut copied = 0;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Shortens `text` to at most `max` characters for log lines.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
