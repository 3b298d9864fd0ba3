//! Dangerous-content breadcrumb persistence (§4.6 step 9, §6 External
//! Interfaces): one append-only JSONL file per UTC date, not a file per
//! event, so a long run never scatters breadcrumbs across thousands of
//! shard directories the way raw/excerpt sections do.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use oddcrawler_core::config::StorageSectionConfig;
use serde::Serialize;

pub struct BreadcrumbStore {
    root: PathBuf,
    enabled: bool,
}

impl BreadcrumbStore {
    pub fn new(data_dir: &Path, config: &StorageSectionConfig) -> Self {
        Self { root: data_dir.join(&config.path), enabled: config.enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn path_for(&self, observed_at: DateTime<Utc>) -> PathBuf {
        self.root.join(format!("{}.jsonl", observed_at.format("%Y-%m-%d")))
    }

    /// Appends one JSON line to the date file for `observed_at`, opening
    /// (and creating, if needed) the file fresh on every call rather than
    /// holding a handle across a potential day rollover.
    pub fn save_breadcrumb<T: Serialize>(
        &self,
        observed_at: DateTime<Utc>,
        record: &T,
    ) -> std::io::Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.root)?;
        let path = self.path_for(observed_at);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> StorageSectionConfig {
        StorageSectionConfig { enabled, path: "dangerous_breadcrumbs".to_string(), ttl_days: 365, max_chars: None }
    }

    #[test]
    fn disabled_store_writes_nothing() {
        let dir = std::env::temp_dir().join("oddcrawler-breadcrumb-store-disabled");
        let store = BreadcrumbStore::new(&dir, &config(false));
        let result = store.save_breadcrumb(Utc::now(), &serde_json::json!({"category": "cp"})).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn filename_is_the_utc_date() {
        let dir = std::env::temp_dir().join(format!("oddcrawler-breadcrumb-store-{}", Utc::now().timestamp_nanos_opt().unwrap()));
        let store = BreadcrumbStore::new(&dir, &config(true));
        let observed_at = DateTime::parse_from_rfc3339("2026-03-05T10:00:00Z").unwrap().with_timezone(&Utc);
        let path = store.save_breadcrumb(observed_at, &serde_json::json!({"category": "cp"})).unwrap().unwrap();
        assert_eq!(path, dir.join("dangerous_breadcrumbs").join("2026-03-05.jsonl"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn multiple_breadcrumbs_on_the_same_day_append_to_one_file() {
        let dir = std::env::temp_dir().join(format!("oddcrawler-breadcrumb-store-append-{}", Utc::now().timestamp_nanos_opt().unwrap()));
        let store = BreadcrumbStore::new(&dir, &config(true));
        let observed_at = DateTime::parse_from_rfc3339("2026-03-05T10:00:00Z").unwrap().with_timezone(&Utc);
        store.save_breadcrumb(observed_at, &serde_json::json!({"category": "cp"})).unwrap();
        store.save_breadcrumb(observed_at, &serde_json::json!({"category": "weapons"})).unwrap();
        let path = dir.join("dangerous_breadcrumbs").join("2026-03-05.jsonl");
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first["category"], "cp");
        assert_eq!(second["category"], "weapons");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
