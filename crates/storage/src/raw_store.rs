//! Raw response and redacted excerpt persistence (§4.6 steps 4, 8). Sharded
//! by the first two hex characters of the url hash so a single directory
//! never holds an unbounded number of files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use oddcrawler_core::config::StorageSectionConfig;
use serde::Serialize;

pub struct SectionStore {
    root: PathBuf,
    enabled: bool,
    max_chars: Option<usize>,
}

impl SectionStore {
    pub fn new(data_dir: &Path, config: &StorageSectionConfig) -> Self {
        Self { root: data_dir.join(&config.path), enabled: config.enabled, max_chars: config.max_chars }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn shard_dir(&self, url_hash: &str) -> PathBuf {
        let shard = &url_hash[..url_hash.len().min(2)];
        self.root.join(shard)
    }

    fn stamped_stem(&self, fetched_at: DateTime<Utc>, url_hash: &str) -> String {
        format!("{}_{}", fetched_at.format("%Y%m%dT%H%M%S"), url_hash)
    }

    /// Writes `<stem>.html` plus a `<stem>.json` metadata sibling.
    pub fn save_raw(
        &self,
        url_hash: &str,
        fetched_at: DateTime<Utc>,
        body: &[u8],
        metadata: &HashMap<String, String>,
    ) -> std::io::Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        let dir = self.shard_dir(url_hash);
        std::fs::create_dir_all(&dir)?;
        let stem = self.stamped_stem(fetched_at, url_hash);
        let html_path = dir.join(format!("{stem}.html"));
        let meta_path = dir.join(format!("{stem}.json"));
        std::fs::write(&html_path, body)?;
        let meta_json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&meta_path, meta_json)?;
        Ok(Some(html_path))
    }

    /// Writes a redacted excerpt record, truncated to the section's
    /// `max_chars` when configured.
    pub fn save_excerpt<T: Serialize>(
        &self,
        url_hash: &str,
        fetched_at: DateTime<Utc>,
        excerpt_text: &str,
        record: &T,
    ) -> std::io::Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        let truncated: String = match self.max_chars {
            Some(limit) => excerpt_text.chars().take(limit).collect(),
            None => excerpt_text.to_string(),
        };
        let dir = self.shard_dir(url_hash);
        std::fs::create_dir_all(&dir)?;
        let stem = self.stamped_stem(fetched_at, url_hash);
        let path = dir.join(format!("{stem}.json"));
        let mut value = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(ref mut map) = value {
            map.insert("text_excerpt".to_string(), serde_json::Value::String(truncated));
        }
        std::fs::write(&path, serde_json::to_string_pretty(&value)?)?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool, path: &str) -> StorageSectionConfig {
        StorageSectionConfig { enabled, path: path.to_string(), ttl_days: 90, max_chars: Some(10) }
    }

    #[test]
    fn disabled_section_writes_nothing() {
        let dir = std::env::temp_dir().join("oddcrawler-raw-store-disabled");
        let store = SectionStore::new(&dir, &config(false, "raw_html"));
        let result = store.save_raw("abcdef", Utc::now(), b"<html></html>", &HashMap::new()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn raw_html_is_sharded_by_first_two_hash_chars() {
        let dir = std::env::temp_dir().join(format!("oddcrawler-raw-store-{}", Utc::now().timestamp_nanos_opt().unwrap()));
        let store = SectionStore::new(&dir, &config(true, "raw_html"));
        let path = store.save_raw("abcdef0123", Utc::now(), b"<html></html>", &HashMap::new()).unwrap().unwrap();
        assert!(path.starts_with(dir.join("raw_html").join("ab")));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn excerpt_is_truncated_to_max_chars() {
        let dir = std::env::temp_dir().join(format!("oddcrawler-excerpt-store-{}", Utc::now().timestamp_nanos_opt().unwrap()));
        let store = SectionStore::new(&dir, &config(true, "excerpts"));
        let path = store
            .save_excerpt("abcd", Utc::now(), "this excerpt is definitely longer than ten chars", &serde_json::json!({}))
            .unwrap()
            .unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["text_excerpt"].as_str().unwrap().chars().count(), 10);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
