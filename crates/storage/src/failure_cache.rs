//! Persistent cache of hard failures to avoid re-crawling them, ported
//! from `runtime/failure_cache.py`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    pub url: String,
    pub status: Option<u16>,
    pub reason: String,
    pub first_recorded_at: DateTime<Utc>,
    pub last_recorded_at: DateTime<Utc>,
    pub count: u64,
}

pub struct FailureCache {
    path: PathBuf,
    skip_statuses: HashSet<u16>,
    expiry_seconds: Option<i64>,
    entries: HashMap<String, FailureEntry>,
    dirty: bool,
}

impl FailureCache {
    pub fn new(path: PathBuf, skip_statuses: HashSet<u16>, expiry_seconds: Option<i64>) -> Self {
        let mut cache = Self { path, skip_statuses, expiry_seconds, entries: HashMap::new(), dirty: false };
        cache.load();
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn should_skip(&mut self, url: &str) -> bool {
        let Some(entry) = self.entries.get(url) else { return false };
        if self.is_expired(entry) {
            self.entries.remove(url);
            self.dirty = true;
            return false;
        }
        match entry.status {
            Some(status) => self.skip_statuses.contains(&status),
            None => false,
        }
    }

    pub fn record(&mut self, url: &str, status: Option<u16>, reason: &str) {
        let now = Utc::now();
        self.entries
            .entry(url.to_string())
            .and_modify(|entry| {
                entry.status = status;
                entry.reason = reason.to_string();
                entry.last_recorded_at = now;
                entry.count += 1;
            })
            .or_insert_with(|| FailureEntry {
                url: url.to_string(),
                status,
                reason: reason.to_string(),
                first_recorded_at: now,
                last_recorded_at: now,
                count: 1,
            });
        self.dirty = true;
    }

    pub fn cleanup(&mut self) {
        let Some(_) = self.expiry_seconds else { return };
        let expired: Vec<String> = self.entries.iter().filter(|(_, e)| self.is_expired(e)).map(|(k, _)| k.clone()).collect();
        if !expired.is_empty() {
            for url in expired {
                self.entries.remove(&url);
            }
            self.dirty = true;
        }
    }

    pub fn save(&mut self) -> std::io::Result<()> {
        self.cleanup();
        if !self.dirty {
            return Ok(());
        }
        let mut entries: Vec<&FailureEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        let json = serde_json::to_string_pretty(&entries)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        self.dirty = false;
        Ok(())
    }

    fn load(&mut self) {
        let Ok(contents) = std::fs::read_to_string(&self.path) else { return };
        let Ok(entries) = serde_json::from_str::<Vec<FailureEntry>>(&contents) else { return };
        for entry in entries {
            if !entry.url.is_empty() && !self.is_expired(&entry) {
                self.entries.insert(entry.url.clone(), entry);
            }
        }
    }

    fn is_expired(&self, entry: &FailureEntry) -> bool {
        match self.expiry_seconds {
            None => false,
            Some(secs) => entry.last_recorded_at + chrono::Duration::seconds(secs) < Utc::now(),
        }
    }
}

pub fn default_skip_statuses() -> HashSet<u16> {
    HashSet::from([404])
}

pub fn failures_path(state_dir: &Path) -> PathBuf {
    state_dir.join("failures.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("oddcrawler-failure-cache-test-{name}.json"))
    }

    #[test]
    fn records_and_skips_matching_status() {
        let path = temp_path("skip");
        let _ = std::fs::remove_file(&path);
        let mut cache = FailureCache::new(path.clone(), default_skip_statuses(), Some(7 * 24 * 3600));
        assert!(!cache.should_skip("http://example.test/gone"));
        cache.record("http://example.test/gone", Some(404), "http_404");
        assert!(cache.should_skip("http://example.test/gone"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn non_skip_status_is_not_skipped() {
        let path = temp_path("nonskip");
        let _ = std::fs::remove_file(&path);
        let mut cache = FailureCache::new(path.clone(), default_skip_statuses(), Some(3600));
        cache.record("http://example.test/server-error", Some(500), "http_500");
        assert!(!cache.should_skip("http://example.test/server-error"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn save_is_skipped_when_not_dirty() {
        let path = temp_path("notdirty");
        let _ = std::fs::remove_file(&path);
        let mut cache = FailureCache::new(path.clone(), default_skip_statuses(), Some(3600));
        cache.save().unwrap();
        assert!(!path.exists());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn expired_entries_do_not_trigger_skip() {
        let path = temp_path("expired");
        let _ = std::fs::remove_file(&path);
        let mut cache = FailureCache::new(path.clone(), default_skip_statuses(), Some(1));
        cache.record("http://example.test/gone", Some(404), "http_404");
        if let Some(entry) = cache.entries.get_mut("http://example.test/gone") {
            entry.last_recorded_at = Utc::now() - chrono::Duration::seconds(10);
        }
        assert!(!cache.should_skip("http://example.test/gone"));
        let _ = std::fs::remove_file(&path);
    }
}
