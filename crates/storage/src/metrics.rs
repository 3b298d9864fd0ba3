//! Rolling run metrics and the denormalized `reports/summary.json`
//! projection. Expands `runtime/run_loop.py`'s metrics dict with the
//! fetch/timing/cost/odd-hits/cascade breakdowns the run loop tracks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionCounts {
    pub skip: u64,
    pub persist: u64,
    pub llm: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FetchStats {
    pub requests: u64,
    pub total_bytes: u64,
    pub total_duration_ms: u64,
}

impl FetchStats {
    pub fn average_bytes(&self) -> f64 {
        if self.requests == 0 { 0.0 } else { self.total_bytes as f64 / self.requests as f64 }
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.requests == 0 { 0.0 } else { self.total_duration_ms as f64 / self.requests as f64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StageCounts {
    pub pass: u64,
    pub skip: u64,
    pub warn: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CascadeStats {
    pub skips: u64,
    pub passes: u64,
    pub warns: u64,
    pub per_stage: HashMap<String, StageCounts>,
    pub overrides: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub run_started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub pages_processed: u64,
    pub actions: ActionCounts,
    pub illegal_skipped: u64,
    pub errors: u64,
    pub llm_calls: u64,
    pub total_score: f64,
    pub reasons: HashMap<String, u64>,
    pub cached_failures: u64,
    pub failure_hosts: HashMap<String, u64>,
    pub fetch_stats: FetchStats,
    pub cascade: CascadeStats,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            run_started_at: now,
            last_updated_at: now,
            pages_processed: 0,
            actions: ActionCounts::default(),
            illegal_skipped: 0,
            errors: 0,
            llm_calls: 0,
            total_score: 0.0,
            reasons: HashMap::new(),
            cached_failures: 0,
            failure_hosts: HashMap::new(),
            fetch_stats: FetchStats::default(),
            cascade: CascadeStats::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub run_started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub pages_processed: u64,
    pub actions: ActionCounts,
    pub illegal_skipped: u64,
    pub errors: u64,
    pub llm_calls: u64,
    pub average_score: f64,
    pub frontier_size: usize,
    pub cached_failures: u64,
    pub top_reasons: Vec<(String, u64)>,
    pub top_failure_hosts: Vec<(String, u64)>,
    pub total_runtime_seconds: f64,
    pub bandwidth_bytes: u64,
    pub bandwidth_mib: f64,
    pub odd_hits_total: u64,
    pub odd_hits_ratio: f64,
    pub cascade: CascadeStats,
}

pub struct MetricsTracker {
    snapshot: MetricsSnapshot,
}

impl MetricsTracker {
    pub fn load(path: &Path) -> Self {
        let snapshot = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self { snapshot }
    }

    pub fn record_result(&mut self, score: f64, action: &str, reasons: &[String], illegal: bool, llm_called: bool) {
        self.snapshot.pages_processed += 1;
        match action {
            "skip" => self.snapshot.actions.skip += 1,
            "persist" => self.snapshot.actions.persist += 1,
            "llm" => self.snapshot.actions.llm += 1,
            _ => {}
        }
        self.snapshot.total_score += score;
        if illegal {
            self.snapshot.illegal_skipped += 1;
        }
        if llm_called {
            self.snapshot.llm_calls += 1;
        }
        for reason in reasons {
            *self.snapshot.reasons.entry(reason.clone()).or_insert(0) += 1;
        }
    }

    pub fn record_error(&mut self) {
        self.snapshot.errors += 1;
    }

    pub fn record_failure_host(&mut self, host: &str) {
        *self.snapshot.failure_hosts.entry(host.to_string()).or_insert(0) += 1;
    }

    pub fn record_fetch(&mut self, bytes: u64, duration_ms: u64) {
        self.snapshot.fetch_stats.requests += 1;
        self.snapshot.fetch_stats.total_bytes += bytes;
        self.snapshot.fetch_stats.total_duration_ms += duration_ms;
    }

    pub fn record_cascade_stage(&mut self, stage: &str, status: &str) {
        let counts = self.snapshot.cascade.per_stage.entry(stage.to_string()).or_default();
        match status {
            "pass" => counts.pass += 1,
            "skip" => counts.skip += 1,
            "warn" => counts.warn += 1,
            _ => {}
        }
    }

    pub fn record_cascade_outcome(&mut self, outcome: &str) {
        match outcome {
            "skip" => self.snapshot.cascade.skips += 1,
            "warn" => self.snapshot.cascade.warns += 1,
            _ => self.snapshot.cascade.passes += 1,
        }
    }

    pub fn record_cascade_override(&mut self, reason: &str) {
        *self.snapshot.cascade.overrides.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn save(&mut self, path: &Path, cached_failures: u64) -> std::io::Result<()> {
        self.snapshot.last_updated_at = Utc::now();
        self.snapshot.cached_failures = cached_failures;
        let json = serde_json::to_string_pretty(&self.snapshot)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)
    }

    pub fn write_summary(&self, path: &Path, frontier_size: usize) -> std::io::Result<()> {
        let processed = self.snapshot.pages_processed;
        let average_score = if processed > 0 { self.snapshot.total_score / processed as f64 } else { 0.0 };

        let mut top_reasons: Vec<(String, u64)> = self.snapshot.reasons.iter().map(|(k, v)| (k.clone(), *v)).collect();
        top_reasons.sort_by(|a, b| b.1.cmp(&a.1));
        top_reasons.truncate(10);

        let mut top_failure_hosts: Vec<(String, u64)> =
            self.snapshot.failure_hosts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        top_failure_hosts.sort_by(|a, b| b.1.cmp(&a.1));
        top_failure_hosts.truncate(10);

        let total_runtime_seconds =
            (self.snapshot.last_updated_at - self.snapshot.run_started_at).num_milliseconds() as f64 / 1000.0;
        let bandwidth_bytes = self.snapshot.fetch_stats.total_bytes;
        let odd_hits_total = self.snapshot.actions.persist + self.snapshot.actions.llm;
        let odd_hits_ratio = if processed > 0 { odd_hits_total as f64 / processed as f64 } else { 0.0 };

        let summary = Summary {
            run_started_at: self.snapshot.run_started_at,
            last_updated_at: self.snapshot.last_updated_at,
            pages_processed: processed,
            actions: self.snapshot.actions.clone(),
            illegal_skipped: self.snapshot.illegal_skipped,
            errors: self.snapshot.errors,
            llm_calls: self.snapshot.llm_calls,
            average_score: (average_score * 10_000.0).round() / 10_000.0,
            frontier_size,
            cached_failures: self.snapshot.cached_failures,
            top_reasons,
            top_failure_hosts,
            total_runtime_seconds,
            bandwidth_bytes,
            bandwidth_mib: bandwidth_bytes as f64 / (1024.0 * 1024.0),
            odd_hits_total,
            odd_hits_ratio,
            cascade: self.snapshot.cascade.clone(),
        };

        let json = serde_json::to_string_pretty(&summary)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)
    }
}

pub fn metrics_path(run_dir: &Path) -> PathBuf {
    run_dir.join("metrics.json")
}

pub fn summary_path(run_dir: &Path) -> PathBuf {
    run_dir.join("reports").join("summary.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_hits_ratio_counts_persist_and_llm() {
        let mut tracker = MetricsTracker { snapshot: MetricsSnapshot::default() };
        tracker.record_result(0.5, "persist", &[], false, false);
        tracker.record_result(0.9, "llm", &[], false, true);
        tracker.record_result(0.1, "skip", &[], false, false);
        let dir = std::env::temp_dir().join("oddcrawler-metrics-test");
        let _ = std::fs::create_dir_all(&dir);
        let summary_path = dir.join("summary.json");
        tracker.write_summary(&summary_path, 5).unwrap();
        let contents = std::fs::read_to_string(&summary_path).unwrap();
        assert!(contents.contains("\"odd_hits_total\": 2"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reasons_histogram_accumulates() {
        let mut tracker = MetricsTracker { snapshot: MetricsSnapshot::default() };
        tracker.record_result(0.5, "persist", &["retro signals: marquee".to_string()], false, false);
        tracker.record_result(0.6, "persist", &["retro signals: marquee".to_string()], false, false);
        assert_eq!(tracker.snapshot.reasons.get("retro signals: marquee"), Some(&2));
    }
}
