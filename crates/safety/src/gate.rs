//! Per-host politeness budgets and temporary/permanent blocklisting.
//! Ported from the source's `crawler/tor_connector.py`; the Tor control
//! channel itself (circuit renewal, SOCKS routing) is an external
//! collaborator per the crate's scope, so this only keeps the budget and
//! blocklist bookkeeping `TorConnector` layered on top of it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use oddcrawler_core::config::TorConfig;
use oddcrawler_core::CrawlError;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEntry {
    pub host: String,
    pub blocked_until: Option<DateTime<Utc>>,
    pub reason: String,
}

impl BlockEntry {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.blocked_until {
            None => true,
            Some(until) => until > now,
        }
    }

    fn is_illegal(&self) -> bool {
        self.reason.starts_with("illegal")
    }
}

pub struct HostGate {
    route_domains: HashSet<String>,
    route_onion_only: bool,
    per_host_interval: Duration,
    global_interval: Duration,
    failure_block_minutes: i64,
    max_failures_per_host: u32,
    illegal_block_days: i64,
    blocklist_path: PathBuf,

    host_last_request: HashMap<String, Instant>,
    global_last_request: Option<Instant>,
    host_failures: HashMap<String, u32>,
    blocklist: HashMap<String, BlockEntry>,
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default()
}

fn interval_from_rpm(rpm: Option<f64>) -> Duration {
    match rpm {
        Some(rpm) if rpm > 0.0 => Duration::from_secs_f64(60.0 / rpm),
        _ => Duration::ZERO,
    }
}

impl HostGate {
    pub fn new(config: &TorConfig, blocklist_root: &Path) -> Self {
        let blocklist_path = blocklist_root.join(&config.blocklist_path);
        let mut gate = Self {
            route_domains: config.route_domains.iter().map(|d| d.to_lowercase()).collect(),
            route_onion_only: config.route_onion_only,
            per_host_interval: interval_from_rpm(config.per_host_requests_per_minute),
            global_interval: interval_from_rpm(config.global_requests_per_minute),
            failure_block_minutes: config.failure_block_minutes.max(1),
            max_failures_per_host: config.max_failures_per_host.max(1),
            illegal_block_days: config.illegal_block_days.max(1),
            blocklist_path,
            host_last_request: HashMap::new(),
            global_last_request: None,
            host_failures: HashMap::new(),
            blocklist: HashMap::new(),
        };
        gate.load_blocklist();
        gate
    }

    pub fn should_route(&self, url: &str) -> bool {
        let host = host_of(url);
        if host.ends_with(".onion") {
            return true;
        }
        if self.route_onion_only {
            return self.route_domains.contains(&host);
        }
        self.route_domains.contains(&host)
    }

    /// Raises if the host is blocked; otherwise returns how long the
    /// caller should wait before issuing the request.
    pub fn before_request(&mut self, url: &str) -> Result<Duration, CrawlError> {
        let host = host_of(url);
        self.ensure_not_blocked(&host)?;
        Ok(self.required_wait(&host))
    }

    fn required_wait(&self, host: &str) -> Duration {
        let now = Instant::now();
        let mut wait = Duration::ZERO;
        if !self.per_host_interval.is_zero() {
            if let Some(last) = self.host_last_request.get(host) {
                let elapsed = now.saturating_duration_since(*last);
                if elapsed < self.per_host_interval {
                    wait = wait.max(self.per_host_interval - elapsed);
                }
            }
        }
        if !self.global_interval.is_zero() {
            if let Some(last) = self.global_last_request {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < self.global_interval {
                    wait = wait.max(self.global_interval - elapsed);
                }
            }
        }
        wait
    }

    pub fn record_success(&mut self, url: &str) {
        let host = host_of(url);
        let now = Instant::now();
        self.host_last_request.insert(host.clone(), now);
        self.global_last_request = Some(now);
        self.host_failures.remove(&host);
    }

    pub fn record_failure(&mut self, url: &str, reason: &str) {
        let host = host_of(url);
        let failures = self.host_failures.entry(host.clone()).or_insert(0);
        *failures += 1;
        if *failures >= self.max_failures_per_host {
            let until = Utc::now() + chrono::Duration::minutes(self.failure_block_minutes);
            self.block_host(&host, reason, Some(until));
            self.host_failures.remove(&host);
        }
    }

    pub fn record_illegal(&mut self, url: &str, reason: &str) {
        let host = host_of(url);
        let until = Utc::now() + chrono::Duration::days(self.illegal_block_days);
        let reason_text = if reason.is_empty() { "illegal:detected".to_string() } else { format!("illegal:{reason}") };
        self.block_host(&host, &reason_text, Some(until));
    }

    fn ensure_not_blocked(&mut self, host: &str) -> Result<(), CrawlError> {
        let Some(entry) = self.blocklist.get(host) else { return Ok(()) };
        let now = Utc::now();
        if entry.is_active(now) {
            return if entry.is_illegal() {
                Err(CrawlError::BlockedHost(host.to_string()))
            } else {
                Err(CrawlError::PolicySkip(format!("host temporarily blocked: {host}")))
            };
        }
        self.blocklist.remove(host);
        self.persist_blocklist();
        Ok(())
    }

    fn block_host(&mut self, host: &str, reason: &str, blocked_until: Option<DateTime<Utc>>) {
        self.blocklist.insert(host.to_string(), BlockEntry { host: host.to_string(), blocked_until, reason: reason.to_string() });
        self.persist_blocklist();
    }

    fn load_blocklist(&mut self) {
        let Ok(contents) = std::fs::read_to_string(&self.blocklist_path) else { return };
        let Ok(entries) = serde_json::from_str::<Vec<BlockEntry>>(&contents) else { return };
        let now = Utc::now();
        for entry in entries {
            if entry.is_active(now) {
                self.blocklist.insert(entry.host.clone(), entry);
            }
        }
    }

    fn persist_blocklist(&self) {
        let mut entries: Vec<&BlockEntry> = self.blocklist.values().collect();
        entries.sort_by(|a, b| a.host.cmp(&b.host));
        let json = match serde_json::to_string_pretty(&entries) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "failed to serialize blocklist");
                return;
            }
        };
        if let Some(parent) = self.blocklist_path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(%err, path = %parent.display(), "failed to create blocklist directory");
                return;
            }
        }
        let tmp_path = self.blocklist_path.with_extension("tmp");
        if let Err(err) = std::fs::write(&tmp_path, json) {
            warn!(%err, path = %tmp_path.display(), "failed to write blocklist tmp file");
            return;
        }
        if let Err(err) = std::fs::rename(&tmp_path, &self.blocklist_path) {
            warn!(%err, path = %self.blocklist_path.display(), "failed to rename blocklist tmp file into place");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TorConfig {
        TorConfig {
            enabled: true,
            socks_proxy: "127.0.0.1:9050".to_string(),
            control_port: None,
            control_password: None,
            per_host_requests_per_minute: Some(120.0),
            global_requests_per_minute: None,
            failure_block_minutes: 30,
            max_failures_per_host: 2,
            illegal_block_days: 365,
            blocklist_path: "blocklist.json".to_string(),
            route_domains: vec![],
            route_onion_only: true,
        }
    }

    #[test]
    fn repeated_failures_block_the_host() {
        let dir = std::env::temp_dir().join(format!("oddcrawler-gate-test-{:?}", Instant::now()));
        let mut gate = HostGate::new(&config(), &dir);
        gate.record_failure("http://flaky.test/a", "timeout");
        assert!(gate.before_request("http://flaky.test/a").is_ok());
        gate.record_failure("http://flaky.test/a", "timeout");
        let result = gate.before_request("http://flaky.test/a");
        assert!(result.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn illegal_block_is_permanent_flavored() {
        let dir = std::env::temp_dir().join(format!("oddcrawler-gate-test-illegal-{:?}", Instant::now()));
        let mut gate = HostGate::new(&config(), &dir);
        gate.record_illegal("http://bad.test/x", "cp");
        match gate.before_request("http://bad.test/x") {
            Err(CrawlError::BlockedHost(host)) => assert_eq!(host, "bad.test"),
            other => panic!("expected permanent block, got {other:?}"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn onion_hosts_route_regardless_of_allowlist() {
        let dir = std::env::temp_dir().join(format!("oddcrawler-gate-test-onion-{:?}", Instant::now()));
        let gate = HostGate::new(&config(), &dir);
        assert!(gate.should_route("http://example.onion/"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
