//! Priority frontier with bandit-UCB host scheduling and per-host token-
//! bucket politeness. Generalizes the teacher's per-network `PriorityQueue` +
//! bloom-dedupe frontier into the single bandit-scheduled queue.
//!
//! The whole structure is meant to sit behind one exclusive section (a
//! mutex in a multi-worker caller); nothing here is internally concurrent.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use oddcrawler_core::config::FrontierConfig;
use oddcrawler_core::FrontierJob;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostStats {
    pub pulls: u64,
    pub reward_sum: f64,
    pub hits: u64,
    pub failures: u64,
    pub last_score: Option<f64>,
    pub last_action: Option<String>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub status_counts: HashMap<u16, u64>,
}

impl HostStats {
    fn avg_reward(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.reward_sum / self.pulls as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostBucket {
    pub tokens: f64,
    pub updated_at: DateTime<Utc>,
    pub backoff_until: Option<DateTime<Utc>>,
}

impl HostBucket {
    fn fresh(now: DateTime<Utc>, capacity: f64) -> Self {
        Self { tokens: capacity, updated_at: now, backoff_until: None }
    }

    /// Refills tokens up to `capacity` at one token per `refill_seconds`,
    /// then pins to zero if a backoff window is still active (§4.1).
    fn refilled(&self, now: DateTime<Utc>, capacity: f64, refill_seconds: f64) -> (f64, bool) {
        let elapsed = (now - self.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
        let refill_rate = if refill_seconds > 0.0 { 1.0 / refill_seconds } else { 0.0 };
        let tokens = (self.tokens + elapsed * refill_rate).min(capacity).max(0.0);
        let under_backoff = self.backoff_until.map(|b| b > now).unwrap_or(false);
        if under_backoff {
            (0.0, true)
        } else {
            (tokens, false)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostCascade {
    pub passes: u64,
    pub skips: u64,
}

#[derive(Debug, Clone)]
struct HeapEntry(FrontierJob);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.insertion_order == other.0.insertion_order
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .partial_cmp(&other.0.priority)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.0.insertion_order.cmp(&self.0.insertion_order))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct DelayEntry {
    available_at: DateTime<Utc>,
    job: FrontierJob,
}

impl PartialEq for DelayEntry {
    fn eq(&self, other: &Self) -> bool {
        self.available_at == other.available_at
    }
}
impl Eq for DelayEntry {}
impl Ord for DelayEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap, we want the earliest time on top
        other.available_at.cmp(&self.available_at)
    }
}
impl PartialOrd for DelayEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Serializable snapshot of the frontier's full state (§4.1 "Persistence").
#[derive(Debug, Serialize, Deserialize)]
pub struct FrontierState {
    pub insertion_counter: u64,
    pub seen: Vec<String>,
    pub heap: Vec<FrontierJob>,
    pub delay_heap: Vec<FrontierJob>,
    pub host_stats: HashMap<String, HostStats>,
    pub host_buckets: HashMap<String, HostBucket>,
    pub host_hints: HashMap<String, f64>,
    pub cascade_stats: HashMap<String, HostCascade>,
    pub total_pulls: u64,
}

pub struct Frontier {
    config: FrontierConfig,
    insertion_counter: u64,
    seen: HashSet<String>,
    heap: BinaryHeap<HeapEntry>,
    delay_heap: BinaryHeap<DelayEntry>,
    inflight: HashMap<String, String>,
    host_stats: HashMap<String, HostStats>,
    host_buckets: HashMap<String, HostBucket>,
    host_hints: HashMap<String, f64>,
    cascade_stats: HashMap<String, HostCascade>,
    total_pulls: u64,
}

impl Frontier {
    pub fn new(config: FrontierConfig) -> Self {
        Self {
            config,
            insertion_counter: 0,
            seen: HashSet::new(),
            heap: BinaryHeap::new(),
            delay_heap: BinaryHeap::new(),
            inflight: HashMap::new(),
            host_stats: HashMap::new(),
            host_buckets: HashMap::new(),
            host_hints: HashMap::new(),
            cascade_stats: HashMap::new(),
            total_pulls: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len() + self.delay_heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues a canonical URL. Returns `false` if it was already seen.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        url: &str,
        depth: u32,
        discovered_from: Option<&str>,
        priority_override: Option<f64>,
        score_hint: Option<f64>,
        metadata: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> bool {
        let canonical = match oddcrawler_core::canonicalize_url(url) {
            Some(c) => c,
            None => return false,
        };
        if self.seen.contains(&canonical) {
            return false;
        }
        let host = match host_of(&canonical) {
            Some(h) => h,
            None => return false,
        };
        let discovered_from_host = discovered_from.and_then(host_of);

        let priority = priority_override.unwrap_or_else(|| {
            self.compute_priority(&host, depth, discovered_from_host.as_deref(), score_hint, now)
        });
        let priority = priority.clamp(self.config.min_priority, self.config.max_priority);

        self.seen.insert(canonical.clone());
        self.insertion_counter += 1;
        let job = FrontierJob {
            priority,
            insertion_order: self.insertion_counter,
            host,
            url: canonical,
            depth,
            discovered_from: discovered_from.map(|s| s.to_string()),
            metadata,
            available_at: now,
        };
        self.heap.push(HeapEntry(job));
        true
    }

    fn compute_priority(
        &self,
        host: &str,
        depth: u32,
        discovered_from_host: Option<&str>,
        score_hint: Option<f64>,
        now: DateTime<Utc>,
    ) -> f64 {
        let cfg = &self.config;
        let capacity = cfg.host_token_capacity;
        let refill_seconds = cfg.effective_host_refill_seconds();

        let host_budget = match self.host_buckets.get(host) {
            Some(bucket) => {
                let (tokens, under_backoff) = bucket.refilled(now, capacity, refill_seconds);
                if under_backoff { 0.0 } else { tokens / capacity }
            }
            None => 1.0,
        };

        let stats = self.host_stats.get(host);
        let pulls = stats.map(|s| s.pulls).unwrap_or(0);
        let novelty = if pulls == 0 {
            1.0
        } else {
            (-(pulls as f64) / cfg.novelty_decay).exp()
        };

        let bandit_ucb = if pulls == 0 {
            cfg.bandit_initial
        } else {
            let avg_reward = stats.map(|s| s.avg_reward()).unwrap_or(0.0);
            let total = self.total_pulls.max(1) as f64;
            let ucb = avg_reward + cfg.bandit_exploration * ((total.ln()) / pulls as f64).sqrt();
            ucb.clamp(0.0, 1.0)
        };

        let avg_host_reward = stats.map(|s| s.avg_reward()).unwrap_or(0.0);
        let host_hint = self.host_hints.get(host).copied().unwrap_or(0.0);
        let oddity_prior = avg_host_reward
            .max(score_hint.unwrap_or(0.0))
            .max(host_hint)
            .max(0.5)
            .clamp(0.0, 1.0);

        let cascade_penalty = self.cascade_penalty_for(host);
        let cross_domain_bonus = match discovered_from_host {
            Some(from) if from != host => cfg.cross_domain_bonus,
            _ => 0.0,
        };

        cfg.w_host_budget * host_budget
            + cfg.w_novelty * novelty
            + cfg.w_bandit * bandit_ucb
            + cfg.w_oddity * oddity_prior
            - cfg.depth_penalty * (depth as f64).max(0.0)
            - cascade_penalty
            + cross_domain_bonus
    }

    fn cascade_penalty_for(&self, host: &str) -> f64 {
        let cfg = &self.config;
        let Some(stats) = self.cascade_stats.get(host) else { return 0.0 };
        let total = stats.passes + stats.skips;
        if total < cfg.cascade_min_observations {
            return 0.0;
        }
        let ratio = stats.skips as f64 / total as f64;
        if ratio <= cfg.cascade_skip_threshold {
            return 0.0;
        }
        let excess = (ratio - cfg.cascade_skip_threshold) / (1.0 - cfg.cascade_skip_threshold).max(1e-9);
        cfg.cascade_penalty * excess.clamp(0.0, 1.0)
    }

    /// Promotes delayed jobs whose `available_at` has elapsed, then pops the
    /// highest-priority job whose host currently has a token. Returns the
    /// canonical URL, or `None` if every eligible job is rate-limited.
    pub fn pop(&mut self, now: DateTime<Utc>) -> Option<String> {
        self.promote_ready(now);

        loop {
            let entry = self.heap.pop()?;
            let job = entry.0;
            let capacity = self.config.host_token_capacity;
            let refill_seconds = self.config.effective_host_refill_seconds();

            let bucket = self
                .host_buckets
                .entry(job.host.clone())
                .or_insert_with(|| HostBucket::fresh(now, capacity));
            let (tokens, under_backoff) = bucket.refilled(now, capacity, refill_seconds);

            if !under_backoff && tokens >= 1.0 {
                bucket.tokens = tokens - 1.0;
                bucket.updated_at = now;
                let url = job.url.clone();
                self.inflight.insert(url.clone(), job.host.clone());
                return Some(url);
            }

            let wait_seconds = if under_backoff {
                bucket
                    .backoff_until
                    .map(|b| (b - now).num_milliseconds().max(0) as f64 / 1000.0)
                    .unwrap_or(0.0)
            } else {
                let deficit = (1.0 - tokens).max(0.0);
                deficit * refill_seconds
            };
            let available_at = now + chrono::Duration::milliseconds((wait_seconds * 1000.0) as i64);
            bucket.tokens = tokens;
            bucket.updated_at = now;
            self.delay_heap.push(DelayEntry { available_at, job });
        }
    }

    fn promote_ready(&mut self, now: DateTime<Utc>) {
        while let Some(top) = self.delay_heap.peek() {
            if top.available_at > now {
                break;
            }
            let entry = self.delay_heap.pop().unwrap();
            self.heap.push(HeapEntry(entry.job));
        }
    }

    /// Records the outcome of an action for a previously popped URL.
    pub fn record_feedback(
        &mut self,
        url: &str,
        score: f64,
        action: &str,
        cascade_skip: bool,
        now: DateTime<Utc>,
    ) {
        let Some(host) = self.inflight.remove(url) else { return };
        self.total_pulls += 1;

        let stats = self.host_stats.entry(host.clone()).or_default();
        stats.pulls += 1;
        stats.reward_sum += score;
        if action == "persist" || action == "llm" {
            stats.hits += 1;
        }
        stats.last_score = Some(score);
        stats.last_action = Some(action.to_string());

        let hint = self.host_hints.entry(host.clone()).or_insert(0.0);
        if score > *hint {
            *hint = score;
        }

        let cascade = self.cascade_stats.entry(host).or_default();
        if cascade_skip {
            cascade.skips += 1;
        } else {
            cascade.passes += 1;
        }
        let _ = now;
    }

    /// Records a fetch failure: bumps the failure counter, sets the
    /// backoff window, and drains the host's token bucket to zero.
    pub fn record_failure(&mut self, url: &str, status: Option<u16>, reason: Option<&str>, now: DateTime<Utc>) {
        let Some(host) = self.inflight.remove(url) else { return };

        let stats = self.host_stats.entry(host.clone()).or_default();
        stats.failures += 1;
        stats.last_failure = Some(now);
        stats.last_failure_reason = reason.map(|s| s.to_string());
        if let Some(status) = status {
            *stats.status_counts.entry(status).or_insert(0) += 1;
        }

        let cooldown = chrono::Duration::seconds(self.config.failure_cooldown_seconds);
        let new_backoff = now + cooldown;
        let capacity = self.config.host_token_capacity;
        let bucket = self
            .host_buckets
            .entry(host)
            .or_insert_with(|| HostBucket::fresh(now, capacity));
        bucket.backoff_until = Some(match bucket.backoff_until {
            Some(existing) if existing > new_backoff => existing,
            _ => new_backoff,
        });
        bucket.tokens = 0.0;
        bucket.updated_at = now;
    }

    pub fn export_state(&self) -> FrontierState {
        let mut seen: Vec<String> = self.seen.iter().cloned().collect();
        seen.sort();
        let heap: Vec<FrontierJob> = self.heap.iter().map(|e| e.0.clone()).collect();
        let delay_heap: Vec<FrontierJob> = self.delay_heap.iter().map(|e| e.job.clone()).collect();
        FrontierState {
            insertion_counter: self.insertion_counter,
            seen,
            heap,
            delay_heap,
            host_stats: self.host_stats.clone(),
            host_buckets: self.host_buckets.clone(),
            host_hints: self.host_hints.clone(),
            cascade_stats: self.cascade_stats.clone(),
            total_pulls: self.total_pulls,
        }
    }

    pub fn from_state(config: FrontierConfig, state: FrontierState) -> Self {
        let mut heap = BinaryHeap::new();
        for job in state.heap {
            heap.push(HeapEntry(job));
        }
        let mut delay_heap = BinaryHeap::new();
        for job in state.delay_heap {
            delay_heap.push(DelayEntry { available_at: job.available_at, job });
        }
        Self {
            config,
            insertion_counter: state.insertion_counter,
            seen: state.seen.into_iter().collect(),
            heap,
            delay_heap,
            inflight: HashMap::new(),
            host_stats: state.host_stats,
            host_buckets: state.host_buckets,
            host_hints: state.host_hints,
            cascade_stats: state.cascade_stats,
            total_pulls: state.total_pulls,
        }
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok()?.host_str().map(|h| h.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FrontierConfig {
        // matches the defaults in oddcrawler_core::config, inlined for
        // determinism regardless of toml parsing.
        FrontierConfig {
            w_host_budget: 0.35,
            w_novelty: 0.25,
            w_bandit: 0.25,
            w_oddity: 0.15,
            depth_penalty: 0.05,
            cross_domain_bonus: 0.05,
            min_priority: 0.05,
            max_priority: 1.0,
            novelty_decay: 6.0,
            bandit_exploration: 0.25,
            bandit_initial: 0.6,
            cascade_min_observations: 5,
            cascade_skip_threshold: 0.8,
            cascade_penalty: 0.15,
            host_token_capacity: 1.0,
            per_host_requests_per_minute: None,
            host_refill_seconds: 0.01,
            failure_cooldown_seconds: 45,
        }
    }

    #[test]
    fn dedupes_canonical_urls() {
        let mut frontier = Frontier::new(test_config());
        let now = Utc::now();
        assert!(frontier.add("https://a.test/1", 0, None, None, None, HashMap::new(), now));
        assert!(!frontier.add("https://a.test/1", 0, None, None, None, HashMap::new(), now));
    }

    #[test]
    fn pop_consumes_a_token() {
        let mut frontier = Frontier::new(test_config());
        let now = Utc::now();
        frontier.add("https://a.test/1", 0, None, None, None, HashMap::new(), now);
        let popped = frontier.pop(now);
        assert_eq!(popped.as_deref(), Some("https://a.test/1"));
        let bucket = frontier.host_buckets.get("a.test").unwrap();
        assert!(bucket.tokens < 1.0);
    }

    #[test]
    fn bandit_prefers_the_winning_host() {
        let mut config = test_config();
        config.w_bandit = 0.9;
        config.w_host_budget = 0.0;
        config.w_novelty = 0.0;
        config.w_oddity = 0.05;
        let mut frontier = Frontier::new(config);
        let now = Utc::now();

        frontier.add("https://b.test/1", 0, None, None, None, HashMap::new(), now);
        frontier.add("https://a.test/1", 0, None, None, None, HashMap::new(), now);

        let first = frontier.pop(now).unwrap();
        frontier.record_feedback(&first, 0.1, "skip", false, now);
        let second = frontier.pop(now).unwrap();
        frontier.record_feedback(&second, 0.9, "persist", false, now);

        frontier.add("https://b.test/2", 0, None, None, None, HashMap::new(), now);
        frontier.add("https://a.test/2", 0, None, None, None, HashMap::new(), now);

        let next = frontier.pop(now).unwrap();
        assert!(next.starts_with("https://a.test"), "got {next}");
    }

    #[test]
    fn failure_backoff_defers_host() {
        let mut frontier = Frontier::new(test_config());
        let now = Utc::now();
        frontier.add("https://a.test/1", 0, None, None, None, HashMap::new(), now);
        frontier.add("https://b.test/1", 0, None, None, None, HashMap::new(), now);

        let first = frontier.pop(now).unwrap();
        if first.starts_with("https://a.test") {
            frontier.record_failure(&first, None, Some("boom"), now);
        } else {
            frontier.record_feedback(&first, 0.5, "persist", false, now);
        }

        frontier.add("https://a.test/2", 0, None, None, None, HashMap::new(), now);
        frontier.add("https://b.test/2", 0, None, None, None, HashMap::new(), now);

        let next = frontier.pop(now).unwrap();
        assert!(next.starts_with("https://b.test"), "got {next}");
    }

    #[test]
    fn state_round_trips() {
        let mut frontier = Frontier::new(test_config());
        let now = Utc::now();
        frontier.add("https://a.test/1", 0, None, None, None, HashMap::new(), now);
        frontier.add("https://a.test/2", 0, None, None, None, HashMap::new(), now);
        let state = frontier.export_state();
        let json = serde_json::to_string(&state).unwrap();
        let restored: FrontierState = serde_json::from_str(&json).unwrap();
        let mut seen = restored.seen.clone();
        seen.sort();
        let mut expected = state.seen.clone();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(restored.heap.len(), state.heap.len());
    }
}
