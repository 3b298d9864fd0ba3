//! Long-running crawl loop: pop -> fetch -> cascade -> extract -> score ->
//! feedback, with checkpoints and telemetry. Ported from
//! `runtime/run_loop.py` + `runner.py`, generalized to the §4.6 step list.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use oddcrawler_cascade::TriageCascade;
use oddcrawler_core::config::AppConfig;
use oddcrawler_core::{Action, CrawlError, Observation};
use oddcrawler_extractor::{extract, ExtractionInput};
use oddcrawler_fetcher::Fetcher;
use oddcrawler_frontier::Frontier;
use oddcrawler_graph::{GraphStore, LinkRef};
use oddcrawler_safety::{HostGate, IllegalContentDetector};
use oddcrawler_scoring::ScoringEngine;
use oddcrawler_storage::{BreadcrumbStore, FailureCache, MetricsTracker, SectionStore, TelemetryWriter};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::analyst::fallback_finding;

pub struct RunLoop {
    config: AppConfig,
    run_dir: PathBuf,
    data_dir: PathBuf,

    frontier: Frontier,
    fetcher: Arc<dyn Fetcher>,
    cascade: TriageCascade,
    scoring: ScoringEngine,
    graph: GraphStore,
    failure_cache: FailureCache,
    host_gate: HostGate,
    illegal: IllegalContentDetector,
    metrics: MetricsTracker,
    telemetry: TelemetryWriter,

    raw_store: SectionStore,
    excerpt_store: SectionStore,
    breadcrumb_store: BreadcrumbStore,

    graph_path: PathBuf,
    frontier_state_path: PathBuf,

    depths: HashMap<String, u32>,
    processed_since_checkpoint: u64,
    stop: Arc<AtomicBool>,
}

impl RunLoop {
    pub fn new(config: AppConfig, fetcher: Arc<dyn Fetcher>, stop: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let run_dir = PathBuf::from(&config.general.run_dir);
        let data_dir = PathBuf::from(&config.general.data_dir);
        let state_dir = run_dir.join("state");
        std::fs::create_dir_all(&state_dir)?;
        std::fs::create_dir_all(run_dir.join("reports"))?;

        let frontier_state_path = state_dir.join("frontier.json");
        let frontier = match std::fs::read_to_string(&frontier_state_path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(|state| Frontier::from_state(config.frontier.clone(), state))
                .unwrap_or_else(|_| Frontier::new(config.frontier.clone())),
            Err(_) => Frontier::new(config.frontier.clone()),
        };

        let graph_path = data_dir.join("graphs").join("link_graph.json");
        let graph = GraphStore::load(&graph_path).unwrap_or_default();

        let failure_cache = FailureCache::new(
            oddcrawler_storage::failures_path(&state_dir),
            oddcrawler_storage::default_skip_statuses(),
            Some(config.run_loop.failure_cache_seconds),
        );

        let host_gate = HostGate::new(&config.tor, &data_dir);
        let illegal = IllegalContentDetector::new(&config.safety.illegal_content);
        let metrics = MetricsTracker::load(&oddcrawler_storage::metrics_path(&run_dir));
        let telemetry = TelemetryWriter::open(&oddcrawler_storage::telemetry_path(&run_dir))?;

        let raw_store = SectionStore::new(&data_dir, &config.storage.raw_html);
        let excerpt_store = SectionStore::new(&data_dir, &config.storage.excerpts);
        let breadcrumb_store = BreadcrumbStore::new(&data_dir, &config.storage.breadcrumbs);

        let cascade = TriageCascade::new(config.cascade.clone(), config.prefilter.clone());
        let scoring = ScoringEngine::new(config.scoring.clone());

        Ok(Self {
            config,
            run_dir,
            data_dir,
            frontier,
            fetcher,
            cascade,
            scoring,
            graph,
            failure_cache,
            host_gate,
            illegal,
            metrics,
            telemetry,
            raw_store,
            excerpt_store,
            breadcrumb_store,
            graph_path,
            frontier_state_path,
            depths: HashMap::new(),
            processed_since_checkpoint: 0,
            stop,
        })
    }

    pub fn add_seeds(&mut self, seeds: &[String]) {
        let now = Utc::now();
        let mut filtered = Vec::new();
        for seed in seeds {
            if self.failure_cache.should_skip(seed) {
                continue;
            }
            filtered.push(seed.clone());
        }
        let skipped = seeds.len() - filtered.len();
        if skipped > 0 {
            self.log_event(json!({
                "timestamp": now.to_rfc3339(),
                "event": "seed_skipped",
                "skipped_count": skipped,
                "reason": "failure_cache",
            }));
        }
        for seed in &filtered {
            self.depths.insert(seed.clone(), 0);
            self.frontier.add(seed, 0, None, None, None, HashMap::new(), now);
        }
    }

    pub async fn run(&mut self, max_pages: Option<u64>) -> anyhow::Result<()> {
        let mut processed = 0u64;
        while !self.stop.load(Ordering::Relaxed) {
            if let Some(max) = max_pages {
                if processed >= max {
                    break;
                }
            }
            let Some(url) = self.frontier.pop(Utc::now()) else { break };

            if self.failure_cache.should_skip(&url) {
                continue;
            }

            let step_ran = self.step(&url).await?;
            if step_ran {
                processed += 1;
                self.processed_since_checkpoint += 1;
                if self.processed_since_checkpoint >= self.config.general.checkpoint_interval {
                    self.checkpoint()?;
                }
                if self.config.run_loop.sleep_seconds > 0.0 {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(self.config.run_loop.sleep_seconds)).await;
                }
            }
        }
        self.checkpoint()?;
        Ok(())
    }

    /// Runs one pop-fetch-decide-feedback cycle. Returns whether a page was
    /// actually processed (vs. short-circuited on a fetch error).
    async fn step(&mut self, url: &str) -> anyhow::Result<bool> {
        let now = Utc::now();

        let wait = match self.host_gate.before_request(url) {
            Ok(wait) => wait,
            Err(err) => {
                warn!(url, %err, "host gate refused request");
                self.frontier.record_failure(url, None, Some("host_blocked"), now);
                return Ok(false);
            }
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let via_tor = self.config.tor.enabled && self.host_gate.should_route(url);
        let fetch_result = self.fetcher.fetch(url, via_tor).await;
        let response = match fetch_result {
            Ok(resp) => resp,
            Err(CrawlError::FetchHttp { status, url: final_url }) if status == 404 => {
                self.failure_cache.record(&final_url, Some(status), "http_404");
                self.frontier.record_failure(url, Some(status), Some("http_404"), now);
                self.host_gate.record_failure(url, "http_404");
                let host = host_of(url);
                self.metrics.record_failure_host(&host);
                self.log_event(json!({
                    "timestamp": now.to_rfc3339(),
                    "event": "url_404",
                    "url": final_url,
                    "status": status,
                    "host": host,
                }));
                return Ok(false);
            }
            Err(err) => {
                self.frontier.record_failure(url, err.http_status(), Some("fetch_error"), now);
                self.host_gate.record_failure(url, "fetch_error");
                self.metrics.record_error();
                self.log_event(json!({
                    "timestamp": now.to_rfc3339(),
                    "event": "error",
                    "error_type": "fetch",
                    "error_message": err.to_string(),
                }));
                return Ok(false);
            }
        };
        self.host_gate.record_success(url);

        let depth = self.depths.get(url).copied().unwrap_or(0);

        if let Some(illegal) = self.pre_fetch_illegal_check(url, &response.body, now)? {
            return Ok(illegal);
        }

        let decision = self.cascade.evaluate(
            url,
            response.content_type.as_deref(),
            Some(response.body.len()),
            &response.body,
            None,
        );
        self.record_cascade_stats(&decision);

        if decision.should_skip {
            self.frontier.record_feedback(url, 0.0, "skip", true, now);
            self.metrics.record_result(0.0, "skip", &[], false, false);
            self.log_event(json!({
                "timestamp": now.to_rfc3339(),
                "url": url,
                "action": "skip",
                "score": 0.0,
                "cascade_skip": true,
                "reason": decision.final_reason,
                "frontier_size": self.frontier.len(),
            }));
            return Ok(true);
        }

        let max_excerpt_chars = self.config.storage.excerpts.max_chars.unwrap_or(2000);
        let mut observation = extract(ExtractionInput {
            url,
            status: response.status,
            headers: &response.headers,
            body: &response.body,
            fetched_at: response.fetched_at,
            max_excerpt_chars,
        });
        observation.cascade = Some(decision);

        for link in observation.links.outbound.clone() {
            if depth + 1 > self.config.general.max_depth {
                continue;
            }
            if self.frontier.add(&link.url, depth + 1, Some(url), None, None, HashMap::new(), now) {
                self.depths.insert(link.url.clone(), depth + 1);
            }
        }

        if let Some(illegal) =
            self.post_extraction_illegal_check(url, &observation.extract.text_excerpt, now)?
        {
            return Ok(illegal);
        }

        self.persist_raw(url, &response.headers, &response.body, response.fetched_at);

        let links: Vec<LinkRef> = observation
            .links
            .outbound
            .iter()
            .map(|l| LinkRef { target: l.url.clone(), anchor_text: l.anchor_text.clone(), rel: l.rel.clone() })
            .collect();
        let graph_metrics = self.graph.record_page(
            url,
            observation.fetched_at,
            observation.status,
            observation.extract.title.as_deref(),
            &links,
            if observation.features.graph.has_webring { 1 } else { 0 },
        );
        observation.features.graph.score = graph_metrics.graph_score;
        observation.features.graph.component_size = graph_metrics.component_size;

        let score_decision = self.scoring.evaluate(&observation.features);
        self.graph.update_score(url, score_decision.score, score_decision.action.as_str());

        self.dispatch(&observation, &score_decision, now);

        self.frontier.record_feedback(url, score_decision.score, score_decision.action.as_str(), false, now);
        self.metrics.record_result(
            score_decision.score,
            score_decision.action.as_str(),
            &score_decision.reasons,
            false,
            score_decision.action == Action::Llm,
        );
        self.metrics.record_fetch(response.bytes_downloaded as u64, response.duration_ms);

        self.log_event(json!({
            "timestamp": now.to_rfc3339(),
            "url": url,
            "action": score_decision.action.as_str(),
            "score": (score_decision.score * 1_000_000.0).round() / 1_000_000.0,
            "thresholds_hit": score_decision.thresholds_hit,
            "reasons": score_decision.reasons,
            "frontier_size": self.frontier.len(),
            "illegal": false,
            "fetch_duration_ms": response.duration_ms,
            "bytes_downloaded": response.bytes_downloaded,
            "status": response.status,
            "via_tor": response.via_tor,
        }));

        Ok(true)
    }

    fn pre_fetch_illegal_check(&mut self, url: &str, body: &[u8], now: chrono::DateTime<Utc>) -> anyhow::Result<Option<bool>> {
        let text = String::from_utf8_lossy(body);
        let detection = self.illegal.scan(&text);
        if !detection.illegal {
            return Ok(None);
        }
        if self.config.tor.enabled {
            self.host_gate.record_illegal(url, &detection.reason);
        }
        self.frontier.record_feedback(url, 0.0, "skip", false, now);
        self.metrics.record_result(0.0, "skip", &[], true, false);
        self.log_event(json!({
            "timestamp": now.to_rfc3339(),
            "url": url,
            "action": "skip",
            "score": 0.0,
            "illegal": true,
            "reasons": [detection.reason],
            "frontier_size": self.frontier.len(),
        }));
        Ok(Some(true))
    }

    fn post_extraction_illegal_check(
        &mut self,
        url: &str,
        excerpt: &str,
        now: chrono::DateTime<Utc>,
    ) -> anyhow::Result<Option<bool>> {
        let detection = self.illegal.scan(excerpt);
        if !detection.illegal {
            return Ok(None);
        }
        if self.config.tor.enabled {
            self.host_gate.record_illegal(url, &detection.reason);
        }
        self.frontier.record_feedback(url, 0.0, "skip", false, now);
        self.metrics.record_result(0.0, "skip", &[], true, false);
        self.log_event(json!({
            "timestamp": now.to_rfc3339(),
            "url": url,
            "action": "skip",
            "score": 0.0,
            "illegal": true,
            "reasons": [detection.reason],
            "frontier_size": self.frontier.len(),
        }));
        Ok(Some(true))
    }

    fn persist_raw(&self, url: &str, headers: &HashMap<String, String>, body: &[u8], fetched_at: chrono::DateTime<Utc>) {
        if !self.raw_store.enabled() {
            return;
        }
        let url_hash = sha256_hex(url.as_bytes());
        let mut metadata = HashMap::new();
        metadata.insert("url_hash".to_string(), url_hash.clone());
        metadata.insert("fetched_at".to_string(), fetched_at.to_rfc3339());
        metadata.insert("headers".to_string(), serde_json::to_string(headers).unwrap_or_default());
        if let Err(err) = self.raw_store.save_raw(&url_hash, fetched_at, body, &metadata) {
            warn!(url, %err, "failed to persist raw response");
        }
    }

    fn dispatch(&mut self, observation: &Observation, decision: &oddcrawler_core::ScoreDecision, now: chrono::DateTime<Utc>) {
        if self.excerpt_store.enabled() {
            let url_hash = sha256_hex(observation.url.as_bytes());
            if let Err(err) =
                self.excerpt_store.save_excerpt(&url_hash, observation.fetched_at, &observation.extract.text_excerpt, observation)
            {
                warn!(url = %observation.url, %err, "failed to persist excerpt");
            }
        }

        if decision.action != Action::Llm {
            return;
        }

        let finding = fallback_finding(observation, &decision.reasons);
        if finding.dangerous_content.present && self.breadcrumb_store.enabled() {
            let url_hash = sha256_hex(observation.url.as_bytes());
            let breadcrumb = json!({
                "url_hash": url_hash,
                "observed_at": now.to_rfc3339(),
                "category": finding.dangerous_content.category.clone().unwrap_or_else(|| "other".to_string()),
                "reason": finding.summary.chars().take(300).collect::<String>(),
                "source": "analyst",
                "salt_version": self.config.storage.salt_rotation.active_version,
            });
            if let Err(err) = self.breadcrumb_store.save_breadcrumb(now, &breadcrumb) {
                warn!(url = %observation.url, %err, "failed to persist breadcrumb");
            }
        }
    }

    fn record_cascade_stats(&mut self, decision: &oddcrawler_core::CascadeDecision) {
        for stage in &decision.stages {
            let status = match stage.status {
                oddcrawler_core::StageStatus::Pass => "pass",
                oddcrawler_core::StageStatus::Skip => "skip",
                oddcrawler_core::StageStatus::Warn => "warn",
            };
            self.metrics.record_cascade_stage(&stage.stage, status);
            if stage.status == oddcrawler_core::StageStatus::Warn {
                if let Some(reason) = &stage.reason {
                    self.metrics.record_cascade_override(reason);
                }
            }
        }
        self.metrics.record_cascade_outcome(if decision.should_skip { "skip" } else { "pass" });
    }

    pub fn checkpoint(&mut self) -> anyhow::Result<()> {
        let state = self.frontier.export_state();
        let json = serde_json::to_string_pretty(&state)?;
        let tmp_path = self.frontier_state_path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.frontier_state_path)?;

        self.failure_cache.save()?;
        self.graph.persist(&self.graph_path)?;
        self.metrics.save(&oddcrawler_storage::metrics_path(&self.run_dir), self.failure_cache.len() as u64)?;
        self.metrics.write_summary(&oddcrawler_storage::summary_path(&self.run_dir), self.frontier.len())?;
        self.processed_since_checkpoint = 0;
        info!(frontier_size = self.frontier.len(), "checkpoint written");
        Ok(())
    }

    fn log_event(&mut self, event: serde_json::Value) {
        if let Err(err) = self.telemetry.log_event(&event) {
            debug!(%err, "failed to write telemetry event");
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_string())).unwrap_or_default()
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_extracts_host_from_url() {
        assert_eq!(host_of("https://example.test/path"), "example.test");
    }

    #[test]
    fn host_of_returns_empty_for_unparsable_url() {
        assert_eq!(host_of("not a url"), "");
    }

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
    }
}
