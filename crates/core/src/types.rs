use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Inbound request shape handed to the fetcher (§4.3 / §6 external interfaces).
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_body_size: usize,
    pub follow_redirects: bool,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            follow_redirects: true,
            user_agent: "oddcrawler/0.1".to_string(),
        }
    }
}

/// What a fetch call returns on success. `FetchResult` in the design doc.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub final_url: String,
    pub url_sha256: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub bytes_downloaded: usize,
    pub via_tor: bool,
}

/// A pending unit of crawl work. Immutable once enqueued except
/// `available_at`, which the frontier bumps when a host's token bucket is
/// dry and the job is deferred onto the delay heap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierJob {
    pub priority: f64,
    pub insertion_order: u64,
    pub host: String,
    pub url: String,
    pub depth: u32,
    pub discovered_from: Option<String>,
    pub metadata: HashMap<String, String>,
    pub available_at: chrono::DateTime<chrono::Utc>,
}

/// An outbound link as extracted from a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundLink {
    pub url: String,
    pub anchor_text: Option<String>,
    pub rel: Vec<String>,
    pub found_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinksBucket {
    pub outbound: Vec<OutboundLink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractBucket {
    pub lang: Option<String>,
    pub title: Option<String>,
    pub text_excerpt: String,
    pub token_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HtmlRetroFeature {
    pub score: f64,
    pub signals: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlWeirdFeature {
    pub score: f64,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticFeature {
    pub score: f64,
    pub nn_dist: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyFeature {
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphFeature {
    pub score: f64,
    pub has_webring: bool,
    pub component_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturesBucket {
    pub html_retro: HtmlRetroFeature,
    pub url_weird: UrlWeirdFeature,
    pub semantic: SemanticFeature,
    pub anomaly: AnomalyFeature,
    pub graph: GraphFeature,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashesBucket {
    pub url_sha256: String,
    pub content_sha256: Option<String>,
}

/// The record the triage/extraction pipeline builds for every fetched page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub url: String,
    pub url_canonical: String,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub hashes: HashesBucket,
    pub extract: ExtractBucket,
    pub features: FeaturesBucket,
    pub links: LinksBucket,
    pub cascade: Option<CascadeDecision>,
    pub fetch_metrics: FetchMetrics,
}

/// Status of a single triage stage (§4.2). `Warn` lets the structure stage
/// flag a low-density override without stopping the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pass,
    Skip,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,
    pub reason: Option<String>,
    pub metrics: HashMap<String, f64>,
}

/// Outcome of running the full cascade over one fetch result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CascadeDecision {
    pub should_skip: bool,
    pub stages: Vec<StageOutcome>,
    pub final_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchMetrics {
    pub duration_ms: u64,
    pub bytes_downloaded: usize,
    pub via_tor: bool,
}

/// The tagged-sum decision an observation resolves to (§9 re-architecture
/// guidance: no stringly-typed actions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Skip,
    Persist,
    Llm,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Skip => "skip",
            Action::Persist => "persist",
            Action::Llm => "llm",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreDecision {
    pub score: f64,
    pub action: Action,
    pub thresholds_hit: HashMap<String, f64>,
    pub reasons: Vec<String>,
}
