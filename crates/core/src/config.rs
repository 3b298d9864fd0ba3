use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub frontier: FrontierConfig,
    pub cascade: CascadeConfig,
    pub prefilter: PrefilterConfig,
    pub scoring: ScoringConfig,
    pub storage: StorageConfig,
    pub safety: SafetyConfig,
    pub tor: TorConfig,
    pub run_loop: RunLoopConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    pub data_dir: String,
    pub run_dir: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_download_timeout")]
    pub download_timeout_seconds: u64,
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,
}

fn default_max_depth() -> u32 { 8 }
fn default_checkpoint_interval() -> u64 { 25 }
fn default_user_agent() -> String { "oddcrawler/0.1 (+polite research crawler)".to_string() }
fn default_download_timeout() -> u64 { 30 }
fn default_max_body_size_mb() -> usize { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct FrontierConfig {
    #[serde(default = "default_w_host_budget")]
    pub w_host_budget: f64,
    #[serde(default = "default_w_novelty")]
    pub w_novelty: f64,
    #[serde(default = "default_w_bandit")]
    pub w_bandit: f64,
    #[serde(default = "default_w_oddity")]
    pub w_oddity: f64,
    #[serde(default = "default_depth_penalty")]
    pub depth_penalty: f64,
    #[serde(default = "default_cross_domain_bonus")]
    pub cross_domain_bonus: f64,
    #[serde(default = "default_min_priority")]
    pub min_priority: f64,
    #[serde(default = "default_max_priority")]
    pub max_priority: f64,
    #[serde(default = "default_novelty_decay")]
    pub novelty_decay: f64,
    #[serde(default = "default_bandit_exploration")]
    pub bandit_exploration: f64,
    #[serde(default = "default_bandit_initial")]
    pub bandit_initial: f64,
    #[serde(default = "default_cascade_min_observations")]
    pub cascade_min_observations: u64,
    #[serde(default = "default_cascade_skip_threshold")]
    pub cascade_skip_threshold: f64,
    #[serde(default = "default_cascade_penalty")]
    pub cascade_penalty: f64,
    #[serde(default = "default_host_token_capacity")]
    pub host_token_capacity: f64,
    #[serde(default)]
    pub per_host_requests_per_minute: Option<f64>,
    #[serde(default = "default_host_refill_seconds")]
    pub host_refill_seconds: f64,
    #[serde(default = "default_failure_cooldown_seconds")]
    pub failure_cooldown_seconds: i64,
}

fn default_w_host_budget() -> f64 { 0.35 }
fn default_w_novelty() -> f64 { 0.25 }
fn default_w_bandit() -> f64 { 0.25 }
fn default_w_oddity() -> f64 { 0.15 }
fn default_depth_penalty() -> f64 { 0.05 }
fn default_cross_domain_bonus() -> f64 { 0.05 }
fn default_min_priority() -> f64 { 0.05 }
fn default_max_priority() -> f64 { 1.0 }
fn default_novelty_decay() -> f64 { 6.0 }
fn default_bandit_exploration() -> f64 { 0.25 }
fn default_bandit_initial() -> f64 { 0.6 }
fn default_cascade_min_observations() -> u64 { 5 }
fn default_cascade_skip_threshold() -> f64 { 0.8 }
fn default_cascade_penalty() -> f64 { 0.15 }
fn default_host_token_capacity() -> f64 { 1.0 }
fn default_host_refill_seconds() -> f64 { 6.0 }
fn default_failure_cooldown_seconds() -> i64 { 45 }

impl FrontierConfig {
    /// `host_refill_seconds` is derived from `per_host_requests_per_minute`
    /// when the caller supplies an RPM cap instead of a raw refill period.
    pub fn effective_host_refill_seconds(&self) -> f64 {
        match self.per_host_requests_per_minute {
            Some(rpm) if rpm > 0.0 => 60.0 / rpm,
            _ => self.host_refill_seconds,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CascadeConfig {
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_snippet_bytes")]
    pub snippet_bytes: usize,
    #[serde(default = "default_max_script_ratio")]
    pub max_script_ratio: f64,
    #[serde(default = "default_max_anchor_ratio")]
    pub max_anchor_ratio: f64,
    #[serde(default = "default_min_text_density")]
    pub min_text_density: f64,
    #[serde(default = "default_density_token_override")]
    pub density_token_override: u64,
    #[serde(default = "default_density_anchor_override")]
    pub density_anchor_override: f64,
    #[serde(default = "default_density_skip_token_cap")]
    pub density_skip_token_cap: u64,
    #[serde(default = "default_boring_keywords")]
    pub boring_keywords: Vec<String>,
    #[serde(default = "default_odd_keywords")]
    pub odd_keywords: Vec<String>,
    #[serde(default = "default_simhash_enabled")]
    pub simhash_enabled: bool,
    #[serde(default = "default_simhash_bits")]
    pub simhash_bits: u32,
    #[serde(default = "default_classifier_weights")]
    pub classifier_weights: HashMap<String, f64>,
    #[serde(default = "default_classifier_threshold")]
    pub classifier_threshold: f64,
    #[serde(default = "default_retro_override_score")]
    pub retro_override_score: f64,
}

fn default_allowed_content_types() -> Vec<String> {
    vec!["text/html".to_string(), "application/xhtml+xml".to_string()]
}
fn default_min_content_length() -> usize { 512 }
fn default_max_content_length() -> usize { 2_500_000 }
fn default_snippet_bytes() -> usize { 8192 }
fn default_max_script_ratio() -> f64 { 0.55 }
fn default_max_anchor_ratio() -> f64 { 0.65 }
fn default_min_text_density() -> f64 { 0.02 }
fn default_density_token_override() -> u64 { 40 }
fn default_density_anchor_override() -> f64 { 0.35 }
fn default_density_skip_token_cap() -> u64 { 15 }
fn default_boring_keywords() -> Vec<String> {
    vec![
        "insurance".to_string(),
        "mortgage".to_string(),
        "real estate".to_string(),
        "press release".to_string(),
        "terms and conditions".to_string(),
        "privacy policy".to_string(),
    ]
}
fn default_odd_keywords() -> Vec<String> {
    vec![
        "webring".to_string(),
        "guestbook".to_string(),
        "under construction".to_string(),
        "geocities".to_string(),
    ]
}
fn default_simhash_enabled() -> bool { true }
fn default_simhash_bits() -> u32 { 64 }
fn default_classifier_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("bias".to_string(), -1.59),
        ("text_density".to_string(), 0.29),
        ("retro_score".to_string(), 0.04),
        ("script_ratio".to_string(), -0.35),
        ("anchor_ratio".to_string(), 0.75),
        ("token_ratio".to_string(), 3.01),
        ("odd_keyword".to_string(), 0.89),
    ])
}
fn default_classifier_threshold() -> f64 { 0.35 }
fn default_retro_override_score() -> f64 { 0.3 }

#[derive(Debug, Deserialize, Clone)]
pub struct PrefilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_token_count")]
    pub min_token_count: u32,
    #[serde(default)]
    pub boring_keywords: Vec<String>,
    #[serde(default = "default_max_same_domain_outbound_ratio")]
    pub max_same_domain_outbound_ratio: f64,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
}

fn default_true() -> bool { true }
fn default_min_token_count() -> u32 { 50 }
fn default_max_same_domain_outbound_ratio() -> f64 { 1.0 }

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    #[serde(default = "default_odd_similarity_threshold")]
    pub odd_similarity_threshold: f64,
    #[serde(default = "default_boring_similarity_threshold")]
    pub boring_similarity_threshold: f64,
}

fn default_odd_similarity_threshold() -> f64 { 0.55 }
fn default_boring_similarity_threshold() -> f64 { 0.70 }

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringWeights {
    #[serde(default = "default_w_retro_html")]
    pub retro_html: f64,
    #[serde(default = "default_w_url_weird")]
    pub url_weird: f64,
    #[serde(default = "default_w_semantic")]
    pub semantic: f64,
    #[serde(default = "default_w_anomaly")]
    pub anomaly: f64,
    #[serde(default = "default_w_graph")]
    pub graph: f64,
    #[serde(default)]
    pub bias: f64,
}

fn default_w_retro_html() -> f64 { 0.25 }
fn default_w_url_weird() -> f64 { 0.10 }
fn default_w_semantic() -> f64 { 0.30 }
fn default_w_anomaly() -> f64 { 0.20 }
fn default_w_graph() -> f64 { 0.15 }

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringThresholds {
    #[serde(default = "default_persist_threshold")]
    pub persist: f64,
    #[serde(default = "default_llm_gate")]
    pub llm_gate: f64,
    #[serde(default = "default_alert_threshold")]
    pub alert: f64,
}

fn default_persist_threshold() -> f64 { 0.35 }
fn default_llm_gate() -> f64 { 0.60 }
fn default_alert_threshold() -> f64 { 0.80 }

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub thresholds: ScoringThresholds,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub path: String,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u64,
    #[serde(default)]
    pub max_chars: Option<usize>,
}

fn default_ttl_days() -> u64 { 90 }

#[derive(Debug, Deserialize, Clone)]
pub struct SaltRotationConfig {
    #[serde(default = "default_salt_version")]
    pub active_version: u32,
}

fn default_salt_version() -> u32 { 1 }

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub raw_html: StorageSectionConfig,
    pub excerpts: StorageSectionConfig,
    pub breadcrumbs: StorageSectionConfig,
    #[serde(default)]
    pub salt_rotation: SaltRotationConfig,
}

impl Default for SaltRotationConfig {
    fn default() -> Self {
        Self { active_version: default_salt_version() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IllegalContentConfig {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_min_keyword_matches")]
    pub min_keyword_matches: usize,
}

fn default_min_keyword_matches() -> usize { 1 }

#[derive(Debug, Deserialize, Clone)]
pub struct SafetyConfig {
    pub illegal_content: IllegalContentConfig,
    #[serde(default = "default_host_blocklist_path")]
    pub host_blocklist_path: String,
}

fn default_host_blocklist_path() -> String { "tor/blocklist.json".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct TorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_socks_proxy")]
    pub socks_proxy: String,
    #[serde(default)]
    pub control_port: Option<u16>,
    #[serde(default)]
    pub control_password: Option<String>,
    #[serde(default)]
    pub per_host_requests_per_minute: Option<f64>,
    #[serde(default)]
    pub global_requests_per_minute: Option<f64>,
    #[serde(default = "default_failure_block_minutes")]
    pub failure_block_minutes: i64,
    #[serde(default = "default_max_failures_per_host")]
    pub max_failures_per_host: u32,
    #[serde(default = "default_illegal_block_days")]
    pub illegal_block_days: i64,
    #[serde(default = "default_host_blocklist_path")]
    pub blocklist_path: String,
    #[serde(default)]
    pub route_domains: Vec<String>,
    #[serde(default = "default_true")]
    pub route_onion_only: bool,
}

fn default_socks_proxy() -> String { "127.0.0.1:9050".to_string() }
fn default_failure_block_minutes() -> i64 { 30 }
fn default_max_failures_per_host() -> u32 { 3 }
fn default_illegal_block_days() -> i64 { 365 }

#[derive(Debug, Deserialize, Clone)]
pub struct RunLoopConfig {
    #[serde(default = "default_failure_cache_seconds")]
    pub failure_cache_seconds: i64,
    #[serde(default)]
    pub sleep_seconds: f64,
}

fn default_failure_cache_seconds() -> i64 { 7 * 24 * 3600 }

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

fn default_llm_model() -> String { "stub".to_string() }

impl Default for LlmConfig {
    fn default() -> Self {
        Self { enabled: false, model: default_llm_model() }
    }
}
