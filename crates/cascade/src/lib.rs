//! Staged triage cascade (§4.2): cheap-to-expensive gates that stop at the
//! first skip. Ported from `agents/cascade.py`, using the same literal
//! constants and stage ordering.

pub mod prefilter;
pub mod simhash;

use std::collections::HashSet;

use oddcrawler_core::config::CascadeConfig;
use oddcrawler_core::{CascadeDecision, StageOutcome, StageStatus};
use regex::Regex;
use std::sync::OnceLock;

use prefilter::{EmbeddingProvider, PrefilterDraft, PrefilterEngine};

const RETRO_TAGS: [&str; 4] = ["marquee", "blink", "font", "center"];

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9]*)").unwrap())
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).unwrap())
}

fn strip_tags(html: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap());
    re.replace_all(html, " ").to_string()
}

/// Cheap tokenization for the structure/classifier stages. Whitespace split
/// is enough here; the cascade is specifically the cheap path.
fn approx_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

struct StructureMetrics {
    tokens: usize,
    script_ratio: f64,
    anchor_ratio: f64,
    text_density: f64,
    retro_score: f64,
    retro_signals: Vec<String>,
    has_odd_keyword: bool,
}

pub struct TriageCascade {
    config: CascadeConfig,
    seen_fingerprints: HashSet<u64>,
    prefilter: PrefilterEngine,
}

impl TriageCascade {
    pub fn new(config: CascadeConfig, prefilter_config: oddcrawler_core::config::PrefilterConfig) -> Self {
        Self {
            config,
            seen_fingerprints: HashSet::new(),
            prefilter: PrefilterEngine::new(prefilter_config),
        }
    }

    /// Runs all stages in order, short-circuiting on the first skip (P6).
    pub fn evaluate(
        &mut self,
        url: &str,
        content_type: Option<&str>,
        content_length: Option<usize>,
        body: &[u8],
        embedder: Option<&dyn EmbeddingProvider>,
    ) -> CascadeDecision {
        let mut stages = Vec::new();

        let head = self.stage_head(content_type, content_length.unwrap_or(body.len()));
        let skip = head.status == StageStatus::Skip;
        stages.push(head);
        if skip {
            return finish(stages);
        }

        let snippet_bytes = body
            .iter()
            .take(self.config.snippet_bytes)
            .copied()
            .collect::<Vec<u8>>();
        let snippet = String::from_utf8_lossy(&snippet_bytes).to_string();

        let snippet_outcome = self.stage_snippet(&snippet);
        let skip = snippet_outcome.status == StageStatus::Skip;
        stages.push(snippet_outcome);
        if skip {
            return finish(stages);
        }

        let metrics = self.compute_structure(&snippet);
        let structure_outcome = self.stage_structure(&metrics);
        let skip = structure_outcome.status == StageStatus::Skip;
        stages.push(structure_outcome);
        if skip {
            return finish(stages);
        }

        let keywords_outcome = self.stage_keywords(&snippet);
        let skip = keywords_outcome.status == StageStatus::Skip;
        stages.push(keywords_outcome);
        if skip {
            return finish(stages);
        }

        if self.config.simhash_enabled {
            let simhash_outcome = self.stage_simhash(&snippet);
            let skip = simhash_outcome.status == StageStatus::Skip;
            stages.push(simhash_outcome);
            if skip {
                return finish(stages);
            }
        }

        let classifier_outcome = self.stage_classifier(&metrics);
        let skip = classifier_outcome.status == StageStatus::Skip;
        stages.push(classifier_outcome);
        if skip {
            return finish(stages);
        }

        let prefilter_outcome = self.stage_prefilter(url, &snippet, &metrics, embedder);
        stages.push(prefilter_outcome);
        finish(stages)
    }

    fn stage_head(&self, content_type: Option<&str>, length: usize) -> StageOutcome {
        let allowed = content_type
            .map(|ct| {
                let base = ct.split(';').next().unwrap_or(ct).trim();
                self.config.allowed_content_types.iter().any(|a| a == base)
            })
            .unwrap_or(false);
        if !allowed {
            return skip_outcome("head", "content-type not allowed");
        }
        if length < self.config.min_content_length {
            return skip_outcome("head", "content too short");
        }
        if length > self.config.max_content_length {
            return skip_outcome("head", "content too long");
        }
        pass_outcome("head")
    }

    fn stage_snippet(&self, snippet: &str) -> StageOutcome {
        if snippet.trim().is_empty() {
            return skip_outcome("snippet", "empty body");
        }
        pass_outcome("snippet")
    }

    fn compute_structure(&self, snippet: &str) -> StructureMetrics {
        let text = strip_tags(snippet);
        let tokens = approx_tokens(&text);

        let mut total_tags = 0u32;
        let mut anchor_tags = 0u32;
        let mut script_tags = 0u32;
        let mut retro_signals = Vec::new();
        let mut retro_count = 0u32;

        for cap in tag_re().captures_iter(snippet) {
            let name = cap[1].to_ascii_lowercase();
            total_tags += 1;
            match name.as_str() {
                "a" => anchor_tags += 1,
                "script" => script_tags += 1,
                other if RETRO_TAGS.contains(&other) => {
                    retro_count += 1;
                    if !retro_signals.contains(&other.to_string()) {
                        retro_signals.push(other.to_string());
                    }
                }
                _ => {}
            }
        }
        let total_tags = total_tags.max(1) as f64;
        let script_ratio = script_tags as f64 / total_tags;
        let anchor_ratio = anchor_tags as f64 / total_tags;
        let text_density = if snippet.is_empty() {
            0.0
        } else {
            text.trim().len() as f64 / snippet.len() as f64
        };
        let retro_score = (retro_count as f64 / 3.0).min(1.0);

        let lower = snippet.to_lowercase();
        let has_odd_keyword = self.config.odd_keywords.iter().any(|k| lower.contains(&k.to_lowercase()));

        StructureMetrics {
            tokens,
            script_ratio,
            anchor_ratio,
            text_density,
            retro_score,
            retro_signals,
            has_odd_keyword,
        }
    }

    fn stage_structure(&self, m: &StructureMetrics) -> StageOutcome {
        let cfg = &self.config;
        if m.script_ratio > cfg.max_script_ratio {
            return skip_outcome("structure", "script_ratio too high");
        }
        if m.anchor_ratio > cfg.max_anchor_ratio {
            return skip_outcome("structure", "anchor_ratio too high");
        }
        let density_low = m.text_density < cfg.min_text_density && m.tokens as u64 <= cfg.density_skip_token_cap;
        if density_low {
            let override_active = m.tokens as u64 >= cfg.density_token_override
                || m.retro_score >= cfg.retro_override_score
                || m.anchor_ratio >= cfg.density_anchor_override
                || m.has_odd_keyword;
            if override_active {
                return StageOutcome {
                    stage: "structure".to_string(),
                    status: StageStatus::Warn,
                    reason: Some("low density override engaged".to_string()),
                    metrics: structure_metric_map(m),
                };
            }
            return skip_outcome("structure", "text_density too low");
        }
        StageOutcome {
            stage: "structure".to_string(),
            status: StageStatus::Pass,
            reason: None,
            metrics: structure_metric_map(m),
        }
    }

    fn stage_keywords(&self, snippet: &str) -> StageOutcome {
        let lower = snippet.to_lowercase();
        if let Some(keyword) = self.config.boring_keywords.iter().find(|k| lower.contains(&k.to_lowercase())) {
            return skip_outcome("keywords", &format!("boring keyword: {keyword}"));
        }
        pass_outcome("keywords")
    }

    fn stage_simhash(&mut self, snippet: &str) -> StageOutcome {
        let fingerprint = simhash::simhash(snippet, self.config.simhash_bits);
        if self.seen_fingerprints.contains(&fingerprint) {
            return skip_outcome("simhash", "duplicate fingerprint this run");
        }
        self.seen_fingerprints.insert(fingerprint);
        pass_outcome("simhash")
    }

    fn stage_classifier(&self, m: &StructureMetrics) -> StageOutcome {
        let w = &self.config.classifier_weights;
        let get = |k: &str| w.get(k).copied().unwrap_or(0.0);
        let token_ratio = (m.tokens as f64 / 100.0).min(2.0);
        let odd_keyword = if m.has_odd_keyword { 1.0 } else { 0.0 };

        let z = get("bias")
            + get("text_density") * m.text_density
            + get("retro_score") * m.retro_score
            + get("script_ratio") * m.script_ratio
            + get("anchor_ratio") * m.anchor_ratio
            + get("token_ratio") * token_ratio
            + get("odd_keyword") * odd_keyword;
        let probability = sigmoid(z);

        if probability < self.config.classifier_threshold {
            return StageOutcome {
                stage: "classifier".to_string(),
                status: StageStatus::Skip,
                reason: Some("classifier probability below threshold".to_string()),
                metrics: [("probability".to_string(), probability)].into(),
            };
        }
        StageOutcome {
            stage: "classifier".to_string(),
            status: StageStatus::Pass,
            reason: None,
            metrics: [("probability".to_string(), probability)].into(),
        }
    }

    fn stage_prefilter(
        &self,
        url: &str,
        snippet: &str,
        m: &StructureMetrics,
        embedder: Option<&dyn EmbeddingProvider>,
    ) -> StageOutcome {
        let text = strip_tags(snippet);
        let outbound: Vec<String> = href_re()
            .captures_iter(snippet)
            .map(|c| c[1].to_string())
            .collect();
        let draft = PrefilterDraft {
            url,
            text_excerpt: text.trim(),
            token_count: m.tokens as u32,
            outbound: &outbound,
        };
        let decision = self.prefilter.evaluate(&draft, embedder);
        if decision.should_skip {
            return StageOutcome {
                stage: "prefilter".to_string(),
                status: StageStatus::Skip,
                reason: decision.reasons.first().cloned(),
                metrics: decision.scores.into_iter().collect(),
            };
        }
        StageOutcome {
            stage: "prefilter".to_string(),
            status: StageStatus::Pass,
            reason: None,
            metrics: decision.scores.into_iter().collect(),
        }
    }
}

fn structure_metric_map(m: &StructureMetrics) -> std::collections::HashMap<String, f64> {
    [
        ("tokens".to_string(), m.tokens as f64),
        ("script_ratio".to_string(), m.script_ratio),
        ("anchor_ratio".to_string(), m.anchor_ratio),
        ("text_density".to_string(), m.text_density),
        ("retro_score".to_string(), m.retro_score),
    ]
    .into()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn pass_outcome(stage: &str) -> StageOutcome {
    StageOutcome { stage: stage.to_string(), status: StageStatus::Pass, reason: None, metrics: Default::default() }
}

fn skip_outcome(stage: &str, reason: &str) -> StageOutcome {
    StageOutcome {
        stage: stage.to_string(),
        status: StageStatus::Skip,
        reason: Some(reason.to_string()),
        metrics: Default::default(),
    }
}

fn finish(stages: Vec<StageOutcome>) -> CascadeDecision {
    let skip_stage = stages.iter().find(|s| s.status == StageStatus::Skip);
    let should_skip = skip_stage.is_some();
    let final_reason = skip_stage.and_then(|s| s.reason.clone());
    CascadeDecision { should_skip, stages, final_reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oddcrawler_core::config::PrefilterConfig;

    fn cascade_config() -> CascadeConfig {
        CascadeConfig {
            allowed_content_types: vec!["text/html".to_string(), "application/xhtml+xml".to_string()],
            min_content_length: 20,
            max_content_length: 2_500_000,
            snippet_bytes: 8192,
            max_script_ratio: 0.55,
            max_anchor_ratio: 0.65,
            min_text_density: 0.02,
            density_token_override: 40,
            density_anchor_override: 0.35,
            density_skip_token_cap: 15,
            boring_keywords: vec![
                "insurance".to_string(),
                "mortgage".to_string(),
                "real estate".to_string(),
                "press release".to_string(),
                "terms and conditions".to_string(),
                "privacy policy".to_string(),
            ],
            odd_keywords: vec!["webring".to_string(), "guestbook".to_string()],
            simhash_enabled: true,
            simhash_bits: 64,
            classifier_weights: std::collections::HashMap::from([
                ("bias".to_string(), -1.59),
                ("text_density".to_string(), 0.29),
                ("retro_score".to_string(), 0.04),
                ("script_ratio".to_string(), -0.35),
                ("anchor_ratio".to_string(), 0.75),
                ("token_ratio".to_string(), 3.01),
                ("odd_keyword".to_string(), 0.89),
            ]),
            classifier_threshold: 0.35,
            retro_override_score: 0.3,
        }
    }

    fn prefilter_config() -> PrefilterConfig {
        PrefilterConfig {
            enabled: true,
            min_token_count: 5,
            boring_keywords: vec![],
            max_same_domain_outbound_ratio: 1.0,
            embedding: None,
        }
    }

    #[test]
    fn boring_keyword_skips() {
        let mut cascade = TriageCascade::new(cascade_config(), prefilter_config());
        let body = b"<html><body>We sell insurance policies and mortgage quotes every day.</body></html>";
        let decision = cascade.evaluate(
            "https://a.test/",
            Some("text/html"),
            Some(body.len()),
            body,
            None,
        );
        assert!(decision.should_skip);
        assert!(decision.final_reason.unwrap().contains("keyword"));
    }

    #[test]
    fn retro_page_passes() {
        let mut cascade = TriageCascade::new(cascade_config(), prefilter_config());
        let body = b"<html><body><marquee>Odd zone</marquee><p>Long retro diary entry with webring badges and handcrafted ASCII art describing a decades-old hobby project full of idiosyncratic charm and a guestbook full of visitors from all over the world wide web, still maintained by one person who loves the format dearly.</p></body></html>";
        let decision = cascade.evaluate(
            "https://a.test/",
            Some("text/html"),
            Some(body.len()),
            body,
            None,
        );
        assert!(!decision.should_skip, "{:?}", decision.final_reason);
    }

    #[test]
    fn monotonic_short_circuit_on_head_skip() {
        let mut cascade = TriageCascade::new(cascade_config(), prefilter_config());
        let body = b"tiny";
        let decision = cascade.evaluate("https://a.test/", Some("text/html"), Some(body.len()), body, None);
        assert!(decision.should_skip);
        assert_eq!(decision.stages.len(), 1);
        assert_eq!(decision.stages[0].stage, "head");
    }

    #[test]
    fn wrong_content_type_skips_at_head() {
        let mut cascade = TriageCascade::new(cascade_config(), prefilter_config());
        let body = vec![0u8; 1000];
        let decision = cascade.evaluate("https://a.test/", Some("image/png"), Some(body.len()), &body, None);
        assert!(decision.should_skip);
        assert_eq!(decision.stages[0].stage, "head");
    }
}
