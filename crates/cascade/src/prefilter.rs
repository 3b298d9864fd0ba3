//! Embedding + heuristic prefilter (§4.8), ported from `prefilter/filters.py`.
//! The embedding half is a pluggable interface per the design notes: the
//! crawler core needs only `embed(text) -> vector`, never a concrete model.

use oddcrawler_core::config::PrefilterConfig;

/// External embedding collaborator. A real implementation (sentence
/// transformers, a hosted API) lives outside this crate; the prefilter only
/// needs cosine similarity against precomputed centroids.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

#[derive(Debug, Clone, Default)]
pub struct PrefilterDraft<'a> {
    pub url: &'a str,
    pub text_excerpt: &'a str,
    pub token_count: u32,
    pub outbound: &'a [String],
}

#[derive(Debug, Clone, Default)]
pub struct PrefilterDecision {
    pub should_skip: bool,
    pub reasons: Vec<String>,
    pub scores: Vec<(String, f64)>,
}

pub struct PrefilterEngine {
    config: PrefilterConfig,
    odd_centroids: Vec<Vec<f32>>,
    boring_centroids: Vec<Vec<f32>>,
}

impl PrefilterEngine {
    pub fn new(config: PrefilterConfig) -> Self {
        Self { config, odd_centroids: Vec::new(), boring_centroids: Vec::new() }
    }

    pub fn with_centroids(mut self, odd: Vec<Vec<f32>>, boring: Vec<Vec<f32>>) -> Self {
        self.odd_centroids = odd;
        self.boring_centroids = boring;
        self
    }

    pub fn evaluate(
        &self,
        draft: &PrefilterDraft,
        embedder: Option<&dyn EmbeddingProvider>,
    ) -> PrefilterDecision {
        if !self.config.enabled {
            return PrefilterDecision::default();
        }

        let mut reasons = Vec::new();
        let mut scores = Vec::new();

        if draft.token_count > 0 && draft.token_count < self.config.min_token_count {
            reasons.push(format!("token_count<{}", self.config.min_token_count));
        }

        let lower_excerpt = draft.text_excerpt.to_lowercase();
        let boring_keywords = if self.config.boring_keywords.is_empty() {
            &[] as &[String]
        } else {
            self.config.boring_keywords.as_slice()
        };
        if let Some(keyword) = boring_keywords.iter().find(|k| lower_excerpt.contains(&k.to_lowercase())) {
            reasons.push(format!("keyword:{keyword}"));
        }

        if let Some(ratio) = same_domain_ratio(draft.url, draft.outbound) {
            scores.push(("outbound_same_ratio".to_string(), ratio));
            if ratio >= self.config.max_same_domain_outbound_ratio {
                reasons.push("outbound_same_domain".to_string());
            }
        }

        if let (Some(embed_cfg), Some(embedder)) = (&self.config.embedding, embedder) {
            if draft.text_excerpt.trim().len() >= 20
                && (!self.odd_centroids.is_empty() || !self.boring_centroids.is_empty())
            {
                if let Some(vector) = embedder.embed(draft.text_excerpt) {
                    if !self.odd_centroids.is_empty() {
                        let odd_sim = max_cosine(&vector, &self.odd_centroids);
                        scores.push(("odd_similarity".to_string(), odd_sim));
                        if odd_sim >= embed_cfg.odd_similarity_threshold {
                            return PrefilterDecision { should_skip: false, reasons: Vec::new(), scores };
                        }
                    }
                    if !self.boring_centroids.is_empty() {
                        let boring_sim = max_cosine(&vector, &self.boring_centroids);
                        scores.push(("boring_similarity".to_string(), boring_sim));
                        if boring_sim >= embed_cfg.boring_similarity_threshold {
                            reasons.push("boring_embedding".to_string());
                        }
                    }
                }
            }
        }

        let should_skip = !reasons.is_empty();
        PrefilterDecision { should_skip, reasons, scores }
    }
}

fn same_domain_ratio(root_url: &str, outbound: &[String]) -> Option<f64> {
    if outbound.is_empty() {
        return None;
    }
    let root_host = url::Url::parse(root_url).ok()?.host_str()?.to_string();
    let mut total = 0u32;
    let mut same = 0u32;
    for link in outbound {
        let Ok(parsed) = url::Url::parse(link) else { continue };
        let Some(host) = parsed.host_str() else { continue };
        total += 1;
        if host == root_host {
            same += 1;
        }
    }
    if total == 0 {
        None
    } else {
        Some(same as f64 / total as f64)
    }
}

fn max_cosine(vector: &[f32], centroids: &[Vec<f32>]) -> f64 {
    centroids
        .iter()
        .map(|c| cosine(vector, c))
        .fold(f64::MIN, f64::max)
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oddcrawler_core::config::PrefilterConfig;

    fn config(min_tokens: u32) -> PrefilterConfig {
        PrefilterConfig {
            enabled: true,
            min_token_count: min_tokens,
            boring_keywords: vec!["insurance".to_string()],
            max_same_domain_outbound_ratio: 1.0,
            embedding: None,
        }
    }

    #[test]
    fn skips_short_pages() {
        let engine = PrefilterEngine::new(config(50));
        let draft = PrefilterDraft { url: "https://a.test", text_excerpt: "hi", token_count: 2, outbound: &[] };
        let decision = engine.evaluate(&draft, None);
        assert!(decision.should_skip);
        assert!(decision.reasons[0].starts_with("token_count<"));
    }

    #[test]
    fn keeps_pages_with_no_reasons() {
        let engine = PrefilterEngine::new(config(5));
        let draft = PrefilterDraft {
            url: "https://a.test",
            text_excerpt: "a long retro homepage with handcrafted html",
            token_count: 50,
            outbound: &[],
        };
        let decision = engine.evaluate(&draft, None);
        assert!(!decision.should_skip);
    }
}
