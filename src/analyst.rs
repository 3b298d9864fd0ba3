//! LLM analyst finding. The model call itself is an external collaborator;
//! this only builds the deterministic fallback stub used when the LLM is
//! disabled or misconfigured (spec's analyst-fallback behavior).

use oddcrawler_core::Observation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DangerousContent {
    pub present: bool,
    pub category: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystFinding {
    pub url: String,
    pub summary: String,
    pub why_flagged: Vec<String>,
    pub risk_tag: String,
    pub dangerous_content: DangerousContent,
    pub confidence: f64,
    pub observation_ref: String,
}

pub fn observation_ref(observation: &Observation) -> String {
    let short_hash = &observation.hashes.url_sha256[..observation.hashes.url_sha256.len().min(8)];
    format!("observation:{}:{}", observation.fetched_at.to_rfc3339(), short_hash)
}

/// Deterministic stand-in for the analyst call, used whenever the LLM is
/// disabled or the client errors.
pub fn fallback_finding(observation: &Observation, reasons: &[String]) -> AnalystFinding {
    let risk_tag = if !observation.features.html_retro.signals.is_empty() {
        "harmless-retro".to_string()
    } else {
        "unclassified".to_string()
    };

    let summary: String = if let Some(title) = &observation.extract.title {
        title.chars().take(360).collect()
    } else {
        observation.extract.text_excerpt.chars().take(360).collect()
    };

    AnalystFinding {
        url: observation.url.clone(),
        summary,
        why_flagged: reasons.to_vec(),
        risk_tag,
        dangerous_content: DangerousContent { present: false, category: None, notes: None },
        confidence: 0.0,
        observation_ref: observation_ref(observation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oddcrawler_core::{ExtractBucket, FeaturesBucket, HashesBucket, HtmlRetroFeature, LinksBucket};

    fn observation(retro_signals: Vec<String>) -> Observation {
        Observation {
            url: "http://example.test/".to_string(),
            url_canonical: "http://example.test/".to_string(),
            fetched_at: chrono::Utc::now(),
            status: 200,
            headers: Default::default(),
            hashes: HashesBucket { url_sha256: "abcdef0123456789".to_string(), content_sha256: None },
            extract: ExtractBucket { lang: None, title: Some("A Retro Page".to_string()), text_excerpt: String::new(), token_count: 10 },
            features: FeaturesBucket {
                html_retro: HtmlRetroFeature { score: 0.5, signals: retro_signals },
                ..Default::default()
            },
            links: LinksBucket::default(),
            cascade: None,
            fetch_metrics: Default::default(),
        }
    }

    #[test]
    fn retro_signals_produce_harmless_tag() {
        let finding = fallback_finding(&observation(vec!["marquee".to_string()]), &[]);
        assert_eq!(finding.risk_tag, "harmless-retro");
    }

    #[test]
    fn no_retro_signals_produce_unclassified_tag() {
        let finding = fallback_finding(&observation(vec![]), &[]);
        assert_eq!(finding.risk_tag, "unclassified");
    }

    #[test]
    fn observation_ref_uses_first_eight_hash_chars() {
        let finding = fallback_finding(&observation(vec![]), &[]);
        assert!(finding.observation_ref.contains("abcdef01"));
    }
}
