//! Scoring fusion (§4.4), ported verbatim (formulas, not code) from
//! `scoring/fusion.py`'s `ScoringEngine`.

use std::collections::HashMap;

use oddcrawler_core::config::ScoringConfig;
use oddcrawler_core::{Action, FeaturesBucket, ScoreDecision};

pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// `p = sigma(bias + sum wi*xi)` over the five feature buckets.
    pub fn fuse(&self, features: &FeaturesBucket) -> f64 {
        let w = &self.config.weights;
        let z = w.bias
            + w.retro_html * features.html_retro.score
            + w.url_weird * features.url_weird.score
            + w.semantic * features.semantic.score
            + w.anomaly * features.anomaly.score
            + w.graph * features.graph.score;
        sigmoid(z)
    }

    fn decide(&self, score: f64) -> (Action, HashMap<String, f64>) {
        let t = &self.config.thresholds;
        let mut thresholds_hit = HashMap::new();
        if score >= t.alert {
            thresholds_hit.insert("alert".to_string(), t.alert);
        }
        let action = if score >= t.llm_gate {
            thresholds_hit.insert("llm_gate".to_string(), t.llm_gate);
            Action::Llm
        } else if score >= t.persist {
            thresholds_hit.insert("persist".to_string(), t.persist);
            Action::Persist
        } else {
            Action::Skip
        };
        (action, thresholds_hit)
    }

    pub fn evaluate(&self, features: &FeaturesBucket) -> ScoreDecision {
        let score = self.fuse(features);
        let (action, thresholds_hit) = self.decide(score);

        let mut reasons = Vec::new();
        if !features.html_retro.signals.is_empty() {
            reasons.push(format!("retro signals: {}", features.html_retro.signals.join(", ")));
        }
        if !features.url_weird.flags.is_empty() {
            reasons.push(format!("url flags: {}", features.url_weird.flags.join(", ")));
        }
        if features.graph.has_webring {
            reasons.push("possible webring membership".to_string());
        }
        if features.graph.component_size > 0 && features.graph.component_size <= 3 {
            reasons.push(format!("small link neighborhood (size={})", features.graph.component_size));
        }

        ScoreDecision { score, action, thresholds_hit, reasons }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oddcrawler_core::config::{ScoringThresholds, ScoringWeights};
    use oddcrawler_core::{AnomalyFeature, GraphFeature, HtmlRetroFeature, SemanticFeature, UrlWeirdFeature};

    fn config() -> ScoringConfig {
        ScoringConfig {
            weights: ScoringWeights {
                retro_html: 0.25,
                url_weird: 0.10,
                semantic: 0.30,
                anomaly: 0.20,
                graph: 0.15,
                bias: 0.0,
            },
            thresholds: ScoringThresholds { persist: 0.35, llm_gate: 0.60, alert: 0.80 },
        }
    }

    fn features(retro: f64, semantic: f64) -> FeaturesBucket {
        FeaturesBucket {
            html_retro: HtmlRetroFeature { score: retro, signals: vec!["marquee".to_string()] },
            url_weird: UrlWeirdFeature::default(),
            semantic: SemanticFeature { score: semantic, nn_dist: None },
            anomaly: AnomalyFeature::default(),
            graph: GraphFeature::default(),
        }
    }

    #[test]
    fn score_in_unit_interval() {
        let engine = ScoringEngine::new(config());
        let score = engine.fuse(&features(1.0, 1.0));
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn decision_thresholds_match_action() {
        let engine = ScoringEngine::new(config());
        let decision = engine.evaluate(&features(1.0, 1.0));
        if decision.score >= 0.60 {
            assert_eq!(decision.action, Action::Llm);
        } else if decision.score >= 0.35 {
            assert_eq!(decision.action, Action::Persist);
        } else {
            assert_eq!(decision.action, Action::Skip);
        }
    }

    #[test]
    fn retro_signals_listed_in_reasons() {
        let engine = ScoringEngine::new(config());
        let decision = engine.evaluate(&features(0.9, 0.9));
        assert!(decision.reasons.iter().any(|r| r.contains("marquee")));
    }

    #[test]
    fn low_signal_page_is_skipped() {
        let engine = ScoringEngine::new(config());
        let decision = engine.evaluate(&features(0.0, 0.0));
        assert_eq!(decision.action, Action::Skip);
    }
}
