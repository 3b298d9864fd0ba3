//! Keyword-based illegal content guardrail, ported from `safety/illegal.py`.

use oddcrawler_core::config::IllegalContentConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct IllegalDetection {
    pub illegal: bool,
    pub reason: String,
    pub matches: Vec<String>,
}

impl IllegalDetection {
    fn clean() -> Self {
        Self { illegal: false, reason: String::new(), matches: Vec::new() }
    }
}

pub struct IllegalContentDetector {
    keywords: Vec<String>,
    min_matches: usize,
}

impl IllegalContentDetector {
    pub fn new(config: &IllegalContentConfig) -> Self {
        let mut keywords: Vec<String> = config
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        keywords.sort();
        keywords.dedup();
        Self { keywords, min_matches: config.min_keyword_matches.max(1) }
    }

    pub fn scan(&self, text: &str) -> IllegalDetection {
        if text.is_empty() || self.keywords.is_empty() {
            return IllegalDetection::clean();
        }
        let lowered = text.to_lowercase();
        let mut matches: Vec<String> = self.keywords.iter().filter(|term| lowered.contains(term.as_str())).cloned().collect();
        matches.sort();
        matches.dedup();

        if matches.len() >= self.min_matches {
            let reason = matches.iter().take(5).cloned().collect::<Vec<_>>().join("; ");
            IllegalDetection { illegal: true, reason, matches }
        } else {
            IllegalDetection::clean()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(keywords: &[&str], min_matches: usize) -> IllegalContentConfig {
        IllegalContentConfig {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            min_keyword_matches: min_matches,
        }
    }

    #[test]
    fn clean_text_is_not_illegal() {
        let detector = IllegalContentDetector::new(&config(&["forbidden"], 1));
        let result = detector.scan("a perfectly normal retro homepage");
        assert!(!result.illegal);
    }

    #[test]
    fn single_match_trips_detector_at_threshold_one() {
        let detector = IllegalContentDetector::new(&config(&["forbidden"], 1));
        let result = detector.scan("this page mentions forbidden content");
        assert!(result.illegal);
        assert_eq!(result.matches, vec!["forbidden".to_string()]);
    }

    #[test]
    fn requires_min_matches_before_tripping() {
        let detector = IllegalContentDetector::new(&config(&["alpha", "beta", "gamma"], 2));
        let result = detector.scan("mentions alpha only");
        assert!(!result.illegal);
        let result = detector.scan("mentions alpha and beta both");
        assert!(result.illegal);
    }

    #[test]
    fn empty_keyword_list_never_trips() {
        let detector = IllegalContentDetector::new(&config(&[], 1));
        let result = detector.scan("forbidden forbidden forbidden");
        assert!(!result.illegal);
    }
}
