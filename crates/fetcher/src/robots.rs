//! Minimal robots.txt evaluator: a flat Disallow/Allow list under a
//! wildcard or matching user-agent group, longest-prefix-match semantics.

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    allow: bool,
}

#[derive(Debug, Clone, Default)]
struct HostRules {
    rules: Vec<Rule>,
}

#[derive(Debug, Default)]
pub struct RobotsChecker {
    hosts: HashMap<String, HostRules>,
}

impl RobotsChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    /// Parses the body for the `*` user-agent group only; named-agent
    /// overrides are an external configuration concern this crawler
    /// doesn't need.
    pub fn ingest(&mut self, host: &str, body: &str) {
        let mut rules = Vec::new();
        let mut in_wildcard_group = false;
        let mut seen_agent_line = false;

        for raw_line in body.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else { continue };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if seen_agent_line && in_wildcard_group {
                        // a new agent block after ours closes the wildcard group
                    }
                    in_wildcard_group = value == "*";
                    seen_agent_line = true;
                }
                "disallow" if in_wildcard_group && !value.is_empty() => {
                    rules.push(Rule { prefix: value.to_string(), allow: false });
                }
                "allow" if in_wildcard_group && !value.is_empty() => {
                    rules.push(Rule { prefix: value.to_string(), allow: true });
                }
                _ => {}
            }
        }

        self.hosts.insert(host.to_string(), HostRules { rules });
    }

    pub fn is_allowed(&self, host: &str, path: &str) -> bool {
        let Some(host_rules) = self.hosts.get(host) else { return true };
        let mut best: Option<&Rule> = None;
        for rule in &host_rules.rules {
            if path.starts_with(&rule.prefix) {
                if best.map(|b| rule.prefix.len() > b.prefix.len()).unwrap_or(true) {
                    best = Some(rule);
                }
            }
        }
        best.map(|r| r.allow).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallow_blocks_prefix() {
        let mut checker = RobotsChecker::new();
        checker.ingest("example.com", "User-agent: *\nDisallow: /private\n");
        assert!(!checker.is_allowed("example.com", "/private/x"));
        assert!(checker.is_allowed("example.com", "/public"));
    }

    #[test]
    fn longest_prefix_wins() {
        let mut checker = RobotsChecker::new();
        checker.ingest(
            "example.com",
            "User-agent: *\nDisallow: /a\nAllow: /a/b\n",
        );
        assert!(checker.is_allowed("example.com", "/a/b/c"));
        assert!(!checker.is_allowed("example.com", "/a/x"));
    }

    #[test]
    fn unseen_host_defaults_to_allowed() {
        let checker = RobotsChecker::new();
        assert!(checker.is_allowed("unseen.test", "/anything"));
    }
}
