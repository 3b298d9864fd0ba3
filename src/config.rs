//! Config loading: read the file at the given path, falling back to the
//! bundled defaults when it is missing so the binary always has something
//! to run with.

use oddcrawler_core::config::AppConfig;
use tracing::warn;

pub fn load(path: &str) -> anyhow::Result<AppConfig> {
    let contents = std::fs::read_to_string(path).unwrap_or_else(|_| {
        warn!(path, "config file not found, using bundled defaults");
        include_str!("../config/default.toml").to_string()
    });
    Ok(toml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_falls_back_to_bundled_defaults() {
        let config = load("/nonexistent/oddcrawler-config.toml").unwrap();
        assert_eq!(config.general.data_dir, "data");
        assert_eq!(config.general.run_dir, "run");
    }

    #[test]
    fn bundled_defaults_parse_on_their_own() {
        let config: AppConfig = toml::from_str(include_str!("../config/default.toml")).unwrap();
        assert!(config.storage.raw_html.enabled);
        assert_eq!(config.scoring.thresholds.persist, 0.35);
    }
}
