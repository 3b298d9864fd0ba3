//! Default seed list for discovering odd/retro corners of the web, plus a
//! loader for a user-supplied seed file (one URL per line, `#` comments
//! allowed).

use std::path::Path;

/// Starting points biased toward webrings, personal pages, and retro
/// directories - the kind of neighborhoods the scoring model rewards.
pub const DEFAULT_SEEDS: &[&str] = &[
    "https://www.geocities.ws/",
    "https://www.webring.org/",
    "https://the-gothic-webring.weebly.com/",
    "https://indieweb.org/webring",
    "https://www.smallweb.garden/",
    "https://xxiivv.com/",
    "https://www.minoumarine.com/",
    "https://ariadnereflecting.neocities.org/",
    "https://www.yesterweb.org/",
    "https://marginalia-search.com/",
];

pub fn load_seed_file(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

pub fn default_seeds() -> Vec<String> {
    DEFAULT_SEEDS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_file_skips_blank_lines_and_comments() {
        let dir = std::env::temp_dir().join(format!("oddcrawler-seeds-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seeds.txt");
        std::fs::write(&path, "# a comment\nhttp://example.test/\n\nhttp://other.test/\n").unwrap();
        let seeds = load_seed_file(&path).unwrap();
        assert_eq!(seeds, vec!["http://example.test/", "http://other.test/"]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn default_seeds_are_non_empty() {
        assert!(!default_seeds().is_empty());
    }
}
