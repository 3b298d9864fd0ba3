//! HTML -> `Observation` extraction (§4.3). Grounded on the teacher's
//! `parser::html` (scraper-based parsing, link resolution) and the source's
//! `extractors/html_clean.py` (retro-tag/url-flag/semantic formulas).

use std::collections::HashMap;

use oddcrawler_core::{
    AnomalyFeature, ExtractBucket, FeaturesBucket, GraphFeature, HashesBucket, HtmlRetroFeature,
    LinksBucket, Observation, OutboundLink, SemanticFeature, UrlWeirdFeature,
};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

/// Five retro tags count toward the retro-HTML signal; the cascade's own
/// cheap structure stage looks at four of these and skips `frameset` since
/// it runs on an undecoded snippet, not a parsed document.
const RETRO_TAGS: [&str; 5] = ["marquee", "blink", "font", "center", "frameset"];

pub struct ExtractionInput<'a> {
    pub url: &'a str,
    pub status: u16,
    pub headers: &'a HashMap<String, String>,
    pub body: &'a [u8],
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub max_excerpt_chars: usize,
}

pub fn extract(input: ExtractionInput) -> Observation {
    let html_str = String::from_utf8_lossy(input.body);
    let base_url = Url::parse(input.url).ok();
    let document = Html::parse_document(&html_str);

    let title = select_text(&document, "title");
    let body_text = select_text(&document, "body").unwrap_or_default();
    let token_count = body_text.split_whitespace().count() as u32;
    let text_excerpt: String = body_text.chars().take(input.max_excerpt_chars).collect();

    let effective_base = base_url.clone().map(|b| resolve_base_tag(&document, b));
    let (outbound, webring_hits) = extract_links(&document, effective_base.as_ref());

    let retro = compute_retro_feature(&document);
    let url_weird = compute_url_weird_feature(input.url);
    let semantic = SemanticFeature { score: (token_count as f64 / 800.0).min(1.0), nn_dist: None };

    let mut content_hasher = Sha256::new();
    content_hasher.update(input.body);
    let content_sha256 = format!("{:x}", content_hasher.finalize());

    let mut url_hasher = Sha256::new();
    url_hasher.update(input.url.as_bytes());
    let url_sha256 = format!("{:x}", url_hasher.finalize());

    Observation {
        url: input.url.to_string(),
        url_canonical: oddcrawler_core::canonicalize_url(input.url).unwrap_or_else(|| input.url.to_string()),
        fetched_at: input.fetched_at,
        status: input.status,
        headers: input.headers.clone(),
        hashes: HashesBucket { url_sha256, content_sha256: Some(content_sha256) },
        extract: ExtractBucket { lang: detect_lang(&document), title, text_excerpt, token_count },
        features: FeaturesBucket {
            html_retro: retro,
            url_weird,
            semantic,
            anomaly: AnomalyFeature { score: 0.0 },
            graph: GraphFeature { score: 0.0, has_webring: webring_hits > 0, component_size: 0 },
        },
        links: LinksBucket { outbound },
        cascade: None,
        fetch_metrics: Default::default(),
    }
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn select_text(document: &Html, sel: &str) -> Option<String> {
    let sel = selector(sel)?;
    document.select(&sel).next().map(|el| el.text().collect::<String>().trim().to_string())
}

fn detect_lang(document: &Html) -> Option<String> {
    let sel = selector("html")?;
    document.select(&sel).next()?.value().attr("lang").map(|s| s.to_string())
}

fn resolve_base_tag(document: &Html, default_base: Url) -> Url {
    let Some(sel) = selector("base[href]") else { return default_base };
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| default_base.join(href).ok())
        .unwrap_or(default_base)
}

fn extract_links(document: &Html, base: Option<&Url>) -> (Vec<OutboundLink>, usize) {
    let Some(sel) = selector("a[href]") else { return (Vec::new(), 0) };
    let Some(base) = base else { return (Vec::new(), 0) };

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    let mut webring_hits = 0usize;

    for el in document.select(&sel) {
        let Some(href) = el.value().attr("href") else { continue };
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:")
        {
            continue;
        }
        let Ok(resolved) = base.join(href) else { continue };
        let Some(canonical) = oddcrawler_core::canonicalize_url(resolved.as_str()) else { continue };
        if !seen.insert(canonical.clone()) {
            continue;
        }

        let anchor_text: String = el.text().collect::<String>().trim().chars().take(160).collect();
        let rel: Vec<String> = el
            .value()
            .attr("rel")
            .map(|r| r.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default();

        if anchor_text.to_lowercase().contains("webring") || canonical.to_lowercase().contains("webring") {
            webring_hits += 1;
        }

        links.push(OutboundLink {
            url: canonical,
            anchor_text: if anchor_text.is_empty() { None } else { Some(anchor_text) },
            rel,
            found_at: chrono::Utc::now(),
        });
    }

    (links, webring_hits)
}

fn compute_retro_feature(document: &Html) -> HtmlRetroFeature {
    let mut signals = Vec::new();
    let mut count = 0u32;
    for tag in RETRO_TAGS {
        if let Some(sel) = selector(tag) {
            if document.select(&sel).next().is_some() {
                signals.push(tag.to_string());
                count += 1;
            }
        }
    }
    HtmlRetroFeature { score: (count as f64 / 3.0).min(1.0), signals }
}

fn compute_url_weird_feature(url: &str) -> UrlWeirdFeature {
    let mut flags = Vec::new();
    let lower = url.to_lowercase();
    if lower.contains("/cgi-bin/") {
        flags.push("cgi-bin".to_string());
    }
    if lower.contains("/~") {
        flags.push("tilde_home".to_string());
    }
    if lower.starts_with("http://") {
        flags.push("insecure".to_string());
    }
    let score = (flags.len() as f64 / 3.0).min(1.0);
    UrlWeirdFeature { score, flags }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(body: &'static [u8]) -> ExtractionInput<'static> {
        ExtractionInput {
            url: "http://example.com/~bob/cgi-bin/guestbook",
            status: 200,
            headers: Box::leak(Box::new(HashMap::new())),
            body,
            fetched_at: chrono::Utc::now(),
            max_excerpt_chars: 1000,
        }
    }

    #[test]
    fn detects_retro_tags_and_webring() {
        let body = br#"<html><body><marquee>hi</marquee><a href="https://ring.test/next" rel="webring">next in webring</a></body></html>"#;
        let observation = extract(input(body));
        assert!(observation.features.html_retro.signals.contains(&"marquee".to_string()));
        assert!(observation.features.graph.has_webring);
        assert_eq!(observation.links.outbound.len(), 1);
    }

    #[test]
    fn flags_weird_url_components() {
        let body = b"<html><body>hello</body></html>";
        let observation = extract(input(body));
        assert!(observation.features.url_weird.flags.contains(&"cgi-bin".to_string()));
        assert!(observation.features.url_weird.flags.contains(&"tilde_home".to_string()));
        assert!(observation.features.url_weird.flags.contains(&"insecure".to_string()));
    }

    #[test]
    fn excerpt_respects_max_chars() {
        let body: Vec<u8> = format!("<html><body>{}</body></html>", "a ".repeat(5000)).into_bytes();
        let leaked: &'static [u8] = Box::leak(body.into_boxed_slice());
        let mut input = input(leaked);
        input.max_excerpt_chars = 50;
        let observation = extract(input);
        assert!(observation.extract.text_excerpt.chars().count() <= 50);
    }
}
