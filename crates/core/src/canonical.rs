//! URL canonicalization (§3): lower-case scheme/host, strip default ports,
//! normalize the path, sort query pairs, drop fragments.

use url::Url;

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Canonicalizes a URL string per the rules above. Returns `None` for
/// missing scheme/host or a disallowed scheme, matching the source's
/// reject-on-ambiguity behavior rather than guessing.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw).ok()?;

    let scheme = parsed.scheme().to_ascii_lowercase();
    if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
        return None;
    }
    if parsed.host_str().is_none() {
        return None;
    }

    parsed.set_fragment(None);
    let _ = parsed.set_scheme(&scheme);

    let host = parsed.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    let _ = parsed.set_host(Some(&host));

    if (scheme == "http" && parsed.port() == Some(80))
        || (scheme == "https" && parsed.port() == Some(443))
    {
        let _ = parsed.set_port(None);
    }

    let normalized_path = normalize_path(parsed.path());
    parsed.set_path(&normalized_path);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        let encoded = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding_escape(k), urlencoding_escape(v)))
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&encoded));
    }

    Some(parsed.to_string())
}

/// Collapses `.`/`..` segments the way `posixpath.normpath` does, but keeps
/// a trailing slash the input had (normpath alone would drop it).
fn normalize_path(path: &str) -> String {
    let had_trailing_slash = path.len() > 1 && path.ends_with('/');
    let is_absolute = path.starts_with('/');

    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if !stack.is_empty() {
                    stack.pop();
                }
            }
            other => stack.push(other),
        }
    }

    let mut normalized = if is_absolute {
        format!("/{}", stack.join("/"))
    } else {
        stack.join("/")
    };
    if normalized.is_empty() {
        normalized = "/".to_string();
    }
    if had_trailing_slash && !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

fn urlencoding_escape(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_port_path_and_query() {
        let got = canonicalize_url("HTTP://Example.COM:80/a/../b?z=3&y=2").unwrap();
        assert_eq!(got, "http://example.com/b?y=2&z=3");
    }

    #[test]
    fn preserves_trailing_slash() {
        let got = canonicalize_url("https://example.com/a/b/").unwrap();
        assert_eq!(got, "https://example.com/a/b/");
    }

    #[test]
    fn rejects_disallowed_scheme() {
        assert!(canonicalize_url("ftp://example.com/x").is_none());
    }

    #[test]
    fn rejects_missing_host() {
        assert!(canonicalize_url("file:///etc/passwd").is_none());
    }

    #[test]
    fn idempotent() {
        let once = canonicalize_url("HTTP://Example.COM:80/a/../b?z=3&y=2").unwrap();
        let twice = canonicalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn strips_default_https_port() {
        let got = canonicalize_url("https://example.com:443/x").unwrap();
        assert_eq!(got, "https://example.com/x");
    }
}
