//! HTTP fetch driver. Collapses the teacher's per-overlay-network driver set
//! (Tor/I2P/ZeroNet/Freenet/Lokinet) into one clearnet+optional-SOCKS5 driver,
//! since this system treats Tor only as a proxy URL handed in from config.

mod robots;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use oddcrawler_core::{CrawlError, FetchConfig, FetchResponse};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub use robots::RobotsChecker;

/// Bounds the linear backoff between retry attempts (§7: "Retries").
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff_low: Duration,
    pub backoff_high: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff_low: Duration::from_millis(500),
            backoff_high: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Linear ramp from `backoff_low` to `backoff_high` across `retries`
    /// attempts; attempt 0 always waits `backoff_low`.
    fn delay_for(&self, attempt: u32) -> Duration {
        if self.retries == 0 {
            return self.backoff_low;
        }
        let span = self.backoff_high.saturating_sub(self.backoff_low);
        let step = span / self.retries.max(1);
        self.backoff_low + step * attempt.min(self.retries)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// `via_tor` is the caller's routing decision for this URL (see
    /// `HostGate::should_route`); the returned response's `via_tor` field
    /// reflects what actually happened, not the request.
    async fn fetch(&self, url: &str, via_tor: bool) -> Result<FetchResponse, CrawlError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    proxied_client: Option<reqwest::Client>,
    config: FetchConfig,
    retry: RetryPolicy,
    obey_robots: bool,
    robots: Mutex<RobotsChecker>,
}

impl HttpFetcher {
    pub fn new(
        config: FetchConfig,
        retry: RetryPolicy,
        obey_robots: bool,
        socks_proxy: Option<&str>,
    ) -> anyhow::Result<Self> {
        let base = || {
            reqwest::Client::builder()
                .user_agent(config.user_agent.clone())
                .timeout(config.timeout)
                .redirect(if config.follow_redirects {
                    reqwest::redirect::Policy::limited(8)
                } else {
                    reqwest::redirect::Policy::none()
                })
        };
        let client = base().build()?;
        let proxied_client = match socks_proxy {
            Some(proxy_url) => Some(base().proxy(reqwest::Proxy::all(proxy_url)?).build()?),
            None => None,
        };
        Ok(Self {
            client,
            proxied_client,
            config,
            retry,
            obey_robots,
            robots: Mutex::new(RobotsChecker::new()),
        })
    }

    /// Picks the client for `via_tor`, falling back to the direct client
    /// when no proxy was configured.
    fn client_for(&self, via_tor: bool) -> (&reqwest::Client, bool) {
        match (via_tor, &self.proxied_client) {
            (true, Some(proxied)) => (proxied, true),
            _ => (&self.client, false),
        }
    }

    async fn robots_allows(&self, url: &url::Url) -> bool {
        if !self.obey_robots {
            return true;
        }
        let host = match url.host_str() {
            Some(h) => h.to_string(),
            None => return true,
        };
        let needs_fetch = {
            let checker = self.robots.lock().unwrap();
            !checker.has_host(&host)
        };
        if needs_fetch {
            let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);
            let body = self
                .client
                .get(&robots_url)
                .send()
                .await
                .ok()
                .filter(|r| r.status().is_success());
            let text = match body {
                Some(resp) => resp.text().await.unwrap_or_default(),
                None => String::new(),
            };
            self.robots.lock().unwrap().ingest(&host, &text);
        }
        self.robots.lock().unwrap().is_allowed(&host, url.path())
    }

    fn is_retryable(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.status().map(|s| s.is_server_error()).unwrap_or(false)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, via_tor: bool) -> Result<FetchResponse, CrawlError> {
        let parsed = url::Url::parse(url).map_err(|e| CrawlError::InvalidUrl(e.to_string()))?;

        if !self.robots_allows(&parsed).await {
            return Err(CrawlError::RobotsDisallowed);
        }

        let (client, actual_via_tor) = self.client_for(via_tor);
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            match self.try_once(client, &parsed, actual_via_tor).await {
                Ok(mut response) => {
                    response.duration_ms = started.elapsed().as_millis() as u64;
                    return Ok(response);
                }
                Err(TryError::Http(status, final_url)) => {
                    return Err(CrawlError::FetchHttp { status, url: final_url });
                }
                Err(TryError::Transport(e)) => {
                    if attempt >= self.retry.retries || !Self::is_retryable(&e) {
                        return Err(CrawlError::Fetch(e.to_string()));
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(url = %url, attempt, ?delay, "retrying fetch after transport error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

enum TryError {
    Http(u16, String),
    Transport(reqwest::Error),
}

impl HttpFetcher {
    async fn try_once(
        &self,
        client: &reqwest::Client,
        url: &url::Url,
        via_tor: bool,
    ) -> Result<FetchResponse, TryError> {
        let resp = client.get(url.as_str()).send().await.map_err(TryError::Transport)?;

        let final_url = resp.url().to_string();
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(TryError::Http(status, final_url));
        }

        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let content_type = headers.get("content-type").cloned();

        let bytes = resp.bytes().await.map_err(TryError::Transport)?;
        if bytes.len() > self.config.max_body_size {
            debug!(len = bytes.len(), max = self.config.max_body_size, "body truncated");
        }
        let body: Vec<u8> = bytes
            .iter()
            .take(self.config.max_body_size)
            .copied()
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(url.as_str().as_bytes());
        let url_sha256 = format!("{:x}", hasher.finalize());

        Ok(FetchResponse {
            url: url.to_string(),
            final_url,
            url_sha256,
            status,
            headers,
            bytes_downloaded: body.len(),
            body,
            content_type,
            fetched_at: chrono::Utc::now(),
            duration_ms: 0,
            via_tor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ramps_linearly_between_bounds() {
        let policy = RetryPolicy {
            retries: 4,
            backoff_low: Duration::from_secs(1),
            backoff_high: Duration::from_secs(9),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(9));
        assert_eq!(policy.delay_for(2), Duration::from_secs(5));
    }

    #[test]
    fn zero_retries_uses_low_bound() {
        let policy = RetryPolicy { retries: 0, ..RetryPolicy::default() };
        assert_eq!(policy.delay_for(0), policy.backoff_low);
    }

    fn fetch_config() -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(5),
            max_body_size: 1024,
            follow_redirects: true,
            user_agent: "oddcrawler-test".to_string(),
        }
    }

    #[test]
    fn client_for_falls_back_to_direct_without_a_configured_proxy() {
        let fetcher = HttpFetcher::new(fetch_config(), RetryPolicy::default(), false, None).unwrap();
        let (_, actual_via_tor) = fetcher.client_for(true);
        assert!(!actual_via_tor);
    }

    #[test]
    fn client_for_routes_via_tor_when_requested_and_proxy_configured() {
        let fetcher =
            HttpFetcher::new(fetch_config(), RetryPolicy::default(), false, Some("socks5://127.0.0.1:9050")).unwrap();
        let (_, actual_via_tor) = fetcher.client_for(true);
        assert!(actual_via_tor);
        let (_, direct) = fetcher.client_for(false);
        assert!(!direct);
    }
}
