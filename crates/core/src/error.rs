use thiserror::Error;

/// Error kinds propagated across crate boundaries (§7 of the design doc).
///
/// `CascadeSkip` has no variant here: a cascade stop is a normal
/// `CascadeDecision` value returned to the caller, not an error.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("http error: {status} for {url}")]
    FetchHttp { status: u16, url: String },

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("robots.txt disallows this URL")]
    RobotsDisallowed,

    #[error("policy skip: {0}")]
    PolicySkip(String),

    #[error("host permanently blocked: {0}")]
    BlockedHost(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage write error: {0}")]
    StorageWrite(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// HTTP status carried by a `FetchHttp` error, if any. The run loop uses
    /// this to decide whether a failure belongs in the failure cache.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            CrawlError::FetchHttp { status, .. } => Some(*status),
            _ => None,
        }
    }
}
