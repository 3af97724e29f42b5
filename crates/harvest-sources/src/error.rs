use harvest_core::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after_secs: Option<u64>,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("failed to parse response from {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("invalid CSS selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Timeouts, connection failures, 429 and 5xx may succeed on a later
    /// attempt; everything else will fail the same way again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            FetchError::RateLimited { .. } => true,
            FetchError::UnexpectedStatus { status, .. } => *status >= 500,
            FetchError::Parse { .. }
            | FetchError::InvalidSelector { .. }
            | FetchError::Cancelled => false,
        }
    }

    /// The request hit the client timeout. Retryable, but only on a later
    /// run: retrying in place would stack timeouts inside one sub-run.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Http(e) if e.is_timeout())
    }

    #[must_use]
    pub fn into_source_error(self, platform: &str) -> SourceError {
        SourceError {
            platform: platform.to_string(),
            retryable: self.is_retryable(),
            cause: self.to_string(),
        }
    }
}
