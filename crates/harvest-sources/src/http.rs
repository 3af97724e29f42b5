use std::time::Duration;

use harvest_core::AppConfig;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::rate_limit::{retry_with_backoff, Pacer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport settings shared by every adapter.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
    /// Additional attempts after the first failure of a retryable request.
    pub max_retries: u32,
    /// Base for the exponential backoff: `base * 2^attempt` seconds.
    pub retry_backoff_base_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "harvest/0.1 (multi-source collector)".to_string(),
            max_retries: 2,
            retry_backoff_base_secs: 2,
        }
    }
}

impl HttpSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            timeout: config.http_timeout(),
            user_agent: config.http_user_agent.clone(),
            max_retries: config.max_retries,
            retry_backoff_base_secs: config.retry_backoff_base_secs,
        }
    }
}

/// HTTP GET with pacing, retry and status classification, owned by one adapter.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    pacer: Pacer,
    max_retries: u32,
    backoff_base_secs: u64,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(settings: &HttpSettings, request_delay: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(settings.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            pacer: Pacer::new(request_delay),
            max_retries: settings.max_retries,
            backoff_base_secs: settings.retry_backoff_base_secs,
        })
    }

    /// GET `url` with `params` and return the body.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Cancelled`] once `cancel` fires.
    /// - [`FetchError::RateLimited`] / [`FetchError::UnexpectedStatus`] for
    ///   non-2xx responses, after retries for the retryable ones.
    /// - [`FetchError::Http`] for transport failures after retries.
    pub async fn get_bytes(
        &self,
        url: &str,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        retry_with_backoff(self.max_retries, self.backoff_base_secs, cancel, || async move {
            self.pacer.wait(cancel).await?;

            let request = self.client.get(url).query(params);
            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                response = request.send() => response?,
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after_secs = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok());
                return Err(FetchError::RateLimited {
                    url: url.to_string(),
                    retry_after_secs,
                });
            }
            if !status.is_success() {
                return Err(FetchError::UnexpectedStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                body = response.bytes() => body?,
            };
            Ok(body.to_vec())
        })
        .await
    }

    /// GET `url` and deserialize the JSON body. Parse failures are not retried.
    ///
    /// # Errors
    ///
    /// Everything [`HttpFetcher::get_bytes`] returns, plus
    /// [`FetchError::Parse`] when the body does not match `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        let body = self.get_bytes(url, params, cancel).await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Parse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}
