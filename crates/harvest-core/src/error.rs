use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read settings file {path}: {source}")]
    SettingsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file: {0}")]
    SettingsFileParse(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    Validation(String),
}

/// Failure of one source adapter, reported per platform in
/// [`crate::RunStats`].
///
/// `retryable` states whether the next scheduled run may reasonably succeed
/// (timeouts, 429, 5xx) or whether the failure will repeat until someone
/// changes configuration (4xx, malformed responses).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{platform}: {cause}")]
pub struct SourceError {
    pub platform: String,
    pub cause: String,
    pub retryable: bool,
}

impl SourceError {
    #[must_use]
    pub fn retryable(platform: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            cause: cause.into(),
            retryable: true,
        }
    }

    #[must_use]
    pub fn fatal(platform: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            cause: cause.into(),
            retryable: false,
        }
    }
}
