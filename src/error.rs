// Error taxonomy shared by the dispatcher, executors and configuration
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Status reported for calls abandoned by the client side (cancelled or shut down).
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Throttling details decoded from a 429 response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHint {
    pub retry_after: Option<Duration>,
    pub reset: Option<DateTime<Utc>>,
    pub limit_per_second: Option<f64>,
    pub limit_burst: Option<u32>,
    pub remaining: Option<u32>,
    pub limit_type: Option<String>,
}

impl RateLimitHint {
    pub fn with_retry_after(retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::default()
        }
    }

    /// Fills every field still missing here from `other`.
    pub fn or(self, other: RateLimitHint) -> Self {
        Self {
            retry_after: self.retry_after.or(other.retry_after),
            reset: self.reset.or(other.reset),
            limit_per_second: self.limit_per_second.or(other.limit_per_second),
            limit_burst: self.limit_burst.or(other.limit_burst),
            remaining: self.remaining.or(other.remaining),
            limit_type: self.limit_type.or(other.limit_type),
        }
    }
}

/// Classified outcome of a failed API call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Server signalled throttling.
    #[error("rate limited by server (retry after {:?})", .0.retry_after)]
    RateLimited(RateLimitHint),
    /// Network or transport failure without a structured response.
    #[error("transport failure: {message}")]
    Transient { message: String },
    /// Any other API-level failure. Never retried.
    #[error("API request failed with status {status}: {message}")]
    Terminal {
        status: u16,
        code: Option<u32>,
        message: String,
        data: Option<serde_json::Value>,
    },
    /// The caller's context was cancelled or its deadline passed.
    #[error("request cancelled by caller")]
    Cancelled,
    /// The dispatcher was shut down before the call completed.
    #[error("request broker is shutting down")]
    ShuttingDown,
    #[error("failed to decode response: {message}")]
    Decode { message: String },
}

impl ApiError {
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient {
            message: message.to_string(),
        }
    }

    pub fn decode(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }

    /// HTTP-style status code for this error; 0 when no response was involved.
    pub fn status(&self) -> u16 {
        match self {
            Self::RateLimited(_) => 429,
            Self::Terminal { status, .. } => *status,
            Self::Cancelled | Self::ShuttingDown => CLIENT_CLOSED_REQUEST,
            Self::Transient { .. } | Self::Decode { .. } => 0,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn rate_limit_hint(&self) -> Option<&RateLimitHint> {
        match self {
            Self::RateLimited(hint) => Some(hint),
            _ => None,
        }
    }
}

/// Configuration, token and file failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialise configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("agent token in {0} is empty")]
    EmptyToken(PathBuf),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
