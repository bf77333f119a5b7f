//! Backend call errors with retry classification.
//!
//! Transient failures (rate limits, 5xx, network) are retried by the adapter;
//! anything that survives the retry window terminates only the calling agent.

use std::time::Duration;

/// Classification of backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429
    RateLimited,
    /// 500, 502, 503, 504 and unclassified statuses
    ServerError,
    /// 4xx other than 429: bad request, auth, unknown model
    ClientError,
    /// Connection failure or timeout
    NetworkError,
    /// The response body did not have the expected shape
    ParseError,
}

impl LlmErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }

    fn base_delay(&self) -> Duration {
        match self {
            LlmErrorKind::RateLimited => Duration::from_secs(5),
            LlmErrorKind::ServerError => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        }
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LlmErrorKind::RateLimited => "Rate limited",
            LlmErrorKind::ServerError => "Server error",
            LlmErrorKind::ClientError => "Client error",
            LlmErrorKind::NetworkError => "Network error",
            LlmErrorKind::ParseError => "Parse error",
        };
        f.write_str(label)
    }
}

/// Error from a backend call.
#[derive(Debug)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Delay requested by the server (Retry-After)
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: classify_http_status(status),
            status: Some(status),
            message: message.into(),
            retry_after,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::NetworkError,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ParseError,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// Honors Retry-After, otherwise exponential backoff from a per-kind base,
    /// capped at 60 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }
        let base = self.kind.base_delay().as_secs();
        let secs = base.saturating_mul(2u64.saturating_pow(attempt)).min(60);
        Duration::from_secs(secs)
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Map an HTTP status to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Total time budget across all attempts
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            max_retry_duration: Duration::ZERO,
        }
    }

    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.kind.is_transient() && attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(401), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(302), LlmErrorKind::ServerError);
    }

    #[test]
    fn test_only_transient_errors_retry() {
        let config = RetryConfig::default();
        assert!(config.should_retry(&LlmError::from_status(500, "boom", None), 0));
        assert!(config.should_retry(&LlmError::network("reset"), 2));
        assert!(!config.should_retry(&LlmError::network("reset"), 3));
        assert!(!config.should_retry(&LlmError::from_status(400, "bad", None), 0));
        assert!(!config.should_retry(&LlmError::parse("garbage"), 0));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let error = LlmError::from_status(429, "slow down", None);
        assert!(error.suggested_delay(1) > error.suggested_delay(0));
        assert_eq!(error.suggested_delay(10), Duration::from_secs(60));

        let error = LlmError::from_status(429, "slow down", Some(Duration::from_secs(7)));
        assert_eq!(error.suggested_delay(4), Duration::from_secs(7));
    }

    #[test]
    fn test_display_includes_status() {
        let error = LlmError::from_status(401, "invalid key", None);
        assert_eq!(error.to_string(), "Client error (HTTP 401): invalid key");
        assert_eq!(LlmError::network("down").to_string(), "Network error: down");
    }
}
