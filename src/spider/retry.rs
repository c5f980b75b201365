use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::spider::ScrapeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorType {
    Transient,
    Permanent,
    RateLimit,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transient => "transient",
            ErrorType::Permanent => "permanent",
            ErrorType::RateLimit => "rate_limit",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub retryable: Vec<ErrorType>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            retryable: vec![ErrorType::Transient, ErrorType::RateLimit],
        }
    }
}

impl RetryConfig {
    /// `initial * factor^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

const RATE_LIMIT_PATTERNS: [&str; 3] = ["429", "too many requests", "rate limit"];

const TRANSIENT_PATTERNS: [&str; 11] = [
    "timeout",
    "connection refused",
    "connection reset",
    "temporary failure",
    "503",
    "502",
    "500",
    "network",
    "dns",
    "i/o timeout",
    "deadline exceeded",
];

const PERMANENT_PATTERNS: [&str; 8] = [
    "404",
    "not found",
    "invalid",
    "parse error",
    "unmarshal",
    "400",
    "401",
    "403",
];

/// Classifies by message. Unknown errors are treated as transient.
pub fn classify_error(message: &str) -> ErrorType {
    let message = message.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| message.contains(p));

    if matches(&RATE_LIMIT_PATTERNS) {
        ErrorType::RateLimit
    } else if matches(&TRANSIENT_PATTERNS) {
        ErrorType::Transient
    } else if matches(&PERMANENT_PATTERNS) {
        ErrorType::Permanent
    } else {
        ErrorType::Transient
    }
}

pub fn is_retryable_http_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Resolves once the flag is set. Never resolves if the sender is gone without setting it.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    cancel: &mut watch::Receiver<bool>,
    mut operation: F,
) -> Result<T, ScrapeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScrapeError>>,
{
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let error_type = err.error_type();
        if !config.retryable.contains(&error_type) {
            warn!(error_type = error_type.as_str(), "Non-retryable error encountered: {}", err);
            return Err(err);
        }
        if attempt >= config.max_retries {
            warn!(attempts = attempt + 1, "Max retries exhausted: {}", err);
            return Err(ScrapeError::RetriesExhausted {
                max_retries: config.max_retries,
                last: err.to_string(),
            });
        }

        let delay = config.backoff(attempt);
        warn!(
            attempt = attempt + 1,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error_type = error_type.as_str(),
            "Operation failed, retrying: {}",
            err
        );
        tokio::select! {
            _ = cancelled(cancel) => return Err(ScrapeError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn classifies_messages() {
        assert_eq!(classify_error("status 429"), ErrorType::RateLimit);
        assert_eq!(classify_error("Too Many Requests"), ErrorType::RateLimit);
        assert_eq!(classify_error("connection refused"), ErrorType::Transient);
        assert_eq!(classify_error("unexpected status 503"), ErrorType::Transient);
        assert_eq!(classify_error("page not found"), ErrorType::Permanent);
        assert_eq!(classify_error("status 403"), ErrorType::Permanent);
        assert_eq!(classify_error("something odd"), ErrorType::Transient);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(2), Duration::from_secs(4));
        assert_eq!(config.backoff(5), Duration::from_secs(10));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_http_status(429));
        assert!(is_retryable_http_status(504));
        assert!(!is_retryable_http_status(404));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (_tx, mut rx) = watch::channel(false);
        let result = retry_with_backoff(&fast_config(), &mut rx, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ScrapeError::Http("connection reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_return_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (_tx, mut rx) = watch::channel(false);
        let result: Result<(), _> = retry_with_backoff(&fast_config(), &mut rx, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ScrapeError::Status(404))
        })
        .await;
        assert_eq!(result, Err(ScrapeError::Status(404)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_the_last_error() {
        let (_tx, mut rx) = watch::channel(false);
        let result: Result<(), _> = retry_with_backoff(&fast_config(), &mut rx, || async {
            Err(ScrapeError::Status(503))
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "max retries (3) exhausted: unexpected status 503");
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let config = RetryConfig {
            initial_delay: Duration::from_secs(30),
            ..Default::default()
        };
        let result: Result<(), _> = retry_with_backoff(&config, &mut rx, || async {
            Err(ScrapeError::Http("timeout".into()))
        })
        .await;
        assert_eq!(result, Err(ScrapeError::Cancelled));
    }
}
