use thiserror::Error;

use crate::spider::circuit_breaker::CircuitBreakerError;
use crate::spider::retry::{classify_error, ErrorType};

pub mod area_mapper;
pub mod circuit_breaker;
pub mod html;
pub mod job_processor;
pub mod rate_limiter;
pub mod retry;
pub mod scraper;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("service temporarily unavailable (circuit breaker open): {0}")]
    Circuit(#[from] CircuitBreakerError),
    #[error("max retries ({max_retries}) exhausted: {last}")]
    RetriesExhausted { max_retries: u32, last: String },
    #[error("all scraping attempts failed: {0}")]
    AllFailed(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl ScrapeError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            ScrapeError::Circuit(_) | ScrapeError::Cancelled => ErrorType::Permanent,
            other => classify_error(&other.to_string()),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.error_type() == ErrorType::RateLimit
    }

    /// Short label for the `spider_scrape_errors_total` counter.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ScrapeError::Circuit(_) => "circuit_open",
            ScrapeError::Cancelled => "cancelled",
            ScrapeError::AllFailed(_) => "all_failed",
            _ => self.error_type().as_str(),
        }
    }
}
