pub mod auth;
pub mod handler_404;
pub mod rate_limit;
pub mod request_metrics;
pub mod shutdown;
