//! Client side of the spider service: scrape requests, job polling and the
//! event-stream reader behind them.

pub mod spider_client;
pub mod sse;

pub use spider_client::{SearchTabelogRequest, SearchTabelogResponse, SpiderClient, SpiderClientError};
