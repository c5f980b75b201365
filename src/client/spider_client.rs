use std::time::Duration;

use futures::StreamExt;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::sse::{SseError, SseParser};
use crate::controller::spider_controller::{CachedResultsResponse, JobStatusResponse};
use crate::models::scraping_job::JobStatus;
use crate::models::tabelog::TabelogRestaurant;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpiderClientError {
    #[error("spider service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("scraping failed: {0}")]
    Scraping(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("job stream error: {0}")]
    JobStream(String),
    #[error(transparent)]
    Sse(#[from] SseError),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SpiderClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            SpiderClientError::Unavailable("Unable to connect to Spider Service".to_string())
        } else if e.is_decode() {
            SpiderClientError::Decode(e.to_string())
        } else {
            SpiderClientError::Unavailable(e.to_string())
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SearchTabelogRequest {
    pub google_id: String,
    pub area: String,
    pub place_name: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SearchTabelogResponse {
    pub google_id: String,
    pub restaurants: Vec<TabelogRestaurant>,
    pub total_found: usize,
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<String>,
}

impl From<CachedResultsResponse> for SearchTabelogResponse {
    fn from(cached: CachedResultsResponse) -> Self {
        Self {
            google_id: cached.google_id,
            total_found: cached.results.len(),
            restaurants: cached.results,
            from_cache: true,
            cached_at: Some(cached.cached_at),
        }
    }
}

#[derive(Deserialize, Debug)]
struct JobAccepted {
    job_id: Uuid,
}

#[derive(Deserialize, Debug)]
struct JobUpdate {
    status: JobStatus,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamError {
    #[serde(default)]
    error: String,
}

/// HTTP client for the spider service. Scrape requests either come straight
/// back from the cache or are followed over the job's event stream.
#[derive(Clone, Debug)]
pub struct SpiderClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl SpiderClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SpiderClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SpiderClientError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bounded by the client timeout as a whole, stream included.
    pub async fn search_tabelog(
        &self,
        request: &SearchTabelogRequest,
    ) -> Result<SearchTabelogResponse, SpiderClientError> {
        tokio::time::timeout(self.timeout, self.search(request))
            .await
            .map_err(|_| SpiderClientError::Timeout(self.timeout))?
    }

    async fn search(
        &self,
        request: &SearchTabelogRequest,
    ) -> Result<SearchTabelogResponse, SpiderClientError> {
        let url = format!("{}/api/v1/spider/scrape", self.base_url);
        let response = check_status(self.client.post(&url).json(request).send().await?).await?;
        let status = response.status();
        let body: Value = response.json().await?;

        if status == StatusCode::OK && body.get("results").is_some() {
            let cached: CachedResultsResponse =
                serde_json::from_value(body).map_err(|e| SpiderClientError::Decode(e.to_string()))?;
            info!(google_id = %cached.google_id, results = cached.results.len(), "Got cached Tabelog results");
            return Ok(cached.into());
        }

        let accepted: JobAccepted = serde_json::from_value(body)
            .map_err(|_| SpiderClientError::Scraping("no job ID received from server".to_string()))?;
        debug!(job_id = %accepted.job_id, "Following scraping job");
        self.follow_job(accepted.job_id).await
    }

    async fn follow_job(&self, job_id: Uuid) -> Result<SearchTabelogResponse, SpiderClientError> {
        let url = format!("{}/api/v1/spider/jobs/{}/stream", self.base_url, job_id);
        let response = check_status(
            self.client
                .get(&url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await?,
        )
        .await?;

        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            for event in parser.feed(&chunk?)? {
                match event.event.as_str() {
                    "update" => {
                        let update: JobUpdate = event.json()?;
                        debug!(%job_id, status = %update.status, "Job status update");
                        match update.status {
                            JobStatus::Completed => return self.finished_job(job_id).await,
                            JobStatus::Failed => {
                                return Err(SpiderClientError::Scraping(
                                    update.error.unwrap_or_else(|| "Scraping failed".to_string()),
                                ))
                            }
                            JobStatus::Pending | JobStatus::Running => {}
                        }
                    }
                    "error" => {
                        let message = event
                            .json::<StreamError>()
                            .map(|e| e.error)
                            .unwrap_or_default();
                        return Err(SpiderClientError::JobStream(if message.is_empty() {
                            "SSE connection failed".to_string()
                        } else {
                            message
                        }));
                    }
                    "done" => return self.finished_job(job_id).await,
                    other => debug!(event = other, "Ignoring unknown job event"),
                }
            }
        }

        warn!(%job_id, "Job stream closed before the job finished");
        Err(SpiderClientError::JobStream(
            "stream closed before the job finished".to_string(),
        ))
    }

    async fn finished_job(&self, job_id: Uuid) -> Result<SearchTabelogResponse, SpiderClientError> {
        let job = self.get_job_status(job_id).await?;
        match job.status {
            JobStatus::Completed => Ok(SearchTabelogResponse {
                google_id: job.google_id,
                total_found: job.results.len(),
                restaurants: job.results,
                from_cache: false,
                cached_at: None,
            }),
            JobStatus::Failed => Err(SpiderClientError::Scraping(
                job.error.unwrap_or_else(|| "Scraping failed".to_string()),
            )),
            status => Err(SpiderClientError::JobStream(format!(
                "job ended the stream while {}",
                status
            ))),
        }
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> Result<JobStatusResponse, SpiderClientError> {
        let url = format!("{}/api/v1/spider/jobs/{}", self.base_url, job_id);
        let response = check_status(self.client.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn health(&self) -> Result<Value, SpiderClientError> {
        let url = format!("{}/health", self.base_url);
        let response = check_status(self.client.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turns a non-success response into the matching error.
async fn check_status(response: Response) -> Result<Response, SpiderClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = ["message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string);

    Err(match status {
        StatusCode::BAD_REQUEST => SpiderClientError::Service {
            status: status.as_u16(),
            message: message.unwrap_or_else(|| "Invalid request parameters".to_string()),
        },
        StatusCode::INTERNAL_SERVER_ERROR => SpiderClientError::Scraping(
            message.unwrap_or_else(|| "Failed to scrape Tabelog".to_string()),
        ),
        _ => SpiderClientError::Service {
            status: status.as_u16(),
            message: message.unwrap_or_else(|| status.to_string()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        // Port 9 (discard) is closed on any sane test host.
        let client = SpiderClient::new("http://127.0.0.1:9", DEFAULT_TIMEOUT).unwrap();
        let err = client.health().await.unwrap_err();
        assert_eq!(
            err,
            SpiderClientError::Unavailable("Unable to connect to Spider Service".to_string())
        );
    }

    #[test]
    fn cached_results_map_to_search_responses() {
        let cached = CachedResultsResponse {
            google_id: "ChIJ123".to_string(),
            results: vec![TabelogRestaurant::default()],
            total_found: 1,
            from_cache: true,
            cached_at: "2024-01-01T00:00:00Z".to_string(),
        };
        let response = SearchTabelogResponse::from(cached);
        assert!(response.from_cache);
        assert_eq!(response.total_found, 1);
        assert_eq!(response.cached_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    }
}
