use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use serde_with::skip_serializing_none;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::scraping_job::{JobStatus, ScrapingJob, SpiderError};
use crate::models::tabelog::TabelogRestaurant;
use crate::repositories::{JobRepository, ResultCache};
use crate::spider::area_mapper::AreaMapper;
use crate::spider::job_processor::JobProcessor;

pub const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const STREAM_MAX_DURATION: Duration = Duration::from_secs(5 * 60);

pub fn router(
    processor: Arc<JobProcessor>,
    jobs: Arc<dyn JobRepository>,
    cache: Arc<dyn ResultCache>,
) -> Router {
    Router::new()
        .route("/api/v1/spider/scrape", post(scrape))
        .route("/api/v1/spider/jobs/:job_id", get(job_status))
        .route("/api/v1/spider/jobs/:job_id/stream", get(stream_job_status))
        .route_layer(Extension(processor))
        .route_layer(Extension(jobs))
        .route_layer(Extension(cache))
}

#[derive(Clone, Deserialize, Debug)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub google_id: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub place_name: String,
}

impl ScrapeRequest {
    fn validate(&self) -> Result<(), SpiderError> {
        for (field, value) in [
            ("google_id", &self.google_id),
            ("area", &self.area),
            ("place_name", &self.place_name),
        ] {
            if value.trim().is_empty() {
                return Err(SpiderError::InvalidRequest(format!("{} is required", field)));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct CachedResultsResponse {
    pub google_id: String,
    pub results: Vec<TabelogRestaurant>,
    pub total_found: usize,
    pub from_cache: bool,
    pub cached_at: String,
}

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub google_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<TabelogRestaurant>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<ScrapingJob> for JobStatusResponse {
    fn from(job: ScrapingJob) -> Self {
        Self {
            job_id: job.id,
            google_id: job.google_id,
            status: job.status,
            results: job.results,
            error: Some(job.error_msg).filter(|e| !e.is_empty()),
            created_at: rfc3339(job.created_at),
            completed_at: job.completed_at.map(rfc3339),
        }
    }
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_default()
}

fn parse_job_id(raw: &str) -> Result<Uuid, SpiderError> {
    Uuid::parse_str(raw.trim()).map_err(|_| SpiderError::InvalidJobId)
}

pub async fn scrape(
    Extension(processor): Extension<Arc<JobProcessor>>,
    Extension(jobs): Extension<Arc<dyn JobRepository>>,
    Extension(cache): Extension<Arc<dyn ResultCache>>,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload?;
    body.validate()?;
    info!(
        google_id = %body.google_id,
        area = %body.area,
        place_name = %body.place_name,
        "Received scrape request"
    );

    match cache.get(&body.google_id).await {
        Ok(Some(cached)) => {
            info!(google_id = %body.google_id, results_count = cached.results.len(), "Returning cached results");
            let response = CachedResultsResponse {
                google_id: body.google_id,
                total_found: cached.results.len(),
                results: cached.results,
                from_cache: true,
                cached_at: rfc3339(cached.cached_at),
            };
            return Ok(Json(response).into_response());
        }
        Ok(None) => {}
        Err(e) => warn!("Something went wrong reading the result cache due to: {}", e),
    }

    let area = AreaMapper::new().resolve(&body.area);
    let job = ScrapingJob::new(body.google_id, area, body.place_name);
    jobs.save(&job).await?;
    metrics::counter!("spider_jobs_total", "status" => JobStatus::Pending.as_str()).increment(1);
    processor.submit_job(job.id)?;
    info!(job_id = %job.id, google_id = %job.google_id, "Scraping job submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job.id, "status": job.status })),
    )
        .into_response())
}

pub async fn job_status(
    Extension(jobs): Extension<Arc<dyn JobRepository>>,
    job_id: Result<Path<String>, PathRejection>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let Path(job_id) = job_id?;
    let job = jobs.find_by_id(parse_job_id(&job_id)?).await?;
    Ok(Json(JobStatusResponse::from(job)))
}

pub async fn stream_job_status(
    Extension(jobs): Extension<Arc<dyn JobRepository>>,
    job_id: Result<Path<String>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(job_id) = job_id?;
    let job_id = parse_job_id(&job_id)?;
    info!(%job_id, "Starting job status stream");

    let events = job_events(jobs, job_id, STREAM_POLL_INTERVAL, STREAM_MAX_DURATION)
        .map(|event| Ok::<_, Infallible>(event.into_sse()));
    let sse = Sse::new(events).keep_alive(KeepAlive::default());
    Ok(([("x-accel-buffering", "no")], sse).into_response())
}

/// One server-sent event about a job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobEvent {
    pub name: &'static str,
    pub data: Value,
}

impl JobEvent {
    fn update(job: &ScrapingJob) -> Self {
        let mut data = Map::new();
        data.insert("job_id".into(), json!(job.id));
        data.insert("google_id".into(), json!(job.google_id));
        data.insert("status".into(), json!(job.status));
        data.insert("created_at".into(), json!(rfc3339(job.created_at)));
        if let Some(started_at) = job.started_at {
            data.insert("started_at".into(), json!(rfc3339(started_at)));
        }
        if let Some(completed_at) = job.completed_at {
            data.insert("completed_at".into(), json!(rfc3339(completed_at)));
            data.insert("duration".into(), json!(job.duration().as_seconds_f64()));
        }
        match job.status {
            JobStatus::Completed => {
                data.insert("results_count".into(), json!(job.results.len()));
            }
            JobStatus::Failed => {
                data.insert("error".into(), json!(job.error_msg));
            }
            _ => {}
        }
        Self {
            name: "update",
            data: Value::Object(data),
        }
    }

    fn into_sse(self) -> Event {
        Event::default().event(self.name).data(self.data.to_string())
    }
}

struct JobWatch {
    jobs: Arc<dyn JobRepository>,
    job_id: Uuid,
    poll_interval: Duration,
    deadline: Instant,
    last_status: Option<JobStatus>,
    queued: VecDeque<JobEvent>,
    closed: bool,
}

impl JobWatch {
    async fn poll(&mut self) {
        let job = match self.jobs.find_by_id(self.job_id).await {
            Ok(job) => job,
            Err(e) => {
                if e != SpiderError::JobNotFound {
                    warn!("Something went wrong loading job {} due to: {}", self.job_id, e);
                }
                self.queued.push_back(JobEvent {
                    name: "error",
                    data: json!({ "error": "job not found" }),
                });
                self.closed = true;
                return;
            }
        };

        if self.last_status != Some(job.status) {
            self.last_status = Some(job.status);
            self.queued.push_back(JobEvent::update(&job));
        }
        if job.is_completed() {
            info!(job_id = %self.job_id, status = %job.status, "Job finished, closing stream");
            self.queued.push_back(JobEvent {
                name: "done",
                data: json!({ "message": "job completed" }),
            });
            self.closed = true;
        }
    }
}

/// Polls a job and yields an `update` each time its status changes, then `done`
/// once it completes. Gives up silently after `max_duration`.
pub fn job_events(
    jobs: Arc<dyn JobRepository>,
    job_id: Uuid,
    poll_interval: Duration,
    max_duration: Duration,
) -> impl Stream<Item = JobEvent> + Send {
    let watch = JobWatch {
        jobs,
        job_id,
        poll_interval,
        deadline: Instant::now() + max_duration,
        last_status: None,
        queued: VecDeque::new(),
        closed: false,
    };

    stream::unfold(watch, |mut watch| async move {
        loop {
            if let Some(event) = watch.queued.pop_front() {
                return Some((event, watch));
            }
            if watch.closed {
                return None;
            }
            let now = Instant::now();
            if now >= watch.deadline {
                info!(job_id = %watch.job_id, "Job stream timed out");
                return None;
            }
            tokio::time::sleep(watch.poll_interval.min(watch.deadline - now)).await;
            watch.poll().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::{json_request, send};
    use crate::repositories::job_store::{InMemoryJobRepository, InMemoryResultCache};
    use crate::spider::job_processor::JobProcessorConfig;
    use crate::spider::rate_limiter::DynamicRateLimiter;
    use crate::spider::scraper::RestaurantScraper;
    use crate::spider::ScrapeError;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::watch;
    use tower::ServiceExt;

    struct NoopScraper;

    #[async_trait]
    impl RestaurantScraper for NoopScraper {
        async fn scrape_restaurants(
            &self,
            _area: &str,
            _place_name: &str,
            _cancel: watch::Receiver<bool>,
        ) -> Result<Vec<TabelogRestaurant>, ScrapeError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        jobs: InMemoryJobRepository,
        cache: InMemoryResultCache,
        app: Router,
    }

    fn harness(queue_size: usize) -> Harness {
        let jobs = InMemoryJobRepository::new();
        let cache = InMemoryResultCache::new();
        let processor = JobProcessor::new(
            Arc::new(jobs.clone()),
            Arc::new(cache.clone()),
            Arc::new(NoopScraper),
            Arc::new(DynamicRateLimiter::new(60_000, 60)),
            JobProcessorConfig {
                workers: 1,
                queue_size,
                cache_ttl: time::Duration::hours(1),
                fetch_interval: Duration::from_secs(60),
            },
        );
        let app = router(processor, Arc::new(jobs.clone()), Arc::new(cache.clone()));
        Harness { jobs, cache, app }
    }

    fn scrape_body() -> Value {
        json!({"google_id": "ChIJ123", "area": "tokyo", "place_name": "Ichiran"})
    }

    #[tokio::test]
    async fn scrape_accepts_new_jobs() {
        let harness = harness(4);
        let request = json_request("POST", "/api/v1/spider/scrape", scrape_body(), None);
        let (status, body) = send(harness.app, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "PENDING");

        let job_id = Uuid::parse_str(body["job_id"].as_str().unwrap()).unwrap();
        let job = harness.jobs.find_by_id(job_id).await.unwrap();
        assert_eq!(job.place_name, "Ichiran");
    }

    #[tokio::test]
    async fn scrape_maps_addresses_to_area_codes() {
        let harness = harness(4);
        let body = json!({
            "google_id": "ChIJ456",
            "area": "1-2-3 Jinnan, Shibuya City, Tokyo",
            "place_name": "Afuri",
        });
        let request = json_request("POST", "/api/v1/spider/scrape", body, None);
        let (status, body) = send(harness.app, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let job_id = Uuid::parse_str(body["job_id"].as_str().unwrap()).unwrap();
        let job = harness.jobs.find_by_id(job_id).await.unwrap();
        assert_eq!(job.area, "tokyo/A1303");
    }

    #[tokio::test]
    async fn scrape_serves_cached_results() {
        let harness = harness(4);
        harness
            .cache
            .set(
                "ChIJ123",
                vec![TabelogRestaurant {
                    name: "Ichiran Shinjuku".to_string(),
                    ..Default::default()
                }],
                time::Duration::hours(1),
            )
            .await
            .unwrap();

        let request = json_request("POST", "/api/v1/spider/scrape", scrape_body(), None);
        let (status, body) = send(harness.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["from_cache"], true);
        assert_eq!(body["total_found"], 1);
        assert_eq!(body["results"][0]["name"], "Ichiran Shinjuku");
    }

    #[tokio::test]
    async fn scrape_validates_the_body() {
        let harness = harness(4);
        let request = json_request(
            "POST",
            "/api/v1/spider/scrape",
            json!({"google_id": "ChIJ123", "area": " ", "place_name": "Ichiran"}),
            None,
        );
        let (status, body) = send(harness.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "area is required");
    }

    #[tokio::test]
    async fn full_queue_is_service_unavailable() {
        let harness = harness(1);
        let first = json_request("POST", "/api/v1/spider/scrape", scrape_body(), None);
        let (status, _) = send(harness.app.clone(), first).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let second = json_request("POST", "/api/v1/spider/scrape", scrape_body(), None);
        let (status, body) = send(harness.app, second).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "job queue is full");
    }

    #[tokio::test]
    async fn job_status_reports_results_and_errors() {
        let harness = harness(4);
        let mut job = ScrapingJob::new("ChIJ123", "tokyo", "Ichiran");
        job.start();
        job.fail("unexpected status 503");
        harness.jobs.save(&job).await.unwrap();

        let request = Request::builder()
            .uri(format!("/api/v1/spider/jobs/{}", job.id))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(harness.app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "FAILED");
        assert_eq!(body["error"], "unexpected status 503");
        assert!(body.get("results").is_none());
        assert!(body["completed_at"].is_string());

        let request = Request::builder()
            .uri("/api/v1/spider/jobs/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(harness.app.clone(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .uri(format!("/api/v1/spider/jobs/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(harness.app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_sets_event_stream_headers() {
        let harness = harness(4);
        let request = Request::builder()
            .uri(format!("/api/v1/spider/jobs/{}/stream", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let response = harness.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["cache-control"], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("event: error"));
        assert!(text.contains("job not found"));
    }

    #[tokio::test]
    async fn events_follow_status_changes_until_done() {
        let jobs = InMemoryJobRepository::new();
        let mut job = ScrapingJob::new("ChIJ123", "tokyo", "Ichiran");
        jobs.save(&job).await.unwrap();

        let store = jobs.clone();
        let mut updated = job.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            updated.start();
            store.update(&updated).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            updated.complete(vec![TabelogRestaurant::default(); 2]);
            store.update(&updated).await.unwrap();
        });

        let events: Vec<JobEvent> = job_events(
            Arc::new(jobs),
            job.id,
            Duration::from_millis(5),
            Duration::from_secs(5),
        )
        .collect()
        .await;

        let names: Vec<&str> = events.iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["update", "update", "update", "done"]);
        assert_eq!(events[0].data["status"], "PENDING");
        assert_eq!(events[1].data["status"], "RUNNING");
        assert_eq!(events[2].data["status"], "COMPLETED");
        assert_eq!(events[2].data["results_count"], 2);
        assert!(events[2].data["duration"].is_number());

        job.start();
        assert!(JobEvent::update(&job).data.get("results_count").is_none());
    }

    #[tokio::test]
    async fn events_stop_at_the_deadline() {
        let jobs = InMemoryJobRepository::new();
        let job = ScrapingJob::new("ChIJ123", "tokyo", "Ichiran");
        jobs.save(&job).await.unwrap();

        let events: Vec<JobEvent> = job_events(
            Arc::new(jobs),
            job.id,
            Duration::from_millis(5),
            Duration::from_millis(40),
        )
        .collect()
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["status"], "PENDING");
    }
}
