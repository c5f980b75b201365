use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SpiderConfig;
use crate::models::scraping_job::{JobStatus, ScrapingJob, SpiderError};
use crate::repositories::{JobRepository, ResultCache};
use crate::spider::rate_limiter::DynamicRateLimiter;
use crate::spider::retry::cancelled;
use crate::spider::scraper::RestaurantScraper;

const PENDING_BATCH: usize = 10;

#[derive(Clone, Debug)]
pub struct JobProcessorConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub cache_ttl: time::Duration,
    pub fetch_interval: Duration,
}

impl From<&SpiderConfig> for JobProcessorConfig {
    fn from(config: &SpiderConfig) -> Self {
        Self {
            workers: config.worker_count(),
            queue_size: config.spider_queue_size.max(1),
            cache_ttl: time::Duration::hours(config.spider_cache_ttl_hours as i64),
            fetch_interval: config.job_fetch_interval().max(Duration::from_millis(100)),
        }
    }
}

/// Bounded worker pool that drives scraping jobs from PENDING to COMPLETED or FAILED.
pub struct JobProcessor {
    jobs: Arc<dyn JobRepository>,
    cache: Arc<dyn ResultCache>,
    scraper: Arc<dyn RestaurantScraper>,
    rate_limiter: Arc<DynamicRateLimiter>,
    config: JobProcessorConfig,
    sender: mpsc::Sender<Uuid>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Uuid>>>,
    stop: watch::Sender<bool>,
    in_flight: Mutex<HashSet<Uuid>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobProcessor {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        cache: Arc<dyn ResultCache>,
        scraper: Arc<dyn RestaurantScraper>,
        rate_limiter: Arc<DynamicRateLimiter>,
        config: JobProcessorConfig,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            jobs,
            cache,
            scraper,
            rate_limiter,
            config,
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            stop,
            in_flight: Mutex::new(HashSet::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn rate_limiter(&self) -> &DynamicRateLimiter {
        &self.rate_limiter
    }

    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock();
        for worker_id in 0..self.config.workers {
            handles.push(tokio::spawn(Arc::clone(self).worker(worker_id)));
        }
        handles.push(tokio::spawn(Arc::clone(self).fetch_pending_jobs()));
        metrics::gauge!("spider_worker_pool_size").set(self.config.workers as f64);
        info!(
            workers = self.config.workers,
            queue_size = self.config.queue_size,
            "Job processor started"
        );
    }

    /// Queues a job without waiting for room.
    pub fn submit_job(&self, job_id: Uuid) -> Result<(), SpiderError> {
        if self.is_stopped() {
            return Err(SpiderError::ProcessorStopped);
        }
        match self.sender.try_send(job_id) {
            Ok(()) => {
                debug!(%job_id, "Job submitted");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(SpiderError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SpiderError::ProcessorStopped),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Signals every worker and waits for them, giving up after `timeout`.
    pub async fn stop(&self, timeout: Duration) -> Result<(), SpiderError> {
        info!("Stopping job processor");
        self.stop.send_replace(true);
        let handles = std::mem::take(&mut *self.handles.lock());
        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(_) => {
                metrics::gauge!("spider_worker_pool_size").set(0.0);
                info!("Job processor stopped");
                Ok(())
            }
            Err(_) => {
                warn!("Job processor stop timed out after {:?}", timeout);
                Err(SpiderError::ShutdownTimeout)
            }
        }
    }

    async fn worker(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Worker started");
        let mut stop = self.stop.subscribe();
        loop {
            let next = tokio::select! {
                _ = cancelled(&mut stop) => None,
                job_id = async { self.receiver.lock().await.recv().await } => job_id,
            };
            let Some(job_id) = next else {
                break;
            };
            if !self.in_flight.lock().insert(job_id) {
                debug!(%job_id, "Job already being processed");
                continue;
            }

            // Run each job on its own task so a panic only takes the job down.
            let processor = Arc::clone(&self);
            let outcome = tokio::spawn(async move { processor.process_job(job_id).await }).await;
            if let Err(e) = outcome {
                if e.is_panic() {
                    error!(worker_id, %job_id, "Worker panicked while processing job");
                    self.fail_after_panic(job_id).await;
                }
            }
            self.in_flight.lock().remove(&job_id);
        }
        debug!(worker_id, "Worker stopped");
    }

    async fn process_job(&self, job_id: Uuid) {
        let started = Instant::now();
        let mut job = match self.jobs.find_by_id(job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!("Something went wrong loading job {} due to: {}", job_id, e);
                return;
            }
        };
        if job.is_completed() {
            debug!(%job_id, status = %job.status, "Skipping finished job");
            return;
        }

        job.start();
        if let Err(e) = self.jobs.update(&job).await {
            warn!("Something went wrong marking job {} running due to: {}", job_id, e);
            return;
        }
        metrics::counter!("spider_jobs_total", "status" => "running").increment(1);
        info!(
            %job_id,
            google_id = %job.google_id,
            area = %job.area,
            place_name = %job.place_name,
            "Processing job"
        );

        let mut cancel = self.stop.subscribe();
        if let Err(e) = self.rate_limiter.wait(&mut cancel).await {
            job.fail(format!("rate limiter error: {}", e));
            self.finish(job, started).await;
            return;
        }

        match self
            .scraper
            .scrape_restaurants(&job.area, &job.place_name, cancel)
            .await
        {
            Ok(results) => {
                self.rate_limiter.on_success();
                let found = results.len();
                // Results must be cached before the job reads as COMPLETED.
                if let Err(e) = self
                    .cache
                    .set(&job.google_id, results.clone(), self.config.cache_ttl)
                    .await
                {
                    warn!("Something went wrong caching results for {} due to: {}", job.google_id, e);
                }
                job.complete(results);
                if self.finish(job, started).await {
                    info!(%job_id, results = found, "Job completed");
                }
            }
            Err(e) => {
                if e.is_rate_limited() {
                    self.rate_limiter.on_rate_limit_hit();
                }
                warn!("Something went wrong scraping job {} due to: {}", job_id, e);
                job.fail(e.to_string());
                self.finish(job, started).await;
            }
        }
    }

    /// Persists a finished job and records its metrics. Returns false if the save failed.
    async fn finish(&self, job: ScrapingJob, started: Instant) -> bool {
        let status = match job.status {
            JobStatus::Completed => "completed",
            _ => "failed",
        };
        metrics::counter!("spider_jobs_total", "status" => status).increment(1);
        metrics::histogram!("spider_job_duration_seconds").record(started.elapsed().as_secs_f64());

        match self.jobs.update(&job).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Something went wrong saving job {} due to: {}", job.id, e);
                false
            }
        }
    }

    async fn fail_after_panic(&self, job_id: Uuid) {
        let mut job = match self.jobs.find_by_id(job_id).await {
            Ok(job) if !job.is_completed() => job,
            _ => return,
        };
        job.fail("internal error: job processing panicked");
        metrics::counter!("spider_jobs_total", "status" => "failed").increment(1);
        if let Err(e) = self.jobs.update(&job).await {
            warn!("Something went wrong failing job {} due to: {}", job_id, e);
        }
    }

    async fn fetch_pending_jobs(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        let mut ticker = tokio::time::interval(self.config.fetch_interval);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancelled(&mut stop) => break,
                _ = ticker.tick() => self.enqueue_pending().await,
            }
        }
        debug!("Pending job fetcher stopped");
    }

    async fn enqueue_pending(&self) {
        let pending = match self.jobs.find_pending(PENDING_BATCH).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Something went wrong fetching pending jobs due to: {}", e);
                return;
            }
        };
        for job in pending {
            if self.in_flight.lock().contains(&job.id) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(job.id) {
                warn!("Job queue is full, deferring pending jobs");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tabelog::TabelogRestaurant;
    use crate::repositories::job_store::{InMemoryJobRepository, InMemoryResultCache};
    use crate::spider::ScrapeError;
    use async_trait::async_trait;

    enum Behavior {
        Found(usize),
        RateLimited,
        Panic,
    }

    struct FakeScraper {
        behavior: Behavior,
    }

    #[async_trait]
    impl RestaurantScraper for FakeScraper {
        async fn scrape_restaurants(
            &self,
            _area: &str,
            place_name: &str,
            _cancel: watch::Receiver<bool>,
        ) -> Result<Vec<TabelogRestaurant>, ScrapeError> {
            match self.behavior {
                Behavior::Found(n) => Ok((0..n)
                    .map(|i| TabelogRestaurant {
                        name: format!("{} {}", place_name, i),
                        link: format!("https://tabelog.com/tokyo/A1303/{}/", i),
                        rating: 3.5,
                        ..Default::default()
                    })
                    .collect()),
                Behavior::RateLimited => Err(ScrapeError::Status(429)),
                Behavior::Panic => panic!("scraper exploded"),
            }
        }
    }

    struct Harness {
        jobs: InMemoryJobRepository,
        cache: InMemoryResultCache,
        processor: Arc<JobProcessor>,
    }

    fn harness(behavior: Behavior, config: JobProcessorConfig) -> Harness {
        let jobs = InMemoryJobRepository::new();
        let cache = InMemoryResultCache::new();
        let processor = JobProcessor::new(
            Arc::new(jobs.clone()),
            Arc::new(cache.clone()),
            Arc::new(FakeScraper { behavior }),
            Arc::new(DynamicRateLimiter::new(60_000, 60)),
            config,
        );
        Harness {
            jobs,
            cache,
            processor,
        }
    }

    fn test_config() -> JobProcessorConfig {
        JobProcessorConfig {
            workers: 2,
            queue_size: 10,
            cache_ttl: time::Duration::hours(1),
            fetch_interval: Duration::from_secs(60),
        }
    }

    async fn wait_until_finished(jobs: &InMemoryJobRepository, id: Uuid) -> ScrapingJob {
        for _ in 0..200 {
            let job = jobs.find_by_id(id).await.unwrap();
            if job.is_completed() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", id);
    }

    #[tokio::test]
    async fn completes_jobs_and_caches_results() {
        let h = harness(Behavior::Found(2), test_config());
        h.processor.start();

        let job = ScrapingJob::new("ChIJ123", "tokyo", "Ichiran");
        h.jobs.save(&job).await.unwrap();
        h.processor.submit_job(job.id).unwrap();

        let done = wait_until_finished(&h.jobs, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.results.len(), 2);
        assert!(done.started_at.is_some());

        let cached = h.cache.get("ChIJ123").await.unwrap().unwrap();
        assert_eq!(cached.results, done.results);

        h.processor.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn rate_limited_scrapes_fail_and_slow_down() {
        let h = harness(Behavior::RateLimited, test_config());
        h.processor.start();

        let job = ScrapingJob::new("ChIJ429", "tokyo", "Busy");
        h.jobs.save(&job).await.unwrap();
        h.processor.submit_job(job.id).unwrap();

        let done = wait_until_finished(&h.jobs, job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error_msg.contains("429"));
        assert!((h.processor.rate_limiter().current_rate_rpm() - 30_000.0).abs() < 1e-6);
        assert!(h.cache.get("ChIJ429").await.unwrap().is_none());

        h.processor.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn panics_fail_the_job_and_keep_the_worker() {
        let h = harness(
            Behavior::Panic,
            JobProcessorConfig {
                workers: 1,
                ..test_config()
            },
        );
        h.processor.start();

        let first = ScrapingJob::new("ChIJ1", "tokyo", "Boom");
        let second = ScrapingJob::new("ChIJ2", "tokyo", "Boom again");
        for job in [&first, &second] {
            h.jobs.save(job).await.unwrap();
            h.processor.submit_job(job.id).unwrap();
        }

        for id in [first.id, second.id] {
            let done = wait_until_finished(&h.jobs, id).await;
            assert_eq!(done.status, JobStatus::Failed);
            assert!(done.error_msg.contains("panicked"));
        }

        h.processor.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let h = harness(
            Behavior::Found(0),
            JobProcessorConfig {
                queue_size: 1,
                ..test_config()
            },
        );

        h.processor.submit_job(Uuid::new_v4()).unwrap();
        let err = h.processor.submit_job(Uuid::new_v4()).unwrap_err();
        assert_eq!(err, SpiderError::QueueFull);
        assert_eq!(err.to_string(), "job queue is full");
    }

    #[tokio::test]
    async fn fetcher_picks_up_pending_jobs() {
        let h = harness(
            Behavior::Found(1),
            JobProcessorConfig {
                fetch_interval: Duration::from_millis(20),
                ..test_config()
            },
        );
        let job = ScrapingJob::new("ChIJ-orphan", "osaka", "Kushikatsu");
        h.jobs.save(&job).await.unwrap();

        h.processor.start();
        let done = wait_until_finished(&h.jobs, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);

        h.processor.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn stopped_processor_rejects_new_jobs() {
        let h = harness(Behavior::Found(1), test_config());
        h.processor.start();
        h.processor.stop(Duration::from_secs(1)).await.unwrap();

        assert!(h.processor.is_stopped());
        assert_eq!(
            h.processor.submit_job(Uuid::new_v4()),
            Err(SpiderError::ProcessorStopped)
        );
    }
}
