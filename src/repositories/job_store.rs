use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::Duration;
use uuid::Uuid;

use crate::models::scraping_job::{JobStatus, ScrapingJob, SpiderError};
use crate::models::tabelog::{CachedResult, TabelogRestaurant};
use crate::repositories::{JobRepository, ResultCache};

#[derive(Clone, Default)]
pub struct InMemoryJobRepository {
    jobs: Arc<RwLock<HashMap<Uuid, ScrapingJob>>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn save(&self, job: &ScrapingJob) -> Result<(), SpiderError> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<ScrapingJob, SpiderError> {
        self.jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or(SpiderError::JobNotFound)
    }

    async fn find_by_google_id(&self, google_id: &str) -> Result<Vec<ScrapingJob>, SpiderError> {
        let mut jobs: Vec<ScrapingJob> = self
            .jobs
            .read()
            .values()
            .filter(|job| job.google_id == google_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn update(&self, job: &ScrapingJob) -> Result<(), SpiderError> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(SpiderError::JobNotFound),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), SpiderError> {
        self.jobs
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(SpiderError::JobNotFound)
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<ScrapingJob>, SpiderError> {
        let mut pending: Vec<ScrapingJob> = self
            .jobs
            .read()
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(limit);
        Ok(pending)
    }
}

/// Expired entries are evicted lazily on read.
#[derive(Clone, Default)]
pub struct InMemoryResultCache {
    entries: Arc<RwLock<HashMap<String, CachedResult>>>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, place_id: &str) -> Result<Option<CachedResult>, SpiderError> {
        let cached = self.entries.read().get(place_id).cloned();
        match cached {
            Some(entry) if entry.is_expired() => {
                self.entries.write().remove(place_id);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn set(
        &self,
        place_id: &str,
        results: Vec<TabelogRestaurant>,
        ttl: Duration,
    ) -> Result<(), SpiderError> {
        let entry = CachedResult::new(place_id, results, ttl);
        self.entries.write().insert(place_id.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, place_id: &str) -> Result<(), SpiderError> {
        self.entries.write().remove(place_id);
        Ok(())
    }
}
