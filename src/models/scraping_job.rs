use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::models::tabelog::TabelogRestaurant;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpiderError {
    #[error("job not found")]
    JobNotFound,
    #[error("job queue is full")]
    QueueFull,
    #[error("job processor is stopped")]
    ProcessorStopped,
    #[error("timed out waiting for workers to stop")]
    ShutdownTimeout,
    #[error("invalid job ID")]
    InvalidJobId,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("repository error: {0}")]
    Repository(String),
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ScrapingJob {
    pub id: Uuid,
    pub google_id: String,
    pub area: String,
    pub place_name: String,
    pub status: JobStatus,
    pub results: Vec<TabelogRestaurant>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_msg: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl ScrapingJob {
    pub fn new(
        google_id: impl Into<String>,
        area: impl Into<String>,
        place_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            google_id: google_id.into(),
            area: area.into(),
            place_name: place_name.into(),
            status: JobStatus::Pending,
            results: Vec::new(),
            error_msg: String::new(),
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(OffsetDateTime::now_utc());
    }

    pub fn complete(&mut self, results: Vec<TabelogRestaurant>) {
        self.status = JobStatus::Completed;
        self.results = results;
        self.completed_at = Some(OffsetDateTime::now_utc());
    }

    pub fn fail(&mut self, error_msg: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_msg = error_msg.into();
        self.completed_at = Some(OffsetDateTime::now_utc());
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn duration(&self) -> Duration {
        match (self.started_at, self.completed_at) {
            (None, _) => Duration::ZERO,
            (Some(started), None) => OffsetDateTime::now_utc() - started,
            (Some(started), Some(completed)) => completed - started,
        }
    }
}
