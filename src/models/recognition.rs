use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::job::{FaceResult, Job, JobStatus, JobSummary};

/// Response after submitting an image for recognition.
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Response for polling a recognition job.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub results: Vec<FaceResult>,
    pub error_message: Option<String>,
    pub summary: Option<JobSummary>,
    pub total_results: usize,
    pub created_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            total_results: job.results.len(),
            results: job.results,
            error_message: job.error_message,
            summary: job.summary,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
