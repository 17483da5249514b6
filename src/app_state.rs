use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{job_store::JobStore, worker::RecognitionWorker};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Attendance database, checked by `/health`. Absent when running without one.
    pub db: Option<PgPool>,
    pub jobs: Arc<JobStore>,
    pub worker: Arc<RecognitionWorker>,
}

impl AppState {
    pub fn new(db: Option<PgPool>, worker: RecognitionWorker) -> Self {
        let jobs = Arc::clone(worker.store());
        Self {
            db,
            jobs,
            worker: Arc::new(worker),
        }
    }
}
