use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::job::{Job, JobInput, JobMetadata, JobStatus, JobUpdate};

/// Eviction rules applied by `get` and the sweeper.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Polls of a completed job after which it is evicted.
    pub max_view_count: u32,
    /// Idle limit for jobs still processing.
    pub pending_ttl: Duration,
    /// Idle limit for completed or failed jobs. `None` keeps them until viewed out.
    pub finished_ttl: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_view_count: 3,
            pending_ttl: Duration::seconds(900),
            finished_ttl: Some(Duration::seconds(3600)),
        }
    }
}

/// Result of a store update.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The job was evicted or never existed.
    NotFound,
    /// The job already reached a terminal state; nothing was changed.
    Finalized,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub abandoned: usize,
    pub expired: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.abandoned + self.expired
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

/// In-memory table of recognition jobs.
///
/// Every operation takes the single table lock for its whole critical
/// section and does only in-memory work while holding it. Entries are
/// never handed out by reference; readers get clones.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    policy: RetentionPolicy,
}

impl JobStore {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Insert a new processing job and return its id.
    pub fn create(&self, image: Bytes, metadata: JobMetadata) -> Uuid {
        let now = Utc::now();
        let mut jobs = self.jobs.lock();
        let id = loop {
            let candidate = Uuid::new_v4();
            if let Entry::Vacant(slot) = jobs.entry(candidate) {
                slot.insert(Job::new(candidate, image, metadata, now));
                break candidate;
            }
        };
        metrics::gauge!("job_store_resident_jobs").set(jobs.len() as f64);
        drop(jobs);

        tracing::debug!(job_id = %id, "Job created");
        id
    }

    /// Poll a job.
    ///
    /// Refreshes the access time. A completed job counts a view, and the
    /// poll that reaches `max_view_count` evicts it after reading, so that
    /// caller still receives the final data.
    pub fn get(&self, id: Uuid) -> Option<Job> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&id)?;
        job.last_accessed_at = Utc::now();

        let mut consumed = false;
        if job.status == JobStatus::Completed {
            job.view_count += 1;
            consumed = job.view_count >= self.policy.max_view_count;
        }

        let snapshot = job.clone();
        if consumed {
            jobs.remove(&id);
            metrics::counter!("job_store_evictions_total", "reason" => "viewed").increment(1);
            metrics::gauge!("job_store_resident_jobs").set(jobs.len() as f64);
            tracing::debug!(job_id = %id, views = snapshot.view_count, "Completed job consumed");
        }
        Some(snapshot)
    }

    /// Worker-side read of the job input. Does not count as a poll, and
    /// marks the job started so later metadata amendments are refused.
    pub fn load_input(&self, id: Uuid) -> Option<JobInput> {
        let mut jobs = self.jobs.lock();
        jobs.get_mut(&id).map(|job| {
            job.started = true;
            JobInput {
                image: job.image.clone(),
                metadata: job.metadata.clone(),
            }
        })
    }

    /// Merge `update` into the job.
    pub fn update(&self, id: Uuid, update: JobUpdate) -> UpdateOutcome {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return UpdateOutcome::NotFound;
        };
        if job.status.is_terminal() {
            return UpdateOutcome::Finalized;
        }

        if let Some(metadata) = update.metadata {
            if job.started {
                tracing::warn!(job_id = %id, "Ignoring metadata amendment after processing started");
            } else {
                job.metadata = metadata;
            }
        }
        if let Some(results) = update.results {
            if results.len() >= job.results.len() {
                job.results = results;
            } else {
                tracing::warn!(
                    job_id = %id,
                    current = job.results.len(),
                    offered = results.len(),
                    "Ignoring shorter result sequence"
                );
            }
        }
        if let Some(summary) = update.summary {
            job.summary = Some(summary);
        }
        if let Some(message) = update.error_message {
            job.error_message = Some(message);
        }
        if let Some(status) = update.status {
            job.status = status;
            if status == JobStatus::Completed {
                job.view_count = 0;
            }
            if status.is_terminal() {
                job.image = Bytes::new();
            }
        }
        job.last_accessed_at = Utc::now();

        UpdateOutcome::Applied
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// Evict abandoned processing jobs, and idle finished jobs when a
    /// finished TTL is configured.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut jobs = self.jobs.lock();

        jobs.retain(|_, job| {
            let idle = now - job.last_accessed_at;
            match job.status {
                JobStatus::Processing if idle > self.policy.pending_ttl => {
                    report.abandoned += 1;
                    false
                }
                JobStatus::Completed | JobStatus::Error => match self.policy.finished_ttl {
                    Some(ttl) if idle > ttl => {
                        report.expired += 1;
                        false
                    }
                    _ => true,
                },
                JobStatus::Processing => true,
            }
        });

        if report.total() > 0 {
            metrics::counter!("job_store_evictions_total", "reason" => "abandoned")
                .increment(report.abandoned as u64);
            metrics::counter!("job_store_evictions_total", "reason" => "expired")
                .increment(report.expired as u64);
        }
        metrics::gauge!("job_store_resident_jobs").set(jobs.len() as f64);
        report
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let jobs = self.jobs.lock();
        let mut stats = StoreStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Error => stats.error += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{FaceOutcome, FaceRegion, FaceResult, JobSummary};

    fn store() -> JobStore {
        JobStore::new(RetentionPolicy::default())
    }

    fn face(sequence: usize) -> FaceResult {
        FaceResult {
            sequence,
            identity: None,
            display_name: "Unknown".to_string(),
            outcome: FaceOutcome::Unknown,
            distance: None,
            region: FaceRegion { top: 0, right: 10, bottom: 10, left: 0 },
            cropped_image: Bytes::new(),
            recognized_at: Utc::now(),
        }
    }

    fn complete(store: &JobStore, id: Uuid) {
        let outcome = store.update(id, JobUpdate::completed(vec![face(0)], JobSummary::default()));
        assert_eq!(outcome, UpdateOutcome::Applied);
    }

    #[test]
    fn test_create_starts_processing() {
        let store = store();
        let id = store.create(Bytes::from_static(b"img"), JobMetadata::default());

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.results.is_empty());
        assert_eq!(job.view_count, 0);
        assert!(job.last_accessed_at >= job.created_at);
    }

    #[test]
    fn test_get_unknown_is_none() {
        assert!(store().get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_processing_polls_do_not_count_views() {
        let store = store();
        let id = store.create(Bytes::new(), JobMetadata::default());
        for _ in 0..10 {
            assert_eq!(store.get(id).unwrap().view_count, 0);
        }
    }

    #[test]
    fn test_view_count_eviction_is_read_then_remove() {
        let store = store();
        let id = store.create(Bytes::new(), JobMetadata::default());
        complete(&store, id);

        for expected in 1..=3 {
            let job = store.get(id).expect("poll within view budget");
            assert_eq!(job.view_count, expected);
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.results.len(), 1);
        }
        assert!(store.get(id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let store = store();
        let id = store.create(Bytes::new(), JobMetadata::default());
        assert_eq!(store.update(id, JobUpdate::failed("boom")), UpdateOutcome::Applied);

        assert_eq!(
            store.update(id, JobUpdate::completed(vec![], JobSummary::default())),
            UpdateOutcome::Finalized
        );
        assert_eq!(store.update(id, JobUpdate::progress(vec![face(0)])), UpdateOutcome::Finalized);

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(job.results.is_empty());
        // Error jobs never count views.
        assert_eq!(store.get(id).unwrap().view_count, 0);
    }

    #[test]
    fn test_update_missing_job() {
        assert_eq!(
            store().update(Uuid::new_v4(), JobUpdate::progress(vec![])),
            UpdateOutcome::NotFound
        );
    }

    #[test]
    fn test_results_never_shrink() {
        let store = store();
        let id = store.create(Bytes::new(), JobMetadata::default());
        let _ = store.update(id, JobUpdate::progress(vec![face(0), face(1)]));
        let _ = store.update(id, JobUpdate::progress(vec![face(0)]));
        assert_eq!(store.get(id).unwrap().results.len(), 2);
    }

    #[test]
    fn test_completion_resets_views_and_releases_image() {
        let store = store();
        let id = store.create(Bytes::from_static(b"raw"), JobMetadata::default());
        complete(&store, id);
        assert!(store.load_input(id).unwrap().image.is_empty());
        assert_eq!(store.get(id).unwrap().view_count, 1);
    }

    #[test]
    fn test_metadata_amendment() {
        let store = store();
        let id = store.create(Bytes::new(), JobMetadata::default());
        let metadata = JobMetadata {
            course_id: Some("CS101".to_string()),
            ..JobMetadata::default()
        };
        let update = JobUpdate {
            metadata: Some(metadata.clone()),
            ..JobUpdate::default()
        };
        assert_eq!(store.update(id, update), UpdateOutcome::Applied);
        assert_eq!(store.load_input(id).unwrap().metadata, metadata);
    }

    #[test]
    fn test_metadata_frozen_once_worker_started() {
        let store = store();
        let id = store.create(Bytes::new(), JobMetadata::default());
        assert!(store.load_input(id).is_some());

        let update = JobUpdate {
            metadata: Some(JobMetadata {
                course_id: Some("CS101".to_string()),
                ..JobMetadata::default()
            }),
            ..JobUpdate::default()
        };
        assert_eq!(store.update(id, update), UpdateOutcome::Applied);
        assert_eq!(store.load_input(id).unwrap().metadata, JobMetadata::default());
        assert_eq!(store.get(id).unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_sweep_evicts_abandoned_processing_jobs() {
        let store = store();
        let stale = store.create(Bytes::new(), JobMetadata::default());
        let done = store.create(Bytes::new(), JobMetadata::default());
        complete(&store, done);

        let later = Utc::now() + Duration::seconds(901);
        let report = store.sweep_at(later);
        assert_eq!(report, SweepReport { abandoned: 1, expired: 0 });
        assert!(store.load_input(stale).is_none());
        assert!(store.load_input(done).is_some());
    }

    #[test]
    fn test_sweep_keeps_recently_polled_jobs() {
        let store = store();
        let id = store.create(Bytes::new(), JobMetadata::default());
        let report = store.sweep_at(Utc::now() + Duration::seconds(60));
        assert_eq!(report.total(), 0);
        assert!(store.get(id).is_some());
    }

    #[test]
    fn test_sweep_expires_idle_finished_jobs() {
        let store = store();
        let failed = store.create(Bytes::new(), JobMetadata::default());
        let _ = store.update(failed, JobUpdate::failed("unreadable"));

        assert_eq!(store.sweep_at(Utc::now() + Duration::seconds(1800)).total(), 0);
        let report = store.sweep_at(Utc::now() + Duration::seconds(3601));
        assert_eq!(report, SweepReport { abandoned: 0, expired: 1 });
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_without_finished_ttl_keeps_error_jobs() {
        let store = JobStore::new(RetentionPolicy {
            finished_ttl: None,
            ..RetentionPolicy::default()
        });
        let failed = store.create(Bytes::new(), JobMetadata::default());
        let _ = store.update(failed, JobUpdate::failed("unreadable"));

        assert_eq!(store.sweep_at(Utc::now() + Duration::days(30)).total(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_stats() {
        let store = store();
        let a = store.create(Bytes::new(), JobMetadata::default());
        let b = store.create(Bytes::new(), JobMetadata::default());
        store.create(Bytes::new(), JobMetadata::default());
        complete(&store, a);
        let _ = store.update(b, JobUpdate::failed("x"));

        assert_eq!(
            store.stats(),
            StoreStats { processing: 1, completed: 1, error: 1 }
        );
    }
}
