use bytes::Bytes;
use chrono::{Local, NaiveDate, Utc};
use garde::Validate;
use image::DynamicImage;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::attendance::{AttendanceMark, AttendanceStatus, RosterEntry};
use crate::models::job::{
    FaceOutcome, FaceRegion, FaceResult, IdentityRef, JobMetadata, JobSummary, JobUpdate,
};
use crate::services::annotate::{self, CropError, FaceLabel};
use crate::services::attendance::{AttendanceRecorder, LedgerError, RosterDirectory};
use crate::services::face::{FaceAnalyzer, FaceServiceError};
use crate::services::job_store::{JobStore, UpdateOutcome};
use crate::services::matcher::{IdentityMatcher, MatcherError};

const UNKNOWN_NAME: &str = "Unknown";
const NO_FACES_NOTE: &str = "no faces detected";

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub match_threshold: f32,
    pub crop_padding: u32,
    /// Bound on concurrently running jobs; `None` runs every job at once.
    pub max_concurrent: Option<usize>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            match_threshold: 0.25,
            crop_padding: 20,
            max_concurrent: None,
        }
    }
}

/// Collaborators the worker calls outside the job store lock.
#[derive(Clone)]
pub struct Collaborators {
    pub faces: Arc<dyn FaceAnalyzer>,
    pub matcher: Arc<dyn IdentityMatcher>,
    pub attendance: Arc<dyn AttendanceRecorder>,
    pub roster: Arc<dyn RosterDirectory>,
}

/// Runs recognition jobs in the background, one task per submitted image.
pub struct RecognitionWorker {
    store: Arc<JobStore>,
    deps: Collaborators,
    settings: WorkerSettings,
    limiter: Option<Arc<Semaphore>>,
}

/// Everything the per-face loop needs to resolve one face.
struct FaceContext<'a> {
    job_id: Uuid,
    image: &'a Bytes,
    decoded: &'a Arc<DynamicImage>,
    roster: Option<&'a Roster>,
    metadata: &'a JobMetadata,
    today: NaiveDate,
}

struct Roster {
    course_id: String,
    students: Vec<RosterEntry>,
}

impl Roster {
    fn contains(&self, student_id: &str) -> bool {
        self.students.iter().any(|s| s.student_id == student_id)
    }
}

/// Why a job stopped before completing normally.
enum Halt {
    /// The job left the store (swept) or was finalized elsewhere.
    Gone,
    Failed(RecognitionError),
}

impl From<RecognitionError> for Halt {
    fn from(err: RecognitionError) -> Self {
        Halt::Failed(err)
    }
}

impl RecognitionWorker {
    pub fn new(store: Arc<JobStore>, deps: Collaborators, settings: WorkerSettings) -> Self {
        let limiter = settings.max_concurrent.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            store,
            deps,
            settings,
            limiter,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Create a job and start its worker. Returns the job id immediately.
    pub fn submit(self: &Arc<Self>, image: Bytes, metadata: JobMetadata) -> Uuid {
        let job_id = self.store.create(image, metadata);
        metrics::counter!("recognition_jobs_submitted_total").increment(1);
        self.spawn(job_id);
        job_id
    }

    /// Start processing `job_id` on its own task.
    pub fn spawn(self: &Arc<Self>, job_id: Uuid) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match &worker.limiter {
                Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
                None => None,
            };
            worker.run(job_id).await;
        })
    }

    /// Process one job to its terminal state.
    pub async fn run(&self, job_id: Uuid) {
        let started = Instant::now();
        tracing::info!(job_id = %job_id, "Processing recognition job");

        match self.process(job_id).await {
            Ok(summary) => {
                metrics::counter!("recognition_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job_id,
                    total_faces = summary.total_faces,
                    present = summary.present_count,
                    absent = summary.absent_count,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Recognition job completed"
                );
            }
            Err(Halt::Gone) => {
                tracing::info!(job_id = %job_id, "Job no longer in store, stopping");
            }
            Err(Halt::Failed(e)) => {
                metrics::counter!("recognition_jobs_failed_total").increment(1);
                tracing::error!(job_id = %job_id, error = %e, "Recognition job failed");
                if self.store.update(job_id, JobUpdate::failed(e.to_string())) != UpdateOutcome::Applied {
                    tracing::debug!(job_id = %job_id, "Failed job was already gone");
                }
            }
        }

        metrics::histogram!("recognition_job_seconds").record(started.elapsed().as_secs_f64());
    }

    async fn process(&self, job_id: Uuid) -> Result<JobSummary, Halt> {
        let input = self.store.load_input(job_id).ok_or(Halt::Gone)?;
        input.metadata.validate().map_err(RecognitionError::Metadata)?;
        let today = Local::now().date_naive();

        let raw = input.image.clone();
        let decoded = tokio::task::spawn_blocking(move || annotate::decode(&raw))
            .await
            .map_err(RecognitionError::Join)?
            .map_err(RecognitionError::Decode)?;
        let decoded = Arc::new(decoded);

        let regions = self
            .deps
            .faces
            .detect(&input.image)
            .await
            .map_err(RecognitionError::Detection)?;

        if regions.is_empty() {
            let summary = JobSummary {
                note: Some(NO_FACES_NOTE.to_string()),
                ..JobSummary::default()
            };
            self.commit(job_id, JobUpdate::completed(Vec::new(), summary.clone()))?;
            return Ok(summary);
        }

        let roster = match input.metadata.course_id.as_deref() {
            Some(course_id) => {
                let students = self
                    .deps
                    .roster
                    .enrolled(course_id)
                    .await
                    .map_err(RecognitionError::Roster)?
                    .ok_or_else(|| RecognitionError::RosterNotFound(course_id.to_string()))?;
                Some(Roster {
                    course_id: course_id.to_string(),
                    students,
                })
            }
            None => None,
        };

        tracing::info!(
            job_id = %job_id,
            faces = regions.len(),
            enrolled = ?roster.as_ref().map(|r| r.students.len()),
            "Faces detected"
        );

        let ctx = FaceContext {
            job_id,
            image: &input.image,
            decoded: &decoded,
            roster: roster.as_ref(),
            metadata: &input.metadata,
            today,
        };

        let mut results: Vec<FaceResult> = Vec::with_capacity(regions.len());
        let mut seen: HashSet<String> = HashSet::new();
        let mut labels: Vec<FaceLabel> = Vec::with_capacity(regions.len());

        for (sequence, region) in regions.iter().enumerate() {
            match self.recognize_face(&ctx, sequence, region).await {
                Ok(result) => {
                    metrics::counter!("recognition_faces_total", "outcome" => outcome_label(result.outcome))
                        .increment(1);
                    if let Some(identity) = &result.identity {
                        if matches!(result.outcome, FaceOutcome::Present | FaceOutcome::Identified) {
                            seen.insert(identity.student_id.clone());
                        }
                    }
                    labels.push(FaceLabel {
                        region: *region,
                        text: result.display_name.clone(),
                        matched: result.identity.is_some(),
                    });
                    results.push(result);
                    self.commit(job_id, JobUpdate::progress(results.clone()))?;
                }
                Err(e) if e.is_face_local() => {
                    metrics::counter!("recognition_faces_total", "outcome" => "skipped").increment(1);
                    tracing::warn!(job_id = %job_id, sequence, error = %e, "Skipping face");
                    labels.push(FaceLabel {
                        region: *region,
                        text: UNKNOWN_NAME.to_string(),
                        matched: false,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        let absent_count = match &roster {
            Some(roster) => self.mark_absentees(&ctx, roster, &seen).await?,
            None => 0,
        };

        let annotated = tokio::task::spawn_blocking(move || annotate::render_annotated(&decoded, &labels))
            .await
            .map_err(RecognitionError::Join)?
            .map_err(RecognitionError::Render)?;

        let summary = JobSummary {
            total_faces: regions.len(),
            present_count: seen.len(),
            absent_count,
            note: None,
            annotated_image: Some(annotated),
        };
        self.commit(job_id, JobUpdate::completed(results, summary.clone()))?;
        Ok(summary)
    }

    async fn recognize_face(
        &self,
        ctx: &FaceContext<'_>,
        sequence: usize,
        region: &FaceRegion,
    ) -> Result<FaceResult, RecognitionError> {
        let encoding = self
            .deps
            .faces
            .encode(ctx.image, region)
            .await
            .map_err(RecognitionError::Encoding)?;

        let candidate = self
            .deps
            .matcher
            .best_match(&encoding)
            .await
            .map_err(RecognitionError::Matcher)?
            .filter(|m| m.distance < self.settings.match_threshold);

        // Crop before any ledger write so a skipped face never counts as seen
        let decoded = Arc::clone(ctx.decoded);
        let (face, padding) = (*region, self.settings.crop_padding);
        let cropped_image = tokio::task::spawn_blocking(move || annotate::crop_face(&decoded, &face, padding))
            .await?
            .map_err(RecognitionError::Crop)?;

        let outcome = match (&candidate, ctx.roster) {
            (None, _) => FaceOutcome::Unknown,
            (Some(_), None) => FaceOutcome::Identified,
            (Some(m), Some(roster)) if roster.contains(&m.student_id) => {
                let mark = AttendanceMark {
                    student_id: m.student_id.clone(),
                    course_id: roster.course_id.clone(),
                    date: ctx.today,
                    status: AttendanceStatus::Present,
                    recorded_by: ctx.metadata.recorded_by.clone(),
                    job_id: Some(ctx.job_id),
                };
                let recorded = self
                    .deps
                    .attendance
                    .mark(&mark)
                    .await
                    .map_err(RecognitionError::Attendance)?;
                tracing::debug!(
                    job_id = %ctx.job_id,
                    student_id = %m.student_id,
                    new_record = recorded,
                    "Marked present"
                );
                FaceOutcome::Present
            }
            (Some(m), Some(_)) => {
                tracing::info!(
                    job_id = %ctx.job_id,
                    student_id = %m.student_id,
                    "Recognized student is not enrolled in this course"
                );
                FaceOutcome::NotEnrolled
            }
        };

        let (identity, display_name, distance) = match candidate {
            Some(m) => {
                let name = m.name.clone();
                (
                    Some(IdentityRef {
                        student_id: m.student_id,
                        name: m.name,
                    }),
                    name,
                    Some(m.distance),
                )
            }
            None => (None, UNKNOWN_NAME.to_string(), None),
        };

        Ok(FaceResult {
            sequence,
            identity,
            display_name,
            outcome,
            distance,
            region: *region,
            cropped_image,
            recognized_at: Utc::now(),
        })
    }

    async fn mark_absentees(
        &self,
        ctx: &FaceContext<'_>,
        roster: &Roster,
        seen: &HashSet<String>,
    ) -> Result<usize, RecognitionError> {
        let mut absent = 0;
        for student in roster.students.iter().filter(|s| !seen.contains(&s.student_id)) {
            let mark = AttendanceMark {
                student_id: student.student_id.clone(),
                course_id: roster.course_id.clone(),
                date: ctx.today,
                status: AttendanceStatus::Absent,
                recorded_by: ctx.metadata.recorded_by.clone(),
                job_id: Some(ctx.job_id),
            };
            self.deps
                .attendance
                .mark(&mark)
                .await
                .map_err(RecognitionError::Attendance)?;
            absent += 1;
        }

        tracing::info!(job_id = %ctx.job_id, course_id = %roster.course_id, absent, "Absentees marked");
        Ok(absent)
    }

    fn commit(&self, job_id: Uuid, update: JobUpdate) -> Result<(), Halt> {
        match self.store.update(job_id, update) {
            UpdateOutcome::Applied => Ok(()),
            UpdateOutcome::NotFound | UpdateOutcome::Finalized => Err(Halt::Gone),
        }
    }
}

fn outcome_label(outcome: FaceOutcome) -> &'static str {
    match outcome {
        FaceOutcome::Present => "present",
        FaceOutcome::Identified => "identified",
        FaceOutcome::NotEnrolled => "not_enrolled",
        FaceOutcome::Unknown => "unknown",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("Invalid job metadata: {0}")]
    Metadata(garde::Report),

    #[error("Image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Face detection failed: {0}")]
    Detection(#[source] FaceServiceError),

    #[error("Face encoding failed: {0}")]
    Encoding(#[source] FaceServiceError),

    #[error("Face could not be cropped: {0}")]
    Crop(#[source] CropError),

    #[error("Identity index unavailable: {0}")]
    Matcher(#[source] MatcherError),

    #[error("Roster for course {0} not found")]
    RosterNotFound(String),

    #[error("Roster lookup failed: {0}")]
    Roster(#[source] LedgerError),

    #[error("Attendance recording failed: {0}")]
    Attendance(#[source] LedgerError),

    #[error("Failed to render annotated image: {0}")]
    Render(#[source] image::ImageError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RecognitionError {
    /// Errors confined to a single face; the job skips that face and continues.
    pub fn is_face_local(&self) -> bool {
        matches!(self, RecognitionError::Encoding(_) | RecognitionError::Crop(_))
    }
}
