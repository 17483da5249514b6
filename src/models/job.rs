use bytes::Bytes;
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle state of a recognition job. Only moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Caller-supplied context attached to a job at submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, PartialEq)]
pub struct JobMetadata {
    /// Course whose roster the faces are checked against. Absent means open-set mode.
    #[garde(length(min = 1, max = 64))]
    pub course_id: Option<String>,

    /// Faculty or operator who took the picture.
    #[garde(length(min = 1, max = 128))]
    pub recorded_by: Option<String>,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// How a single detected face was resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaceOutcome {
    /// Matched an enrolled student and marked present.
    Present,
    /// Matched a known identity; no roster in effect.
    Identified,
    /// Matched a known identity that is not on the course roster.
    NotEnrolled,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityRef {
    pub student_id: String,
    pub name: String,
}

/// Pixel bounds of a detected face, in (top, right, bottom, left) order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Per-face outcome appended to a job as the worker progresses.
#[derive(Debug, Clone, Serialize)]
pub struct FaceResult {
    pub sequence: usize,
    pub identity: Option<IdentityRef>,
    pub display_name: String,
    pub outcome: FaceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub region: FaceRegion,
    #[serde(serialize_with = "base64_bytes::serialize")]
    pub cropped_image: Bytes,
    pub recognized_at: DateTime<Utc>,
}

/// Aggregate outcome attached when a job completes.
#[derive(Debug, Clone, Serialize, Default)]
pub struct JobSummary {
    pub total_faces: usize,
    pub present_count: usize,
    pub absent_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(
        serialize_with = "base64_bytes::serialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub annotated_image: Option<Bytes>,
}

/// A recognition job as held by the job store.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub image: Bytes,
    pub metadata: JobMetadata,
    pub status: JobStatus,
    pub results: Vec<FaceResult>,
    pub summary: Option<JobSummary>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub view_count: u32,
    /// Set once the worker has read the input; metadata is frozen from then on.
    pub started: bool,
}

impl Job {
    pub(crate) fn new(id: Uuid, image: Bytes, metadata: JobMetadata, now: DateTime<Utc>) -> Self {
        Self {
            id,
            image,
            metadata,
            status: JobStatus::Processing,
            results: Vec::new(),
            summary: None,
            error_message: None,
            created_at: now,
            last_accessed_at: now,
            view_count: 0,
            started: false,
        }
    }
}

/// Fields a job update may overwrite. `created_at` is deliberately absent.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    /// Only honored before the worker has started on the job.
    pub metadata: Option<JobMetadata>,
    /// Replaces the whole result sequence.
    pub results: Option<Vec<FaceResult>>,
    pub summary: Option<JobSummary>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn progress(results: Vec<FaceResult>) -> Self {
        Self {
            results: Some(results),
            ..Self::default()
        }
    }

    pub fn completed(results: Vec<FaceResult>, summary: JobSummary) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            results: Some(results),
            summary: Some(summary),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// What the worker needs to start processing.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub image: Bytes,
    pub metadata: JobMetadata,
}

mod base64_bytes {
    use base64::Engine;
    use bytes::Bytes;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn serialize_opt<S: Serializer>(
        bytes: &Option<Bytes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serialize(b, serializer),
            None => serializer.serialize_none(),
        }
    }
}
