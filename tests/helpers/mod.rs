//! Shared fakes and utilities for pipeline and API tests
#![allow(dead_code)]

use async_trait::async_trait;
use attendify_recognition::models::attendance::{AttendanceMark, AttendanceStatus};
use attendify_recognition::models::job::{FaceRegion, Job, JobStatus};
use attendify_recognition::services::attendance::{
    AttendanceRecorder, InMemoryAttendance, LedgerError, RosterDirectory, StaticRoster,
};
use attendify_recognition::services::face::{FaceAnalyzer, FaceServiceError};
use attendify_recognition::services::job_store::{JobStore, RetentionPolicy};
use attendify_recognition::services::matcher::InMemoryMatcher;
use attendify_recognition::services::worker::{Collaborators, RecognitionWorker, WorkerSettings};
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub const DIMENSION: usize = 128;

/// A face vector at euclidean distance `head` from the zero vector.
pub fn encoding(head: f32) -> Vec<f32> {
    let mut v = vec![0.0; DIMENSION];
    v[0] = head;
    v
}

/// Encode a plain grey PNG of the given size.
pub fn sample_png(width: u32, height: u32) -> Bytes {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 90, 90])));
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode png");
    Bytes::from(buf)
}

pub fn region(left: u32, top: u32, size: u32) -> FaceRegion {
    FaceRegion {
        top,
        right: left + size,
        bottom: top + size,
        left,
    }
}

/// A detected face and the encoding the fake service returns for it.
/// `None` makes encoding fail for that face.
#[derive(Clone)]
pub struct ScriptedFace {
    pub region: FaceRegion,
    pub encoding: Option<Vec<f32>>,
}

/// Face service fake that replays a fixed detection result.
#[derive(Default)]
pub struct ScriptedFaces {
    faces: Vec<ScriptedFace>,
    gate: Option<Arc<Semaphore>>,
    fail_detection: bool,
}

impl ScriptedFaces {
    pub fn new(faces: Vec<ScriptedFace>) -> Self {
        Self {
            faces,
            ..Self::default()
        }
    }

    /// Each `encode` call consumes one permit from `gate` before answering.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing_detection() -> Self {
        Self {
            fail_detection: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl FaceAnalyzer for ScriptedFaces {
    async fn detect(&self, _image: &Bytes) -> Result<Vec<FaceRegion>, FaceServiceError> {
        if self.fail_detection {
            return Err(FaceServiceError::Service {
                status: 503,
                detail: "detector offline".to_string(),
            });
        }
        Ok(self.faces.iter().map(|f| f.region).collect())
    }

    async fn encode(&self, _image: &Bytes, face: &FaceRegion) -> Result<Vec<f32>, FaceServiceError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        self.faces
            .iter()
            .find(|f| f.region == *face)
            .and_then(|f| f.encoding.clone())
            .ok_or(FaceServiceError::NoEncoding)
    }
}

/// Ledger wrapper that records every call it receives.
#[derive(Default)]
pub struct CountingLedger {
    pub inner: InMemoryAttendance,
    pub calls: Mutex<Vec<AttendanceMark>>,
}

impl CountingLedger {
    pub fn calls_for(&self, student_id: &str, status: AttendanceStatus) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|m| m.student_id == student_id && m.status == status)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl AttendanceRecorder for CountingLedger {
    async fn mark(&self, mark: &AttendanceMark) -> Result<bool, LedgerError> {
        self.calls.lock().push(mark.clone());
        self.inner.mark(mark).await
    }
}

/// Ledger that is always down.
pub struct OfflineLedger;

#[async_trait]
impl AttendanceRecorder for OfflineLedger {
    async fn mark(&self, _mark: &AttendanceMark) -> Result<bool, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".to_string()))
    }
}

pub fn roster() -> StaticRoster {
    StaticRoster::new().with_course("CS101", &[("S1", "Asha"), ("S2", "Ben"), ("S3", "Chen")])
}

pub fn matcher() -> InMemoryMatcher {
    InMemoryMatcher::new()
        .with_face("S1", "Asha", encoding(0.0))
        .with_face("S2", "Ben", encoding(5.0))
        .with_face("S3", "Chen", encoding(10.0))
}

pub struct Harness {
    pub store: Arc<JobStore>,
    pub worker: Arc<RecognitionWorker>,
    pub ledger: Arc<CountingLedger>,
}

pub fn harness(faces: ScriptedFaces) -> Harness {
    harness_with(faces, Arc::new(CountingLedger::default()), RetentionPolicy::default())
}

pub fn harness_with(
    faces: ScriptedFaces,
    ledger: Arc<CountingLedger>,
    policy: RetentionPolicy,
) -> Harness {
    let store = Arc::new(JobStore::new(policy));
    let deps = Collaborators {
        faces: Arc::new(faces),
        matcher: Arc::new(matcher()),
        attendance: ledger.clone(),
        roster: Arc::new(roster()) as Arc<dyn RosterDirectory>,
    };
    let worker = Arc::new(RecognitionWorker::new(
        Arc::clone(&store),
        deps,
        WorkerSettings::default(),
    ));
    Harness { store, worker, ledger }
}

/// Poll the store until `predicate` holds, or panic after two seconds.
pub async fn wait_for(store: &JobStore, id: Uuid, predicate: impl Fn(&Job) -> bool) -> Job {
    for _ in 0..200 {
        if let Some(job) = store.get(id) {
            if predicate(&job) {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached the expected state");
}

pub fn is_terminal(job: &Job) -> bool {
    job.status != JobStatus::Processing
}
