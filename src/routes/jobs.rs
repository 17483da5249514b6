use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{JobMetadata, JobStatus};
use crate::models::recognition::{ErrorResponse, JobStatusResponse, SubmitJobResponse};

/// POST /api/v1/attendance/jobs: Upload a class photo for recognition.
///
/// Responds as soon as the job exists; recognition runs in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitJobResponse>), StatusCode> {
    let mut image_data = None;
    let mut metadata = JobMetadata::default();

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "image" {
            let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            // Format and metadata problems surface as a failed job when polled
            if !data.is_empty() {
                image_data = Some(data);
            }
            continue;
        }

        let value = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        match name.as_str() {
            "course_id" => metadata.course_id = Some(value),
            "recorded_by" => metadata.recorded_by = Some(value),
            _ => {
                metadata.extra.insert(name, value);
            }
        }
    }

    let image_data = image_data.ok_or(StatusCode::BAD_REQUEST)?;

    let job_id = state.worker.submit(image_data, metadata);
    tracing::info!(job_id = %job_id, "Recognition job submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Processing,
            message: "Image accepted for recognition".to_string(),
        }),
    ))
}

/// GET /api/v1/attendance/jobs/{job_id}: Poll a recognition job.
///
/// Unknown, evicted and malformed ids all answer 404.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let not_found = || (StatusCode::NOT_FOUND, Json(ErrorResponse::new("job not found")));

    let job_id = Uuid::parse_str(&job_id).map_err(|_| not_found())?;
    let job = state.jobs.get(job_id).ok_or_else(not_found)?;

    Ok(Json(JobStatusResponse::from(job)))
}
