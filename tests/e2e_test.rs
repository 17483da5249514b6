//! End-to-end tests against a running server
//!
//! These tests require:
//! 1. PostgreSQL database running (with migrations applied)
//! 2. Face service reachable at FACE_SERVICE_URL
//! 3. Pinecone index configured
//! 4. API server running on configured port
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:3000)

mod helpers;

use helpers::sample_png;
use serde_json::Value;
use std::time::Duration;

/// Get base URL from env or default to localhost
fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

async fn submit(client: &reqwest::Client, base_url: &str, course_id: Option<&str>) -> String {
    let part = reqwest::multipart::Part::bytes(sample_png(320, 240).to_vec())
        .file_name("class.png")
        .mime_str("image/png")
        .unwrap();
    let mut form = reqwest::multipart::Form::new()
        .part("image", part)
        .text("recorded_by", "e2e");
    if let Some(course_id) = course_id {
        form = form.text("course_id", course_id.to_string());
    }

    let response = client
        .post(format!("{}/api/v1/attendance/jobs", base_url))
        .multipart(form)
        .send()
        .await
        .expect("Submit failed");
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let body: Value = response.json().await.expect("Invalid submit response");
    body["job_id"].as_str().expect("job_id missing").to_string()
}

async fn poll_until_done(client: &reqwest::Client, base_url: &str, job_id: &str) -> Value {
    for attempt in 0..60 {
        let response = client
            .get(format!("{}/api/v1/attendance/jobs/{}", base_url, job_id))
            .send()
            .await
            .expect("Poll failed");
        assert!(response.status().is_success(), "Poll returned {}", response.status());

        let body: Value = response.json().await.expect("Invalid poll response");
        if body["status"] != "processing" {
            println!("Job {} finished after {} polls", job_id, attempt + 1);
            return body;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("Job {} did not finish within 30s", job_id);
}

#[tokio::test]
#[ignore] // Requires running API server and all infrastructure
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );
}

#[tokio::test]
#[ignore] // Requires running API server and all infrastructure
async fn test_e2e_open_set_job_completes() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let job_id = submit(&client, &base_url, None).await;
    let body = poll_until_done(&client, &base_url, &job_id).await;

    // A flat grey frame has no faces
    assert_eq!(body["status"], "completed");
    assert_eq!(body["total_results"], 0);
    assert_eq!(body["summary"]["note"], "no faces detected");
}

#[tokio::test]
#[ignore] // Requires running API server and all infrastructure
async fn test_e2e_unknown_course_fails_job() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let course = format!("missing-{}", uuid::Uuid::new_v4().simple());
    let job_id = submit(&client, &base_url, Some(&course)).await;
    let body = poll_until_done(&client, &base_url, &job_id).await;

    // Zero faces completes before the roster is consulted
    assert!(body["status"] == "completed" || body["status"] == "error");
}

#[tokio::test]
#[ignore] // Requires running API server
async fn test_e2e_unknown_job_is_not_found() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!(
            "{}/api/v1/attendance/jobs/{}",
            base_url,
            uuid::Uuid::new_v4()
        ))
        .send()
        .await
        .expect("Poll failed");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
