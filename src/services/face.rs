use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::models::job::FaceRegion;

/// Face detection and encoding backend.
#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    /// Locate faces in a raw image, in detection order.
    async fn detect(&self, image: &Bytes) -> Result<Vec<FaceRegion>, FaceServiceError>;

    /// Produce the encoding vector for one detected face.
    async fn encode(&self, image: &Bytes, face: &FaceRegion) -> Result<Vec<f32>, FaceServiceError>;
}

/// HTTP client for the face detection/encoding service.
pub struct FaceServiceClient {
    http: Client,
    base_url: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct DetectResponse {
    faces: Vec<FaceRegion>,
}

#[derive(Deserialize)]
struct EncodeResponse {
    encoding: Vec<f32>,
}

impl FaceServiceClient {
    pub fn new(base_url: &str, dimension: usize) -> Result<Self, FaceServiceError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(FaceServiceError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension,
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, FaceServiceError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(FaceServiceError::Service {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl FaceAnalyzer for FaceServiceClient {
    async fn detect(&self, image: &Bytes) -> Result<Vec<FaceRegion>, FaceServiceError> {
        let body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image),
        });
        let detected: DetectResponse = self.post("/detect", body).await?;

        tracing::debug!(faces = detected.faces.len(), "Face detection complete");
        Ok(detected.faces)
    }

    async fn encode(&self, image: &Bytes, face: &FaceRegion) -> Result<Vec<f32>, FaceServiceError> {
        let body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image),
            "face": face,
        });
        let encoded: EncodeResponse = self.post("/encode", body).await?;

        check_dimension(encoded.encoding, self.dimension)
    }
}

fn check_dimension(encoding: Vec<f32>, expected: usize) -> Result<Vec<f32>, FaceServiceError> {
    if encoding.is_empty() {
        return Err(FaceServiceError::NoEncoding);
    }
    if encoding.len() != expected {
        return Err(FaceServiceError::Dimension {
            expected,
            actual: encoding.len(),
        });
    }
    Ok(encoding)
}

#[derive(Debug, thiserror::Error)]
pub enum FaceServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Face service returned {status}: {detail}")]
    Service { status: u16, detail: String },

    #[error("Encoding has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("No encoding could be produced for this face")]
    NoEncoding,
}
