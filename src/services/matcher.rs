use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::models::attendance::IdentityMatch;

/// Nearest-neighbour lookup over known face encodings.
///
/// Implementations return the single closest identity and its distance;
/// thresholding is left to the caller.
#[async_trait]
pub trait IdentityMatcher: Send + Sync {
    async fn best_match(&self, encoding: &[f32]) -> Result<Option<IdentityMatch>, MatcherError>;
}

/// Client for a Pinecone index of student face encodings (euclidean metric).
pub struct PineconeMatcher {
    http: Client,
    index_host: String,
    api_key: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<MatchMetadata>,
}

#[derive(Deserialize)]
struct MatchMetadata {
    name: Option<String>,
}

impl PineconeMatcher {
    pub fn new(index_host: &str, api_key: &str) -> Result<Self, MatcherError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(MatcherError::Http)?;

        let host = index_host.trim_end_matches('/');
        let index_host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };

        Ok(Self {
            http,
            index_host,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl IdentityMatcher for PineconeMatcher {
    async fn best_match(&self, encoding: &[f32]) -> Result<Option<IdentityMatch>, MatcherError> {
        let request_body = serde_json::json!({
            "vector": encoding,
            "topK": 1,
            "includeMetadata": true,
        });

        let response = self
            .http
            .post(format!("{}/query", self.index_host))
            .header("Api-Key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(MatcherError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(MatcherError::Index(format!("query returned {status}")));
        }

        let parsed: QueryResponse = response.json().await.map_err(MatcherError::Http)?;
        Ok(into_identity(parsed))
    }
}

fn into_identity(response: QueryResponse) -> Option<IdentityMatch> {
    response.matches.into_iter().next().map(|m| IdentityMatch {
        name: m
            .metadata
            .and_then(|meta| meta.name)
            .unwrap_or_else(|| m.id.clone()),
        student_id: m.id,
        distance: m.score,
    })
}

/// Brute-force euclidean index held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMatcher {
    known: Vec<KnownFace>,
}

#[derive(Debug, Clone)]
struct KnownFace {
    student_id: String,
    name: String,
    encoding: Vec<f32>,
}

impl InMemoryMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_face(mut self, student_id: &str, name: &str, encoding: Vec<f32>) -> Self {
        self.known.push(KnownFace {
            student_id: student_id.to_string(),
            name: name.to_string(),
            encoding,
        });
        self
    }
}

#[async_trait]
impl IdentityMatcher for InMemoryMatcher {
    async fn best_match(&self, encoding: &[f32]) -> Result<Option<IdentityMatch>, MatcherError> {
        let best = self
            .known
            .iter()
            .filter(|k| k.encoding.len() == encoding.len())
            .map(|k| (k, euclidean(&k.encoding, encoding)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        Ok(best.map(|(k, distance)| IdentityMatch {
            student_id: k.student_id.clone(),
            name: k.name.clone(),
            distance,
        }))
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Identity index error: {0}")]
    Index(String),
}
