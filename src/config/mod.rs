use serde::Deserialize;
use std::time::Duration;

use crate::services::job_store::RetentionPolicy;
use crate::services::worker::WorkerSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is out of range: {value}")]
    OutOfRange { name: &'static str, value: u64 },
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string (attendance ledger and rosters)
    pub database_url: String,

    /// Base URL of the face detection/encoding service
    pub face_service_url: String,

    /// Pinecone index data-plane host (e.g., "https://faces-abc123.svc.pinecone.io")
    pub pinecone_index_host: String,

    /// Pinecone API key
    pub pinecone_api_key: String,

    /// A match is accepted only when its distance is strictly below this value
    #[serde(default = "default_match_threshold")]
    pub face_match_threshold: f32,

    /// Expected length of a face encoding vector
    #[serde(default = "default_encoding_dimension")]
    pub face_encoding_dimension: usize,

    /// Padding in pixels added around each cropped face
    #[serde(default = "default_crop_padding")]
    pub crop_padding: u32,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Idle time after which a still-processing job is considered abandoned
    #[serde(default = "default_pending_job_ttl_secs")]
    pub pending_job_ttl_secs: u64,

    /// Idle time after which a completed or failed job is evicted. 0 disables.
    #[serde(default = "default_finished_job_ttl_secs")]
    pub finished_job_ttl_secs: u64,

    /// Number of polls of a completed job before it is evicted
    #[serde(default = "default_max_view_count")]
    pub max_view_count: u32,

    /// Upper bound on concurrently running workers. Unset means one task per job.
    #[serde(default)]
    pub max_concurrent_workers: Option<usize>,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_match_threshold() -> f32 {
    0.25
}

fn default_encoding_dimension() -> usize {
    128
}

fn default_crop_padding() -> u32 {
    20
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_pending_job_ttl_secs() -> u64 {
    900
}

fn default_finished_job_ttl_secs() -> u64 {
    3600
}

fn default_max_view_count() -> u32 {
    3
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retention_policy(&self) -> Result<RetentionPolicy, ConfigError> {
        let finished_ttl = match self.finished_job_ttl_secs {
            0 => None,
            secs => Some(ttl("FINISHED_JOB_TTL_SECS", secs)?),
        };
        Ok(RetentionPolicy {
            max_view_count: self.max_view_count.max(1),
            pending_ttl: ttl("PENDING_JOB_TTL_SECS", self.pending_job_ttl_secs)?,
            finished_ttl,
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            match_threshold: self.face_match_threshold,
            crop_padding: self.crop_padding,
            max_concurrent: self.max_concurrent_workers.filter(|n| *n > 0),
        }
    }
}

fn ttl(name: &'static str, secs: u64) -> Result<chrono::Duration, ConfigError> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or(ConfigError::OutOfRange { name, value: secs })
}
