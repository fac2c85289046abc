use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use strum::Display;

use crate::db::PoolSettings;
use crate::models::generation::JobLimits;

/// Which image generation backend the worker calls.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageProviderKind {
    Mock,
    OpenRouter,
}

/// Which vision backend answers classification requests.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VisionProviderKind {
    Mock,
    OpenRouter,
    OpenAi,
}

/// Where generated images end up.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageBackend {
    /// Keep provider output as returned.
    None,
    /// Upload to an S3-compatible bucket (MinIO, R2, S3).
    S3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Ignored by the standalone worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default)]
    pub db_min_connections: u32,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Connections older than this are recycled.
    #[serde(default = "default_db_max_lifetime_secs")]
    pub db_max_lifetime_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_min_images")]
    pub min_images_per_job: i32,

    #[serde(default = "default_max_images")]
    pub max_images_per_job: i32,

    /// Run the poll loop inside the API server process.
    #[serde(default = "default_true")]
    pub worker_enabled: bool,

    #[serde(default = "default_poll_interval_secs")]
    pub worker_poll_interval_secs: f64,

    /// Upper bound on jobs claimed per poll iteration. Unbounded when unset.
    #[serde(default)]
    pub worker_claim_limit: Option<i64>,

    #[serde(default = "default_shutdown_grace_secs")]
    pub worker_shutdown_grace_secs: u64,

    /// Prometheus scrape address of the standalone worker binary.
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    #[serde(default = "default_image_provider")]
    pub image_provider: ImageProviderKind,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,

    /// Simulated latency per image for the mock provider.
    #[serde(default = "default_image_provider_delay_secs")]
    pub image_provider_delay_secs: f64,

    #[serde(default = "default_vision_provider")]
    pub vision_provider: VisionProviderKind,

    /// Empty means the provider default.
    #[serde(default)]
    pub vision_model: String,

    #[serde(default = "default_vision_timeout_secs")]
    pub vision_timeout_secs: u64,

    #[serde(default)]
    pub openrouter_api_key: String,

    #[serde(default)]
    pub openrouter_site_url: String,

    #[serde(default)]
    pub openrouter_site_name: String,

    #[serde(default)]
    pub openai_api_key: String,

    #[serde(default = "default_storage_backend")]
    pub storage_backend: StorageBackend,

    /// S3 endpoint URL (e.g., "http://minio:9000")
    #[serde(default)]
    pub s3_endpoint: String,

    #[serde(default = "default_s3_bucket")]
    pub s3_bucket: String,

    #[serde(default)]
    pub s3_access_key: String,

    #[serde(default)]
    pub s3_secret_key: String,

    /// Public base URL that serves bucket objects
    #[serde(default)]
    pub s3_public_url: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_db_acquire_timeout_secs() -> u64 {
    10
}

fn default_db_max_lifetime_secs() -> u64 {
    3600
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_min_images() -> i32 {
    1
}

fn default_max_images() -> i32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_secs() -> f64 {
    1.0
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_image_provider() -> ImageProviderKind {
    ImageProviderKind::Mock
}

fn default_image_model() -> String {
    "sourceful/riverflow-v2-max-preview".to_string()
}

fn default_image_timeout_secs() -> u64 {
    60
}

fn default_image_provider_delay_secs() -> f64 {
    2.0
}

fn default_vision_provider() -> VisionProviderKind {
    VisionProviderKind::Mock
}

fn default_vision_timeout_secs() -> u64 {
    30
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::None
}

fn default_s3_bucket() -> String {
    "generated-images".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later, at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_images_per_job < 1 || self.min_images_per_job > self.max_images_per_job {
            return Err(ConfigError::Invalid(format!(
                "image bounds must satisfy 1 <= MIN_IMAGES_PER_JOB ({}) <= MAX_IMAGES_PER_JOB ({})",
                self.min_images_per_job, self.max_images_per_job
            )));
        }
        if !self.worker_poll_interval_secs.is_finite() || self.worker_poll_interval_secs <= 0.0 {
            return Err(ConfigError::Invalid(
                "WORKER_POLL_INTERVAL_SECS must be a positive number".to_string(),
            ));
        }
        if !self.image_provider_delay_secs.is_finite() || self.image_provider_delay_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "IMAGE_PROVIDER_DELAY_SECS must not be negative".to_string(),
            ));
        }
        if matches!(self.worker_claim_limit, Some(limit) if limit < 1) {
            return Err(ConfigError::Invalid(
                "WORKER_CLAIM_LIMIT must be at least 1 when set".to_string(),
            ));
        }
        if self.worker_metrics_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "WORKER_METRICS_ADDR must be a socket address, got {:?}",
                self.worker_metrics_addr
            )));
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::Invalid(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        if self.image_provider == ImageProviderKind::OpenRouter && self.openrouter_api_key.is_empty() {
            return Err(ConfigError::Missing("OPENROUTER_API_KEY"));
        }
        match self.vision_provider {
            VisionProviderKind::OpenRouter if self.openrouter_api_key.is_empty() => {
                return Err(ConfigError::Missing("OPENROUTER_API_KEY"));
            }
            VisionProviderKind::OpenAi if self.openai_api_key.is_empty() => {
                return Err(ConfigError::Missing("OPENAI_API_KEY"));
            }
            _ => {}
        }
        if self.storage_backend == StorageBackend::S3 {
            for (name, value) in [
                ("S3_ENDPOINT", &self.s3_endpoint),
                ("S3_ACCESS_KEY", &self.s3_access_key),
                ("S3_SECRET_KEY", &self.s3_secret_key),
                ("S3_PUBLIC_URL", &self.s3_public_url),
            ] {
                if value.is_empty() {
                    return Err(ConfigError::Missing(name));
                }
            }
        }
        Ok(())
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.db_max_connections,
            min_connections: self.db_min_connections,
            acquire_timeout: Duration::from_secs(self.db_acquire_timeout_secs),
            max_lifetime: Duration::from_secs(self.db_max_lifetime_secs),
            idle_timeout: Duration::from_secs(self.db_idle_timeout_secs),
        }
    }

    pub fn job_limits(&self) -> JobLimits {
        JobLimits {
            min_images: self.min_images_per_job,
            max_images: self.max_images_per_job,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.worker_poll_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.worker_shutdown_grace_secs)
    }

    pub fn worker_metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.worker_metrics_addr
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("WORKER_METRICS_ADDR: {e}")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
