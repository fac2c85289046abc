use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};

/// Configured bounds on how many images a single job may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLimits {
    pub min_images: i32,
    pub max_images: i32,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            min_images: 1,
            max_images: 10,
        }
    }
}

/// Request to generate a batch of images.
#[derive(Debug, Clone, Deserialize, Validate)]
#[garde(context(JobLimits))]
pub struct GenerationRequest {
    #[serde(rename = "numImages")]
    #[garde(custom(within_job_limits))]
    pub num_images: i64,
}

fn within_job_limits(value: &i64, limits: &JobLimits) -> garde::Result {
    if *value < i64::from(limits.min_images) || *value > i64::from(limits.max_images) {
        return Err(garde::Error::new(format!(
            "numImages must be between {} and {}",
            limits.min_images, limits.max_images
        )));
    }
    Ok(())
}

/// Response after submitting a generation request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

impl From<&Job> for GenerationResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
        }
    }
}

/// Full job view returned by the status and listing endpoints.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub num_images: i32,
    pub animal: Option<String>,
    pub image_urls: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobDetailResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            num_images: job.num_images,
            animal: job.animal,
            image_urls: job.image_urls,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Paging for the job listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Request to classify the animals in an image.
#[derive(Debug, Deserialize, Validate)]
pub struct ClassifyRequest {
    #[serde(rename = "imgUrl")]
    #[garde(length(min = 1))]
    pub img_url: String,
}

/// Animals found in an image, or why none were.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub animals: Vec<String>,
    pub error: Option<String>,
}
