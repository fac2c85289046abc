use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::generation::{GenerationRequest, GenerationResponse, JobDetailResponse, ListQuery};

/// POST /api/v1/generations: queue a batch generation job.
pub async fn submit_generation(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<GenerationResponse>), ApiError> {
    let job = state.jobs.submit(request.num_images).await?;
    Ok((StatusCode::ACCEPTED, Json(GenerationResponse::from(&job))))
}

/// GET /api/v1/generations/{job_id}
pub async fn get_generation(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobDetailResponse>, ApiError> {
    state
        .jobs
        .get_job(job_id)
        .await?
        .map(|job| Json(JobDetailResponse::from(job)))
        .ok_or_else(|| ApiError::NotFound(format!("Job {job_id} not found")))
}

/// GET /api/v1/generations: newest first.
pub async fn list_generations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobDetailResponse>>, ApiError> {
    let jobs = state.jobs.list_jobs(query.limit, query.offset).await?;
    Ok(Json(jobs.into_iter().map(JobDetailResponse::from).collect()))
}
