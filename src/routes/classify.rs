use axum::extract::State;
use axum::Json;
use garde::Validate;
use tracing::warn;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::generation::{ClassifyRequest, ClassifyResponse};

const NO_ANIMALS_DETECTED: &str = "No animals detected in the image";

/// POST /api/v1/classify: name the animals in an image.
///
/// Provider failures are reported in the body, not as an HTTP error.
pub async fn classify_image(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    request
        .validate()
        .map_err(|report| ApiError::BadRequest(report.to_string().trim().to_string()))?;

    let response = match state.vision.classify(&request.img_url).await {
        Ok(animals) if animals.is_empty() => ClassifyResponse {
            animals,
            error: Some(NO_ANIMALS_DETECTED.to_string()),
        },
        Ok(animals) => ClassifyResponse { animals, error: None },
        Err(e) => {
            warn!(error = %e, "Image classification failed");
            ClassifyResponse {
                animals: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    };

    Ok(Json(response))
}
