use crate::{
    poller::{process, scan, ScanError},
    routes::{states::EntityState, RouteError},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
};
use tracing::instrument;

/// Pulls a fresh camera image and processes it right away.
///
/// Processing failures are part of the returned state, only camera
/// failures are reported as errors.
#[instrument(skip(state))]
pub async fn scan_entity(
    State(state): State<SharedState>,
    Path(entity_id): Path<String>,
) -> Result<Json<EntityState>, RouteError> {
    state.metrics.record_request("scan");
    let target = state.target(&entity_id)?;

    match scan(target, &state.metrics).await {
        Ok(()) | Err(ScanError::Processing(_)) => {}
        Err(ScanError::Camera(err)) => return Err(RouteError::Camera(err)),
    }

    Ok(Json(EntityState::of(target.entity.as_ref())))
}

/// Processes the request body as the image, bypassing the camera.
#[instrument(skip(state, image_data), fields(image_len = image_data.len()))]
pub async fn process_image(
    State(state): State<SharedState>,
    Path(entity_id): Path<String>,
    image_data: Bytes,
) -> Result<Json<EntityState>, RouteError> {
    state.metrics.record_request("process_image");
    let target = state.target(&entity_id)?;

    if image_data.is_empty() {
        return Err(RouteError::EmptyBody);
    }

    if let Err(err) = process(target, &image_data, &state.metrics).await {
        tracing::warn!(entity_id = %entity_id, "Image processing failed: {}", err);
    }

    Ok(Json(EntityState::of(target.entity.as_ref())))
}
