mod health;
mod metrics;
mod scan;
mod states;

use crate::{camera::CameraError, server::SharedState};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Unknown entity {0}")]
    UnknownEntity(String),
    #[error("Camera error: {0}")]
    Camera(CameraError),
    #[error("Request body must contain an image")]
    EmptyBody,
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let status = match self {
            RouteError::UnknownEntity(_) => StatusCode::NOT_FOUND,
            RouteError::Camera(_) => StatusCode::BAD_GATEWAY,
            RouteError::EmptyBody => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/states", get(states::list_states))
        .route("/states/{entity_id}", get(states::get_state))
        .route("/states/{entity_id}/image", post(scan::process_image))
        .route("/scan/{entity_id}", post(scan::scan_entity))
}
