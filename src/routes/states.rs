use crate::{entity::ImageProcessingEntity, routes::RouteError, server::SharedState};
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub camera_entity: String,
    /// `None` until the entity processed its first image.
    pub state: Option<String>,
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn of(entity: &dyn ImageProcessingEntity) -> Self {
        Self {
            entity_id: entity.entity_id().to_string(),
            camera_entity: entity.camera_entity().to_string(),
            state: entity.state(),
            attributes: entity.state_attributes(),
        }
    }
}

pub async fn list_states(State(state): State<SharedState>) -> Json<Vec<EntityState>> {
    state.metrics.record_request("states");
    Json(
        state
            .targets
            .iter()
            .map(|target| EntityState::of(target.entity.as_ref()))
            .collect(),
    )
}

pub async fn get_state(
    State(state): State<SharedState>,
    Path(entity_id): Path<String>,
) -> Result<Json<EntityState>, RouteError> {
    state.metrics.record_request("state");
    let target = state.target(&entity_id)?;
    Ok(Json(EntityState::of(target.entity.as_ref())))
}
