//! Facebox adapter.
//!
//! Posts a base64 encoded image to `http://{endpoint}/facebox/check` and keeps
//! the outcome of the most recent call as the entity state.

use crate::entity::{
    slugify, split_entity_id, Confidence, FaceProcessor, ImageProcessingEntity, SetupError,
    DOMAIN,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;

pub const CHECK_PATH: &str = "facebox/check";
pub const FAILURE_MARKER: &str = "Request_failed";

#[derive(Error, Debug)]
pub enum FaceboxError {
    #[error("Request to Facebox failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Malformed Facebox response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    #[error("Facebox response is missing `{0}`")]
    MissingField(&'static str),
    #[error("Facebox reported a failure: {}", .0.as_deref().unwrap_or("no reason given"))]
    RemoteFailure(Option<String>),
}

impl FaceboxError {
    pub fn reason(&self) -> FailureReason {
        match self {
            FaceboxError::Transport(_) => FailureReason::Transport,
            FaceboxError::MalformedResponse(_) => FailureReason::MalformedResponse,
            FaceboxError::MissingField(_) => FailureReason::MissingField,
            FaceboxError::RemoteFailure(_) => FailureReason::Remote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Remote,
    Transport,
    MalformedResponse,
    MissingField,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Remote => "remote",
            FailureReason::Transport => "transport",
            FailureReason::MalformedResponse => "malformed_response",
            FailureReason::MissingField => "missing_field",
        }
    }
}

/// Outcome of the last processed image.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Faces { total_faces: u32, faces: Vec<Value> },
    Failed(FailureReason),
}

impl Detection {
    pub fn total_faces(&self) -> Option<u32> {
        match self {
            Detection::Faces { total_faces, .. } => Some(*total_faces),
            Detection::Failed(_) => None,
        }
    }

    pub fn faces(&self) -> &[Value] {
        match self {
            Detection::Faces { faces, .. } => faces,
            Detection::Failed(_) => &[],
        }
    }

    pub fn state(&self) -> String {
        match self {
            Detection::Faces { total_faces, .. } => total_faces.to_string(),
            Detection::Failed(_) => FAILURE_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    detection: Option<Detection>,
    response_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckRequest {
    pub base64: String,
}

pub fn encode_image(image: &[u8]) -> CheckRequest {
    CheckRequest {
        base64: STANDARD.encode(image),
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    success: Option<bool>,
    #[serde(rename = "facesCount")]
    faces_count: Option<u32>,
    faces: Option<Vec<Value>>,
    error: Option<String>,
}

fn parse_check_response(body: &str) -> Result<(u32, Vec<Value>), FaceboxError> {
    let response: CheckResponse = serde_json::from_str(body)?;
    match response.success {
        None => Err(FaceboxError::MissingField("success")),
        Some(false) => Err(FaceboxError::RemoteFailure(response.error)),
        Some(true) => {
            let faces_count = response
                .faces_count
                .ok_or(FaceboxError::MissingField("facesCount"))?;
            let faces = response.faces.ok_or(FaceboxError::MissingField("faces"))?;
            Ok((faces_count, faces))
        }
    }
}

fn round_to_tenth(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 10.0).round() / 10.0
}

/// Validated settings for one Facebox entity.
#[derive(Debug, Clone)]
pub struct FaceboxSettings {
    pub name: Option<String>,
    pub endpoint: String,
    pub camera_entity: String,
    pub confidence: f64,
}

#[derive(Debug)]
pub struct Facebox {
    name: String,
    entity_id: String,
    camera_entity: String,
    confidence: Confidence,
    url: Url,
    client: reqwest::Client,
    face_processor: FaceProcessor,
    snapshot: RwLock<Snapshot>,
}

impl Facebox {
    pub fn new(
        settings: FaceboxSettings,
        client: reqwest::Client,
        face_processor: FaceProcessor,
    ) -> Result<Self, SetupError> {
        let confidence = Confidence::try_from(settings.confidence)?;
        let (_, object_id) = split_entity_id(&settings.camera_entity)?;

        let name = match settings.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => format!("Facebox {}", object_id),
        };
        let entity_id = format!("{}.{}", DOMAIN, slugify(&name));

        let url = Url::parse(&format!("http://{}/{}", settings.endpoint, CHECK_PATH)).map_err(
            |e| SetupError::InvalidEndpoint {
                endpoint: settings.endpoint.clone(),
                reason: e.to_string(),
            },
        )?;

        Ok(Self {
            name,
            entity_id,
            camera_entity: settings.camera_entity,
            confidence,
            url,
            client,
            face_processor,
            snapshot: RwLock::new(Snapshot::default()),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn detection(&self) -> Option<Detection> {
        self.snapshot.read().detection.clone()
    }

    #[instrument(skip(self, image), fields(entity_id = %self.entity_id, image_len = image.len()))]
    pub async fn process(&self, image: &[u8]) -> Result<(), FaceboxError> {
        let timer_start = Instant::now();

        match self.check(image).await {
            Ok((total_faces, faces)) => {
                let response_time = round_to_tenth(timer_start.elapsed());
                tracing::debug!(total_faces, response_time, "Facebox check succeeded");

                self.face_processor.process_faces(
                    &self.entity_id,
                    self.confidence,
                    &faces,
                    total_faces,
                );

                *self.snapshot.write() = Snapshot {
                    detection: Some(Detection::Faces { total_faces, faces }),
                    response_time: Some(response_time),
                };
                Ok(())
            }
            Err(err) => {
                tracing::warn!(reason = err.reason().as_str(), "Facebox check failed: {}", err);

                {
                    let mut snapshot = self.snapshot.write();
                    let response_time = snapshot.response_time;
                    *snapshot = Snapshot {
                        detection: Some(Detection::Failed(err.reason())),
                        response_time,
                    };
                }
                Err(err)
            }
        }
    }

    async fn check(&self, image: &[u8]) -> Result<(u32, Vec<Value>), FaceboxError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&encode_image(image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "Facebox answered with a non-success status");
        }

        let body = response.text().await?;
        parse_check_response(&body)
    }
}

#[async_trait]
impl ImageProcessingEntity for Facebox {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn camera_entity(&self) -> &str {
        &self.camera_entity
    }

    fn confidence(&self) -> Confidence {
        self.confidence
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> Option<String> {
        self.snapshot.read().detection.as_ref().map(Detection::state)
    }

    fn total_faces(&self) -> Option<u32> {
        self.snapshot
            .read()
            .detection
            .as_ref()
            .and_then(Detection::total_faces)
    }

    fn response_time(&self) -> Option<f64> {
        self.snapshot.read().response_time
    }

    fn state_attributes(&self) -> Map<String, Value> {
        let snapshot = self.snapshot.read().clone();

        let mut attributes = Map::new();
        let (faces, total_faces, status) = match &snapshot.detection {
            None => (json!([]), Value::Null, "unknown"),
            Some(Detection::Faces { total_faces, faces }) => {
                (Value::from(faces.clone()), json!(total_faces), "ok")
            }
            Some(Detection::Failed(reason)) => {
                attributes.insert("failure".into(), json!(reason));
                (json!([]), json!(FAILURE_MARKER), "failed")
            }
        };
        attributes.insert("faces".into(), faces);
        attributes.insert("total_faces".into(), total_faces);
        attributes.insert("status".into(), json!(status));
        attributes.insert("confidence".into(), json!(self.confidence));
        attributes.insert("friendly_name".into(), json!(self.name));
        attributes.insert("response_time".into(), json!(snapshot.response_time));
        attributes
    }

    async fn process_image(&self, image: &[u8]) -> anyhow::Result<()> {
        self.process(image).await?;
        Ok(())
    }
}
