//! Capability contract between the host and image processing entities.
//!
//! The host only ever talks to `dyn ImageProcessingEntity`: it reads the
//! exposed properties for display and hands images to `process_image`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

pub const DOMAIN: &str = "image_processing";
pub const EVENT_DETECT_FACE: &str = "image_processing.detect_face";

#[derive(Error, Debug, PartialEq)]
pub enum SetupError {
    #[error("Confidence must be within [0, 100], got {0}")]
    InvalidConfidence(f64),
    #[error("Invalid camera entity id: {0:?}")]
    InvalidEntityId(String),
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Minimum confidence, in percent, a face needs before an event is fired.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Confidence(f64);

impl Confidence {
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Confidence {
    type Error = SetupError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if (0.0..=100.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SetupError::InvalidConfidence(value))
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Splits `camera.demo_camera` into `("camera", "demo_camera")`.
pub fn split_entity_id(entity_id: &str) -> Result<(&str, &str), SetupError> {
    match entity_id.split_once('.') {
        Some((domain, object_id)) if !domain.is_empty() && !object_id.is_empty() => {
            Ok((domain, object_id))
        }
        _ => Err(SetupError::InvalidEntityId(entity_id.to_string())),
    }
}

/// Lowercases and collapses every run of non alphanumeric characters to `_`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

#[async_trait]
pub trait ImageProcessingEntity: Send + Sync + 'static {
    fn entity_id(&self) -> &str;
    fn camera_entity(&self) -> &str;
    fn confidence(&self) -> Confidence;
    fn name(&self) -> &str;

    /// `None` until the first image was processed.
    fn state(&self) -> Option<String>;
    fn state_attributes(&self) -> Map<String, Value>;

    /// Face count of the last successful result, `None` after a failure.
    fn total_faces(&self) -> Option<u32>;
    /// Seconds taken by the last successful call.
    fn response_time(&self) -> Option<f64>;

    /// Failures are recorded in the entity state before being returned.
    async fn process_image(&self, image: &[u8]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceEvent {
    pub event_type: &'static str,
    pub entity_id: String,
    pub face: Value,
}

/// Fires a detect-face event for every face meeting the confidence threshold.
#[derive(Debug, Clone)]
pub struct FaceProcessor {
    events: broadcast::Sender<FaceEvent>,
}

impl FaceProcessor {
    pub fn new(events: broadcast::Sender<FaceEvent>) -> Self {
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FaceEvent> {
        self.events.subscribe()
    }

    /// Returns how many events were fired.
    pub fn process_faces(
        &self,
        entity_id: &str,
        confidence: Confidence,
        faces: &[Value],
        total_faces: u32,
    ) -> usize {
        let mut fired = 0;
        for face in faces {
            let face_confidence = face.get("confidence").and_then(Value::as_f64);
            if let Some(face_confidence) = face_confidence {
                if confidence.value() > 0.0 && face_confidence < confidence.value() {
                    continue;
                }
            }

            let event = FaceEvent {
                event_type: EVENT_DETECT_FACE,
                entity_id: entity_id.to_string(),
                face: face.clone(),
            };
            // No subscriber is fine.
            let _ = self.events.send(event);
            fired += 1;
        }

        tracing::debug!(entity_id, total_faces, fired, "Processed faces");
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_bounds() {
        assert_eq!(Confidence::try_from(0.0).unwrap().value(), 0.0);
        assert_eq!(Confidence::try_from(100.0).unwrap().value(), 100.0);
        assert_eq!(Confidence::try_from(80.0).unwrap().value(), 80.0);
        assert_eq!(
            Confidence::try_from(100.5),
            Err(SetupError::InvalidConfidence(100.5))
        );
        assert!(Confidence::try_from(-1.0).is_err());
        assert!(Confidence::try_from(f64::NAN).is_err());
    }

    #[test]
    fn test_split_entity_id() {
        assert_eq!(
            split_entity_id("camera.demo_camera"),
            Ok(("camera", "demo_camera"))
        );
        assert!(split_entity_id("demo_camera").is_err());
        assert!(split_entity_id("camera.").is_err());
        assert!(split_entity_id(".demo").is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Facebox demo_camera"), "facebox_demo_camera");
        assert_eq!(slugify("  Front -- Door! "), "front_door");
    }

    #[test]
    fn test_process_faces_filters_on_confidence() {
        let (tx, _) = broadcast::channel(16);
        let processor = FaceProcessor::new(tx);
        let mut rx = processor.subscribe();
        let faces = vec![
            json!({"name": "john", "confidence": 92.0}),
            json!({"name": "jane", "confidence": 40.0}),
            json!("face_data"),
        ];

        let fired = processor.process_faces(
            "image_processing.facebox_demo_camera",
            Confidence::try_from(80.0).unwrap(),
            &faces,
            3,
        );

        assert_eq!(fired, 2);
        let first = rx.try_recv().unwrap();
        assert_eq!(first.event_type, EVENT_DETECT_FACE);
        assert_eq!(first.entity_id, "image_processing.facebox_demo_camera");
        assert_eq!(first.face, faces[0]);
        assert_eq!(rx.try_recv().unwrap().face, faces[2]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_zero_threshold_fires_everything() {
        let (tx, _) = broadcast::channel(16);
        let processor = FaceProcessor::new(tx);
        let faces = vec![json!({"confidence": 0.1}), json!({"confidence": 0.9})];

        let fired = processor.process_faces("x.y", Confidence::try_from(0.0).unwrap(), &faces, 2);

        assert_eq!(fired, 2);
    }
}
