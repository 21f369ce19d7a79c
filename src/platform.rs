use crate::camera::{Camera, CameraError, HttpCamera};
use crate::config::Config;
use crate::entity::{FaceProcessor, ImageProcessingEntity, SetupError};
use crate::facebox::{Facebox, FaceboxSettings};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Invalid source {source_id}: {error}")]
    Entity {
        source_id: String,
        error: SetupError,
    },
    #[error("Invalid camera for source {source_id}: {error}")]
    Camera {
        source_id: String,
        error: CameraError,
    },
    #[error("Failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// An entity together with the camera it pulls images from.
#[derive(Clone)]
pub struct ScanTarget {
    pub entity: Arc<dyn ImageProcessingEntity>,
    pub camera: Arc<dyn Camera>,
}

impl ScanTarget {
    pub fn entity_id(&self) -> &str {
        self.entity.entity_id()
    }
}

pub fn http_client(config: &Config) -> Result<reqwest::Client, PlatformError> {
    Ok(reqwest::Client::builder()
        .timeout(config.facebox.get_timeout())
        .build()?)
}

/// Creates one Facebox entity per configured camera source.
pub fn setup_platform(
    config: &Config,
    client: reqwest::Client,
    face_processor: FaceProcessor,
) -> Result<Vec<ScanTarget>, PlatformError> {
    let mut targets = Vec::with_capacity(config.source.len());

    for source in &config.source {
        let settings = FaceboxSettings {
            name: source.name.clone(),
            endpoint: config.facebox.endpoint.clone(),
            camera_entity: source.entity_id.clone(),
            confidence: config.facebox.confidence,
        };
        let facebox = Facebox::new(settings, client.clone(), face_processor.clone()).map_err(
            |error| PlatformError::Entity {
                source_id: source.entity_id.clone(),
                error,
            },
        )?;
        let camera = HttpCamera::new(&source.entity_id, &source.still_image_url, client.clone())
            .map_err(|error| PlatformError::Camera {
                source_id: source.entity_id.clone(),
                error,
            })?;

        tracing::info!(
            entity_id = facebox.entity_id(),
            camera = %source.entity_id,
            url = %facebox.url(),
            "Set up Facebox entity"
        );

        targets.push(ScanTarget {
            entity: Arc::new(facebox),
            camera: Arc::new(camera),
        });
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FaceboxConfig, LogLevel, ServerConfig, SourceConfig};
    use tokio::sync::broadcast;

    fn config(sources: Vec<SourceConfig>, confidence: f64) -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            log_level: LogLevel::Info,
            facebox: FaceboxConfig {
                endpoint: "192.168.0.1:8080".to_string(),
                confidence,
                timeout_secs: 10,
            },
            scan_interval_secs: 10,
            source: sources,
        }
    }

    fn source(entity_id: &str, name: Option<&str>) -> SourceConfig {
        SourceConfig {
            entity_id: entity_id.to_string(),
            name: name.map(str::to_string),
            still_image_url: "http://192.168.0.2/snapshot.jpg".to_string(),
        }
    }

    #[test]
    fn test_setup_platform_one_entity_per_source() {
        let (tx, _) = broadcast::channel(1);
        let config = config(
            vec![
                source("camera.demo_camera", None),
                source("camera.garage", Some("Garage faces")),
            ],
            80.0,
        );

        let targets =
            setup_platform(&config, reqwest::Client::new(), FaceProcessor::new(tx)).unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(
            targets[0].entity_id(),
            "image_processing.facebox_demo_camera"
        );
        assert_eq!(targets[0].camera.entity_id(), "camera.demo_camera");
        assert_eq!(targets[1].entity.name(), "Garage faces");
        assert_eq!(targets[1].entity.confidence().value(), 80.0);
    }

    #[test]
    fn test_setup_platform_rejects_out_of_range_confidence() {
        let (tx, _) = broadcast::channel(1);
        let config = config(vec![source("camera.demo_camera", None)], 120.0);

        let result = setup_platform(&config, reqwest::Client::new(), FaceProcessor::new(tx));

        assert!(matches!(
            result,
            Err(PlatformError::Entity {
                error: SetupError::InvalidConfidence(_),
                ..
            })
        ));
    }
}
