use crate::camera::CameraError;
use crate::facebox::FaceboxError;
use crate::platform::ScanTarget;
use crate::telemetry::Metrics;
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Image processing failed: {0}")]
    Processing(anyhow::Error),
}

impl ScanError {
    fn reason(&self) -> &'static str {
        match self {
            ScanError::Camera(_) => "camera",
            ScanError::Processing(err) => processing_reason(err),
        }
    }
}

fn processing_reason(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<FaceboxError>()
        .map(|e| e.reason().as_str())
        .unwrap_or("processing")
}

/// Pulls an image from the target's camera and hands it to its entity.
///
/// Failures are recorded in metrics and returned; they never stop the
/// caller's loop.
#[instrument(skip(target, metrics), fields(entity_id = %target.entity_id()))]
pub async fn scan(target: &ScanTarget, metrics: &Metrics) -> Result<(), ScanError> {
    let image = match target.camera.camera_image().await {
        Ok(image) => image,
        Err(err) => {
            let err = ScanError::from(err);
            metrics.record_failure(err.reason(), target.entity_id());
            return Err(err);
        }
    };

    process(target, &image, metrics)
        .await
        .map_err(ScanError::Processing)
}

/// Hands `image` to the target's entity and records the outcome.
pub async fn process(
    target: &ScanTarget,
    image: &[u8],
    metrics: &Metrics,
) -> anyhow::Result<()> {
    let entity_id = target.entity_id();
    let result = target.entity.process_image(image).await;

    match &result {
        Ok(()) => {
            if let Some(total_faces) = target.entity.total_faces() {
                metrics.record_faces(total_faces, entity_id);
            }
            if let Some(response_time) = target.entity.response_time() {
                metrics.record_response_time(response_time, entity_id);
            }
        }
        Err(err) => metrics.record_failure(processing_reason(err), entity_id),
    }

    result
}

pub struct ScanPoller {
    target: ScanTarget,
    metrics: Arc<Metrics>,
    scan_interval: Duration,
}

impl ScanPoller {
    pub fn new(target: ScanTarget, metrics: Arc<Metrics>, scan_interval: Duration) -> Self {
        Self {
            target,
            metrics,
            scan_interval,
        }
    }

    pub fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.scan_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match scan(&self.target, &self.metrics).await {
                            Ok(()) => tracing::debug!(
                                entity_id = self.target.entity_id(),
                                state = ?self.target.entity.state(),
                                "Scan finished"
                            ),
                            Err(err) => tracing::error!(
                                entity_id = self.target.entity_id(),
                                "Error during scan: {}", err
                            ),
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::info!(
                            entity_id = self.target.entity_id(),
                            "Scan polling received shutdown signal"
                        );
                        break;
                    }
                }
            }
            tracing::info!(entity_id = self.target.entity_id(), "Scan polling stopped");
        })
    }
}
