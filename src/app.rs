use crate::config::Config;
use crate::entity::{FaceEvent, FaceProcessor};
use crate::platform::{http_client, setup_platform};
use crate::poller::ScanPoller;
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::{
    signal,
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let client = http_client(&config)?;
    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let face_processor = FaceProcessor::new(events_tx);

    let targets = match setup_platform(&config, client, face_processor.clone()) {
        Ok(targets) => Arc::new(targets),
        Err(e) => {
            tracing::error!("Failed to set up Facebox entities: {}", e);
            return Err(Box::new(e));
        }
    };
    if targets.is_empty() {
        tracing::warn!("No camera source configured, nothing will be scanned");
    }

    let metrics = Arc::new(Metrics::new()?);
    let state = SharedState {
        targets: targets.clone(),
        metrics: metrics.clone(),
    };
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let event_handle = log_face_events(face_processor.subscribe(), shutdown_tx.subscribe());

    let poller_handles: Vec<_> = targets
        .iter()
        .map(|target| {
            ScanPoller::new(target.clone(), metrics.clone(), config.get_scan_interval())
                .run(shutdown_tx.subscribe())
        })
        .collect();

    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    futures::future::join_all(poller_handles).await;
    let _ = event_handle.await;
    join_server(server_handle).await;

    Ok(())
}

/// Waits for the server task and logs how it ended. Returns `true` on a clean stop.
async fn join_server(handle: JoinHandle<anyhow::Result<()>>) -> bool {
    match handle.await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("Http server stopped with an error: {:?}", e);
            false
        }
        Err(e) => {
            tracing::error!("Http server task failed: {}", e);
            false
        }
    }
}

fn log_face_events(
    mut events: broadcast::Receiver<FaceEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => tracing::info!(
                        event_type = event.event_type,
                        entity_id = %event.entity_id,
                        face = %event.face,
                        "Face detected"
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Face event logger lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_server_reports_outcome() {
        let clean = tokio::spawn(async { Ok(()) });
        let failed = tokio::spawn(async { Err(anyhow::anyhow!("address in use")) });
        let panicked: JoinHandle<anyhow::Result<()>> = tokio::spawn(async { panic!("boom") });

        assert!(join_server(clean).await);
        assert!(!join_server(failed).await);
        assert!(!join_server(panicked).await);
    }
}
