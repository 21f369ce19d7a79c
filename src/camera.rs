use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Invalid still image url {0:?}")]
    InvalidUrl(String),
    #[error("Failed to fetch camera image: {0}")]
    FetchFailed(#[from] reqwest::Error),
    #[error("Camera returned an empty image")]
    EmptyImage,
}

/// Source of the images an entity processes.
#[async_trait]
pub trait Camera: Send + Sync + 'static {
    fn entity_id(&self) -> &str;
    async fn camera_image(&self) -> Result<Bytes, CameraError>;
}

/// Camera exposing a still image over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCamera {
    entity_id: String,
    url: Url,
    client: reqwest::Client,
}

impl HttpCamera {
    pub fn new(
        entity_id: &str,
        still_image_url: &str,
        client: reqwest::Client,
    ) -> Result<Self, CameraError> {
        let url = Url::parse(still_image_url)
            .map_err(|_| CameraError::InvalidUrl(still_image_url.to_string()))?;
        Ok(Self {
            entity_id: entity_id.to_string(),
            url,
            client,
        })
    }
}

#[async_trait]
impl Camera for HttpCamera {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    #[instrument(skip(self), fields(camera = %self.entity_id))]
    async fn camera_image(&self) -> Result<Bytes, CameraError> {
        let image = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if image.is_empty() {
            return Err(CameraError::EmptyImage);
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_camera_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/snapshot.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8, 0xff]))
            .mount(&server)
            .await;

        let camera = HttpCamera::new(
            "camera.demo_camera",
            &format!("{}/snapshot.jpg", server.uri()),
            reqwest::Client::new(),
        )
        .unwrap();

        let image = camera.camera_image().await.unwrap();
        assert_eq!(image.as_ref(), &[0xff, 0xd8, 0xff]);
        assert_eq!(camera.entity_id(), "camera.demo_camera");
    }

    #[tokio::test]
    async fn test_camera_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/empty.jpg"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let missing = HttpCamera::new(
            "camera.a",
            &format!("{}/missing.jpg", server.uri()),
            client.clone(),
        )
        .unwrap();
        let empty =
            HttpCamera::new("camera.b", &format!("{}/empty.jpg", server.uri()), client).unwrap();

        assert!(matches!(
            missing.camera_image().await,
            Err(CameraError::FetchFailed(_))
        ));
        assert!(matches!(
            empty.camera_image().await,
            Err(CameraError::EmptyImage)
        ));
        assert!(matches!(
            HttpCamera::new("camera.c", "not a url", reqwest::Client::new()),
            Err(CameraError::InvalidUrl(_))
        ));
    }
}
