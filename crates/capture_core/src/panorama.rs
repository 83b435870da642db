use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{EncodedImage, REQUIRED_IMAGE_COUNT},
    protocol::{StitchRequest, StitchResponse},
};
use thiserror::Error;
use tracing::info;
use url::Url;

#[derive(Debug, Error)]
pub enum PanoramaError {
    #[error("stitching service rejected the upload: {0}")]
    Rejected(String),
    #[error("failed to reach stitching service: {0}")]
    Transport(String),
}

/// The stitching backend as the session sees it: twelve frames in, one
/// panorama URL out. Opaque beyond that.
#[async_trait]
pub trait PanoramaBackend: Send + Sync {
    async fn stitch(&self, images: &[EncodedImage]) -> Result<String, PanoramaError>;
}

/// HTTP client for the stitching service's upload endpoint.
pub struct HttpPanoramaBackend {
    http: Client,
    base_url: String,
}

impl HttpPanoramaBackend {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .with_context(|| format!("invalid stitching service url: {base_url}"))?;
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }
}

#[async_trait]
impl PanoramaBackend for HttpPanoramaBackend {
    async fn stitch(&self, images: &[EncodedImage]) -> Result<String, PanoramaError> {
        // The session guarantees a complete rotation before uploading;
        // anything else here is a caller bug.
        debug_assert_eq!(images.len(), REQUIRED_IMAGE_COUNT);

        let request = StitchRequest {
            images: images.iter().map(|image| image.0.clone()).collect(),
        };
        info!(count = request.images.len(), url = %self.base_url, "upload: posting frames");

        let response = self
            .http
            .post(format!("{}/api/upload", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|err| PanoramaError::Transport(err.to_string()))?;

        // Rejections come back as JSON envelopes too, so the body is
        // parsed regardless of status.
        let body: StitchResponse = response
            .json()
            .await
            .map_err(|err| PanoramaError::Transport(err.to_string()))?;

        if body.success {
            body.url
                .ok_or_else(|| PanoramaError::Transport("success response missing url".to_string()))
        } else {
            Err(PanoramaError::Rejected(
                body.error
                    .unwrap_or_else(|| "unknown stitching failure".to_string()),
            ))
        }
    }
}
