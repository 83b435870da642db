use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::{domain::JPEG_DATA_URL_PREFIX, error::ServiceError};
use tokio::time::{sleep, Duration};
use tracing::info;

use crate::config::Settings;

/// Placeholder pipeline: decodes each frame to prove the payload is
/// readable, holds for the configured processing window, and hands back
/// the canned panorama URL. A real stitcher would blend the frames into
/// an equirectangular image here.
pub async fn stitch(settings: &Settings, images: &[String]) -> Result<String, ServiceError> {
    let mut total_bytes = 0usize;
    for (index, image) in images.iter().enumerate() {
        let payload = image.strip_prefix(JPEG_DATA_URL_PREFIX).ok_or_else(|| {
            ServiceError::internal(format!("frame {index} lost its data-url prefix"))
        })?;
        let bytes = STANDARD.decode(payload).map_err(|err| {
            ServiceError::internal(format!("frame {index} is not decodable base64: {err}"))
        })?;
        total_bytes += bytes.len();
    }

    info!(
        frames = images.len(),
        total_bytes, "processing frames for 360 panorama"
    );
    sleep(Duration::from_millis(settings.processing_delay_ms)).await;

    Ok(settings.panorama_url.clone())
}
