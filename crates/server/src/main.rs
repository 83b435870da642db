use std::{net::SocketAddr, sync::Arc};

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use shared::{
    domain::{JPEG_DATA_URL_PREFIX, REQUIRED_IMAGE_COUNT},
    error::{ErrorCode, ServiceError},
    protocol::{StitchRequest, StitchResponse},
};
use tracing::{error, info};

mod config;
mod stitcher;

use config::{load_settings, Settings};

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
}

fn validate(request: &StitchRequest) -> Result<(), ServiceError> {
    if request.images.len() != REQUIRED_IMAGE_COUNT {
        return Err(ServiceError::validation("Exactly 12 images are required"));
    }
    if !request
        .images
        .iter()
        .all(|image| image.starts_with(JPEG_DATA_URL_PREFIX))
    {
        return Err(ServiceError::validation(
            "All images must be valid JPEG base64 data URLs",
        ));
    }
    Ok(())
}

fn error_response(err: ServiceError) -> (StatusCode, Json<StitchResponse>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(StitchResponse::rejected(err.message)))
}

async fn upload(
    State(state): State<AppState>,
    Json(request): Json<StitchRequest>,
) -> (StatusCode, Json<StitchResponse>) {
    if let Err(err) = validate(&request) {
        return error_response(err);
    }

    match stitcher::stitch(&state.settings, &request.images).await {
        Ok(url) => (
            StatusCode::OK,
            Json(StitchResponse::ok(
                url,
                "Panorama processing completed successfully",
            )),
        ),
        Err(err) => {
            error!("stitching failed: {err}");
            error_response(ServiceError::internal("Failed to process images"))
        }
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(upload))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let addr: SocketAddr = settings.server_bind.parse()?;
    let app = build_router(AppState {
        settings: Arc::new(settings),
    });

    info!(%addr, "stitching service listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let settings = Settings {
            processing_delay_ms: 0,
            ..Settings::default()
        };
        build_router(AppState {
            settings: Arc::new(settings),
        })
    }

    fn jpeg_frame(tag: &str) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        format!("{JPEG_DATA_URL_PREFIX}{}", STANDARD.encode(tag))
    }

    async fn post_images(app: Router, images: Vec<String>) -> (StatusCode, StitchResponse) {
        let request = Request::post("/api/upload")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&StitchRequest { images }).expect("payload"),
            ))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = serde_json::from_slice(&bytes).expect("envelope");
        (status, body)
    }

    #[tokio::test]
    async fn rejects_a_short_rotation() {
        let images = (0..11).map(|i| jpeg_frame(&format!("frame-{i}"))).collect();
        let (status, body) = post_images(test_app(), images).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert_eq!(body.error.as_deref(), Some("Exactly 12 images are required"));
    }

    #[tokio::test]
    async fn rejects_frames_without_the_jpeg_prefix() {
        let mut images: Vec<String> =
            (0..11).map(|i| jpeg_frame(&format!("frame-{i}"))).collect();
        images.push("data:image/png;base64,AAAA".to_string());
        let (status, body) = post_images(test_app(), images).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body.error.as_deref(),
            Some("All images must be valid JPEG base64 data URLs")
        );
    }

    #[tokio::test]
    async fn accepts_a_full_rotation() {
        let images = (0..12).map(|i| jpeg_frame(&format!("frame-{i}"))).collect();
        let (status, body) = post_images(test_app(), images).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert_eq!(body.url.as_deref(), Some("/placeholder-360.jpg"));
        assert_eq!(
            body.message.as_deref(),
            Some("Panorama processing completed successfully")
        );
        assert!(body.error.is_none());
    }

    #[tokio::test]
    async fn undecodable_payload_maps_to_internal_error() {
        let mut images: Vec<String> =
            (0..11).map(|i| jpeg_frame(&format!("frame-{i}"))).collect();
        images.push(format!("{JPEG_DATA_URL_PREFIX}not-base64!!"));
        let (status, body) = post_images(test_app(), images).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.as_deref(), Some("Failed to process images"));
    }
}
