//! HTTP surface: MJPEG live stream, health/status, enrollment upload,
//! and gallery reload.

use crate::config::Config;
use crate::hub::FrameHub;
use crate::status::SystemStatus;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use warden_core::gallery::{self, LoadReport};
use warden_core::{ArcFaceEmbedder, Gallery, GalleryHandle, ScrfdDetector};

#[derive(Clone)]
pub struct AppState {
    pub hub: FrameHub,
    pub status: Arc<SystemStatus>,
    pub gallery: GalleryHandle,
    pub config: Arc<Config>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(video_feed))
        .route("/status", get(system_status))
        .route("/healthz", get(health))
        .route("/api/enroll", post(enroll))
        .route("/api/reload", post(reload))
        .with_state(state)
}

/// Bind and serve until the shutdown flag flips.
pub async fn serve(
    state: AppState,
    listen_addr: String,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "HTTP surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// MJPEG stream: multipart/x-mixed-replace with one JPEG part per frame.
/// Every client shares the hub's single encode; a slow client skips
/// frames instead of lagging behind.
async fn video_feed(State(state): State<AppState>) -> Response {
    tracing::debug!("stream client connected");
    let cursor = state.hub.subscribe();

    let stream = futures::stream::unfold(cursor, |mut cursor| async move {
        let frame = cursor.next().await?;
        let mut part = Vec::with_capacity(frame.jpeg.len() + 64);
        part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        part.extend_from_slice(&frame.jpeg);
        part.extend_from_slice(b"\r\n");
        Some((Ok::<_, std::convert::Infallible>(part), cursor))
    });

    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn system_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let gallery = state.gallery.current();
    Json(json!({
        "status": "running",
        "camera_active": state.status.camera_active(),
        "has_frames": state.hub.has_frames(),
        "identity_count": gallery.identity_count(),
        "identities": gallery.identity_names(),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub name: String,
    /// Label -> base64-encoded JPEG bytes.
    pub images: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub success: bool,
    pub person: String,
    pub images_saved: usize,
    pub directory: String,
}

/// Save uploaded reference images under `faces_dir/<name>/<label>.jpg`.
/// The gallery itself is unchanged until the next reload.
async fn enroll(
    State(state): State<AppState>,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<EnrollResponse>, ApiError> {
    if !valid_component(&request.name) {
        return Err(ApiError::bad_request("invalid person name"));
    }
    if request.images.is_empty() {
        return Err(ApiError::bad_request("no images provided"));
    }

    let person_dir = state.config.faces_dir.join(&request.name);
    tokio::fs::create_dir_all(&person_dir)
        .await
        .map_err(|e| ApiError::internal(format!("failed to create directory: {e}")))?;

    let mut saved = 0;
    for (label, data) in &request.images {
        if !valid_component(label) {
            tracing::warn!(%label, "invalid image label; skipped");
            continue;
        }
        let bytes = match base64::engine::general_purpose::STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%label, error = %e, "base64 decode failed; image skipped");
                continue;
            }
        };
        let path = person_dir.join(format!("{label}.jpg"));
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => {
                tracing::info!(person = %request.name, path = %path.display(), "reference image saved");
                saved += 1;
            }
            Err(e) => {
                tracing::warn!(%label, error = %e, "failed to write image; skipped");
            }
        }
    }

    if saved == 0 {
        return Err(ApiError::bad_request("no usable images in request"));
    }

    Ok(Json(EnrollResponse {
        success: true,
        person: request.name,
        images_saved: saved,
        directory: person_dir.to_string_lossy().into_owned(),
    }))
}

/// Rebuild the gallery from disk and swap it in atomically. Fresh model
/// sessions are created for the load so live recognition keeps running
/// on its own detector and embedder.
async fn reload(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let config = state.config.clone();

    let (gallery, report): (Gallery, LoadReport) = tokio::task::spawn_blocking(move || {
        let mut detector = ScrfdDetector::load(&config.scrfd_model_path())
            .map_err(|e| format!("detector load: {e}"))?;
        let mut embedder = ArcFaceEmbedder::load(&config.arcface_model_path())
            .map_err(|e| format!("embedder load: {e}"))?;
        gallery::load_directory(&config.faces_dir, &mut detector, &mut embedder)
            .map_err(|e| format!("gallery load: {e}"))
    })
    .await
    .map_err(|e| ApiError::internal(format!("reload task failed: {e}")))?
    .map_err(ApiError::internal)?;

    state.gallery.replace(gallery);
    tracing::info!(
        identities = report.identities,
        embeddings = report.embeddings,
        "gallery reloaded"
    );

    Ok(Json(json!({
        "success": true,
        "identities": report.identities,
        "embeddings": report.embeddings,
        "skipped_images": report.skipped_images,
        "dropped_identities": report.dropped_identities,
    })))
}

/// Names and labels become path components; restrict them accordingly.
fn valid_component(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
