//! HTTP API for the visitor kiosk.
//!
//! Endpoints:
//! - POST   /api/scan-face       enroll a visitor photo with visitor info
//! - POST   /api/recognize-face  look up a returning visitor by photo
//! - GET    /api/faces           list enrolled visitors
//! - DELETE /api/faces/{id}      remove an enrolled visitor
//! - GET    /api/status          daemon status
//! - GET    /health              liveness

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{RecognitionMode, StorePolicy};
use crate::engine::EngineHandle;
use crate::error::{ApiError, ErrorResponse};
use crate::photo;
use crate::store::{StoreHandle, VisitorInfo, VisitorRecord};

/// How faces are turned into identities.
#[derive(Clone)]
pub enum Recognizer {
    /// Real recognition through the oracle engine.
    Oracle(EngineHandle),
    /// No oracle wired in. Stores photos without encodings and answers every
    /// recognition with the most recent visitor. Not real recognition.
    Placeholder,
}

impl Recognizer {
    fn mode(&self) -> RecognitionMode {
        match self {
            Self::Oracle(_) => RecognitionMode::Oracle,
            Self::Placeholder => RecognitionMode::Placeholder,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub recognizer: Recognizer,
    pub images_dir: Arc<PathBuf>,
    pub tolerance: f32,
    pub persistence: StorePolicy,
}

/// Build the router with all routes and middleware.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/scan-face", post(scan_face))
        .route("/api/recognize-face", post(recognize_face))
        .route("/api/faces", get(list_faces))
        .route("/api/faces/{id}", delete(remove_face))
        .route("/api/status", get(status))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub image: String,
    #[serde(default, rename = "visitorInfo")]
    pub visitor_info: Option<VisitorInfo>,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub status: &'static str,
    pub message: String,
    pub face_id: String,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub status: &'static str,
    pub recognized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor_info: Option<VisitorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RecognizeResponse {
    fn found(record: &VisitorRecord) -> Self {
        Self {
            status: "success",
            recognized: true,
            visitor_info: Some(record.visitor_info.clone()),
            face_id: Some(record.id.clone()),
            message: None,
        }
    }

    fn not_found() -> Self {
        Self {
            status: "success",
            recognized: false,
            visitor_info: None,
            face_id: None,
            message: Some("No matching face found".to_string()),
        }
    }
}

async fn scan_face(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanResponse>, ApiError> {
    let Json(req) = payload?;
    let visitor_info = req.visitor_info.unwrap_or_default();

    // Decode and save the photo before encoding; a photo without a store
    // entry is left behind when no face is found.
    let images_dir = Arc::clone(&state.images_dir);
    let filename = photo::photo_filename(&visitor_info);
    let (rgb, file_path, filename) = tokio::task::spawn_blocking(move || {
        let image = photo::decode_image(&req.image)?;
        let path = photo::save_png(&image, &images_dir, &filename)?;
        Ok::<_, photo::PhotoError>((image.to_rgb8(), path, filename))
    })
    .await??;
    tracing::debug!(path = %file_path.display(), "scan: photo saved");

    let face_encoding = match &state.recognizer {
        Recognizer::Oracle(engine) => Some(engine.encode_first(rgb.clone()).await?),
        Recognizer::Placeholder => None,
    };

    let record = VisitorRecord {
        id: uuid::Uuid::new_v4().to_string(),
        filename,
        file_path,
        face_encoding,
        visitor_info,
        created_at: Utc::now(),
    };
    let face_id = record.id.clone();
    let filename = record.filename.clone();

    let total = state
        .store
        .update(move |store| {
            // A removal of a visitor sharing this file name may have deleted
            // the photo since it was saved.
            if !record.file_path.exists() {
                photo::restore_png(&rgb, &record.file_path)?;
            }
            store.insert(record)?;
            Ok::<_, ApiError>(store.len())
        })
        .await?;

    tracing::info!(face_id = %face_id, filename = %filename, total, "visitor enrolled");

    Ok(Json(ScanResponse {
        status: "success",
        message: "Face and visitor info saved.".to_string(),
        face_id,
        filename,
    }))
}

async fn recognize_face(
    State(state): State<AppState>,
    payload: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<RecognizeResponse>, ErrorResponse> {
    recognize(&state, payload)
        .await
        .map(Json)
        .map_err(ApiError::for_recognition)
}

async fn recognize(
    state: &AppState,
    payload: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<RecognizeResponse, ApiError> {
    let Json(req) = payload?;
    let rgb = decode_probe(req.image).await?;

    let engine = match &state.recognizer {
        Recognizer::Oracle(engine) => engine,
        Recognizer::Placeholder => {
            let store = state.store.snapshot().await?;
            if store.is_empty() {
                return Ok(RecognizeResponse::not_found());
            }
            tracing::warn!(
                records = store.len(),
                "placeholder recognition: returning most recent visitor without comparing faces"
            );
            return Ok(store
                .latest()
                .map_or_else(RecognizeResponse::not_found, RecognizeResponse::found));
        }
    };

    let probe = engine.encode_first(rgb).await?;
    let store = state.store.snapshot().await?;
    let result = engine
        .find_first_match(probe, store.gallery(), state.tolerance)
        .await?;

    let record = result.face_id.as_deref().and_then(|id| store.get(id));
    match record {
        Some(record) => {
            tracing::info!(face_id = %record.id, distance = ?result.distance, "visitor recognized");
            Ok(RecognizeResponse::found(record))
        }
        None => {
            tracing::info!(compared = result.compared, "no matching visitor");
            Ok(RecognizeResponse::not_found())
        }
    }
}

async fn decode_probe(payload: String) -> Result<RgbImage, ApiError> {
    let image =
        tokio::task::spawn_blocking(move || photo::decode_image(&payload).map(|i| i.to_rgb8()))
            .await??;
    Ok(image)
}

#[derive(Debug, Serialize)]
pub struct FaceSummary {
    pub face_id: String,
    pub filename: String,
    pub visitor_info: VisitorInfo,
    pub created_at: DateTime<Utc>,
    pub has_encoding: bool,
}

#[derive(Debug, Serialize)]
pub struct FaceList {
    pub status: &'static str,
    pub faces: Vec<FaceSummary>,
}

async fn list_faces(State(state): State<AppState>) -> Result<Json<FaceList>, ApiError> {
    let store = state.store.snapshot().await?;
    let faces = store
        .iter()
        .map(|r| FaceSummary {
            face_id: r.id.clone(),
            filename: r.filename.clone(),
            visitor_info: r.visitor_info.clone(),
            created_at: r.created_at,
            has_encoding: r.face_encoding.is_some(),
        })
        .collect();

    Ok(Json(FaceList {
        status: "success",
        faces,
    }))
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub status: &'static str,
    pub message: String,
    pub face_id: String,
}

async fn remove_face(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let lookup = id.clone();
    state
        .store
        .update(move |store| {
            let removed = store.remove(&lookup)?;
            // Photos named after name/company can be shared by several records.
            if !store.references_file(&removed.file_path) {
                if let Err(e) = std::fs::remove_file(&removed.file_path) {
                    tracing::warn!(
                        path = %removed.file_path.display(),
                        error = %e,
                        "failed to remove photo"
                    );
                }
            }
            Ok::<_, ApiError>(())
        })
        .await?;

    tracing::info!(face_id = %id, "visitor removed");
    Ok(Json(RemoveResponse {
        status: "success",
        message: "Face removed.".to_string(),
        face_id: id,
    }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub recognition: String,
    pub persistence: String,
    pub faces: usize,
    pub tolerance: f32,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let faces = state.store.snapshot().await?.len();
    Ok(Json(StatusResponse {
        status: "success",
        version: env!("CARGO_PKG_VERSION"),
        recognition: state.recognizer.mode().to_string(),
        persistence: state.persistence.to_string(),
        faces,
        tolerance: state.tolerance,
    }))
}
