//! frontdesk-core: face encoding and matching for the visitor check-in service.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both running
//! via ONNX Runtime for CPU inference, behind the [`FaceOracle`] trait.

pub mod alignment;
pub mod detector;
pub mod oracle;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use oracle::{ArcFaceOracle, FaceOracle, OracleError, ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
pub use types::{BoundingBox, Embedding, FirstMatch, GalleryEntry, MatchResult, Matcher};

/// Default location of the ONNX model files: `$XDG_DATA_HOME/frontdesk/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("frontdesk/models")
}
