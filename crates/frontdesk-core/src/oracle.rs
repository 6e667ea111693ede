//! Face-embedding oracle abstraction and the ArcFace implementation.
//!
//! Endpoint logic only ever talks to [`FaceOracle`]; swapping the model stack
//! means providing another implementation of the trait.

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Embedding;

/// SCRFD detection model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Capability: turn an image into face encodings and decide whether two
/// encodings belong to the same face.
pub trait FaceOracle: Send {
    /// Return one encoding per detected face, best detection first.
    /// An empty vector means no face was found.
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, OracleError>;

    /// Distance between two encodings. Smaller is more similar.
    fn distance(&self, known: &Embedding, candidate: &Embedding) -> f32;

    /// Whether `candidate` matches `known` within `tolerance`.
    fn matches(&self, known: &Embedding, candidate: &Embedding, tolerance: f32) -> bool {
        self.distance(known, candidate) <= tolerance
    }
}

/// SCRFD + ArcFace oracle. Distances are cosine distances.
pub struct ArcFaceOracle {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl ArcFaceOracle {
    /// Load both ONNX models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, OracleError> {
        let scrfd = model_dir.join(SCRFD_MODEL_FILE);
        let arcface = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&arcface.to_string_lossy())?;

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceOracle for ArcFaceOracle {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, OracleError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(faces = faces.len(), "oracle: detection complete");

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            if face.landmarks.is_none() {
                tracing::debug!(
                    confidence = face.confidence,
                    "oracle: skipping face without landmarks"
                );
                continue;
            }
            embeddings.push(self.recognizer.extract(image, face)?);
        }

        Ok(embeddings)
    }

    fn distance(&self, known: &Embedding, candidate: &Embedding) -> f32 {
        known.cosine_distance(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_models() {
        let dir = std::env::temp_dir().join("frontdesk-core-no-models");
        match ArcFaceOracle::load(&dir) {
            Err(OracleError::Detector(DetectorError::ModelNotFound(path))) => {
                assert!(path.ends_with(SCRFD_MODEL_FILE), "path = {path}");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("models should not exist in {}", dir.display()),
        }
    }

    #[test]
    fn test_default_matches_uses_distance() {
        struct Fixed(f32);
        impl FaceOracle for Fixed {
            fn encode(&mut self, _image: &RgbImage) -> Result<Vec<Embedding>, OracleError> {
                Ok(Vec::new())
            }
            fn distance(&self, _known: &Embedding, _candidate: &Embedding) -> f32 {
                self.0
            }
        }

        let e = Embedding::new(vec![1.0]);
        assert!(Fixed(0.45).matches(&e, &e, 0.45));
        assert!(!Fixed(0.46).matches(&e, &e, 0.45));
    }
}
