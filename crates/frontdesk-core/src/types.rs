use serde::{Deserialize, Serialize};

use crate::oracle::FaceOracle;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
///
/// Serializes as a bare array of floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        (1.0 - self.similarity(other)).clamp(0.0, 2.0)
    }
}

/// One stored face the matcher can compare against.
#[derive(Debug, Clone, Copy)]
pub struct GalleryEntry<'a> {
    pub id: &'a str,
    pub embedding: &'a Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matched: bool,
    /// Oracle distance of the matched entry.
    pub distance: Option<f32>,
    /// ID of the matched entry (if any).
    pub face_id: Option<String>,
    /// Number of gallery entries actually compared.
    pub compared: usize,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry<'_>],
        tolerance: f32,
    ) -> MatchResult;
}

/// Linear scan in gallery order that stops at the first entry the oracle
/// accepts within the tolerance.
///
/// This is not a best-match search: when several entries fall within the
/// tolerance, the earliest one wins. Entries whose dimensionality differs from
/// the probe are skipped.
pub struct FirstMatch<'a, O: ?Sized> {
    oracle: &'a O,
}

impl<'a, O: FaceOracle + ?Sized> FirstMatch<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        Self { oracle }
    }
}

impl<O: FaceOracle + ?Sized> Matcher for FirstMatch<'_, O> {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry<'_>],
        tolerance: f32,
    ) -> MatchResult {
        let mut compared = 0;

        for entry in gallery {
            if entry.embedding.dim() != probe.dim() {
                tracing::warn!(
                    face_id = entry.id,
                    stored = entry.embedding.dim(),
                    probe = probe.dim(),
                    "skipping stored encoding with mismatched dimensionality"
                );
                continue;
            }

            compared += 1;
            if self.oracle.matches(entry.embedding, probe, tolerance) {
                return MatchResult {
                    matched: true,
                    distance: Some(self.oracle.distance(entry.embedding, probe)),
                    face_id: Some(entry.id.to_string()),
                    compared,
                };
            }
        }

        MatchResult {
            matched: false,
            distance: None,
            face_id: None,
            compared,
        }
    }
}
