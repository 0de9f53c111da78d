use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A detected face region in frame coordinates, with optional landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceRegion {
    /// Rescale the region (and landmarks) by a uniform factor.
    ///
    /// Used to map detections made on a downscaled frame back into
    /// source-frame coordinates.
    pub fn scaled(&self, factor: f32) -> FaceRegion {
        FaceRegion {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(x, y)| (x * factor, y * factor))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Euclidean distance between two embeddings. Smaller is more similar;
    /// an embedding has distance 0 to itself.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Contract for any face-detection strategy: given a packed RGB8 frame,
/// return zero or more face regions. Zero faces is a normal outcome.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, InferenceError>;
}

/// Contract for any embedding strategy: given a frame and a detected
/// region, produce a fixed-dimensionality vector comparable by
/// [`Embedding::distance`].
pub trait FaceEmbedder: Send {
    fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &FaceRegion,
    ) -> Result<Embedding, InferenceError>;
}
