//! ArcFace embedding extraction via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalized embeddings from aligned face
//! crops, using the w600k_r50 ArcFace model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{Embedding, FaceEmbedder, FaceRegion, InferenceError};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const PIXEL_MEAN: f32 = 127.5;
// Symmetric normalization: ArcFace divides by 127.5, not 128.
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;

/// ArcFace-based face embedder.
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, InferenceError> {
        if !Path::new(model_path).exists() {
            return Err(InferenceError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Turn an aligned 112x112 RGB crop into a normalized NCHW tensor.
    fn preprocess(aligned: &[u8]) -> Array4<f32> {
        let size = ALIGNED_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                for c in 0..3 {
                    let pixel = aligned.get((y * size + x) * 3 + c).copied().unwrap_or(0) as f32;
                    tensor[[0, c, y, x]] = (pixel - PIXEL_MEAN) / PIXEL_STD;
                }
            }
        }

        tensor
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    /// Extract an embedding for a detected face in an RGB frame.
    ///
    /// The region must carry landmarks; the face is warped to the canonical
    /// 112x112 position before inference, and the output is L2-normalized.
    fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &FaceRegion,
    ) -> Result<Embedding, InferenceError> {
        let landmarks = face.landmarks.as_ref().ok_or(InferenceError::NoLandmarks)?;

        let aligned = alignment::align_face(rgb, width, height, landmarks);
        let input = Self::preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            InferenceError::InferenceFailed(format!("embedding extraction: {e}"))
        })?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != EMBEDDING_DIM {
            return Err(InferenceError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding { values })
    }
}
