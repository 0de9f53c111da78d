//! warden-core — Face detection and recognition for the access-control daemon.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running
//! via ONNX Runtime on CPU, plus the identity gallery matched against them.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod gallery;
pub mod types;

pub use detector::ScrfdDetector;
pub use embedder::ArcFaceEmbedder;
pub use gallery::{Gallery, GalleryHandle, Identity, LoadReport, MatchOutcome};
pub use types::{Embedding, FaceDetector, FaceEmbedder, FaceRegion, InferenceError};

use std::path::PathBuf;

/// Default directory for the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("warden/models")
}
