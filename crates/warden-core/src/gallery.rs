//! Identity gallery — known identities and their reference embeddings.
//!
//! Loaded from a directory-per-identity layout (the enrollment write
//! contract): each subdirectory is one identity, each image inside yields
//! one reference embedding. Matching is nearest-neighbor under a distance
//! tolerance; reload swaps the whole gallery atomically.

use crate::types::{Embedding, FaceDetector, FaceEmbedder};
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// One known identity with its reference embeddings.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub references: Vec<Embedding>,
}

/// Immutable snapshot of all known identities.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// An identity cleared the tolerance; this is the globally nearest one.
    Match { identity: String, distance: f32 },
    /// No identity cleared the tolerance. `nearest` is the best distance
    /// seen, if the gallery was non-empty.
    NoMatch { nearest: Option<f32> },
}

/// Counts reported after a directory load.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadReport {
    pub identities: usize,
    pub embeddings: usize,
    pub skipped_images: usize,
    pub dropped_identities: usize,
}

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("failed to read enrollment directory: {0}")]
    Io(#[from] std::io::Error),
}

impl Gallery {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.identities.iter().map(|i| i.references.len()).sum()
    }

    pub fn identity_names(&self) -> Vec<String> {
        self.identities.iter().map(|i| i.name.clone()).collect()
    }

    /// Match a probe embedding against every reference of every identity.
    ///
    /// The globally nearest reference wins — not the first identity under
    /// tolerance — so the result is deterministic regardless of load order.
    pub fn best_match(&self, probe: &Embedding, tolerance: f32) -> MatchOutcome {
        let mut nearest: Option<(usize, f32)> = None;

        for (idx, identity) in self.identities.iter().enumerate() {
            for reference in &identity.references {
                let d = probe.distance(reference);
                if nearest.map_or(true, |(_, best)| d < best) {
                    nearest = Some((idx, d));
                }
            }
        }

        match nearest {
            Some((idx, distance)) if distance <= tolerance => MatchOutcome::Match {
                identity: self.identities[idx].name.clone(),
                distance,
            },
            Some((_, distance)) => MatchOutcome::NoMatch {
                nearest: Some(distance),
            },
            None => MatchOutcome::NoMatch { nearest: None },
        }
    }
}

/// Walk a directory-per-identity tree and build a gallery.
///
/// Images that yield no face are skipped with a warning; identities with
/// zero usable images are dropped with a warning; a missing root directory
/// produces an empty gallery, not an error — the daemon keeps streaming
/// and every probe matches as unknown.
pub fn load_directory(
    dir: &Path,
    detector: &mut dyn FaceDetector,
    embedder: &mut dyn FaceEmbedder,
) -> Result<(Gallery, LoadReport), GalleryError> {
    let mut report = LoadReport::default();

    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "enrollment directory missing; gallery starts empty");
        return Ok((Gallery::default(), report));
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut identities = Vec::new();

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let mut references = Vec::new();

        let mut images: Vec<_> = match std::fs::read_dir(entry.path()) {
            Ok(iter) => iter
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| is_image_file(p))
                .collect(),
            Err(e) => {
                tracing::warn!(identity = %name, error = %e, "cannot read identity directory; skipping");
                continue;
            }
        };
        images.sort();

        for path in images {
            match load_reference(&path, detector, embedder) {
                Some(embedding) => {
                    tracing::info!(identity = %name, image = %path.display(), "loaded reference");
                    references.push(embedding);
                }
                None => report.skipped_images += 1,
            }
        }

        if references.is_empty() {
            tracing::warn!(identity = %name, "no usable reference images; identity dropped");
            report.dropped_identities += 1;
            continue;
        }

        report.embeddings += references.len();
        identities.push(Identity { name, references });
    }

    report.identities = identities.len();
    tracing::info!(
        identities = report.identities,
        embeddings = report.embeddings,
        skipped_images = report.skipped_images,
        dropped_identities = report.dropped_identities,
        "gallery loaded"
    );

    Ok((Gallery::new(identities), report))
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            e == "png" || e == "jpg" || e == "jpeg"
        })
        .unwrap_or(false)
}

/// Extract exactly one reference embedding from an enrollment image, from
/// its highest-confidence face. Returns None (with a warning) on any
/// per-image failure.
fn load_reference(
    path: &Path,
    detector: &mut dyn FaceDetector,
    embedder: &mut dyn FaceEmbedder,
) -> Option<Embedding> {
    let image = match image::open(path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            tracing::warn!(image = %path.display(), error = %e, "unreadable enrollment image; skipped");
            return None;
        }
    };
    let (width, height) = image.dimensions();
    let rgb = image.into_raw();

    let faces = match detector.detect(&rgb, width, height) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(image = %path.display(), error = %e, "detection failed; image skipped");
            return None;
        }
    };

    let Some(face) = faces.first() else {
        tracing::warn!(image = %path.display(), "no face found in enrollment image; skipped");
        return None;
    };

    match embedder.embed(&rgb, width, height, face) {
        Ok(embedding) => Some(embedding),
        Err(e) => {
            tracing::warn!(image = %path.display(), error = %e, "embedding failed; image skipped");
            None
        }
    }
}

/// Shared, atomically swappable handle to the current gallery.
///
/// Readers clone an `Arc` under a read lock held only for the clone, so a
/// reload in progress never exposes a partially built gallery — matchers
/// see the old snapshot until `replace` swaps in the new one.
#[derive(Clone)]
pub struct GalleryHandle {
    inner: Arc<RwLock<Arc<Gallery>>>,
}

impl GalleryHandle {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(gallery))),
        }
    }

    /// Snapshot of the current gallery.
    pub fn current(&self) -> Arc<Gallery> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Atomically swap in a freshly loaded gallery.
    pub fn replace(&self, gallery: Gallery) {
        let mut slot = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Arc::new(gallery);
    }
}
