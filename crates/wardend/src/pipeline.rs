//! Recognition pipeline.
//!
//! Pulls frames from the hub cursor, samples every Nth, downscales,
//! detects faces, embeds them, and matches against the current gallery
//! snapshot. Inference runs on the blocking pool; the detector and
//! embedder are moved in and back out each round so no locks are held
//! across model runs.

use crate::hub::{FrameCursor, HubFrame};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use warden_core::{FaceDetector, FaceEmbedder, Gallery, GalleryHandle, MatchOutcome};
use warden_hw::frame as frame_ops;

/// A recognition verdict for one detected face in one frame.
#[derive(Debug, Clone)]
pub struct MatchEvent {
    /// The matched identity, or `None` for an unknown face.
    pub identity: Option<String>,
    /// Distance to the nearest gallery reference; `None` when the
    /// gallery is empty.
    pub distance: Option<f32>,
    pub frame_sequence: u64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Analyze one frame out of every N observed.
    pub sample_every: u64,
    /// Downscale factor applied before detection.
    pub downscale_factor: f32,
    /// Match distance threshold.
    pub tolerance: f32,
}

pub struct RecognitionPipeline<D, E> {
    detector: D,
    embedder: E,
    gallery: GalleryHandle,
    cursor: FrameCursor,
    events: mpsc::Sender<MatchEvent>,
    opts: PipelineOptions,
    shutdown: watch::Receiver<bool>,
}

impl<D, E> RecognitionPipeline<D, E>
where
    D: FaceDetector + 'static,
    E: FaceEmbedder + 'static,
{
    pub fn new(
        detector: D,
        embedder: E,
        gallery: GalleryHandle,
        cursor: FrameCursor,
        events: mpsc::Sender<MatchEvent>,
        opts: PipelineOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            detector,
            embedder,
            gallery,
            cursor,
            events,
            opts,
            shutdown,
        }
    }

    pub async fn run(self) {
        let RecognitionPipeline {
            mut detector,
            mut embedder,
            gallery,
            mut cursor,
            events,
            opts,
            mut shutdown,
        } = self;

        let sample_every = opts.sample_every.max(1);
        let mut observed = 0u64;

        loop {
            let frame = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                frame = cursor.next() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            observed += 1;
            if observed % sample_every != 0 {
                continue;
            }

            let snapshot = gallery.current();
            let worker = tokio::task::spawn_blocking(move || {
                let matches =
                    analyze_frame(&mut detector, &mut embedder, &snapshot, opts, &frame);
                (detector, embedder, matches)
            });

            match worker.await {
                Ok((d, e, matches)) => {
                    detector = d;
                    embedder = e;
                    for event in matches {
                        // The gate owns pacing; if it is mid-cycle the
                        // event is stale by the time it would be read.
                        if let Err(err) = events.try_send(event) {
                            tracing::debug!(error = %err, "gate busy; match event dropped");
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "recognition worker panicked");
                    break;
                }
            }
        }

        tracing::info!("recognition pipeline stopped");
    }
}

/// Analyze one frame: downscale, detect, embed, match. Per-face failures
/// skip that face; detection failure skips the frame.
fn analyze_frame<D: FaceDetector, E: FaceEmbedder>(
    detector: &mut D,
    embedder: &mut E,
    gallery: &Gallery,
    opts: PipelineOptions,
    frame: &Arc<HubFrame>,
) -> Vec<MatchEvent> {
    let factor = opts.downscale_factor.clamp(0.01, 1.0);
    let small_w = ((frame.width as f32 * factor).round() as u32).max(1);
    let small_h = ((frame.height as f32 * factor).round() as u32).max(1);
    let small = frame_ops::resize_rgb(&frame.rgb, frame.width, frame.height, small_w, small_h);

    let faces = match detector.detect(&small, small_w, small_h) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, seq = frame.sequence, "detection failed; frame skipped");
            return Vec::new();
        }
    };

    // No face in view is the normal case, not an error.
    if faces.is_empty() {
        return Vec::new();
    }

    let mut events = Vec::with_capacity(faces.len());
    for face in &faces {
        // Detection ran on the downscaled frame; report coordinates in
        // source-frame space.
        let region = face.scaled(1.0 / factor);
        tracing::debug!(
            x = region.x,
            y = region.y,
            w = region.width,
            h = region.height,
            confidence = region.confidence,
            seq = frame.sequence,
            "face detected"
        );

        let embedding = match embedder.embed(&small, small_w, small_h, face) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "embedding failed; face skipped");
                continue;
            }
        };

        let (identity, distance) = match gallery.best_match(&embedding, opts.tolerance) {
            MatchOutcome::Match { identity, distance } => {
                tracing::debug!(
                    %identity,
                    distance,
                    seq = frame.sequence,
                    "known face recognized"
                );
                (Some(identity), Some(distance))
            }
            MatchOutcome::NoMatch { nearest } => {
                tracing::debug!(nearest = ?nearest, seq = frame.sequence, "unknown face");
                (None, nearest)
            }
        };

        events.push(MatchEvent {
            identity,
            distance,
            frame_sequence: frame.sequence,
            timestamp_ms: frame.timestamp_ms,
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::FrameHub;
    use std::time::Duration;
    use warden_core::{Embedding, FaceRegion, Identity, InferenceError};

    /// Reports one centered face whenever the frame is not all black.
    struct BrightnessDetector;

    impl FaceDetector for BrightnessDetector {
        fn detect(
            &mut self,
            rgb: &[u8],
            width: u32,
            height: u32,
        ) -> Result<Vec<FaceRegion>, InferenceError> {
            if rgb.iter().all(|&b| b == 0) {
                return Ok(Vec::new());
            }
            Ok(vec![FaceRegion {
                x: width as f32 / 4.0,
                y: height as f32 / 4.0,
                width: width as f32 / 2.0,
                height: height as f32 / 2.0,
                confidence: 0.9,
                landmarks: Some([(1.0, 1.0), (3.0, 1.0), (2.0, 2.0), (1.0, 3.0), (3.0, 3.0)]),
            }])
        }
    }

    /// Embeds the mean pixel value into the first component.
    struct MeanEmbedder;

    impl FaceEmbedder for MeanEmbedder {
        fn embed(
            &mut self,
            rgb: &[u8],
            _width: u32,
            _height: u32,
            _face: &FaceRegion,
        ) -> Result<Embedding, InferenceError> {
            let mean =
                rgb.iter().map(|&b| b as f32).sum::<f32>() / rgb.len().max(1) as f32 / 255.0;
            Ok(Embedding {
                values: vec![mean, 0.0, 0.0],
            })
        }
    }

    fn gallery_with(name: &str, first: f32) -> Gallery {
        Gallery::new(vec![Identity {
            name: name.to_string(),
            references: vec![Embedding {
                values: vec![first, 0.0, 0.0],
            }],
        }])
    }

    fn hub_frame(sequence: u64, value: u8) -> HubFrame {
        HubFrame {
            sequence,
            timestamp_ms: 1000 + sequence as i64,
            width: 16,
            height: 16,
            rgb: vec![value; 16 * 16 * 3],
            jpeg: vec![0xFF, 0xD8],
        }
    }

    const OPTS: PipelineOptions = PipelineOptions {
        sample_every: 2,
        downscale_factor: 0.25,
        tolerance: 0.6,
    };

    #[test]
    fn test_analyze_matches_known_face() {
        let gallery = gallery_with("alice", 200.0 / 255.0);
        let frame = Arc::new(hub_frame(4, 200));

        let events = analyze_frame(
            &mut BrightnessDetector,
            &mut MeanEmbedder,
            &gallery,
            OPTS,
            &frame,
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identity.as_deref(), Some("alice"));
        assert_eq!(events[0].frame_sequence, 4);
        assert!(events[0].distance.unwrap() < 0.1);
    }

    #[test]
    fn test_analyze_reports_unknown_face() {
        // Gallery reference far from any mean-pixel embedding.
        let gallery = gallery_with("alice", 10.0);
        let frame = Arc::new(hub_frame(2, 200));

        let events = analyze_frame(
            &mut BrightnessDetector,
            &mut MeanEmbedder,
            &gallery,
            OPTS,
            &frame,
        );

        assert_eq!(events.len(), 1);
        assert!(events[0].identity.is_none());
        assert!(events[0].distance.unwrap() > OPTS.tolerance);
    }

    #[test]
    fn test_analyze_with_empty_gallery_is_always_unknown() {
        let gallery = Gallery::default();
        let frame = Arc::new(hub_frame(2, 200));

        let events = analyze_frame(
            &mut BrightnessDetector,
            &mut MeanEmbedder,
            &gallery,
            OPTS,
            &frame,
        );

        assert_eq!(events.len(), 1);
        assert!(events[0].identity.is_none());
        assert!(events[0].distance.is_none());
    }

    #[test]
    fn test_analyze_empty_frame_yields_nothing() {
        let gallery = gallery_with("alice", 0.5);
        let frame = Arc::new(hub_frame(1, 0));

        let events = analyze_frame(
            &mut BrightnessDetector,
            &mut MeanEmbedder,
            &gallery,
            OPTS,
            &frame,
        );
        assert!(events.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_samples_every_other_frame() {
        let hub = FrameHub::new();
        let gallery = GalleryHandle::new(gallery_with("alice", 200.0 / 255.0));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = RecognitionPipeline::new(
            BrightnessDetector,
            MeanEmbedder,
            gallery,
            hub.subscribe(),
            event_tx,
            OPTS,
            shutdown_rx,
        );
        let task = tokio::spawn(pipeline.run());

        // Publish one frame at a time so none are coalesced; only every
        // second one is analyzed.
        for seq in 1..=4 {
            hub.publish(hub_frame(seq, 200));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let first = event_rx.recv().await.unwrap();
        assert_eq!(first.frame_sequence, 2);
        let second = event_rx.recv().await.unwrap();
        assert_eq!(second.frame_sequence, 4);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
