//! Camera capture loop.
//!
//! Runs on a dedicated thread (device I/O is blocking) and publishes
//! frames into the hub. Each camera session is opened with a bounded
//! retry policy; in unattended mode a failed session is retried forever
//! after a recovery pause, in attended mode the loop exits with the
//! error so the daemon can shut down.

use crate::hub::{FrameHub, HubFrame};
use crate::status::SystemStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use warden_hw::camera::{CameraError, CaptureSource};
use warden_hw::frame;

pub struct SourceOptions {
    pub frame_interval: Duration,
    pub open_retry_attempts: u32,
    pub retry_delay: Duration,
    pub recovery_pause: Duration,
    pub unattended: bool,
    pub jpeg_quality: u8,
}

pub struct FrameSource<C: CaptureSource> {
    capture: C,
    opts: SourceOptions,
    hub: FrameHub,
    status: Arc<SystemStatus>,
    shutdown: watch::Receiver<bool>,
    sequence: u64,
}

impl<C: CaptureSource> FrameSource<C> {
    pub fn new(
        capture: C,
        opts: SourceOptions,
        hub: FrameHub,
        status: Arc<SystemStatus>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            capture,
            opts,
            hub,
            status,
            shutdown,
            sequence: 0,
        }
    }

    /// Blocking capture loop. Returns `Ok(())` on shutdown, or the last
    /// open error when attended mode gives up on the camera.
    pub fn run(mut self) -> Result<(), CameraError> {
        loop {
            if self.should_stop() {
                break;
            }

            match self.open_with_retry() {
                Ok(()) => {
                    self.status.set_camera_active(true);
                    match self.capture_until_failure() {
                        Ok(()) => break, // shutdown requested
                        Err(e) => {
                            tracing::warn!(error = %e, "frame grab failed; reopening camera");
                        }
                    }
                }
                Err(e) => {
                    self.status.set_camera_active(false);
                    if self.should_stop() {
                        break;
                    }
                    if !self.opts.unattended {
                        tracing::error!(error = %e, "camera unavailable; giving up");
                        return Err(e);
                    }
                    tracing::warn!(
                        error = %e,
                        pause_ms = self.opts.recovery_pause.as_millis() as u64,
                        "camera unavailable; pausing before next attempt"
                    );
                    self.sleep_interruptible(self.opts.recovery_pause);
                }
            }
        }

        self.capture.close();
        self.status.set_camera_active(false);
        tracing::info!("frame source stopped");
        Ok(())
    }

    fn should_stop(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Open the device, retrying a bounded number of times with a fixed
    /// delay between attempts.
    fn open_with_retry(&mut self) -> Result<(), CameraError> {
        self.capture.close();

        let mut last_err = None;
        for attempt in 1..=self.opts.open_retry_attempts {
            match self.capture.open() {
                Ok(()) => {
                    tracing::info!(attempt, "camera opened");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max = self.opts.open_retry_attempts,
                        error = %e,
                        "camera open failed"
                    );
                    last_err = Some(e);
                }
            }
            if self.should_stop() {
                break;
            }
            if attempt < self.opts.open_retry_attempts {
                self.sleep_interruptible(self.opts.retry_delay);
            }
        }

        Err(last_err.unwrap_or(CameraError::NotOpen))
    }

    /// Grab frames until shutdown (`Ok`) or a capture error invalidates
    /// the session (`Err`). The device is closed either way.
    fn capture_until_failure(&mut self) -> Result<(), CameraError> {
        loop {
            if self.should_stop() {
                return Ok(());
            }

            let started = Instant::now();
            match self.capture.grab() {
                Ok(raw) => self.publish(raw),
                Err(e) => {
                    self.status.set_camera_active(false);
                    self.capture.close();
                    return Err(e);
                }
            }

            let elapsed = started.elapsed();
            if elapsed < self.opts.frame_interval {
                self.sleep_interruptible(self.opts.frame_interval - elapsed);
            }
        }
    }

    fn publish(&mut self, raw: warden_hw::RawFrame) {
        let jpeg = match frame::encode_jpeg(&raw.rgb, raw.width, raw.height, self.opts.jpeg_quality)
        {
            Ok(jpeg) => jpeg,
            Err(e) => {
                tracing::warn!(error = %e, "frame encode failed; frame dropped");
                return;
            }
        };

        self.sequence += 1;
        self.hub.publish(HubFrame {
            sequence: self.sequence,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            width: raw.width,
            height: raw.height,
            rgb: raw.rgb,
            jpeg,
        });
    }

    /// Sleep in small slices so shutdown is honored promptly.
    fn sleep_interruptible(&self, total: Duration) {
        let slice = Duration::from_millis(50);
        let deadline = Instant::now() + total;
        loop {
            if self.should_stop() {
                return;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return;
            };
            if remaining.is_zero() {
                return;
            }
            std::thread::sleep(remaining.min(slice));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use warden_hw::RawFrame;

    /// Capture source driven by queued open/grab results.
    struct ScriptedCapture {
        opens: VecDeque<Result<(), CameraError>>,
        grabs: VecDeque<Result<RawFrame, CameraError>>,
        open: bool,
    }

    impl ScriptedCapture {
        fn new(
            opens: Vec<Result<(), CameraError>>,
            grabs: Vec<Result<RawFrame, CameraError>>,
        ) -> Self {
            Self {
                opens: opens.into(),
                grabs: grabs.into(),
                open: false,
            }
        }
    }

    impl CaptureSource for ScriptedCapture {
        fn open(&mut self) -> Result<(), CameraError> {
            match self.opens.pop_front() {
                Some(Ok(())) | None => {
                    self.open = true;
                    Ok(())
                }
                Some(Err(e)) => Err(e),
            }
        }

        fn grab(&mut self) -> Result<RawFrame, CameraError> {
            if !self.open {
                return Err(CameraError::NotOpen);
            }
            match self.grabs.pop_front() {
                Some(result) => result,
                // Script exhausted: idle until the test shuts the loop down.
                None => Ok(good_frame()),
            }
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn good_frame() -> RawFrame {
        RawFrame {
            rgb: vec![90u8; 4 * 4 * 3],
            width: 4,
            height: 4,
        }
    }

    fn fast_options(unattended: bool) -> SourceOptions {
        SourceOptions {
            frame_interval: Duration::from_millis(1),
            open_retry_attempts: 3,
            retry_delay: Duration::from_millis(1),
            recovery_pause: Duration::from_millis(1),
            unattended,
            jpeg_quality: 80,
        }
    }

    fn wait_for_sequence(hub: &FrameHub, target: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if hub.latest().map(|f| f.sequence).unwrap_or(0) >= target {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("hub never reached sequence {target}");
    }

    #[test]
    fn test_recovers_after_failed_open_cycle() {
        // First session: all three open attempts fail. Unattended mode
        // pauses and retries; the fourth attempt succeeds.
        let capture = ScriptedCapture::new(
            vec![
                Err(CameraError::DeviceBusy),
                Err(CameraError::DeviceBusy),
                Err(CameraError::DeviceBusy),
                Ok(()),
            ],
            vec![Ok(good_frame()), Ok(good_frame()), Ok(good_frame())],
        );

        let hub = FrameHub::new();
        let status = Arc::new(SystemStatus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let source = FrameSource::new(
            capture,
            fast_options(true),
            hub.clone(),
            status.clone(),
            shutdown_rx,
        );
        let handle = std::thread::spawn(move || source.run());

        wait_for_sequence(&hub, 3);
        assert!(status.camera_active());

        shutdown_tx.send(true).unwrap();
        handle.join().unwrap().unwrap();
        assert!(!status.camera_active());
    }

    #[test]
    fn test_attended_mode_exits_on_open_failure() {
        let capture = ScriptedCapture::new(
            vec![
                Err(CameraError::DeviceBusy),
                Err(CameraError::DeviceBusy),
                Err(CameraError::DeviceBusy),
            ],
            vec![],
        );

        let hub = FrameHub::new();
        let status = Arc::new(SystemStatus::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let source = FrameSource::new(
            capture,
            fast_options(false),
            hub.clone(),
            status.clone(),
            shutdown_rx,
        );
        let result = source.run();

        assert!(matches!(result, Err(CameraError::DeviceBusy)));
        assert!(!status.camera_active());
        assert!(!hub.has_frames());
    }

    #[test]
    fn test_reopens_after_mid_stream_grab_failure() {
        let capture = ScriptedCapture::new(
            vec![Ok(()), Ok(())],
            vec![
                Ok(good_frame()),
                Ok(good_frame()),
                Err(CameraError::CaptureFailed("stream stalled".into())),
                Ok(good_frame()),
                Ok(good_frame()),
            ],
        );

        let hub = FrameHub::new();
        let status = Arc::new(SystemStatus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let source = FrameSource::new(
            capture,
            fast_options(true),
            hub.clone(),
            status.clone(),
            shutdown_rx,
        );
        let handle = std::thread::spawn(move || source.run());

        // Sequence keeps growing across the mid-stream failure.
        wait_for_sequence(&hub, 4);

        shutdown_tx.send(true).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_published_frames_carry_jpeg() {
        let capture = ScriptedCapture::new(vec![Ok(())], vec![Ok(good_frame())]);
        let hub = FrameHub::new();
        let status = Arc::new(SystemStatus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let source = FrameSource::new(
            capture,
            fast_options(true),
            hub.clone(),
            status,
            shutdown_rx,
        );
        let handle = std::thread::spawn(move || source.run());

        wait_for_sequence(&hub, 1);
        let frame = hub.latest().unwrap();
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8], "expected JPEG SOI marker");
        assert_eq!(frame.rgb.len(), 4 * 4 * 3);

        shutdown_tx.send(true).unwrap();
        handle.join().unwrap().unwrap();
    }
}
