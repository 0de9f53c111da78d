//! warden-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access, pixel-format conversion to RGB,
//! and the frame operations (resize, JPEG encode) the daemon builds on.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureSource, PixelFormat, V4lCaptureSource};
pub use frame::RawFrame;
