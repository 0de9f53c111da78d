//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, RawFrame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("device not open")]
    NotOpen,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, converted to RGB).
    Yuyv,
    /// Packed 24-bit RGB, passed through as-is.
    Rgb24,
    /// Motion-JPEG, decoded per frame.
    Mjpeg,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    ///
    /// Requests YUYV at 640x480; accepts RGB3 or MJPG if the driver
    /// negotiates those instead.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = 640;
        fmt.height = 480;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, RGB3, or MJPG)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Capture a single frame, converting to RGB8.
    pub fn capture_rgb(&self) -> Result<RawFrame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        let (buf, _meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        self.buf_to_rgb(buf)
    }

    /// Convert a raw capture buffer to an RGB frame per the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<RawFrame, CameraError> {
        let pixels = (self.width * self.height) as usize;

        match self.pixel_format {
            PixelFormat::Rgb24 => {
                let expected = pixels * 3;
                if buf.len() < expected {
                    return Err(CameraError::CaptureFailed(format!(
                        "RGB3 buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                Ok(RawFrame {
                    rgb: buf[..expected].to_vec(),
                    width: self.width,
                    height: self.height,
                })
            }
            PixelFormat::Yuyv => {
                let rgb = frame::yuyv_to_rgb(buf, self.width, self.height)
                    .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion: {e}")))?;
                Ok(RawFrame {
                    rgb,
                    width: self.width,
                    height: self.height,
                })
            }
            PixelFormat::Mjpeg => frame::decode_jpeg(buf)
                .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode: {e}"))),
        }
    }
}

/// Seam between the frame source loop and the physical device, so the
/// reconnect policy can be exercised without hardware.
///
/// A `grab` error invalidates the session; callers must `close` and
/// `open` again before grabbing more frames.
pub trait CaptureSource: Send {
    /// (Re)open the underlying device.
    fn open(&mut self) -> Result<(), CameraError>;
    /// Grab and convert one frame.
    fn grab(&mut self) -> Result<RawFrame, CameraError>;
    /// Release the device.
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

/// Production capture source backed by a V4L2 device.
pub struct V4lCaptureSource {
    device_path: String,
    camera: Option<Camera>,
}

impl V4lCaptureSource {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            camera: None,
        }
    }
}

impl CaptureSource for V4lCaptureSource {
    fn open(&mut self) -> Result<(), CameraError> {
        self.camera = Some(Camera::open(&self.device_path)?);
        Ok(())
    }

    fn grab(&mut self) -> Result<RawFrame, CameraError> {
        let camera = self.camera.as_ref().ok_or(CameraError::NotOpen)?;
        camera.capture_rgb()
    }

    fn close(&mut self) {
        if self.camera.take().is_some() {
            tracing::debug!(device = %self.device_path, "released camera");
        }
    }

    fn is_open(&self) -> bool {
        self.camera.is_some()
    }
}
