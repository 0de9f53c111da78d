//! Raw frame type and image operations — YUYV conversion, bilinear resize,
//! JPEG encode/decode.

use image::ImageEncoder;
use thiserror::Error;

/// A raw RGB frame as produced by a capture device, before the frame
/// source stamps it with a sequence number and timestamp.
#[derive(Clone)]
pub struct RawFrame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("JPEG encode failed: {0}")]
    Encode(image::ImageError),
    #[error("JPEG decode failed: {0}")]
    Decode(image::ImageError),
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], with U/V shared
/// between the pixel pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for &y in [chunk[0], chunk[2]].iter() {
            let y = y as f32;
            let r = y + 1.402 * v;
            let g = y - 0.344_136 * u - 0.714_136 * v;
            let b = y + 1.772 * u;
            rgb.push(r.round().clamp(0.0, 255.0) as u8);
            rgb.push(g.round().clamp(0.0, 255.0) as u8);
            rgb.push(b.round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Resize a packed RGB8 image with bilinear interpolation.
///
/// Returns a `dst_width * dst_height * 3` buffer. Degenerate target
/// dimensions yield an empty buffer.
pub fn resize_rgb(
    src: &[u8],
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
) -> Vec<u8> {
    let sw = src_width as usize;
    let sh = src_height as usize;
    let dw = dst_width as usize;
    let dh = dst_height as usize;
    if sw == 0 || sh == 0 || dw == 0 || dh == 0 || src.len() < sw * sh * 3 {
        return Vec::new();
    }

    let x_ratio = sw as f32 / dw as f32;
    let y_ratio = sh as f32 / dh as f32;

    let mut dst = vec![0u8; dw * dh * 3];
    for dy in 0..dh {
        let src_y = (dy as f32 + 0.5) * y_ratio - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, sh as i32 - 1) as usize;
        let y1 = (y0 + 1).min(sh - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for dx in 0..dw {
            let src_x = (dx as f32 + 0.5) * x_ratio - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, sw as i32 - 1) as usize;
            let x1 = (x0 + 1).min(sw - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = src[(y0 * sw + x0) * 3 + c] as f32;
                let tr = src[(y0 * sw + x1) * 3 + c] as f32;
                let bl = src[(y1 * sw + x0) * 3 + c] as f32;
                let br = src[(y1 * sw + x1) * 3 + c] as f32;

                let top = tl * (1.0 - fx) + tr * fx;
                let bot = bl * (1.0 - fx) + br * fx;
                let val = top * (1.0 - fy) + bot * fy;

                dst[(dy * dw + dx) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    dst
}

/// Encode a packed RGB8 buffer as JPEG at the given quality (1-100).
pub fn encode_jpeg(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 3) as usize;
    if rgb.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: rgb.len(),
        });
    }

    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .write_image(&rgb[..expected], width, height, image::ExtendedColorType::Rgb8)
        .map_err(FrameError::Encode)?;
    Ok(out)
}

/// Decode a JPEG byte buffer (e.g. an MJPG capture buffer) into an RGB frame.
pub fn decode_jpeg(buf: &[u8]) -> Result<RawFrame, FrameError> {
    let img = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
        .map_err(FrameError::Decode)?
        .to_rgb8();
    let (width, height) = img.dimensions();
    Ok(RawFrame {
        rgb: img.into_raw(),
        width,
        height,
    })
}
