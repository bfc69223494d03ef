//! Frame type and raw-buffer conversion into RGB.

use image::{Rgb, RgbImage};

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPG decode failed: {0}")]
    Decode(String),
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// BT.601 limited-range YCbCr to RGB.
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    Rgb([
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ])
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// Two pixels per 4 bytes `[Y0, U, Y1, V]`, sharing one chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("YUYV", yuyv, pixels * 2)?;

    let mut raw = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        raw.extend_from_slice(&ycbcr_to_rgb(y0, u, v).0);
        raw.extend_from_slice(&ycbcr_to_rgb(y1, u, v).0);
    }
    // Odd width: the last pixel carries no chroma pair of its own.
    raw.truncate(pixels * 3);
    raw.resize(pixels * 3, 0);
    RgbImage::from_raw(width, height, raw).ok_or(FrameError::InvalidLength {
        format: "YUYV",
        expected: pixels * 2,
        actual: yuyv.len(),
    })
}

/// Replicate 8-bit grayscale into three channels.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("GREY", gray, pixels)?;
    let raw = gray[..pixels].iter().flat_map(|&g| [g, g, g]).collect();
    RgbImage::from_raw(width, height, raw).ok_or(FrameError::InvalidLength {
        format: "GREY",
        expected: pixels,
        actual: gray.len(),
    })
}

/// Decode a motion-JPEG buffer.
pub fn mjpg_to_rgb(buf: &[u8]) -> Result<RgbImage, FrameError> {
    image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| FrameError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // Y=16 is black and Y=235 is white in limited range.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_red_chroma() {
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let [r, g, b] = rgb.get_pixel(0, 0).0;
        assert!(r > 240 && g < 15 && b < 15, "got {r},{g},{b}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let err = yuyv_to_rgb(&[100, 128], 2, 1).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 4, actual: 2, .. }));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 200, 0, 0], 2, 2).unwrap();
        assert_eq!(rgb.dimensions(), (2, 2));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([200, 200, 200]));
    }

    #[test]
    fn test_grey_too_short() {
        assert!(grey_to_rgb(&[1, 2, 3], 2, 2).is_err());
    }

    #[test]
    fn test_mjpg_roundtrip_dimensions() {
        let source = RgbImage::from_pixel(16, 8, Rgb([10, 120, 200]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(source)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();
        let decoded = mjpg_to_rgb(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn test_mjpg_garbage() {
        assert!(matches!(mjpg_to_rgb(b"nope"), Err(FrameError::Decode(_))));
    }
}
