//! V4L2 camera capture via the `v4l` crate.
//!
//! The live loop needs colour frames, so the camera asks for YUYV at 640×480
//! and accepts whatever of YUYV, MJPG or GREY the driver settles on.

use crate::frame::{self, Frame};
use image::RgbImage;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_SIZE: (u32, u32) = (640, 480);
const STREAM_BUFFERS: u32 = 4;
const MAX_PROBED_DEVICES: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    NotFound(String),
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: std::io::Error },
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("format negotiation: {0}")]
    Format(String),
    #[error("capture: {0}")]
    Capture(String),
}

/// A video capture node found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera can deliver and [`frame`] can convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// One JPEG per buffer.
    Mjpg,
    /// 8-bit luma, replicated into RGB.
    Grey,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<RgbImage, frame::FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            Self::Grey => frame::grey_to_rgb(buf, width, height),
            Self::Mjpg => frame::mjpg_to_rgb(buf),
        }
    }
}

/// An opened V4L2 capture device with a negotiated format.
pub struct Camera {
    device: Device,
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a capture device by path, e.g. `/dev/video0`.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::NotFound(device_path.to_string()));
        }
        let device = Device::with_path(device_path).map_err(|source| CameraError::Open {
            path: device_path.to_string(),
            source,
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::Capture(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCapture(device_path.to_string()));
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let (width, height, pixel_format) = negotiate(&device)?;
        tracing::info!(width, height, format = ?pixel_format, "negotiated format");

        Ok(Self {
            device,
            device_path: device_path.to_string(),
            width,
            height,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Start streaming. Frames are pulled with [`FrameStream::next_frame`].
    pub fn stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::Capture(format!("mmap stream: {e}")))?;
        Ok(FrameStream { camera: self, stream })
    }

    /// Capture one frame on a short-lived stream.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        self.stream()?.next_frame()
    }

    /// Capture-capable nodes among `/dev/video0` .. `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_PROBED_DEVICES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities.contains(Flags::VIDEO_CAPTURE).then(|| DeviceInfo {
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                    path,
                })
            })
            .collect()
    }
}

fn negotiate(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut wanted = device
        .format()
        .map_err(|e| CameraError::Format(format!("read current format: {e}")))?;
    wanted.fourcc = FourCC::new(b"YUYV");
    (wanted.width, wanted.height) = REQUESTED_SIZE;

    let got = device
        .set_format(&wanted)
        .map_err(|e| CameraError::Format(format!("set format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(got.fourcc)
        .ok_or_else(|| CameraError::Format(format!("driver chose {}, need YUYV, MJPG or GREY", got.fourcc)))?;
    Ok((got.width, got.height, pixel_format))
}

/// An active capture stream borrowing its camera.
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl FrameStream<'_> {
    /// Block until the next buffer is dequeued, then convert it to RGB.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::Capture(format!("dequeue buffer: {e}")))?;
        // Some drivers leave bytesused at zero.
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let sequence = meta.sequence;
        let camera = self.camera;
        let image = camera
            .pixel_format
            .to_rgb(&buf[..used], camera.width, camera.height)
            .map_err(|e| CameraError::Capture(format!("{:?} frame: {e}", camera.pixel_format)))?;
        Ok(Frame {
            image,
            timestamp: Instant::now(),
            sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_fourccs() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_grey_buffer_converts() {
        let rgb = PixelFormat::Grey.to_rgb(&[10, 20, 30, 40], 2, 2).unwrap();
        assert_eq!(rgb.get_pixel(1, 1).0, [40, 40, 40]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(PixelFormat::Yuyv.to_rgb(&[0; 6], 2, 2).is_err());
    }

    #[test]
    fn test_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist").err().unwrap();
        assert!(matches!(err, CameraError::NotFound(_)));
    }
}
