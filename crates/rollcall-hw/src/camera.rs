//! Continuous V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const MAX_SCANNED_DEVICES: usize = 16;

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
    #[error("device cannot capture video")]
    NotACaptureDevice,
}

/// Source of RGB frames for the continuous capture loop.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable source name for logs and status output.
    fn describe(&self) -> String;
}

/// A V4L2 node that advertises video capture.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera may hand back after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes per pixel.
    Yuyv,
    /// Motion-JPEG; each buffer is a complete JPEG image.
    Mjpeg,
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<image::RgbImage, frame::FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            Self::Grey => frame::grey_to_rgb(buf, width, height),
            Self::Mjpeg => frame::decode_still(buf).map(|f| f.image),
        }
    }
}

/// Webcam that keeps one mmap stream open for its whole lifetime.
pub struct Camera {
    device: Device,
    /// Opened on the first capture and reused afterwards.
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a camera by path (e.g. "/dev/video0") and negotiate 640x480.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("capability query: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotACaptureDevice);
        }
        tracing::info!(device = device_path, card = %caps.card, driver = %caps.driver, "camera opened");

        let (width, height, pixel_format) = negotiate(&device)?;
        tracing::info!(width, height, format = ?pixel_format, "camera format negotiated");

        Ok(Self {
            device,
            stream: None,
            width,
            height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Dequeue the next buffer and convert it to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("mmap stream: {e}")))?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream unavailable".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue: {e}")))?;
        let sequence = meta.sequence;

        let image = self
            .pixel_format
            .to_rgb(buf, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("{:?} frame: {e}", self.pixel_format)))?;

        Ok(Frame {
            image,
            sequence,
        })
    }

    /// Scan `/dev/video0` through `/dev/video15` for capture-capable nodes.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_SCANNED_DEVICES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

fn open_error(device_path: &str, e: std::io::Error) -> CameraError {
    if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{device_path}: {e}"))
    }
}

/// Ask for YUYV at the default size; webcams that only stream MJPG or GREY
/// answer with those instead.
fn negotiate(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = REQUESTED_WIDTH;
    fmt.height = REQUESTED_HEIGHT;

    let negotiated = device
        .set_format(&fmt)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format {} (need YUYV, MJPG or GREY)",
            negotiated.fourcc
        ))
    })?;
    Ok((negotiated.width, negotiated.height, pixel_format))
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn describe(&self) -> String {
        format!(
            "{} {}x{} {:?}",
            self.device_path, self.width, self.height, self.pixel_format
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_grey_buffer_converts() {
        let rgb = PixelFormat::Grey.to_rgb(&[10, 20, 30, 40], 2, 2).unwrap();
        assert_eq!(rgb.get_pixel(1, 1).0, [40, 40, 40]);
    }

    #[test]
    fn test_short_yuyv_buffer_is_error() {
        assert!(PixelFormat::Yuyv.to_rgb(&[0; 4], 4, 4).is_err());
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/does-not-exist"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
