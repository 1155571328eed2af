//! rollcall-hw: Camera capture and frame decoding.
//!
//! Provides V4L2-based camera access and conversion of raw camera buffers
//! and uploaded stills into RGB frames for the detector.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{decode_still, Frame, FrameError};
