//! Frame ingestion.
//!
//! A `CaptureDevice` knows how to open a camera and grab one frame. A
//! `CameraStream` drives a device from its own thread and publishes into a
//! single-slot `LatestFrame`; the controller reads it through `FrameSource`.
//!
//! Sources:
//! - `stub://<name>` synthetic camera (tests, demos)
//! - `/dev/videoN` V4L2 devices (feature: ingest-v4l2)
//!
//! Captured frames stay in memory. Nothing here writes pixels to disk or
//! logs pixel content.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod stream;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::error::LensError;
use crate::frame::Frame;

pub use stream::CameraStream;
pub use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

/// Consumer side of a camera.
pub trait FrameSource: Send {
    /// Open the device and begin capturing. Fails with `CameraUnavailable`.
    fn start(&mut self) -> Result<()>;

    /// Freshest captured frame, or `None` before the first capture.
    fn read(&self) -> Option<Frame>;

    /// Suspend capture; `read` keeps returning the last frame.
    fn pause(&self);

    fn resume(&self);

    /// Stop capture and release the device. Idempotent.
    fn stop(&mut self);
}

/// Producer side of a camera, driven by a capture thread.
pub trait CaptureDevice: Send {
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn grab(&mut self) -> Result<Frame>;

    fn release(&mut self);
}

/// Requested capture parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureConfig {
    pub fn for_index(index: u32, width: u32, height: u32, fps: u32) -> Self {
        Self {
            uri: camera_uri(index),
            width,
            height,
            fps,
        }
    }
}

/// Device path for a camera index.
pub fn camera_uri(index: u32) -> String {
    format!("/dev/video{}", index)
}

/// Pick a capture device for a URI.
pub fn open_device(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>> {
    if config.uri.starts_with(synthetic::STUB_SCHEME) {
        return Ok(Box::new(SyntheticCamera::new(config.clone())));
    }
    open_hardware(config)
}

#[cfg(feature = "ingest-v4l2")]
fn open_hardware(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>> {
    Ok(Box::new(V4l2Camera::new(config.clone())))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_hardware(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>> {
    Err(LensError::CameraUnavailable(format!(
        "{}: built without ingest-v4l2; only stub:// cameras are available",
        config.uri
    ))
    .into())
}

/// Convenience: a started `CameraStream` for a capture config.
pub fn start_camera(config: &CaptureConfig) -> Result<CameraStream> {
    let device = open_device(config)?;
    let mut stream = CameraStream::new(device);
    stream.start()?;
    Ok(stream)
}

/// True when `err` carries a `CameraUnavailable` classification.
pub fn is_camera_unavailable(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<LensError>(),
        Some(LensError::CameraUnavailable(_))
    )
}
