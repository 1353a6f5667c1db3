//! Virtual camera sinks.
//!
//! The controller pushes one frame per cycle to an optional `VirtualCamera`.
//! Opening a sink is best-effort: failure is `VirtualCameraUnavailable` and the
//! controller simply runs without one.

#[cfg(feature = "ingest-v4l2")]
mod loopback;
mod memory;
mod pacer;

use anyhow::Result;

use crate::error::LensError;
use crate::frame::Frame;

#[cfg(feature = "ingest-v4l2")]
pub use loopback::V4l2LoopbackCamera;
pub use memory::{MemoryCamera, SentFrames};
pub use pacer::FramePacer;

/// Frame sink at a fixed resolution and rate.
pub trait VirtualCamera: Send {
    fn describe(&self) -> String;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn fps(&self) -> u32;

    /// Deliver one frame sized `width() x height()`. May block to pace output
    /// to `fps()`.
    fn send(&mut self, frame: &Frame) -> Result<()>;
}

/// Requested sink parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Open a sink. `memory://` gives an in-process `MemoryCamera`; anything else
/// is a v4l2loopback device node.
pub fn open_virtual_camera(config: &OutputConfig) -> Result<Box<dyn VirtualCamera>> {
    if config.device.starts_with("memory://") {
        return Ok(Box::new(MemoryCamera::new(config.width, config.height, config.fps)));
    }
    open_loopback(config).map_err(|err| {
        LensError::VirtualCameraUnavailable(format!("{}: {:#}", config.device, err)).into()
    })
}

#[cfg(feature = "ingest-v4l2")]
fn open_loopback(config: &OutputConfig) -> Result<Box<dyn VirtualCamera>> {
    Ok(Box::new(V4l2LoopbackCamera::open(config)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_loopback(_config: &OutputConfig) -> Result<Box<dyn VirtualCamera>> {
    anyhow::bail!("built without ingest-v4l2")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_scheme_opens_in_process_sink() -> Result<()> {
        let config = OutputConfig {
            device: "memory://preview".into(),
            width: 320,
            height: 240,
            fps: 0,
        };
        let camera = open_virtual_camera(&config)?;
        assert_eq!((camera.width(), camera.height()), (320, 240));
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn loopback_without_feature_is_unavailable() {
        let config = OutputConfig {
            device: "/dev/video20".into(),
            width: 640,
            height: 480,
            fps: 30,
        };
        let err = open_virtual_camera(&config).err().expect("error");
        assert!(matches!(
            err.downcast_ref::<LensError>(),
            Some(LensError::VirtualCameraUnavailable(_))
        ));
    }
}
