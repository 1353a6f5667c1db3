use anyhow::Result;
use image::{Rgb, RgbImage};
use rand::Rng;
use std::time::{Duration, Instant};

use super::{CaptureConfig, CaptureDevice};
use crate::error::LensError;
use crate::frame::{ChannelOrder, Frame};

pub(crate) const STUB_SCHEME: &str = "stub://";

/// Synthetic camera for `stub://` URIs.
///
/// Produces BGR frames: a static gradient with a bright square drifting
/// across it and a little sensor noise. `stub://unavailable` refuses to open.
pub struct SyntheticCamera {
    config: CaptureConfig,
    opened: bool,
    frame_count: u64,
    last_grab: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            opened: false,
            frame_count: 0,
            last_grab: None,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn frame_interval(&self) -> Option<Duration> {
        (self.config.fps > 0).then(|| Duration::from_secs(1) / self.config.fps)
    }

    fn render(&self) -> Frame {
        let (w, h) = (self.config.width.max(1), self.config.height.max(1));
        let side = (w.min(h) / 6).max(1);
        let travel = w.saturating_sub(side).max(1) as u64;
        let sx = (self.frame_count * 4 % travel) as u32;
        let sy = h / 2 - side.min(h) / 2;

        let mut rng = rand::thread_rng();
        let image = RgbImage::from_fn(w, h, |x, y| {
            if x >= sx && x < sx + side && y >= sy && y < sy + side {
                return Rgb([235, 235, 235]);
            }
            let noise: i16 = rng.gen_range(-3..=3);
            let b = ((x * 255 / w) as i16 + noise).clamp(0, 255) as u8;
            let g = ((y * 255 / h) as i16 + noise).clamp(0, 255) as u8;
            Rgb([b, g, 64])
        });
        Frame::new(image, ChannelOrder::Bgr)
    }
}

impl CaptureDevice for SyntheticCamera {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.config.uri)
    }

    fn open(&mut self) -> Result<()> {
        if self.config.uri == "stub://unavailable" {
            return Err(LensError::CameraUnavailable(self.config.uri.clone()).into());
        }
        self.opened = true;
        log::info!(
            "SyntheticCamera: connected to {} ({}x{} @ {} fps)",
            self.config.uri,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(())
    }

    fn grab(&mut self) -> Result<Frame> {
        if !self.opened {
            return Err(LensError::CameraUnavailable(format!("{} not open", self.config.uri)).into());
        }
        if let (Some(interval), Some(last)) = (self.frame_interval(), self.last_grab) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_grab = Some(Instant::now());
        self.frame_count += 1;
        Ok(self.render())
    }

    fn release(&mut self) {
        self.opened = false;
    }
}
