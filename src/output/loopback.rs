//! v4l2loopback output.
//!
//! Frames are converted to YUYV, which browsers and conferencing apps accept
//! from loopback devices, and written with plain `write(2)` I/O.

use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;

use super::{FramePacer, OutputConfig, VirtualCamera};
use crate::frame::Frame;

pub struct V4l2LoopbackCamera {
    path: String,
    file: File,
    width: u32,
    height: u32,
    fps: u32,
    pacer: FramePacer,
    buffer: Vec<u8>,
}

impl V4l2LoopbackCamera {
    pub fn open(config: &OutputConfig) -> Result<Self> {
        use v4l::video::Output;

        if config.width % 2 != 0 {
            bail!("YUYV output needs an even width, got {}", config.width);
        }
        let device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 output {}", config.device))?;
        let mut format = Output::format(&device).context("read v4l2 output format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");
        let format = Output::set_format(&device, &format).context("set v4l2 output format")?;
        if format.width != config.width || format.height != config.height {
            bail!(
                "device accepted {}x{} instead of {}x{}",
                format.width,
                format.height,
                config.width,
                config.height
            );
        }

        let file = OpenOptions::new()
            .write(true)
            .open(&config.device)
            .with_context(|| format!("open {} for writing", config.device))?;

        log::info!(
            "V4l2LoopbackCamera: streaming to {} ({}x{} @ {} fps)",
            config.device,
            config.width,
            config.height,
            config.fps
        );
        Ok(Self {
            path: config.device.clone(),
            file,
            width: config.width,
            height: config.height,
            fps: config.fps,
            pacer: FramePacer::new(config.fps),
            buffer: Vec::with_capacity(config.width as usize * config.height as usize * 2),
        })
    }
}

/// Pack RGB pixels as YUYV (BT.601, full range).
fn rgb_to_yuyv(frame: &Frame, out: &mut Vec<u8>) {
    out.clear();
    let (w, h) = (frame.width(), frame.height());
    for y in 0..h {
        for x in (0..w).step_by(2) {
            let a = frame.rgb_at(x, y);
            let b = frame.rgb_at((x + 1).min(w - 1), y);
            let (y0, u0, v0) = to_yuv(a);
            let (y1, u1, v1) = to_yuv(b);
            out.extend_from_slice(&[
                y0,
                ((u0 as u16 + u1 as u16) / 2) as u8,
                y1,
                ((v0 as u16 + v1 as u16) / 2) as u8,
            ]);
        }
    }
}

fn to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;
    let c = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    (c(y), c(u), c(v))
}

impl VirtualCamera for V4l2LoopbackCamera {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn send(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            bail!(
                "frame {}x{} does not match sink {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        rgb_to_yuyv(frame, &mut self.buffer);
        self.pacer.wait();
        self.file
            .write_all(&self.buffer)
            .with_context(|| format!("write frame to {}", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;

    #[test]
    fn gray_packs_to_neutral_chroma() {
        let frame = Frame::solid(2, 1, [128, 128, 128], ChannelOrder::Bgr);
        let mut out = Vec::new();
        rgb_to_yuyv(&frame, &mut out);
        assert_eq!(out, vec![128, 128, 128, 128]);
    }
}
