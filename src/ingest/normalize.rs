use anyhow::{anyhow, Result};

use crate::frame::{ChannelOrder, Frame};

/// Capture formats a device may hand back after format negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }
}

/// Convert one captured buffer into an RGB `Frame`.
pub(crate) fn to_frame(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Frame> {
    let w = width as usize;
    let h = height as usize;
    let plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;

    let rgb = match format {
        PixelFormat::Rgb24 => {
            check_len(format, pixels, plane * 3)?;
            pixels.to_vec()
        }
        PixelFormat::Yuyv => {
            check_len(format, pixels, plane * 2)?;
            let mut rgb = Vec::with_capacity(plane * 3);
            // Y0 U Y1 V covers two pixels.
            for quad in pixels.chunks_exact(4) {
                let (u, v) = (quad[1], quad[3]);
                rgb.extend_from_slice(&yuv_to_rgb(quad[0], u, v));
                rgb.extend_from_slice(&yuv_to_rgb(quad[2], u, v));
            }
            rgb
        }
        PixelFormat::Nv12 => {
            check_len(format, pixels, plane + plane / 2)?;
            let mut rgb = Vec::with_capacity(plane * 3);
            for j in 0..h {
                for i in 0..w {
                    let uv = plane + (j / 2) * w + (i / 2) * 2;
                    rgb.extend_from_slice(&yuv_to_rgb(pixels[j * w + i], pixels[uv], pixels[uv + 1]));
                }
            }
            rgb
        }
    };

    Frame::from_raw(width, height, rgb, ChannelOrder::Rgb)
}

fn check_len(format: PixelFormat, pixels: &[u8], expected: usize) -> Result<()> {
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        clamp_to_u8(y + 1.402 * v),
        clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v),
        clamp_to_u8(y + 1.772 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
