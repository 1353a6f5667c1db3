//! Frame to model-input conversion.
//!
//! resize -> color order to RGB -> scale to [0, 1] -> HWC to CHW -> batch axis.
//! Pure and deterministic.

use anyhow::Result;
use image::imageops::{self, FilterType};

use super::backend::Tensor;
use crate::frame::{ChannelOrder, Frame};

/// Build the `[1, 3, height, width]` input tensor for a frame.
pub fn preprocess(frame: &Frame, width: u32, height: u32) -> Result<Tensor> {
    let resized;
    let image = if frame.width() == width && frame.height() == height {
        frame.image()
    } else {
        resized = imageops::resize(frame.image(), width, height, FilterType::Triangle);
        &resized
    };

    let (r_idx, b_idx) = match frame.order() {
        ChannelOrder::Rgb => (0usize, 2usize),
        ChannelOrder::Bgr => (2, 0),
    };

    let plane = width as usize * height as usize;
    let mut data = vec![0f32; plane * 3];
    for (i, px) in image.pixels().enumerate() {
        data[i] = px.0[r_idx] as f32 / 255.0;
        data[plane + i] = px.0[1] as f32 / 255.0;
        data[2 * plane + i] = px.0[b_idx] as f32 / 255.0;
    }

    Tensor::new(vec![1, 3, height as usize, width as usize], data)
}
