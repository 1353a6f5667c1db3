//! Pixel operations: redaction blur, preview annotations, synthetic frames.
//!
//! All colors are given in RGB and encoded to the frame's channel order here.

use image::imageops::{self, FilterType};
use image::Rgb;
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;

use crate::frame::{ChannelOrder, Frame};
use crate::geometry::BBox;

/// Blur kernel edge length at the reference resolution.
pub const REFERENCE_KERNEL: u32 = 99;
pub const REFERENCE_WIDTH: u32 = 640;
pub const REFERENCE_HEIGHT: u32 = 480;

const ACTIVE_BORDER: [u8; 3] = [200, 0, 0];
const FADING_BORDER: [u8; 3] = [255, 140, 0];
const OUTER_BORDER: [u8; 3] = [120, 0, 0];
const BLOCKED_BACKGROUND: [u8; 3] = [18, 18, 18];
const BLOCKED_SIGN: [u8; 3] = [220, 30, 30];
const PAUSED_BACKGROUND: [u8; 3] = [40, 40, 40];
const PAUSED_SIGN: [u8; 3] = [170, 170, 170];

/// Kernel size for a frame, scaled from the reference resolution and kept odd.
pub fn kernel_size(width: u32, height: u32) -> u32 {
    let scale = (width as f32 / REFERENCE_WIDTH as f32).max(height as f32 / REFERENCE_HEIGHT as f32);
    let k = ((REFERENCE_KERNEL as f32 * scale).round() as u32).max(3);
    k | 1
}

/// Gaussian sigma equivalent to a `k`-tap kernel with automatic sigma.
pub fn sigma_for_kernel(k: u32) -> f32 {
    0.3 * ((k as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Blur `region` in place with two stacked Gaussian passes.
pub fn heavy_blur(frame: &mut Frame, region: BBox) {
    let region = region.clamped(frame.width(), frame.height());
    if region.is_empty() {
        return;
    }
    let sigma = sigma_for_kernel(kernel_size(frame.width(), frame.height()));
    let image = frame.image_mut();
    let roi = imageops::crop_imm(
        image,
        region.x1,
        region.y1,
        region.width(),
        region.height(),
    )
    .to_image();
    let once = imageops::blur(&roi, sigma);
    let twice = imageops::blur(&once, sigma);
    imageops::replace(image, &twice, region.x1 as i64, region.y1 as i64);
}

/// Blur the whole frame with the same stacked passes.
pub fn blur_entire(frame: &mut Frame) {
    let all = BBox::new(0, 0, frame.width(), frame.height());
    heavy_blur(frame, all);
}

/// Two-pixel border around a redacted region plus a dark outer line.
/// Fading regions (cooldown > 0) use a distinct color.
pub fn draw_region_border(frame: &mut Frame, region: BBox, fading: bool) {
    let region = region.clamped(frame.width(), frame.height());
    if region.width() < 3 || region.height() < 3 {
        return;
    }
    let order = frame.order();
    let main = Rgb(order.encode(if fading { FADING_BORDER } else { ACTIVE_BORDER }));
    let outer = Rgb(order.encode(OUTER_BORDER));
    let (x, y) = (region.x1 as i32, region.y1 as i32);
    let (w, h) = (region.width(), region.height());

    let image = frame.image_mut();
    draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w, h), main);
    draw_hollow_rect_mut(image, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), main);
    draw_hollow_rect_mut(image, Rect::at(x - 1, y - 1).of_size(w + 2, h + 2), outer);
}

/// Solid frame with a "no entry" sign, sent to the virtual camera during lockout.
pub fn blocked_frame(width: u32, height: u32, order: ChannelOrder) -> Frame {
    let mut frame = Frame::solid(width, height, BLOCKED_BACKGROUND, order);
    let sign = Rgb(order.encode(BLOCKED_SIGN));
    let cx = (width / 2) as i32;
    let cy = (height / 2) as i32;
    let radius = (width.min(height) / 5).max(4) as i32;
    let thickness = (radius / 6).max(1);

    let image = frame.image_mut();
    for r in (radius - thickness)..=radius {
        draw_hollow_circle_mut(image, (cx, cy), r, sign);
    }
    // Diagonal bar, drawn as parallel segments.
    let reach = radius as f32 * std::f32::consts::FRAC_1_SQRT_2;
    for offset in -thickness..=thickness {
        let o = offset as f32;
        draw_line_segment_mut(
            image,
            (cx as f32 - reach + o, cy as f32 - reach),
            (cx as f32 + reach + o, cy as f32 + reach),
            sign,
        );
    }
    frame
}

/// Neutral frame with a pause symbol, used while monitoring is disabled.
pub fn paused_frame(width: u32, height: u32, order: ChannelOrder) -> Frame {
    let mut frame = Frame::solid(width, height, PAUSED_BACKGROUND, order);
    let sign = Rgb(order.encode(PAUSED_SIGN));
    let bar_h = (height / 4).max(2);
    let bar_w = (width / 24).max(1);
    let gap = bar_w;
    let top = (height.saturating_sub(bar_h) / 2) as i32;
    let left = (width / 2).saturating_sub(gap / 2 + bar_w) as i32;

    let image = frame.image_mut();
    draw_filled_rect_mut(image, Rect::at(left, top).of_size(bar_w, bar_h), sign);
    draw_filled_rect_mut(
        image,
        Rect::at(left + (bar_w + gap) as i32, top).of_size(bar_w, bar_h),
        sign,
    );
    frame
}

/// Resize to the given resolution, returning a copy when it already matches.
pub fn resize_frame(frame: &Frame, width: u32, height: u32) -> Frame {
    if frame.width() == width && frame.height() == height {
        return frame.clone();
    }
    let resized = imageops::resize(frame.image(), width, height, FilterType::Triangle);
    frame.with_image(resized)
}
