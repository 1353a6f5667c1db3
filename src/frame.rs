//! Frame containers.
//!
//! - `Frame`: one captured color image. Pixel bytes are zeroized on drop so a
//!   dropped camera frame does not linger in freed memory.
//! - `LatestFrame`: single-slot, overwrite-on-write buffer shared between the
//!   capture thread and the controller. Readers always see the freshest frame;
//!   older frames are silently dropped.

use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use zeroize::Zeroize;

/// Byte order of the three color channels in a `Frame`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// One 8-bit, three-channel image.
///
/// The buffer is stored as an `RgbImage` regardless of `order`; `order` tells
/// consumers how to interpret channel 0 and 2.
pub struct Frame {
    image: RgbImage,
    order: ChannelOrder,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, order: ChannelOrder) -> Self {
        Self {
            image,
            order,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from packed 3-byte pixels.
    pub fn from_raw(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        order: ChannelOrder,
    ) -> anyhow::Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow::anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            anyhow::bail!(
                "expected {} bytes for {}x{} frame, received {}",
                expected,
                width,
                height,
                pixels.len()
            );
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow::anyhow!("pixel buffer rejected"))?;
        Ok(Self::new(image, order))
    }

    /// Frame filled with one color, given in RGB regardless of `order`.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], order: ChannelOrder) -> Self {
        let px = order.encode(rgb);
        Self::new(RgbImage::from_pixel(width, height, image::Rgb(px)), order)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Pixel at `(x, y)` decoded to RGB.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        self.order.decode(self.image.get_pixel(x, y).0)
    }

    /// Replace the pixel buffer while keeping order and capture time.
    pub(crate) fn with_image(&self, image: RgbImage) -> Frame {
        Frame {
            image,
            order: self.order,
            captured_at: self.captured_at,
        }
    }
}

impl Clone for Frame {
    fn clone(&self) -> Self {
        Self {
            image: self.image.clone(),
            order: self.order,
            captured_at: self.captured_at,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print pixel content.
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("order", &self.order)
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let pixels: &mut [u8] = &mut self.image;
        pixels.zeroize();
    }
}

impl ChannelOrder {
    /// RGB triple to this order.
    pub fn encode(self, rgb: [u8; 3]) -> [u8; 3] {
        match self {
            ChannelOrder::Rgb => rgb,
            ChannelOrder::Bgr => [rgb[2], rgb[1], rgb[0]],
        }
    }

    /// Triple in this order to RGB.
    pub fn decode(self, px: [u8; 3]) -> [u8; 3] {
        // Swapping is its own inverse.
        self.encode(px)
    }
}

// ----------------------------------------------------------------------------
// LatestFrame: single-slot overwrite buffer
// ----------------------------------------------------------------------------

/// Shared single-slot frame buffer.
///
/// Writes replace the slot; reads copy the frame out so the lock is held only
/// for the copy.
#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: Frame) {
        *self.lock() = Some(frame);
    }

    /// Copy of the freshest frame, if one has been captured.
    pub fn read(&self) -> Option<Frame> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        // The slot holds plain pixel data; a panic mid-write cannot leave it
        // in a state worse than "some older frame".
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
