//! Axis-aligned boxes in original-frame pixel coordinates.

/// Fraction by which a redaction box grows along each axis before blurring.
/// The growth is split evenly between both sides of the box.
pub const REDACTION_PADDING: f32 = 0.20;

/// Pixel-space box, `x2`/`y2` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Convert a center+size box in model-input scale to frame pixels.
    ///
    /// `scale_x`/`scale_y` are `frame_dim / input_dim`. The result is clamped
    /// to `[0, frame_w] x [0, frame_h]`.
    pub fn from_center(
        cx: f32,
        cy: f32,
        w: f32,
        h: f32,
        scale_x: f32,
        scale_y: f32,
        frame_w: u32,
        frame_h: u32,
    ) -> Self {
        let x1 = ((cx - w / 2.0) * scale_x) as i64;
        let y1 = ((cy - h / 2.0) * scale_y) as i64;
        let x2 = ((cx + w / 2.0) * scale_x) as i64;
        let y2 = ((cy + h / 2.0) * scale_y) as i64;
        Self {
            x1: clamp_coord(x1, frame_w),
            y1: clamp_coord(y1, frame_h),
            x2: clamp_coord(x2, frame_w),
            y2: clamp_coord(y2, frame_h),
        }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Intersection over union. Zero when either box is empty or they are disjoint.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = ix2.saturating_sub(ix1) as u64 * iy2.saturating_sub(iy1) as u64;
        let union = self.area() + other.area() - inter;
        if union == 0 {
            return 0.0;
        }
        (inter as f64 / union as f64) as f32
    }

    /// Grow the box by `fraction` of its width/height in total, half on each
    /// side, clamped to the frame.
    pub fn padded(&self, fraction: f32, frame_w: u32, frame_h: u32) -> BBox {
        let pad_x = (self.width() as f32 * fraction / 2.0) as u32;
        let pad_y = (self.height() as f32 * fraction / 2.0) as u32;
        BBox {
            x1: self.x1.saturating_sub(pad_x),
            y1: self.y1.saturating_sub(pad_y),
            x2: self.x2.saturating_add(pad_x).min(frame_w),
            y2: self.y2.saturating_add(pad_y).min(frame_h),
        }
    }

    /// Clamp to frame bounds.
    pub fn clamped(&self, frame_w: u32, frame_h: u32) -> BBox {
        BBox {
            x1: self.x1.min(frame_w),
            y1: self.y1.min(frame_h),
            x2: self.x2.min(frame_w),
            y2: self.y2.min(frame_h),
        }
    }
}

fn clamp_coord(value: i64, max: u32) -> u32 {
    value.clamp(0, max as i64) as u32
}
