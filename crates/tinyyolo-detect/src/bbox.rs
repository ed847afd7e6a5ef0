use serde::Serialize;

/// Axis-aligned box as `[left, top, right, bottom]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    /// Intersection over union; zero when either box is degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let iw = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let ih = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Scale x by `width` and y by `height`.
    pub fn rescale(&self, width: f32, height: f32) -> Self {
        Self::new(
            self.left * width,
            self.top * height,
            self.right * width,
            self.bottom * height,
        )
    }

    pub fn clip_to(&self, width: f32, height: f32) -> Self {
        Self::new(
            self.left.clamp(0.0, width),
            self.top.clamp(0.0, height),
            self.right.clamp(0.0, width),
            self.bottom.clamp(0.0, height),
        )
    }
}
