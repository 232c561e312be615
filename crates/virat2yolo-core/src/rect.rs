/// Frame size every box is normalized against, regardless of the actual video.
pub const FRAME_WIDTH: u32 = 1920;
pub const FRAME_HEIGHT: u32 = 1080;

/// A box in absolute pixel coordinates, anchored at its top-left corner.
/// May extend past the frame edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

/// A box in YOLO convention: centre point and extent as fractions of the frame.
/// Values are not clamped, so out-of-frame boxes fall outside 0.0 to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
    pub x_center: f64,
    pub y_center: f64,
    pub w: f64,
    pub h: f64,
}

/// The visible part of a box inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl PixelBox {
    pub fn normalize(self, frame_width: u32, frame_height: u32) -> NormalizedBox {
        assert!(
            frame_width > 0 && frame_height > 0,
            "frame size must be > 0"
        );
        let fw = frame_width as f64;
        let fh = frame_height as f64;
        let w = self.w as f64;
        let h = self.h as f64;
        NormalizedBox {
            x_center: (self.x as f64 + w / 2.0) / fw,
            y_center: (self.y as f64 + h / 2.0) / fh,
            w: w / fw,
            h: h / fh,
        }
    }

    /// Clip to an image of the given size. Returns None when no pixel is visible.
    pub fn clip_to(self, image_width: u32, image_height: u32) -> Option<PixelRect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.x.saturating_add(self.w).min(image_width as i64);
        let y1 = self.y.saturating_add(self.h).min(image_height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect {
            x: x0 as u32,
            y: y0 as u32,
            w: (x1 - x0) as u32,
            h: (y1 - y0) as u32,
        })
    }
}

impl NormalizedBox {
    /// Undo [`PixelBox::normalize`]: returns `(x, y, w, h)` of the top-left anchored box.
    pub fn to_top_left(self, frame_width: u32, frame_height: u32) -> (f64, f64, f64, f64) {
        let w = self.w * frame_width as f64;
        let h = self.h * frame_height as f64;
        (
            self.x_center * frame_width as f64 - w / 2.0,
            self.y_center * frame_height as f64 - h / 2.0,
            w,
            h,
        )
    }
}
