use image::{GrayImage, RgbImage};

/// A decoded video frame and its position in the source.
#[derive(Debug)]
pub struct Frame {
    pub image: RgbImage,
    /// Absolute frame number from the start of the source (0-based).
    pub frame_number: u32,
    /// Elapsed seconds from the start of the source.
    pub timestamp_seconds: f64,
}

impl Frame {
    /// Single-channel luma copy of the frame.
    pub fn to_grayscale(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}
