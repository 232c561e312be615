use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::error::ConvertError;
use crate::label::LabelLine;
use crate::rect::PixelBox;
use crate::video::frame::Frame;

const TEXT_SCALE: f32 = 28.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_LINE_HEIGHT: i32 = 30;

/// Box colors, picked by class id.
const PALETTE: [Rgb<u8>; 6] = [
    Rgb([255, 64, 64]),
    Rgb([64, 255, 64]),
    Rgb([64, 128, 255]),
    Rgb([255, 255, 64]),
    Rgb([255, 64, 255]),
    Rgb([64, 255, 255]),
];

/// Renders extracted frames with the bucket's labels drawn on top, for
/// eyeballing that boxes line up with the video.
pub struct DebugRenderer {
    font: Option<FontVec>,
}

impl DebugRenderer {
    /// Without a font only the boxes are drawn.
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(Self::load_font);
        Self { font }
    }

    pub fn save_frame(
        &self,
        frame: &Frame,
        bucket_frame: i64,
        labels: &[LabelLine],
        path: &Path,
    ) -> Result<(), ConvertError> {
        let mut img = frame.image.clone();
        let (width, height) = img.dimensions();

        for label in labels {
            let Some(rect) = to_image_box(label, width, height).clip_to(width, height) else {
                debug!(class = label.class, "label box not visible, skipping overlay");
                continue;
            };
            let color = PALETTE[label.class.rem_euclid(PALETTE.len() as i64) as usize];
            draw_hollow_rect_mut(
                &mut img,
                Rect::at(rect.x as i32, rect.y as i32).of_size(rect.w, rect.h),
                color,
            );
            self.draw_text(
                &mut img,
                rect.x as i32,
                rect.y as i32 - TEXT_LINE_HEIGHT,
                &label.class.to_string(),
            );
        }

        self.draw_text(&mut img, 10, 10, &format!("F:{bucket_frame} N:{}", labels.len()));

        img.save(path).map_err(|source| ConvertError::ImageSave {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(?path, "saved debug frame");
        Ok(())
    }

    fn draw_text(&self, img: &mut RgbImage, x: i32, y: i32, text: &str) {
        let Some(font) = &self.font else { return };
        draw_text_mut(img, TEXT_COLOR, x, y.max(0), PxScale::from(TEXT_SCALE), font, text);
    }

    fn load_font(path: &Path) -> Option<FontVec> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(?path, error = %e, "failed to read font file");
                return None;
            }
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => {
                info!(?path, "loaded debug font");
                Some(font)
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to parse font file");
                None
            }
        }
    }
}

/// Map a normalized label onto an image of the given size.
fn to_image_box(label: &LabelLine, width: u32, height: u32) -> PixelBox {
    let (x, y, w, h) = label.bbox.to_top_left(width, height);
    PixelBox {
        x: x.round() as i64,
        y: y.round() as i64,
        w: w.round() as i64,
        h: h.round() as i64,
    }
}
