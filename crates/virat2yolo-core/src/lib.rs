//! Conversion of VIRAT object annotations into YOLO label files, with
//! optional frame extraction from the source video.

pub mod annotation;
pub mod debug;
pub mod error;
pub mod label;
pub mod layout;
pub mod pipeline;
pub mod rect;
pub mod video;

pub use error::ConvertError;
