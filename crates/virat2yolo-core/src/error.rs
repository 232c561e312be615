use std::io;
use std::path::PathBuf;

/// Failures raised by the conversion core.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("failed to create directory {}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    MalformedInput {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("frame_skip must be >= 1")]
    InvalidFrameSkip,

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to save image {}", path.display())]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to decode frame {index}: {message}")]
    FrameDecode { index: u32, message: String },
}
