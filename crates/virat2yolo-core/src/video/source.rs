use anyhow::Result;

use super::frame::Frame;

/// Random access to the frames of a video, by absolute frame index.
pub trait FrameSource {
    /// Position the source at `index` and decode that frame.
    ///
    /// Returns `Ok(None)` when the video has no frame at `index`, e.g. it is
    /// past the end of the stream.
    fn seek_and_read(&mut self, index: u32) -> Result<Option<Frame>>;
}
