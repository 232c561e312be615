use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::rect::{FRAME_HEIGHT, FRAME_WIDTH};

use super::frame::Frame;
use super::source::FrameSource;

/// Video metadata reported by ffprobe.
struct StreamInfo {
    width: u32,
    height: u32,
    fps: f64,
}

fn stream_info(path: &Path) -> Result<StreamInfo> {
    info!(?path, "reading video metadata with ffprobe");

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate",
            "-of", "csv=p=0",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe, is ffmpeg installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        bail!("ffprobe failed: {stderr}");
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_stream_info(&stdout)
}

/// Parse ffprobe's `width,height,num/den` line.
fn parse_stream_info(stdout: &str) -> Result<StreamInfo> {
    let parts: Vec<&str> = stdout.trim().split(',').collect();
    if parts.len() < 3 {
        error!(%stdout, "unexpected ffprobe output format, expected width,height,fps");
        bail!("unexpected ffprobe output: {stdout}");
    }

    let width: u32 = parts[0].trim().parse().context("failed to parse width")?;
    let height: u32 = parts[1].trim().parse().context("failed to parse height")?;

    let rate = parts[2].trim();
    let fps = if let Some((num, den)) = rate.split_once('/') {
        let num: f64 = num.parse().context("failed to parse fps numerator")?;
        let den: f64 = den.parse().context("failed to parse fps denominator")?;
        if den > 0.0 { num / den } else { 0.0 }
    } else {
        rate.parse().context("failed to parse fps")?
    };

    if fps <= 0.0 {
        warn!(fps, "video has non-positive fps, timestamps will be 0.0");
    }

    if width == 0 || height == 0 {
        bail!("invalid video dimensions: {width}x{height}");
    }

    Ok(StreamInfo { width, height, fps })
}

/// Start ffmpeg writing raw RGB24 frames to stdout, beginning at `start_frame`.
fn spawn_ffmpeg(path: &Path, start_frame: u32) -> Result<(Child, ChildStdout)> {
    info!(?path, start_frame, "spawning ffmpeg decoder process");

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-i"]).arg(path);
    if start_frame > 0 {
        // Select by decoded frame index so numbering stays exact; -ss seeks by time.
        let filter = format!("select=gte(n\\,{start_frame})");
        cmd.args(["-vf", filter.as_str()]);
    }
    // One output frame per decoded frame, never duplicated or dropped.
    cmd.args(["-vsync", "passthrough"]);
    cmd.args([
        "-f", "rawvideo",
        "-pix_fmt", "rgb24",
        "-v", "error",
        "pipe:1",
    ]);

    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .context("failed to spawn ffmpeg, is ffmpeg installed?")?;
    let stdout = child
        .stdout
        .take()
        .context("ffmpeg stdout not available")?;
    Ok((child, stdout))
}

/// Fill `buf` with exactly one frame from `reader`.
///
/// Returns false on a clean end of stream, an error if the stream ends mid-frame.
fn read_frame_bytes(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => {
                if read == 0 {
                    return Ok(false);
                }
                error!(
                    read_bytes = read,
                    expected_bytes = buf.len(),
                    "frame stream ended mid-frame"
                );
                bail!(
                    "frame stream ended mid-frame (read {read}/{} bytes)",
                    buf.len(),
                );
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(%e, "failed to read from frame stream");
                return Err(e).context("failed to read from frame stream");
            }
        }
    }
    Ok(true)
}

/// Cuts a raw RGB24 byte stream into frames and keeps track of frame numbers.
pub struct FrameReader<R> {
    reader: R,
    width: u32,
    height: u32,
    fps: f64,
    /// Frame number of the next frame in the stream.
    position: u32,
    frame_bytes: usize,
    scratch: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    /// `start_frame` is the frame number of the first frame in `reader`.
    pub fn new(reader: R, width: u32, height: u32, fps: f64, start_frame: u32) -> Self {
        let frame_bytes = (width as usize) * (height as usize) * 3;
        Self {
            reader,
            width,
            height,
            fps,
            position: start_frame,
            frame_bytes,
            scratch: vec![0u8; frame_bytes],
        }
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    /// Read the next frame, or `None` if the stream is finished.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut buf = vec![0u8; self.frame_bytes];
        if !read_frame_bytes(&mut self.reader, &mut buf)
            .with_context(|| format!("failed to read frame {}", self.position))?
        {
            info!(position = self.position, "video stream ended");
            return Ok(None);
        }

        let image = RgbImage::from_raw(self.width, self.height, buf)
            .context("failed to create RgbImage from raw frame data")?;

        let frame_number = self.position;
        let timestamp_seconds = if self.fps > 0.0 {
            frame_number as f64 / self.fps
        } else {
            0.0
        };
        self.position += 1;

        debug!(frame_number, timestamp_seconds, "decoded frame");

        Ok(Some(Frame {
            image,
            frame_number,
            timestamp_seconds,
        }))
    }

    /// Read frame `index`, discarding the frames before it.
    ///
    /// Returns `None` if the stream ends first. `index` must not be behind
    /// [`FrameReader::position`].
    pub fn read_at(&mut self, index: u32) -> Result<Option<Frame>> {
        if index < self.position {
            bail!(
                "cannot seek backwards from frame {} to {index}",
                self.position
            );
        }
        while self.position < index {
            if !read_frame_bytes(&mut self.reader, &mut self.scratch)
                .with_context(|| format!("failed to skip frame {}", self.position))?
            {
                info!(
                    position = self.position,
                    index,
                    "video stream ended before target frame"
                );
                return Ok(None);
            }
            self.position += 1;
        }
        self.next_frame()
    }
}

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
///
/// Forward seeks read and discard frames; backward seeks restart ffmpeg.
pub struct VideoDecoder {
    path: PathBuf,
    child: Child,
    frames: FrameReader<ChildStdout>,
}

impl VideoDecoder {
    /// Open a video file for decoding from its first frame.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_at_frame(path, 0)
    }

    /// Open a video file with the first decoded frame being `start_frame`.
    pub fn open_at_frame(path: &Path, start_frame: u32) -> Result<Self> {
        if !path.exists() {
            bail!("video file does not exist: {}", path.display());
        }

        let info = stream_info(path)?;
        if (info.width, info.height) != (FRAME_WIDTH, FRAME_HEIGHT) {
            warn!(
                width = info.width,
                height = info.height,
                label_width = FRAME_WIDTH,
                label_height = FRAME_HEIGHT,
                "video size differs from the size labels are normalized against"
            );
        }

        let (child, stdout) = spawn_ffmpeg(path, start_frame)?;
        let frames = FrameReader::new(stdout, info.width, info.height, info.fps, start_frame);

        info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            frame_bytes = frames.frame_bytes,
            start_frame,
            "video decoder opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            child,
            frames,
        })
    }

    fn restart_at(&mut self, start_frame: u32) -> Result<()> {
        let (child, stdout) = spawn_ffmpeg(&self.path, start_frame)?;
        let mut old = std::mem::replace(&mut self.child, child);
        let _ = old.kill();
        let _ = old.wait();
        let FrameReader {
            width, height, fps, ..
        } = self.frames;
        self.frames = FrameReader::new(stdout, width, height, fps, start_frame);
        Ok(())
    }

    fn check_exit(&mut self) -> Result<()> {
        wait_for_success(&mut self.child, self.frames.position())
    }
}

/// Fail if the decoder process exited with an error; a clean exit is a normal
/// end of video.
fn wait_for_success(child: &mut Child, position: u32) -> Result<()> {
    let status = child.wait().context("failed to wait for ffmpeg")?;
    if !status.success() {
        error!(%status, position, "ffmpeg exited with an error");
        bail!("ffmpeg exited with {status}");
    }
    Ok(())
}

impl FrameSource for VideoDecoder {
    fn seek_and_read(&mut self, index: u32) -> Result<Option<Frame>> {
        if index < self.frames.position() {
            debug!(
                index,
                position = self.frames.position(),
                "seeking backwards, restarting ffmpeg"
            );
            self.restart_at(index)?;
        }
        let frame = self.frames.read_at(index)?;
        if frame.is_none() {
            self.check_exit()?;
        }
        Ok(frame)
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        info!(position = self.frames.position(), "closing video decoder");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
