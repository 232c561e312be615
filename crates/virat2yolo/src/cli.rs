use std::path::PathBuf;

use clap::Parser;

use virat2yolo_core::pipeline::{CrossingPolicy, PipelineConfig};

/// Convert VIRAT object annotations to YOLO label files.
#[derive(Parser, Debug)]
#[command(name = "virat2yolo", version, about)]
pub struct Cli {
    /// VIRAT object annotation file (8 integer columns per row).
    #[arg(long)]
    pub source: PathBuf,

    /// Output root; files go to <dest-dir>/<source stem>/.
    #[arg(long)]
    pub dest_dir: PathBuf,

    /// Frame interval between output labels.
    #[arg(long, default_value_t = 150, value_parser = clap::value_parser!(u32).range(1..))]
    pub frame_skip: u32,

    /// Video to extract one image per labelled frame from.
    #[arg(long)]
    pub video: Option<PathBuf>,

    /// Save extracted images as single-channel grayscale.
    #[arg(long, requires = "video")]
    pub grayscale: bool,

    /// Prefix output file names with the source file stem.
    #[arg(long)]
    pub prepend: bool,

    /// Advance through every skipped bucket when annotations jump ahead,
    /// instead of one bucket per record.
    #[arg(long)]
    pub catch_up: bool,

    /// Directory to save extracted frames with their labels drawn on top.
    #[arg(long, requires = "video")]
    pub debug_frames: Option<PathBuf>,

    /// TrueType font used for text on debug frames.
    #[arg(long, requires = "debug_frames")]
    pub debug_font: Option<PathBuf>,
}

impl Cli {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            frame_skip: self.frame_skip,
            grayscale: self.grayscale,
            crossing: if self.catch_up {
                CrossingPolicy::CatchUp
            } else {
                CrossingPolicy::SingleStep
            },
            debug_frames_dir: self.debug_frames.clone(),
            debug_font: self.debug_font.clone(),
        }
    }
}
