mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use virat2yolo_core::annotation::load_annotations;
use virat2yolo_core::layout::OutputLayout;
use virat2yolo_core::pipeline::run_pipeline;
use virat2yolo_core::video::decoder::VideoDecoder;
use virat2yolo_core::video::source::FrameSource;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    convert(&cli)?;

    println!("Finished!");
    Ok(())
}

fn convert(cli: &cli::Cli) -> Result<()> {
    info!(
        source = ?cli.source,
        dest_dir = ?cli.dest_dir,
        frame_skip = cli.frame_skip,
        video = ?cli.video,
        grayscale = cli.grayscale,
        prepend = cli.prepend,
        "starting conversion"
    );

    let records = load_annotations(&cli.source).context("failed to load annotations")?;

    let layout = OutputLayout::resolve(
        &cli.dest_dir,
        &cli.source,
        cli.video.is_some(),
        cli.prepend,
    );
    layout
        .ensure()
        .context("failed to prepare output directories")?;

    // Dropped at the end of this function, which stops ffmpeg.
    let mut decoder = cli
        .video
        .as_deref()
        .map(VideoDecoder::open)
        .transpose()
        .context("failed to open video")?;
    let frames = decoder.as_mut().map(|d| d as &mut dyn FrameSource);

    let summary = run_pipeline(&records, &layout, &cli.pipeline_config(), frames)
        .context("conversion failed")?;

    info!(
        base = ?layout.base,
        label_files = summary.label_files,
        images_written = summary.images_written,
        "conversion complete"
    );
    Ok(())
}
