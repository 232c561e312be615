use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::annotation::AnnotationRecord;
use crate::debug::DebugRenderer;
use crate::error::ConvertError;
use crate::label::{LabelFile, LabelLine};
use crate::layout::OutputLayout;
use crate::video::source::FrameSource;

/// How the scan moves to the next bucket when a record lies past the open one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CrossingPolicy {
    /// Advance exactly one `frame_skip` per crossing record. A record that
    /// jumps further is dropped unless it lands on the new boundary.
    #[default]
    SingleStep,
    /// Advance until the open bucket reaches the record's frame, closing
    /// every bucket passed on the way.
    CatchUp,
}

/// Parameters for the conversion pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Distance between sampled frames. The first bucket is `frame_skip` itself.
    pub frame_skip: u32,
    /// Save extracted frames as single-channel luma images.
    pub grayscale: bool,
    pub crossing: CrossingPolicy,
    /// Directory to write label overlay images, or None to skip.
    pub debug_frames_dir: Option<PathBuf>,
    /// TrueType font for overlay text.
    pub debug_font: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_skip: 150,
            grayscale: false,
            crossing: CrossingPolicy::SingleStep,
            debug_frames_dir: None,
            debug_font: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.frame_skip < 1 {
            return Err(ConvertError::InvalidFrameSkip);
        }
        Ok(())
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    pub label_files: usize,
    pub label_lines: usize,
    pub images_written: usize,
    /// Buckets whose frame the video could not provide.
    pub images_missing: usize,
    /// Records that were not written to any label file.
    pub records_skipped: usize,
}

/// The bucket currently receiving labels.
struct OpenBucket {
    frame: i64,
    file: LabelFile,
    labels: Vec<LabelLine>,
}

impl OpenBucket {
    fn open(layout: &OutputLayout, frame: i64) -> Result<Self, ConvertError> {
        debug!(frame, "opening bucket");
        Ok(Self {
            frame,
            file: LabelFile::create(&layout.label_path(frame))?,
            labels: Vec::new(),
        })
    }

    fn push(&mut self, record: &AnnotationRecord) -> Result<(), ConvertError> {
        let line = LabelLine::from_record(record);
        self.file.write_line(&line)?;
        self.labels.push(line);
        Ok(())
    }
}

/// Runs the bucket scan over sorted records, writing label files and,
/// when `frames` is given, one image per closed bucket.
struct Converter<'a, 'f> {
    layout: &'a OutputLayout,
    config: &'a PipelineConfig,
    frames: Option<&'f mut dyn FrameSource>,
    debug_renderer: Option<DebugRenderer>,
    summary: ConversionSummary,
}

impl<'a, 'f> Converter<'a, 'f> {
    fn new(
        layout: &'a OutputLayout,
        config: &'a PipelineConfig,
        frames: Option<&'f mut dyn FrameSource>,
    ) -> Result<Self, ConvertError> {
        let debug_renderer = match (&config.debug_frames_dir, &frames) {
            (Some(dir), Some(_)) => {
                std::fs::create_dir_all(dir).map_err(|source| {
                    ConvertError::DirectoryCreation {
                        path: dir.clone(),
                        source,
                    }
                })?;
                info!(?dir, "debug frames directory ready");
                Some(DebugRenderer::new(config.debug_font.as_deref()))
            }
            _ => None,
        };

        Ok(Self {
            layout,
            config,
            frames,
            debug_renderer,
            summary: ConversionSummary::default(),
        })
    }

    fn run(mut self, records: &[AnnotationRecord]) -> Result<ConversionSummary, ConvertError> {
        let skip = i64::from(self.config.frame_skip);
        let mut bucket = self.open_bucket(skip)?;

        for record in records {
            if record.frame < bucket.frame {
                debug!(
                    frame = record.frame,
                    bucket = bucket.frame,
                    "record before open bucket, ignoring"
                );
                self.summary.records_skipped += 1;
                continue;
            }

            if record.frame > bucket.frame {
                match self.config.crossing {
                    CrossingPolicy::SingleStep => {
                        bucket = self.advance(bucket, skip)?;
                    }
                    CrossingPolicy::CatchUp => {
                        while record.frame > bucket.frame {
                            bucket = self.advance(bucket, skip)?;
                        }
                    }
                }
                if record.frame != bucket.frame {
                    debug!(
                        frame = record.frame,
                        bucket = bucket.frame,
                        "record between buckets, dropping"
                    );
                    self.summary.records_skipped += 1;
                    continue;
                }
            }

            bucket.push(record)?;
            self.summary.label_lines += 1;
        }

        self.close_bucket(bucket)?;
        Ok(self.summary)
    }

    fn open_bucket(&mut self, frame: i64) -> Result<OpenBucket, ConvertError> {
        let bucket = OpenBucket::open(self.layout, frame)?;
        self.summary.label_files += 1;
        Ok(bucket)
    }

    /// Close `bucket` and open the one `skip` frames later.
    fn advance(&mut self, bucket: OpenBucket, skip: i64) -> Result<OpenBucket, ConvertError> {
        let next = bucket.frame + skip;
        self.close_bucket(bucket)?;
        self.open_bucket(next)
    }

    fn close_bucket(&mut self, bucket: OpenBucket) -> Result<(), ConvertError> {
        let OpenBucket {
            frame,
            file,
            labels,
        } = bucket;
        let lines = file.finish()?;
        debug!(frame, lines, "closed bucket");
        self.extract_frame(frame, &labels)
    }

    /// Write the image for `frame`, if a video is attached.
    fn extract_frame(&mut self, frame: i64, labels: &[LabelLine]) -> Result<(), ConvertError> {
        let Some(source) = self.frames.as_deref_mut() else {
            return Ok(());
        };
        let Some(image_path) = self.layout.image_path(frame) else {
            return Ok(());
        };

        let Ok(index) = u32::try_from(frame) else {
            warn!(frame, "frame index out of decoder range, skipping image");
            self.summary.images_missing += 1;
            return Ok(());
        };

        let decoded = source
            .seek_and_read(index)
            .map_err(|e| ConvertError::FrameDecode {
                index,
                message: format!("{e:#}"),
            })?;

        let Some(decoded) = decoded else {
            warn!(frame = index, "video has no frame at this index, skipping image");
            self.summary.images_missing += 1;
            return Ok(());
        };

        let saved = if self.config.grayscale {
            decoded.to_grayscale().save(&image_path)
        } else {
            decoded.image.save(&image_path)
        };
        saved.map_err(|source| ConvertError::ImageSave {
            path: image_path.clone(),
            source,
        })?;
        self.summary.images_written += 1;
        debug!(
            frame = decoded.frame_number,
            timestamp_seconds = decoded.timestamp_seconds,
            path = ?image_path,
            "saved frame"
        );

        if let (Some(renderer), Some(dir)) = (&self.debug_renderer, &self.config.debug_frames_dir) {
            let path = dir.join(self.layout.file_name(frame, "png"));
            renderer.save_frame(&decoded, frame, labels, &path)?;
        }

        Ok(())
    }
}

/// Convert sorted annotation records into per-bucket label files.
///
/// Buckets start at `frame_skip` and move forward as records pass them, as
/// described on [`CrossingPolicy`]. Every bucket's label file is created even
/// when it receives no lines. With `frames`, each bucket also gets its frame
/// written to the layout's image directory when it closes, including the last
/// one; frames the video cannot provide are skipped with a warning.
pub fn run_pipeline(
    records: &[AnnotationRecord],
    layout: &OutputLayout,
    config: &PipelineConfig,
    frames: Option<&mut dyn FrameSource>,
) -> Result<ConversionSummary, ConvertError> {
    config.validate()?;

    info!(
        record_count = records.len(),
        frame_skip = config.frame_skip,
        crossing = ?config.crossing,
        grayscale = config.grayscale,
        with_video = frames.is_some(),
        labels = ?layout.labels,
        "pipeline starting"
    );

    let summary = Converter::new(layout, config, frames)?.run(records)?;

    info!(
        label_files = summary.label_files,
        label_lines = summary.label_lines,
        images_written = summary.images_written,
        images_missing = summary.images_missing,
        records_skipped = summary.records_skipped,
        "pipeline complete"
    );
    if summary.images_missing > 0 {
        warn!(images_missing = summary.images_missing, "some buckets have no image");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;

    use anyhow::Result;
    use image::{Rgb, RgbImage};
    use tracing_test::traced_test;

    use super::*;
    use crate::rect::PixelBox;
    use crate::video::frame::Frame;

    /// Serves solid frames up to `frame_count`, recording every request.
    struct FakeFrames {
        frame_count: u32,
        requests: Vec<u32>,
    }

    impl FakeFrames {
        fn new(frame_count: u32) -> Self {
            Self {
                frame_count,
                requests: Vec::new(),
            }
        }
    }

    impl FrameSource for FakeFrames {
        fn seek_and_read(&mut self, index: u32) -> Result<Option<Frame>> {
            self.requests.push(index);
            if index >= self.frame_count {
                return Ok(None);
            }
            Ok(Some(Frame {
                image: RgbImage::from_pixel(16, 9, Rgb([200, 100, 50])),
                frame_number: index,
                timestamp_seconds: index as f64 / 30.0,
            }))
        }
    }

    struct FailingFrames;

    impl FrameSource for FailingFrames {
        fn seek_and_read(&mut self, _index: u32) -> Result<Option<Frame>> {
            anyhow::bail!("decoder crashed")
        }
    }

    fn rec(frame: i64, class: i64) -> AnnotationRecord {
        AnnotationRecord {
            object_id: 1,
            object_duration: 100,
            frame,
            bbox: PixelBox { x: 100, y: 100, w: 50, h: 50 },
            class,
        }
    }

    fn layout(dest: &Path, with_images: bool) -> OutputLayout {
        let layout = OutputLayout::resolve(dest, Path::new("clip.objects.txt"), with_images, false);
        layout.ensure().unwrap();
        layout
    }

    /// File name -> contents of every label file.
    fn read_labels(layout: &OutputLayout) -> BTreeMap<String, String> {
        std::fs::read_dir(&layout.labels)
            .unwrap()
            .map(|e| {
                let path = e.unwrap().path();
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                (name, std::fs::read_to_string(&path).unwrap())
            })
            .collect()
    }

    fn names(labels: &BTreeMap<String, String>) -> Vec<&str> {
        labels.keys().map(String::as_str).collect()
    }

    const REFERENCE_LINE: &str =
        "0.06510416666666667 0.11574074074074074 0.026041666666666668 0.046296296296296294";

    #[test]
    fn rejects_zero_frame_skip() {
        let dest = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            frame_skip: 0,
            ..Default::default()
        };
        let err = run_pipeline(&[], &layout(dest.path(), false), &config, None).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidFrameSkip));
    }

    #[test]
    fn empty_input_still_opens_first_bucket() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        let summary = run_pipeline(&[], &layout, &PipelineConfig::default(), None).unwrap();
        assert_eq!(summary.label_files, 1);
        assert_eq!(read_labels(&layout)["00000150.txt"], "");
    }

    #[test]
    fn reference_record_lands_in_its_bucket() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        run_pipeline(&[rec(150, 3)], &layout, &PipelineConfig::default(), None).unwrap();
        assert_eq!(
            read_labels(&layout)["00000150.txt"],
            format!("3 {REFERENCE_LINE}\n")
        );
    }

    #[test]
    fn records_before_first_bucket_are_ignored() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        let summary = run_pipeline(
            &[rec(0, 1), rec(149, 1), rec(150, 2)],
            &layout,
            &PipelineConfig::default(),
            None,
        )
        .unwrap();
        assert_eq!(summary.records_skipped, 2);
        assert_eq!(read_labels(&layout)["00000150.txt"], format!("2 {REFERENCE_LINE}\n"));
    }

    #[test]
    fn dense_frames_fill_each_boundary() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        let records: Vec<_> = (0..=460).map(|f| rec(f, f / 150)).collect();
        let summary = run_pipeline(&records, &layout, &PipelineConfig::default(), None).unwrap();

        let labels = read_labels(&layout);
        // 151 closes 150, 301 closes 300, 451 closes 450 and opens 600.
        assert_eq!(
            names(&labels),
            vec!["00000150.txt", "00000300.txt", "00000450.txt", "00000600.txt"]
        );
        assert_eq!(labels["00000150.txt"], format!("1 {REFERENCE_LINE}\n"));
        assert_eq!(labels["00000300.txt"], format!("2 {REFERENCE_LINE}\n"));
        assert_eq!(labels["00000450.txt"], format!("3 {REFERENCE_LINE}\n"));
        assert_eq!(labels["00000600.txt"], "");
        assert_eq!(summary.label_lines, 3);
        assert_eq!(summary.label_files, 4);
    }

    #[test]
    fn single_step_gap_leaves_buckets_empty() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        let summary = run_pipeline(
            &[rec(10, 1), rec(310, 1)],
            &layout,
            &PipelineConfig::default(),
            None,
        )
        .unwrap();

        let labels = read_labels(&layout);
        assert_eq!(names(&labels), vec!["00000150.txt", "00000300.txt"]);
        assert!(labels.values().all(String::is_empty));
        assert_eq!(summary.records_skipped, 2);
    }

    #[test]
    fn single_step_drops_record_beyond_next_boundary() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        run_pipeline(
            &[rec(150, 1), rec(450, 2)],
            &layout,
            &PipelineConfig::default(),
            None,
        )
        .unwrap();

        let labels = read_labels(&layout);
        assert_eq!(names(&labels), vec!["00000150.txt", "00000300.txt"]);
        assert_eq!(labels["00000300.txt"], "");
    }

    #[test]
    fn single_step_keeps_record_on_next_boundary() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        run_pipeline(
            &[rec(150, 1), rec(300, 2), rec(300, 4)],
            &layout,
            &PipelineConfig::default(),
            None,
        )
        .unwrap();

        let labels = read_labels(&layout);
        assert_eq!(
            labels["00000300.txt"],
            format!("2 {REFERENCE_LINE}\n4 {REFERENCE_LINE}\n")
        );
    }

    #[test]
    fn catch_up_walks_every_intermediate_bucket() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        let config = PipelineConfig {
            crossing: CrossingPolicy::CatchUp,
            ..Default::default()
        };
        let summary = run_pipeline(&[rec(150, 1), rec(450, 2)], &layout, &config, None).unwrap();

        let labels = read_labels(&layout);
        assert_eq!(
            names(&labels),
            vec!["00000150.txt", "00000300.txt", "00000450.txt"]
        );
        assert_eq!(labels["00000300.txt"], "");
        assert_eq!(labels["00000450.txt"], format!("2 {REFERENCE_LINE}\n"));
        assert_eq!(summary.records_skipped, 0);
    }

    #[test]
    fn catch_up_gap_scenario() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        let config = PipelineConfig {
            crossing: CrossingPolicy::CatchUp,
            ..Default::default()
        };
        run_pipeline(&[rec(10, 1), rec(310, 1)], &layout, &config, None).unwrap();

        let labels = read_labels(&layout);
        assert_eq!(
            names(&labels),
            vec!["00000150.txt", "00000300.txt", "00000450.txt"]
        );
        assert!(labels.values().all(String::is_empty));
    }

    /// Runs a scan over records at `frames` and returns how many label files exist.
    fn label_file_count(crossing: CrossingPolicy, frames: &[i64]) -> usize {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), false);
        let config = PipelineConfig {
            crossing,
            ..Default::default()
        };
        let records: Vec<_> = frames.iter().map(|&f| rec(f, 1)).collect();
        let summary = run_pipeline(&records, &layout, &config, None).unwrap();
        let on_disk = read_labels(&layout).len();
        assert_eq!(summary.label_files, on_disk);
        on_disk
    }

    #[test]
    fn single_step_file_count_is_one_plus_crossings() {
        use CrossingPolicy::SingleStep;
        // floor(460 / 150) would be 3; only 460 crosses the open bucket.
        assert_eq!(label_file_count(SingleStep, &[150, 460]), 2);
        // 151, 301 and 460 each cross once.
        assert_eq!(label_file_count(SingleStep, &[150, 151, 300, 301, 460]), 4);
        assert_eq!(label_file_count(SingleStep, &[10]), 1);
    }

    #[test]
    fn catch_up_file_count_reaches_max_frame() {
        use CrossingPolicy::CatchUp;
        // Last bucket is the first boundary at or past the largest frame.
        assert_eq!(label_file_count(CatchUp, &[150, 460]), 4);
        assert_eq!(label_file_count(CatchUp, &[150, 450]), 3);
        assert_eq!(label_file_count(CatchUp, &[10, 310]), 3);
        assert_eq!(label_file_count(CatchUp, &[10]), 1);
    }

    #[test]
    fn extracts_one_image_per_closed_bucket() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), true);
        let mut frames = FakeFrames::new(1000);
        let summary = run_pipeline(
            &[rec(150, 1), rec(200, 1)],
            &layout,
            &PipelineConfig::default(),
            Some(&mut frames),
        )
        .unwrap();

        assert_eq!(frames.requests, vec![150, 300]);
        assert_eq!(summary.images_written, 2);
        let images = layout.images.as_ref().unwrap();
        let img = image::open(images.join("00000150.png")).unwrap();
        assert_eq!(img.color(), image::ColorType::Rgb8);
        assert!(images.join("00000300.png").exists());
    }

    #[test]
    fn grayscale_images_have_one_channel() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), true);
        let mut frames = FakeFrames::new(1000);
        let config = PipelineConfig {
            grayscale: true,
            ..Default::default()
        };
        run_pipeline(&[rec(150, 1), rec(151, 1)], &layout, &config, Some(&mut frames)).unwrap();

        for entry in std::fs::read_dir(layout.images.as_ref().unwrap()).unwrap() {
            let img = image::open(entry.unwrap().path()).unwrap();
            assert_eq!(img.color(), image::ColorType::L8);
            assert_eq!(img.color().channel_count(), 1);
        }
    }

    #[test]
    #[traced_test]
    fn missing_frame_is_skipped_with_warning() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), true);
        let mut frames = FakeFrames::new(200);
        let summary = run_pipeline(
            &[rec(150, 1), rec(151, 1)],
            &layout,
            &PipelineConfig::default(),
            Some(&mut frames),
        )
        .unwrap();

        assert_eq!(summary.images_written, 1);
        assert_eq!(summary.images_missing, 1);
        assert!(!layout.images.as_ref().unwrap().join("00000300.png").exists());
        assert!(logs_contain("video has no frame at this index"));
    }

    #[test]
    fn decoder_failure_aborts() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), true);
        let mut frames = FailingFrames;
        let err = run_pipeline(
            &[rec(150, 1)],
            &layout,
            &PipelineConfig::default(),
            Some(&mut frames),
        )
        .unwrap_err();
        match err {
            ConvertError::FrameDecode { index, message } => {
                assert_eq!(index, 150);
                assert!(message.contains("decoder crashed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn debug_frames_written_next_to_images() {
        let dest = tempfile::tempdir().unwrap();
        let layout = layout(dest.path(), true);
        let debug_dir = dest.path().join("debug");
        let mut frames = FakeFrames::new(1000);
        let config = PipelineConfig {
            debug_frames_dir: Some(debug_dir.clone()),
            ..Default::default()
        };
        run_pipeline(&[rec(150, 1)], &layout, &config, Some(&mut frames)).unwrap();
        assert!(debug_dir.join("00000150.png").exists());
    }
}
