use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::annotation::AnnotationRecord;
use crate::error::ConvertError;
use crate::rect::{NormalizedBox, FRAME_HEIGHT, FRAME_WIDTH};

/// One line of a YOLO label file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelLine {
    pub class: i64,
    pub bbox: NormalizedBox,
}

impl LabelLine {
    pub fn from_record(record: &AnnotationRecord) -> Self {
        Self {
            class: record.class,
            bbox: record.bbox.normalize(FRAME_WIDTH, FRAME_HEIGHT),
        }
    }
}

impl fmt::Display for LabelLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.class,
            format_float(self.bbox.x_center),
            format_float(self.bbox.y_center),
            format_float(self.bbox.w),
            format_float(self.bbox.h),
        )
    }
}

/// Shortest round-trip decimal text for `v`, `repr` style: integral values
/// keep a `.0`, magnitudes below 1e-4 or from 1e16 up use `1e-05` notation.
pub fn format_float(v: f64) -> String {
    let abs = v.abs();
    if v.is_finite() && abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{v:e}");
        if let Some((mantissa, exp)) = s.split_once('e') {
            if let Ok(exp) = exp.parse::<i32>() {
                let sign = if exp < 0 { '-' } else { '+' };
                return format!("{mantissa}e{sign}{:02}", exp.abs());
            }
        }
        return s;
    }
    if v.is_finite() && v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// An open label file for a single bucket.
///
/// Lines are buffered; [`LabelFile::finish`] flushes and reports write errors.
pub struct LabelFile {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl LabelFile {
    /// Create (or truncate) the label file at `path`.
    pub fn create(path: &Path) -> Result<Self, ConvertError> {
        let file = File::create(path).map_err(|source| ConvertError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "opened label file");
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&mut self, line: &LabelLine) -> Result<(), ConvertError> {
        writeln!(self.writer, "{line}").map_err(|source| ConvertError::Write {
            path: self.path.clone(),
            source,
        })?;
        self.lines += 1;
        Ok(())
    }

    /// Flush and close the file, returning how many lines it holds.
    pub fn finish(self) -> Result<usize, ConvertError> {
        let LabelFile {
            path,
            mut writer,
            lines,
        } = self;
        writer
            .flush()
            .map_err(|source| ConvertError::Write { path: path.clone(), source })?;
        debug!(?path, lines, "closed label file");
        Ok(lines)
    }
}
