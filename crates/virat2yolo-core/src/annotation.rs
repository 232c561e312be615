use std::path::Path;

use tracing::{debug, info};

use crate::error::ConvertError;
use crate::rect::PixelBox;

/// Number of integer columns in a VIRAT object annotation row.
pub const COLUMN_COUNT: usize = 8;

/// One object observation in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub object_id: i64,
    /// Number of frames the object is tracked for.
    pub object_duration: i64,
    pub frame: i64,
    pub bbox: PixelBox,
    pub class: i64,
}

impl AnnotationRecord {
    fn from_columns(c: [i64; COLUMN_COUNT]) -> Self {
        Self {
            object_id: c[0],
            object_duration: c[1],
            frame: c[2],
            bbox: PixelBox {
                x: c[3],
                y: c[4],
                w: c[5],
                h: c[6],
            },
            class: c[7],
        }
    }
}

/// Read an annotation file and return its records sorted by frame.
pub fn load_annotations(path: &Path) -> Result<Vec<AnnotationRecord>, ConvertError> {
    info!(?path, "loading annotations");
    let text = std::fs::read_to_string(path).map_err(|source| ConvertError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let records = parse_annotations(&text, path)?;
    info!(
        record_count = records.len(),
        max_frame = records.last().map(|r| r.frame),
        "annotations loaded"
    );
    Ok(records)
}

/// Parse annotation text. `path` is only used in error messages.
///
/// Blank lines and `#` comments are skipped. The result is stably sorted on
/// the frame column, so rows sharing a frame keep their file order.
pub fn parse_annotations(text: &str, path: &Path) -> Result<Vec<AnnotationRecord>, ConvertError> {
    let mut records = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default();
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |message: String| ConvertError::MalformedInput {
            path: path.to_path_buf(),
            line: idx + 1,
            message,
        };

        let mut columns = [0i64; COLUMN_COUNT];
        let mut count = 0;
        for token in line.split_whitespace() {
            if count == COLUMN_COUNT {
                count += 1;
                break;
            }
            columns[count] = token
                .parse()
                .map_err(|_| malformed(format!("expected an integer, got {token:?}")))?;
            count += 1;
        }
        if count != COLUMN_COUNT {
            let found = line.split_whitespace().count();
            return Err(malformed(format!(
                "expected {COLUMN_COUNT} columns, found {found}"
            )));
        }

        records.push(AnnotationRecord::from_columns(columns));
    }

    records.sort_by_key(|r| r.frame);
    debug!(record_count = records.len(), "annotations parsed and sorted");
    Ok(records)
}
