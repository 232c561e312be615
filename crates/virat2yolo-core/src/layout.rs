use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ConvertError;

/// Where a conversion writes its files. Resolved once before the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub base: PathBuf,
    pub labels: PathBuf,
    /// Present only when frames are extracted from a video.
    pub images: Option<PathBuf>,
    /// Prepended to every output file name, e.g. `VIRAT_S_000001_`.
    pub prefix: Option<String>,
}

impl OutputLayout {
    /// `<dest_dir>/<stem>/labels` and, with `with_images`, `<dest_dir>/<stem>/images`.
    pub fn resolve(dest_dir: &Path, source: &Path, with_images: bool, prepend: bool) -> Self {
        let stem = source_stem(source);
        let base = dest_dir.join(&stem);
        Self {
            labels: base.join("labels"),
            images: with_images.then(|| base.join("images")),
            prefix: prepend.then(|| format!("{stem}_")),
            base,
        }
    }

    /// Create the output directories. Existing directories are left alone.
    pub fn ensure(&self) -> Result<(), ConvertError> {
        ensure_dir(&self.base)?;
        ensure_dir(&self.labels)?;
        if let Some(images) = &self.images {
            ensure_dir(images)?;
        }
        Ok(())
    }

    pub fn label_path(&self, frame: i64) -> PathBuf {
        self.labels.join(self.file_name(frame, "txt"))
    }

    pub fn image_path(&self, frame: i64) -> Option<PathBuf> {
        self.images
            .as_ref()
            .map(|dir| dir.join(self.file_name(frame, "png")))
    }

    /// `[prefix]<8-digit frame>.<ext>`
    pub fn file_name(&self, frame: i64, ext: &str) -> String {
        format!("{}{frame:08}.{ext}", self.prefix.as_deref().unwrap_or(""))
    }
}

/// File name of `source` up to its first `.`, e.g. `VIRAT_S_000001` for
/// `VIRAT_S_000001.viratdata.objects.txt`.
pub fn source_stem(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name,
    }
}

fn ensure_dir(path: &Path) -> Result<(), ConvertError> {
    match std::fs::create_dir(path) {
        Ok(()) => {
            info!(?path, "created directory");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            info!(?path, "directory already exists");
            Ok(())
        }
        Err(source) => Err(ConvertError::DirectoryCreation {
            path: path.to_path_buf(),
            source,
        }),
    }
}
