use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use runcatcher_common::capture::CaptureEntry;
use tracing::{debug, info, warn};

/// Give up after this many same-name collisions in one save.
const MAX_SUFFIX: u32 = 1000;

/// Flat directory of `runner_<timestamp>.jpg` files. The directory listing
/// is the only index; nothing is cached between calls.
pub struct CaptureStore {
    dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("capture store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no free filename for {0} after {MAX_SUFFIX} attempts")]
    Collision(String),
}

impl CaptureStore {
    /// Open the store, creating `dir` if it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!(path = %dir.display(), "captures directory ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one capture, named after the server receipt time.
    ///
    /// Two saves in the same millisecond never overwrite each other: the
    /// second one gets a `_1` suffix, the third `_2`, and so on.
    pub fn save(&self, bytes: &[u8], received_at: DateTime<Utc>) -> Result<String, StoreError> {
        let stem = capture_stem(received_at);
        let (filename, mut file) = self.create_unique(&stem)?;
        let path = self.dir.join(&filename);

        if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_all()) {
            drop(file);
            if let Err(rm) = std::fs::remove_file(&path) {
                warn!(error = %rm, filename, "failed to remove partial capture");
            }
            return Err(e.into());
        }

        debug!(filename, size_bytes = bytes.len(), "capture written");
        Ok(filename)
    }

    fn create_unique(&self, stem: &str) -> Result<(String, File), StoreError> {
        for n in 0..MAX_SUFFIX {
            let filename = if n == 0 {
                format!("{stem}.jpg")
            } else {
                format!("{stem}_{n}.jpg")
            };
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&filename))
            {
                Ok(file) => return Ok((filename, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(filename, "capture filename taken, trying next suffix");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Collision(stem.to_string()))
    }

    /// Every `.jpg` in the directory, newest first by creation time.
    pub fn list(&self) -> Result<Vec<CaptureEntry>, StoreError> {
        let mut files: Vec<(SystemTime, String)> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            if !filename.ends_with(".jpg") {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            // Not every filesystem records a birth time.
            let created = meta.created().or_else(|_| meta.modified())?;
            files.push((created, filename));
        }

        files.sort_by(|a, b| b.cmp(a));

        Ok(files
            .into_iter()
            .map(|(created, filename)| CaptureEntry {
                path: format!("/captures/{filename}"),
                created: DateTime::<Utc>::from(created).to_rfc3339_opts(SecondsFormat::Millis, true),
                filename,
            })
            .collect())
    }

    /// Number of entries in the directory, `.jpg` or not.
    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(std::fs::read_dir(&self.dir)?.count())
    }
}

/// `runner_<ISO-8601 with ':' and '.' replaced by '-'>` for the given instant.
pub fn capture_stem(at: DateTime<Utc>) -> String {
    format!("runner_{}", at.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
}
