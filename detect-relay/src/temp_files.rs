// Transient upload files are owned by the request that created them. The guard
// deletes each one exactly once: explicitly at the end of a request, or on drop
// when the request unwinds or its future is cancelled.

use crate::metrics_defs::TEMP_FILE_CLEANUP_FAILED;
use shared::counter;
use std::path::PathBuf;
use tempfile::TempPath;

pub struct TempFiles {
    dir: PathBuf,
    paths: Vec<TempPath>,
}

impl TempFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TempFiles {
            dir: dir.into(),
            paths: Vec::new(),
        }
    }

    /// Creates an empty file in the temp dir and tracks it for deletion.
    ///
    /// The suffix keeps the extension of the uploaded file name.
    pub fn create(&mut self, suffix: &str) -> std::io::Result<(tokio::fs::File, PathBuf)> {
        let named = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(suffix)
            .tempfile_in(&self.dir)?;

        let (file, path) = named.into_parts();
        let path_buf = path.to_path_buf();
        self.paths.push(path);

        Ok((tokio::fs::File::from_std(file), path_buf))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Deletes every tracked file. Failures are logged and otherwise ignored;
    /// calling this again is a no-op.
    pub fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            let shown = path.to_path_buf();
            if let Err(e) = path.close() {
                counter!(TEMP_FILE_CLEANUP_FAILED).increment(1);
                tracing::debug!(path = %shown.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}
