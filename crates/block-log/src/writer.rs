use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::entry::BlockRecord;

/// Errors that can occur while appending to the block log.
#[derive(Debug, thiserror::Error)]
pub enum BlockLogError {
    #[error("failed to create parent directories for {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open block log {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to lock block log: {0}")]
    Lock(std::io::Error),

    #[error("failed to write to block log: {0}")]
    Write(std::io::Error),

    #[error("failed to sync block log: {0}")]
    Sync(std::io::Error),
}

/// Append-only writer for refused requests.
///
/// The file is opened per append and held under an exclusive advisory lock
/// for the duration of the write, so several helper processes may share one
/// log.  Each record is synced before the lock is released.
#[derive(Debug, Clone)]
pub struct BlockLog {
    path: PathBuf,
}

/// Releases the advisory lock when dropped.
struct LockGuard<'a>(&'a File);

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(self.0) {
            tracing::warn!(%err, "failed to unlock block log");
        }
    }
}

impl BlockLog {
    /// Prepare a writer for `path`.  Parent directories are created
    /// immediately; the file itself on first append.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, BlockLogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| BlockLogError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single newline-terminated line.
    pub fn append(&self, record: &BlockRecord) -> Result<(), BlockLogError> {
        let file = self.open()?;

        FileExt::lock_exclusive(&file).map_err(BlockLogError::Lock)?;
        let _guard = LockGuard(&file);

        let line = format!("{record}\n");
        (&file)
            .write_all(line.as_bytes())
            .map_err(BlockLogError::Write)?;
        (&file).flush().map_err(BlockLogError::Write)?;
        file.sync_all().map_err(BlockLogError::Sync)?;

        tracing::trace!(source = %record.source, target = %record.target, "block log entry written");
        Ok(())
    }

    fn open(&self) -> Result<File, BlockLogError> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(&self.path).map_err(|source| BlockLogError::OpenFile {
            path: self.path.display().to_string(),
            source,
        })
    }
}
