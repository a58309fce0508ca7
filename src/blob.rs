//! Content directory: attachments live as plain files next to the
//! database rather than as BLOB columns, so large files don't bloat the
//! write-ahead log.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::tools::fine_filename;

/// A file that lives under a [`Context`](crate::context::Context)'s blob
/// directory, referenced from the database by its file name alone (the
/// directory itself is a deployment detail, not persisted state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    name: String,
}

impl BlobObject {
    /// Writes `data` under `blobdir`, choosing a collision-free name
    /// derived from `desired_name`.
    pub fn create(blobdir: &Path, desired_name: &str, data: &[u8]) -> Result<Self> {
        let path = fine_filename(blobdir, desired_name);
        std::fs::write(&path, data)
            .with_context(|| format!("writing blob {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("blob path has no file name")?
            .to_string();
        Ok(BlobObject { name })
    }

    /// Wraps an existing, already-written file name without touching the
    /// filesystem (used when loading a [`BlobObject`] back out of a
    /// message's parameter bag).
    pub fn from_name(name: impl Into<String>) -> Self {
        BlobObject { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_abs_path(&self, blobdir: &Path) -> PathBuf {
        blobdir.join(&self.name)
    }

    pub fn read(&self, blobdir: &Path) -> Result<Vec<u8>> {
        std::fs::read(self.to_abs_path(blobdir)).context("reading blob")
    }

    pub fn size(&self, blobdir: &Path) -> Result<u64> {
        Ok(std::fs::metadata(self.to_abs_path(blobdir))?.len())
    }

    /// A sentinel file placed next to a blob still being written by an
    /// async encoder; the job engine polls for its absence
    ///.
    pub fn increation_marker_path(&self, blobdir: &Path) -> PathBuf {
        let mut path = self.to_abs_path(blobdir).into_os_string();
        path.push(".increation");
        PathBuf::from(path)
    }

    pub fn is_in_creation(&self, blobdir: &Path) -> bool {
        self.increation_marker_path(blobdir).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let blob = BlobObject::create(dir.path(), "note.txt", b"hello").unwrap();
        assert_eq!(blob.read(dir.path()).unwrap(), b"hello");
        assert_eq!(blob.size(dir.path()).unwrap(), 5);
    }

    #[test]
    fn increation_marker_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let blob = BlobObject::create(dir.path(), "video.mp4", b"").unwrap();
        assert!(!blob.is_in_creation(dir.path()));
        std::fs::write(blob.increation_marker_path(dir.path()), b"").unwrap();
        assert!(blob.is_in_creation(dir.path()));
    }
}
