//! File-backed blob area holding the canonical bytes of every version.
//!
//! One file per version, `<root>/<version_id>.json`. Writes go to a hidden
//! temporary sibling which is fsynced and renamed into place, so a reader
//! never observes a partially written blob.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::StorageError;

/// Directory of immutable version blobs.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

fn blob_error(path: &Path, source: io::Error) -> StorageError {
    StorageError::Blob {
        path: path.display().to_string(),
        source,
    }
}

/// Ids become file names, so only a conservative character set is allowed.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl BlobStore {
    /// Open the blob area at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| blob_error(&root, e))?;
        debug!(root = %root.display(), "opened blob store");
        Ok(Self { root })
    }

    fn path_for(&self, version_id: &str) -> PathBuf {
        self.root.join(format!("{version_id}.json"))
    }

    /// Write the blob for a new version. Fails if one already exists.
    pub fn write(&self, version_id: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(version_id);
        if !is_safe_id(version_id) {
            return Err(blob_error(
                &path,
                io::Error::new(io::ErrorKind::InvalidInput, "invalid blob id"),
            ));
        }
        if path.exists() {
            return Err(blob_error(
                &path,
                io::Error::new(io::ErrorKind::AlreadyExists, "blob already written"),
            ));
        }

        let tmp_path = self.root.join(format!(".{version_id}.tmp"));
        let result = (|| {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(blob_error(&path, e));
        }

        debug!(version_id, size = bytes.len(), "wrote blob");
        Ok(())
    }

    /// Read a blob. `Ok(None)` when no blob exists for the id.
    pub fn read(&self, version_id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if !is_safe_id(version_id) {
            return Ok(None);
        }
        let path = self.path_for(version_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(blob_error(&path, e)),
        }
    }

    #[cfg(test)]
    fn exists(&self, version_id: &str) -> bool {
        is_safe_id(version_id) && self.path_for(version_id).exists()
    }

    /// Remove a blob whose metadata row never committed.
    pub(crate) fn discard(&self, version_id: &str) {
        if !is_safe_id(version_id) {
            return;
        }
        let path = self.path_for(version_id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(version_id, error = %e, "failed to discard orphaned blob");
            }
        }
    }
}
