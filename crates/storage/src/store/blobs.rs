#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};

/// Checksum-addressed storage backing file records.
pub trait BlobStore: Send + Sync {
    /// Fail with an I/O error when the blob for `checksum` cannot be reached.
    fn ensure_present(&self, checksum: &str, extension: &str) -> io::Result<()>;
}

/// Blobs laid out on disk as `<root>/<c0>/<c1>/<checksum>.<ext>`.
#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, checksum: &str, extension: &str) -> io::Result<PathBuf> {
        let mut chars = checksum.chars();
        let (Some(first), Some(second)) = (chars.next(), chars.next()) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("checksum too short: {checksum:?}"),
            ));
        };
        let name = if extension.is_empty() {
            checksum.to_string()
        } else {
            format!("{checksum}.{extension}")
        };
        Ok(self
            .root
            .join(first.to_string())
            .join(second.to_string())
            .join(name))
    }
}

impl BlobStore for LocalBlobStore {
    fn ensure_present(&self, checksum: &str, extension: &str) -> io::Result<()> {
        let path = self.path_for(checksum, extension)?;
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("blob is not a file: {}", path.display()),
            ));
        }
        Ok(())
    }
}
