//! On-disk storage for uploaded bytes.
//!
//! Pure save/open/delete. Which blobs live and die is decided by the
//! transfer layer, never here.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

const COPY_BUF_SIZE: usize = 64 * 1024;
const MAX_EXTENSION_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create upload directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read upload stream: {0}")]
    Source(#[source] io::Error),
    #[error("Blob not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Where a blob's bytes live. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobLocation {
    path: PathBuf,
}

impl BlobLocation {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, used as the download file name.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl AsRef<Path> for BlobLocation {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug)]
pub struct SavedBlob {
    pub location: BlobLocation,
    pub size: u64,
}

/// Flat directory of blobs named `{uuid}[.{ext}]`.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Stream `reader` into a new blob.
    ///
    /// The root directory is created on demand. The partially written file is
    /// removed on any failure, and also if this future is dropped mid-stream.
    pub async fn save<R>(
        &self,
        reader: &mut R,
        file_name: Option<&str>,
    ) -> Result<SavedBlob, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: self.root.clone(),
                source,
            })?;

        let location = self.new_location(file_name);
        let mut partial = PartialBlob {
            location: location.clone(),
            committed: false,
        };

        // create_new: a name collision must fail, never overwrite
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(location.path())
            .await
        {
            Ok(file) => file,
            Err(e) => {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    // Someone else's blob.
                    partial.committed = true;
                }
                return Err(e.into());
            }
        };

        let size = copy_into(reader, &mut file).await?;
        drop(file);
        partial.committed = true;

        debug!("Saved {} bytes to {}", size, location.path().display());
        Ok(SavedBlob { location, size })
    }

    /// Open a blob for reading, returning the file and its length.
    pub async fn open(&self, location: &BlobLocation) -> Result<(File, u64), StorageError> {
        let file = File::open(location.path()).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound(location.path.clone())
            } else {
                StorageError::Io(e)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Best-effort removal. A blob that is already gone is not an error.
    pub async fn delete(&self, location: &BlobLocation) {
        log_delete(location, tokio::fs::remove_file(location.path()).await);
    }

    /// Same policy as [`BlobStore::delete`], for callers outside a runtime.
    pub fn delete_blocking(&self, location: &BlobLocation) {
        log_delete(location, std::fs::remove_file(location.path()));
    }

    fn new_location(&self, file_name: Option<&str>) -> BlobLocation {
        let mut name = Uuid::new_v4().to_string();
        if let Some(ext) = file_name.and_then(sanitized_extension) {
            name.push('.');
            name.push_str(&ext);
        }
        BlobLocation {
            path: self.root.join(name),
        }
    }
}

/// Removes a blob whose save never completed. Must outlive the file handle so
/// the file is closed before it is unlinked.
struct PartialBlob {
    location: BlobLocation,
    committed: bool,
}

impl Drop for PartialBlob {
    fn drop(&mut self) {
        if !self.committed {
            log_delete(&self.location, std::fs::remove_file(self.location.path()));
        }
    }
}

async fn copy_into<R>(reader: &mut R, file: &mut File) -> Result<u64, StorageError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(StorageError::Source)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    file.flush().await?;
    Ok(total)
}

fn log_delete(location: &BlobLocation, result: io::Result<()>) {
    match result {
        Ok(()) => debug!("Deleted blob {}", location.path().display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Blob {} already deleted", location.path().display());
        }
        Err(e) => warn!("Failed to delete blob {}: {e}", location.path().display()),
    }
}

/// Extension of an uploaded file name, if it is short plain ASCII.
fn sanitized_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_string())
}
