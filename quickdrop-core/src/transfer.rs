//! Lifecycle of a transfer: upload, single-use download, expiry.
//!
//! Every token goes `ACTIVE -> DESTROYED` exactly once. Destruction always
//! removes the registry entry first and deletes the blob second, so a lookup
//! can never see an entry whose bytes are already gone.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::blob_store::{BlobStore, StorageError};
use crate::registry::{Entry, Registry};
use crate::token::Token;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file uploaded")]
    Empty,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Unknown, consumed and expired tokens all look the same from outside.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("File not found or already destroyed")]
    NotFound,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    Exists,
    NotFound,
}

pub struct TransferManager {
    registry: Registry,
    blobs: BlobStore,
}

impl TransferManager {
    pub fn new(blobs: BlobStore) -> Self {
        Self {
            registry: Registry::new(),
            blobs,
        }
    }

    /// Store `reader` as a new blob and register it.
    ///
    /// A zero-byte stream is rejected and its blob removed; no registry entry
    /// exists for a failed upload.
    pub async fn upload<R>(
        &self,
        reader: &mut R,
        file_name: Option<&str>,
    ) -> Result<Token, UploadError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let saved = self.blobs.save(reader, file_name).await?;
        if saved.size == 0 {
            self.blobs.delete(&saved.location).await;
            return Err(UploadError::Empty);
        }

        let token = self.registry.insert(saved.location);
        info!("Stored upload for token {token} ({} bytes)", saved.size);
        Ok(token)
    }

    /// Begin the one and only download of `token`.
    ///
    /// The first caller claims the entry; anyone racing it gets `NotFound`.
    /// The returned [`Download`] consumes the token when it finishes, fails,
    /// or is dropped, whichever happens first.
    pub async fn download(self: &Arc<Self>, token: &Token) -> Result<Download, DownloadError> {
        let entry = self
            .registry
            .claim(token)
            .ok_or(DownloadError::NotFound)?;
        // Armed before the first await: a cancelled download still consumes
        // the claimed token.
        let guard = ConsumeGuard {
            manager: self.clone(),
            token: token.clone(),
            done: false,
        };

        let (file, len) = match self.blobs.open(entry.location()).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Failed to open blob for token {token}: {e}");
                guard.finish().await;
                return Err(match e {
                    StorageError::NotFound(_) => DownloadError::NotFound,
                    other => DownloadError::Storage(other),
                });
            }
        };

        Ok(Download {
            file,
            len,
            file_name: entry.location().file_name(),
            guard,
        })
    }

    /// Side-effect free existence check.
    pub fn status(&self, token: &Token) -> TokenStatus {
        if self.registry.lookup(token).is_some() {
            TokenStatus::Exists
        } else {
            TokenStatus::NotFound
        }
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Destroy every entry older than `ttl` that no download has claimed.
    /// Returns how many this call removed.
    pub async fn sweep_expired(&self, ttl: Duration) -> usize {
        self.sweep_expired_at(Instant::now(), ttl).await
    }

    pub async fn sweep_expired_at(&self, now: Instant, ttl: Duration) -> usize {
        let expired: Vec<Entry> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|entry| now.saturating_duration_since(entry.created_at()) > ttl)
            .collect();

        let mut reclaimed = 0;
        for entry in expired {
            // None: a download claimed or finished it in the meantime
            let Some(entry) = self.registry.remove_unclaimed(entry.token()) else {
                continue;
            };
            self.blobs.delete(entry.location()).await;
            info!("Expired token {}", entry.token());
            reclaimed += 1;
        }
        reclaimed
    }

    /// Remove the entry, then delete its blob. The registry removal happens
    /// before returning; the blob deletion is handed to the runtime when there
    /// is one.
    fn reclaim_detached(self: &Arc<Self>, token: &Token) -> Option<Entry> {
        let entry = self.registry.remove(token)?;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.clone();
                let location = entry.location().clone();
                handle.spawn(async move { manager.blobs.delete(&location).await });
            }
            Err(_) => self.blobs.delete_blocking(entry.location()),
        }
        Some(entry)
    }
}

/// Consumes its token exactly once, on `finish` or on drop.
struct ConsumeGuard {
    manager: Arc<TransferManager>,
    token: Token,
    done: bool,
}

impl ConsumeGuard {
    async fn finish(mut self) {
        self.done = true;
        let Some(entry) = self.manager.registry.remove(&self.token) else {
            return;
        };
        let manager = self.manager.clone();
        let location = entry.location().clone();
        // Runs to completion even if this future is dropped.
        let _ = tokio::spawn(async move { manager.blobs.delete(&location).await }).await;
        info!("Destroyed file for token {}", self.token);
    }

    fn finish_detached(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if self.manager.reclaim_detached(&self.token).is_some() {
            info!("Destroyed file for token {}", self.token);
        }
    }
}

impl Drop for ConsumeGuard {
    fn drop(&mut self) {
        self.finish_detached();
    }
}

/// An in-progress download. Dropping it unread still consumes the token.
pub struct Download {
    // Field order matters: the file closes before the guard deletes it.
    file: File,
    len: u64,
    file_name: String,
    guard: ConsumeGuard,
}

impl Download {
    pub fn token(&self) -> &Token {
        &self.guard.token
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Name to offer the receiver, taken from the stored blob.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Read the whole blob, then destroy it, even if the read failed.
    pub async fn read_to_end(self) -> io::Result<Vec<u8>> {
        let Download {
            mut file,
            len,
            guard,
            ..
        } = self;

        let mut data = Vec::with_capacity(len as usize);
        let result = file.read_to_end(&mut data).await;
        drop(file);
        guard.finish().await;
        result.map(|_| data)
    }

    pub fn into_stream(self) -> DownloadStream {
        DownloadStream {
            inner: Some(ReaderStream::new(self.file)),
            guard: self.guard,
        }
    }
}

/// Byte stream over a download. The token is consumed at end of stream, on
/// the first read error, or when the stream is dropped early.
pub struct DownloadStream {
    inner: Option<ReaderStream<File>>,
    guard: ConsumeGuard,
}

impl Stream for DownloadStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                this.inner = None;
                this.guard.finish_detached();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                this.guard.finish_detached();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
