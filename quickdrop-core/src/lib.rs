//! Ephemeral single-use file relay.
//!
//! A sender uploads a file and gets back a [`Token`]. The first download of
//! that token streams the file and destroys it; uploads nobody picks up are
//! reclaimed by the [`reaper`] once they outlive their TTL.

pub mod blob_store;
pub mod qr;
pub mod reaper;
pub mod registry;
pub mod token;
pub mod transfer;

pub use blob_store::{BlobLocation, BlobStore, SavedBlob, StorageError};
pub use reaper::{spawn_reaper, ReaperConfig, ReaperHandle};
pub use registry::{Entry, Registry};
pub use token::Token;
pub use transfer::{
    Download, DownloadError, DownloadStream, TokenStatus, TransferManager, UploadError,
};
