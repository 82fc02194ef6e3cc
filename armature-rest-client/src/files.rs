//! File operations used by downloads.

use std::io;
use std::path::Path;

use async_trait::async_trait;

/// Moves downloaded files into place.
#[async_trait]
pub trait FileMover: Send + Sync {
    /// Move `source` to `destination`.
    async fn move_file(&self, source: &Path, destination: &Path) -> io::Result<()>;

    /// Remove a leftover file.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// [`FileMover`] backed by `tokio::fs`.
///
/// Moves are plain renames, so a destination on another filesystem fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFileMover;

#[async_trait]
impl FileMover for TokioFileMover {
    async fn move_file(&self, source: &Path, destination: &Path) -> io::Result<()> {
        tokio::fs::rename(source, destination).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}
