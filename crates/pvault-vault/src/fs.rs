//! Filesystem seam for blob files, the ephemeral cache and the app state
//! document.
//!
//! Everything returns plain `io::Result`; components convert to
//! `VaultError` at their own boundary where they know which path failed.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait BlobFs: Send + Sync {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create or truncate `path`, owner-only, and fsync.
    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Overwrite the existing bytes of `path` in place starting at offset 0,
    /// without truncating or reallocating the file, and fsync.
    async fn overwrite(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn remove(&self, path: &Path) -> io::Result<()>;

    async fn file_len(&self, path: &Path) -> io::Result<u64>;

    async fn exists(&self, path: &Path) -> bool {
        self.file_len(path).await.is_ok()
    }

    /// Regular files directly inside `dir`. A missing directory lists empty.
    async fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()>;
}

/// `BlobFs` over the local filesystem via `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[async_trait]
impl BlobFs for LocalFs {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path).await?;
        file.write_all(data).await?;
        file.sync_all().await
    }

    async fn overwrite(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await?;
        file.write_all(data).await?;
        file.sync_all().await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn file_len(&self, path: &Path) -> io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overwrite_keeps_length_and_replaces_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        LocalFs.write(&path, b"0123456789").await.unwrap();

        LocalFs.overwrite(&path, b"abcdefghij").await.unwrap();
        assert_eq!(LocalFs.read(&path).await.unwrap(), b"abcdefghij");
        assert_eq!(LocalFs.file_len(&path).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_overwrite_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalFs
            .overwrite(&dir.path().join("absent"), b"x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty_and_skips_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalFs.list(&dir.path().join("nope")).await.unwrap().is_empty());

        LocalFs.write(&dir.path().join("b.blob"), b"b").await.unwrap();
        LocalFs.write(&dir.path().join("a.blob"), b"a").await.unwrap();
        LocalFs.create_dir_all(&dir.path().join("sub")).await.unwrap();

        let listed = LocalFs.list(dir.path()).await.unwrap();
        assert_eq!(
            listed,
            vec![dir.path().join("a.blob"), dir.path().join("b.blob")]
        );
    }

    #[tokio::test]
    async fn test_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        assert!(!LocalFs.exists(&path).await);
        LocalFs.write(&path, b"").await.unwrap();
        assert!(LocalFs.exists(&path).await);
    }
}
