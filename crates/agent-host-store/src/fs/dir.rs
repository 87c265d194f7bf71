//! Directory-backed file store with atomic writes.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{FileStore, FileStoreError, validate_name};

/// File store rooted at one directory, one file per resource.
///
/// Writes go to a temporary sibling first (`<name>.tmp`), are synced to
/// disk, and are renamed over the target, so an observer sees either
/// the old content or the new content and never a prefix of the new
/// one. The parent directory is synced after the rename so the swap
/// itself survives a crash.
pub struct DirFileStore {
    root: PathBuf,
}

impl DirFileStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FileStoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The directory this store owns.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, FileStoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

fn write_atomic_blocking(root: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    // Appended, not `with_extension`: "a.bak" must not share a temp
    // path with "a".
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, target)?;
    // Make the rename itself durable.
    File::open(root)?.sync_all()?;
    Ok(())
}

#[async_trait]
impl FileStore for DirFileStore {
    async fn read(&self, name: &str) -> Result<Option<Bytes>, FileStoreError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        let target = self.path_for(name)?;
        let root = self.root.clone();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || write_atomic_blocking(&root, &target, &bytes))
            .await
            .map_err(|e| FileStoreError::Io(std::io::Error::other(e)))??;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FileStoreError> {
        let from = self.path_for(from)?;
        let to = self.path_for(to)?;
        tokio::fs::rename(&from, &to).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), FileStoreError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
