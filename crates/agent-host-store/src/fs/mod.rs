//! Durable byte storage backends.

pub mod dir;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use dir::DirFileStore;
pub use memory::MemoryFileStore;

/// File store error.
#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("Invalid resource name: {0}")]
    InvalidName(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable byte storage keyed by resource name.
///
/// Names are flat identifiers, not paths; backends reject names that
/// contain path separators.
///
/// The single hard guarantee is `write_atomic`: no reader, in this
/// process or after a crash, ever observes a partially-written
/// resource.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a resource's bytes. `None` if the resource does not exist.
    async fn read(&self, name: &str) -> Result<Option<Bytes>, FileStoreError>;

    /// Replace a resource's bytes atomically.
    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), FileStoreError>;

    /// Rename a resource, replacing any resource already at `to`.
    async fn rename(&self, from: &str, to: &str) -> Result<(), FileStoreError>;

    /// Remove a resource. Removing a missing resource is a no-op.
    async fn remove(&self, name: &str) -> Result<(), FileStoreError>;
}

pub(crate) fn validate_name(name: &str) -> Result<(), FileStoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(FileStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
