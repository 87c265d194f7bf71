//! In-memory file store.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{FileStore, FileStoreError, validate_name};

/// In-memory storage implementation.
///
/// Useful for tests and embedders that do not need durability.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemoryFileStore {
    resources: RwLock<HashMap<String, Bytes>>,
}

impl MemoryFileStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn read(&self, name: &str) -> Result<Option<Bytes>, FileStoreError> {
        validate_name(name)?;
        Ok(self
            .resources
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned())
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        validate_name(name)?;
        self.resources
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.to_string(), Bytes::copy_from_slice(bytes));
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FileStoreError> {
        validate_name(from)?;
        validate_name(to)?;
        let mut resources = self
            .resources
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let bytes = resources.remove(from).ok_or_else(|| {
            FileStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such resource: {from}"),
            ))
        })?;
        resources.insert(to.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), FileStoreError> {
        validate_name(name)?;
        self.resources
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rename_moves_bytes() {
        let store = MemoryFileStore::new();
        store.write_atomic("a", b"payload").await.unwrap();
        store.rename("a", "b").await.unwrap();
        assert!(store.read("a").await.unwrap().is_none());
        assert_eq!(&store.read("b").await.unwrap().unwrap()[..], b"payload");
    }

    #[tokio::test]
    async fn rename_missing_is_an_error() {
        let store = MemoryFileStore::new();
        assert!(store.rename("a", "b").await.is_err());
    }
}
