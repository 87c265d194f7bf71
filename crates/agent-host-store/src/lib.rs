//! Versioned, atomically-persisted registries for the agent host.
//!
//! This crate provides:
//! - `FileStore` - Durable byte storage with an atomic-write contract
//! - `RegistryStore` - Named, versioned record registries with
//!   optimistic-concurrency commits and write coalescing

pub mod fs;
pub mod registry;

pub use fs::{DirFileStore, FileStore, FileStoreError, MemoryFileStore};
pub use registry::{
    Mutation, RecoveryAction, RegistryStore, Snapshot, StoreConfig, StoreError,
};
