//! Storage collaborator.
//!
//! A storage is a named container (one per run direction) holding parameter
//! payloads as trees of files and directories.

mod filesystem;

use async_trait::async_trait;

use taskpod_core::StorageData;

use crate::error::StorageError;

pub use filesystem::FileSystemStorage;

/// Object storage for parameter payloads.
#[async_trait]
pub trait FileStorageHandler: Send + Sync {
    /// Create an empty storage.
    async fn create_storage(&self, storage_id: &str) -> Result<(), StorageError>;

    /// Delete a storage and everything in it.
    async fn delete_storage(&self, storage_id: &str) -> Result<(), StorageError>;

    /// Returns true if the storage exists.
    async fn storage_exists(&self, storage_id: &str) -> Result<bool, StorageError>;

    /// Write every node of `data`. Directories exist before their descendants
    /// are written. Entries written before a failure are left in place.
    async fn save(&self, storage_id: &str, data: &StorageData) -> Result<(), StorageError>;

    /// Read the subtree rooted at `root_name`. Every node is on the returned worklist.
    async fn read(&self, storage_id: &str, root_name: &str) -> Result<StorageData, StorageError>;
}
