//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::VmStateRecord;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the record, or `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<VmStateRecord>>;

    /// Saves the record.
    async fn save(&self, record: &VmStateRecord) -> Result<()>;

    /// Deletes the record.
    async fn delete(&self) -> Result<()>;

    /// Checks if a record exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the lock for `operation`.
    ///
    /// An expired lock held by someone else is taken over.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock. Releasing with a stale id is an error.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock regardless of holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
