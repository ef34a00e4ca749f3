//! Local file-based state storage backend.
//!
//! The record lives in one JSON file (`.xenvm/state.json` by default) next to
//! a `<name>.lock` file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_STATE_PATH;
use crate::error::{Result, StateError, XenVmError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{STATE_VERSION, VmStateRecord};

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl Default for LocalStateStore {
    fn default() -> Self {
        Self::with_state_path(DEFAULT_STATE_PATH)
    }
}

impl LocalStateStore {
    /// Creates a store over a state file path.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path.with_extension("lock");
        Self { state_path, lock_path }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if let Some(dir) = self.state_path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(dir)
                .await
                .map_err(|e| write_failed(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corrupted(format!("Failed to read lock file: {e}"))),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| corrupted(format!("Failed to parse lock file: {e}")))
    }

    /// Creates the lock file, failing if one already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        self.ensure_dir().await?;
        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| {
                XenVmError::State(StateError::serialization(format!(
                    "Failed to serialize lock: {e}"
                )))
            })?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(lock_failed(format!("Failed to create lock file: {e}"))),
        };

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| lock_failed(format!("Failed to write lock file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| lock_failed(format!("Failed to sync lock file: {e}")))?;
        Ok(true)
    }

    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(lock_failed(format!("Failed to delete lock file: {e}"))),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<VmStateRecord>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State file does not exist: {}", self.state_path.display());
                return Ok(None);
            }
            Err(e) => return Err(corrupted(format!("Failed to read state file: {e}"))),
        };

        debug!("Loaded state from: {}", self.state_path.display());
        let record: VmStateRecord = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Failed to parse state file: {e}")))?;

        if record.version != STATE_VERSION {
            return Err(XenVmError::State(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: record.version,
            }));
        }

        Ok(Some(record))
    }

    async fn save(&self, record: &VmStateRecord) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| {
                XenVmError::State(StateError::serialization(format!(
                    "Failed to serialize state: {e}"
                )))
            })?;

        // Write beside the target, then rename over it
        let temp_path = self.state_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| write_failed(format!("Failed to create temp state file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_failed(format!("Failed to write state file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| write_failed(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| write_failed(format!("Failed to rename state file: {e}")))?;

        info!("Saved state to: {}", self.state_path.display());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.state_path).await {
            Ok(()) => info!("Deleted state file: {}", self.state_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(write_failed(format!("Failed to delete state file: {e}"))),
        }
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.state_path).await.unwrap_or(false))
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock_info = LockInfo::new(&holder_id, operation);

        if self.create_lock_file(&lock_info).await? {
            info!("Acquired state lock {} (expires in {LOCK_EXPIRY_SECS}s)", lock_info.lock_id);
            return Ok(lock_info);
        }

        match self.read_lock_file().await? {
            Some(existing) if !existing.is_expired() => {
                Err(XenVmError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }))
            }
            stale => {
                if let Some(existing) = stale {
                    warn!("Taking over expired lock held by {}", existing.holder);
                }
                self.delete_lock_file().await?;
                if self.create_lock_file(&lock_info).await? {
                    info!("Acquired state lock {}", lock_info.lock_id);
                    Ok(lock_info)
                } else {
                    Err(lock_failed("Lost the race for an expired lock"))
                }
            }
        }
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
                Ok(())
            }
            Some(existing) => Err(lock_failed(format!(
                "Lock {lock_id} is not held; current lock {} belongs to {}",
                existing.lock_id, existing.holder
            ))),
            None => {
                debug!("Lock {lock_id} already released");
                Ok(())
            }
        }
    }

    async fn force_unlock(&self) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            warn!(
                "Force-releasing lock held by {} since {}",
                existing.holder, existing.acquired_at
            );
        }
        self.delete_lock_file().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

fn corrupted(message: String) -> XenVmError {
    XenVmError::State(StateError::Corrupted { message })
}

fn write_failed(message: String) -> XenVmError {
    XenVmError::State(StateError::WriteFailed { message })
}

fn lock_failed(message: impl Into<String>) -> XenVmError {
    XenVmError::State(StateError::LockFailed {
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store =
            LocalStateStore::with_state_path(temp_dir.path().join(".xenvm").join("state.json"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut record = VmStateRecord::new("web-1");
        record.set_vm("uuid-1", "OpaqueRef:vm");
        store.save(&record).await.expect("Failed to save state");

        let loaded = store.load().await.unwrap().expect("State should exist");
        assert_eq!(loaded.name_label, "web-1");
        assert_eq!(loaded.vm_uuid.as_deref(), Some("uuid-1"));
        assert!(!store.state_path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();
        assert!(store.load().await.unwrap().is_none());
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupted_and_version_mismatch() {
        let (store, _temp) = create_test_store();
        store.save(&VmStateRecord::new("web-1")).await.unwrap();

        std::fs::write(store.state_path(), "{not json").unwrap();
        assert!(matches!(
            store.load().await,
            Err(XenVmError::State(StateError::Corrupted { .. }))
        ));

        let mut record = VmStateRecord::new("web-1");
        record.version = String::from("0.1");
        std::fs::write(store.state_path(), serde_json::to_string(&record).unwrap()).unwrap();
        assert!(matches!(
            store.load().await,
            Err(XenVmError::State(StateError::VersionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store.acquire_lock("holder-1", "apply").await.unwrap();
        assert_eq!(store.get_lock_info().await.unwrap(), Some(lock.clone()));

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(store.get_lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let first = store.acquire_lock("holder-1", "apply").await.unwrap();
        let result = store.acquire_lock("holder-2", "apply").await;
        assert!(matches!(
            result,
            Err(XenVmError::State(StateError::LockedByOther { ref holder, .. }))
                if holder == "holder-1"
        ));

        assert!(store.release_lock("not-the-lock").await.is_err());
        store.release_lock(&first.lock_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();

        let stale = LockInfo::with_ttl("crashed", "apply", Duration::seconds(-60));
        assert!(store.create_lock_file(&stale).await.unwrap());

        let lock = store.acquire_lock("holder-2", "plan").await.unwrap();
        assert_eq!(lock.holder, "holder-2");
        assert_eq!(store.get_lock_info().await.unwrap().map(|l| l.lock_id), Some(lock.lock_id));
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let (store, _temp) = create_test_store();
        store.acquire_lock("", "apply").await.unwrap();
        store.force_unlock().await.unwrap();
        assert!(store.get_lock_info().await.unwrap().is_none());
    }
}
