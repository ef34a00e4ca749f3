//! Lock file for the local state cache.
//!
//! Two CLI invocations against the same state file would otherwise interleave
//! their writes. A lock that outlives its expiry is treated as abandoned.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 15 * 60;

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier, needed to release the lock.
    pub lock_id: String,
    /// Who holds the lock (`host-pid-nonce`).
    pub holder: String,
    /// What the holder is doing, e.g. `apply`.
    pub operation: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock held by `holder` for `operation`.
    #[must_use]
    pub fn new(holder: &str, operation: &str) -> Self {
        Self::with_ttl(holder, operation, Duration::seconds(LOCK_EXPIRY_SECS))
    }

    /// Creates a lock with a custom time to live.
    #[must_use]
    pub fn with_ttl(holder: &str, operation: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: operation.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Identifies the current process: hostname, pid and a short nonce.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let nonce = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{}-{}", std::process::id(), &nonce[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock_is_live() {
        let lock = LockInfo::new("host-1-abcd", "apply");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > LOCK_EXPIRY_SECS - 5);
        assert_eq!(lock.operation, "apply");
    }

    #[test]
    fn test_negative_ttl_is_expired() {
        let lock = LockInfo::with_ttl("host-1-abcd", "apply", Duration::seconds(-1));
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();
        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }
}
