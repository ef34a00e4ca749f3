//! State management module for xenvm.
//!
//! A local cache of which VM a config manages, what the last apply left
//! behind, and a bounded history of apply attempts.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{ApplyHistoryEntry, ApplyOperation, MAX_HISTORY, STATE_VERSION, VmStateRecord};
