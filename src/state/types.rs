//! State types for the local VM cache.
//!
//! The cache is advisory: every plan starts from a fresh observation of the
//! host. It remembers which VM the config manages and what happened on past
//! applies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ParentState;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
pub const MAX_HISTORY: usize = 50;

/// The cached state of one managed VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmStateRecord {
    /// State format version.
    pub version: String,
    /// Name label from the config that created the record.
    pub name_label: String,
    /// UUID of the managed VM, once it exists.
    #[serde(default)]
    pub vm_uuid: Option<String>,
    /// Opaque reference of the VM as last seen. References do not survive a
    /// toolstack restart, so lookups prefer the UUID.
    #[serde(default)]
    pub vm_ref: Option<String>,
    /// Hash of the last successfully applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Snapshot after the last apply, folded from executed operations.
    #[serde(default)]
    pub observed: Option<ParentState>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub last_updated: DateTime<Utc>,
    /// Apply history (most recent last).
    #[serde(default)]
    pub history: Vec<ApplyHistoryEntry>,
}

/// A single entry in the apply history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyHistoryEntry {
    /// When the run happened.
    pub timestamp: DateTime<Utc>,
    /// Kind of run.
    pub operation: ApplyOperation,
    /// Configuration hash at the time of the run.
    pub config_hash: String,
    /// Number of operations in the plan.
    pub planned: usize,
    /// Number of operations that completed.
    pub completed: usize,
    /// Index of the failing operation, if the run stopped early.
    #[serde(default)]
    pub failed_index: Option<usize>,
    /// Error message of the failing operation.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of recorded runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOperation {
    /// The VM was cloned from its template, then reconciled.
    Create,
    /// An existing VM was reconciled.
    Reconcile,
    /// The VM was destroyed.
    Destroy,
}

impl VmStateRecord {
    /// Creates an empty record for a VM name.
    #[must_use]
    pub fn new(name_label: &str) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION.to_string(),
            name_label: name_label.to_string(),
            vm_uuid: None,
            vm_ref: None,
            config_hash: String::new(),
            observed: None,
            created_at: now,
            last_updated: now,
            history: Vec::new(),
        }
    }

    /// Records the VM the config manages.
    pub fn set_vm(&mut self, vm_uuid: &str, vm_ref: &str) {
        self.vm_uuid = Some(vm_uuid.to_string());
        self.vm_ref = Some(vm_ref.to_string());
        self.last_updated = Utc::now();
    }

    /// Forgets the VM, keeping the history.
    pub fn clear_vm(&mut self) {
        self.vm_uuid = None;
        self.vm_ref = None;
        self.observed = None;
        self.config_hash.clear();
        self.last_updated = Utc::now();
    }

    /// Stores the post-apply snapshot.
    pub fn set_observed(&mut self, observed: ParentState) {
        self.observed = Some(observed);
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    ///
    /// A successful entry also becomes the current config hash.
    pub fn add_history(&mut self, entry: ApplyHistoryEntry) {
        if entry.is_success() && entry.operation != ApplyOperation::Destroy {
            self.config_hash.clone_from(&entry.config_hash);
        }
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.last_updated = Utc::now();
    }

    /// Returns the most recent history entry.
    #[must_use]
    pub fn last_run(&self) -> Option<&ApplyHistoryEntry> {
        self.history.last()
    }

    /// Returns true if the recorded hash differs from `config_hash`.
    #[must_use]
    pub fn is_drifted(&self, config_hash: &str) -> bool {
        self.config_hash != config_hash
    }
}

impl ApplyHistoryEntry {
    /// Creates a history entry for a run that completed every operation.
    #[must_use]
    pub fn succeeded(operation: ApplyOperation, config_hash: &str, planned: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            planned,
            completed: planned,
            failed_index: None,
            error: None,
        }
    }

    /// Creates a history entry for a run that stopped at `failed_index`.
    #[must_use]
    pub fn failed(
        operation: ApplyOperation,
        config_hash: &str,
        planned: usize,
        failed_index: usize,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            planned,
            completed: failed_index,
            failed_index: Some(failed_index),
            error: Some(error.to_string()),
        }
    }

    /// Returns true if the run finished without error.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl std::fmt::Display for ApplyOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Reconcile => "reconcile",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
