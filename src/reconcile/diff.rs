//! Keyed diff of desired vs observed children.

use tracing::debug;

use crate::error::PlanError;
use crate::model::{ChildFieldChange, ChildKey, ChildKind, ChildResourceSpec};

use super::constraints::check_immutable;
use super::keyer::{IdentityKeyer, Side};

/// An in-place update of an existing child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildUpdate {
    /// Child key.
    pub key: ChildKey,
    /// Host reference of the child.
    pub child_ref: String,
    /// Changed mutable fields, one write each.
    pub changes: Vec<ChildFieldChange>,
}

/// Removal of an observed child that is no longer desired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDelete {
    /// Child key.
    pub key: ChildKey,
    /// Host reference of the child.
    pub child_ref: String,
}

/// Result of diffing two child lists. Every list is sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildDiff {
    /// Children to create.
    pub creates: Vec<ChildResourceSpec>,
    /// Children to update in place.
    pub updates: Vec<ChildUpdate>,
    /// Children to destroy.
    pub deletes: Vec<ChildDelete>,
}

impl ChildDiff {
    /// Returns true if nothing changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Creates of one kind.
    pub fn creates_of(&self, kind: ChildKind) -> impl Iterator<Item = &ChildResourceSpec> {
        self.creates.iter().filter(move |spec| spec.kind() == kind)
    }

    /// Updates of one kind.
    pub fn updates_of(&self, kind: ChildKind) -> impl Iterator<Item = &ChildUpdate> {
        self.updates.iter().filter(move |update| update.key.kind == kind)
    }

    /// Deletes of one kind.
    pub fn deletes_of(&self, kind: ChildKind) -> impl Iterator<Item = &ChildDelete> {
        self.deletes.iter().filter(move |delete| delete.key.kind == kind)
    }
}

/// Computes create/update/delete sets over children keyed by backing UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetReconciler {
    keyer: IdentityKeyer,
}

impl SetReconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            keyer: IdentityKeyer::new(),
        }
    }

    /// Diffs desired children against observed ones.
    ///
    /// # Errors
    ///
    /// Fails on key collisions, immutable changes, or an observed child that
    /// must be touched but has no host reference.
    pub fn diff(
        &self,
        desired: &[ChildResourceSpec],
        observed: &[ChildResourceSpec],
    ) -> Result<ChildDiff, PlanError> {
        let desired_index = self.keyer.index(Side::Desired, desired)?;
        let observed_index = self.keyer.index(Side::Observed, observed)?;

        let mut diff = ChildDiff::default();

        for (key, want) in &desired_index {
            let Some(have) = observed_index.get(key) else {
                debug!("{key} is not attached, will create");
                diff.creates.push((*want).clone());
                continue;
            };

            let changes = Self::field_changes(key, want, have)?;
            if changes.is_empty() {
                continue;
            }
            debug!("{key} has {} changed fields", changes.len());
            diff.updates.push(ChildUpdate {
                key: key.clone(),
                child_ref: Self::require_ref(key, have)?,
                changes,
            });
        }

        for (key, have) in &observed_index {
            if desired_index.contains_key(key) {
                continue;
            }
            debug!("{key} is no longer desired, will delete");
            diff.deletes.push(ChildDelete {
                key: key.clone(),
                child_ref: Self::require_ref(key, have)?,
            });
        }

        Ok(diff)
    }

    fn field_changes(
        key: &ChildKey,
        want: &ChildResourceSpec,
        have: &ChildResourceSpec,
    ) -> Result<Vec<ChildFieldChange>, PlanError> {
        let mut changes = Vec::new();
        match (want, have) {
            (ChildResourceSpec::Disk(want), ChildResourceSpec::Disk(have)) => {
                if want.mode != have.mode {
                    changes.push(ChildFieldChange::Mode(want.mode));
                }
                if want.bootable != have.bootable {
                    changes.push(ChildFieldChange::Bootable(want.bootable));
                }
            }
            (ChildResourceSpec::NetworkAdapter(want), ChildResourceSpec::NetworkAdapter(have)) => {
                check_immutable(key, have, want)?;
                if want.other_config != have.other_config {
                    changes.push(ChildFieldChange::OtherConfig(want.other_config.clone()));
                }
            }
            // Keys carry the kind, so mixed pairs cannot share a key.
            _ => {
                return Err(PlanError::validation(
                    key.to_string(),
                    "desired and observed kinds differ",
                ));
            }
        }
        Ok(changes)
    }

    fn require_ref(key: &ChildKey, have: &ChildResourceSpec) -> Result<String, PlanError> {
        have.reference().map(String::from).ok_or_else(|| {
            PlanError::validation(
                key.to_string(),
                format!("observed {} has no host reference", key.kind.xenapi_class()),
            )
        })
    }
}
