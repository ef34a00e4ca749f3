//! Natural keys and keyed indexing of child lists.

use std::collections::BTreeMap;

use crate::error::PlanError;
use crate::model::{ChildKey, ChildResourceSpec};

/// Which side of a diff a child list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// User configuration.
    Desired,
    /// Host snapshot.
    Observed,
}

impl Side {
    /// Label used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desired => "desired",
            Self::Observed => "observed",
        }
    }
}

/// Derives keys and indexes child lists by key.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityKeyer;

impl IdentityKeyer {
    /// Creates a new keyer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns the natural key of a child.
    #[must_use]
    pub fn key(&self, spec: &ChildResourceSpec) -> ChildKey {
        spec.key()
    }

    /// Indexes one side of a diff.
    ///
    /// # Errors
    ///
    /// Returns `IdentityCollision` if two children share a key.
    pub fn index<'a>(
        &self,
        side: Side,
        children: &'a [ChildResourceSpec],
    ) -> Result<BTreeMap<ChildKey, &'a ChildResourceSpec>, PlanError> {
        let mut index = BTreeMap::new();
        for child in children {
            let key = self.key(child);
            if index.contains_key(&key) {
                return Err(PlanError::IdentityCollision {
                    side: side.as_str(),
                    key,
                });
            }
            index.insert(key, child);
        }
        Ok(index)
    }
}
