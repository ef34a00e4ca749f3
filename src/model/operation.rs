//! Mutation operations emitted by the planner and their execution outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::child::{ChildKey, ChildResourceSpec, DiskMode};
use super::parent::MemoryLimits;

/// A single mutating field write on an existing child.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ChildFieldChange {
    /// Disk attach mode.
    Mode(DiskMode),
    /// Disk bootable flag.
    Bootable(bool),
    /// Adapter attribute map (full replacement).
    OtherConfig(BTreeMap<String, String>),
}

/// A scalar field on the VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ScalarField {
    /// `name_label`.
    NameLabel(String),
    /// `name_description`.
    NameDescription(String),
    /// `VCPUs_at_startup`.
    VcpusAtStartup(u32),
    /// `VCPUs_max`.
    VcpusMax(u32),
    /// All four memory bounds, written in one call.
    MemoryLimits(MemoryLimits),
}

/// A map-valued field on the VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MapField {
    /// `platform`.
    Platform,
    /// `HVM_boot_params`.
    HvmBootParams,
    /// `other_config`.
    OtherConfig,
}

/// How a map field is rewritten.
///
/// Patches are applied to the value read from the host immediately before
/// the write, never to a cached copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MapPatch {
    /// Insert or overwrite the given entries, leave everything else.
    Upsert {
        /// Entries to write.
        entries: BTreeMap<String, String>,
    },
    /// Ownership-scoped merge of the managed entries.
    Overlay {
        /// Entries xenvm should own after the write.
        managed: BTreeMap<String, String>,
        /// Sentinel key recording ownership.
        sentinel: String,
    },
}

/// A planned mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a child in the first free slot.
    CreateChild {
        /// Child to create.
        spec: ChildResourceSpec,
    },
    /// Write one field of an existing child.
    UpdateChildField {
        /// Child key.
        key: ChildKey,
        /// Host reference of the child.
        child_ref: String,
        /// Field write.
        change: ChildFieldChange,
    },
    /// Destroy an existing child.
    DeleteChild {
        /// Child key.
        key: ChildKey,
        /// Host reference of the child.
        child_ref: String,
    },
    /// Hot-plug a child created earlier in the same plan.
    PlugChild {
        /// Child key.
        key: ChildKey,
    },
    /// Write a scalar VM field.
    SetScalarField {
        /// Field and value.
        field: ScalarField,
    },
    /// Insert an ISO into the CD drive, or eject it when `iso` is `None`.
    SetCdrom {
        /// Name label of the ISO VDI.
        iso: Option<String>,
    },
    /// Read-modify-write a map VM field.
    SetMapField {
        /// Target map.
        field: MapField,
        /// Patch to apply to the current value.
        patch: MapPatch,
    },
}

/// What a successfully executed operation produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// A child was created.
    Created {
        /// Host reference of the new child.
        child_ref: String,
        /// Device slot it was assigned.
        device: String,
    },
    /// A map field was written with this full value.
    MapWritten {
        /// Value written to the host.
        value: BTreeMap<String, String>,
    },
    /// The call succeeded with nothing to record.
    Done,
}

/// An operation together with its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutedOperation {
    /// The planned operation.
    pub operation: Operation,
    /// What it produced.
    pub outcome: OperationOutcome,
}

impl MapField {
    /// XenAPI field name.
    #[must_use]
    pub const fn xenapi_name(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::HvmBootParams => "HVM_boot_params",
            Self::OtherConfig => "other_config",
        }
    }
}

impl Operation {
    /// Short verb for tables.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::CreateChild { .. } => "create",
            Self::UpdateChildField { .. } => "update",
            Self::DeleteChild { .. } => "delete",
            Self::PlugChild { .. } => "plug",
            Self::SetScalarField { .. } | Self::SetMapField { .. } => "set",
            Self::SetCdrom { iso: Some(_) } => "insert",
            Self::SetCdrom { iso: None } => "eject",
        }
    }

    /// What the operation acts on.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::CreateChild { spec } => format!("{} {}", spec.kind(), spec.backing_uuid()),
            Self::UpdateChildField { key, .. }
            | Self::DeleteChild { key, .. }
            | Self::PlugChild { key } => key.to_string(),
            Self::SetScalarField { field } => field.name().to_string(),
            Self::SetMapField { field, .. } => field.xenapi_name().to_string(),
            Self::SetCdrom { .. } => String::from("cdrom"),
        }
    }

    /// Value-level detail for tables.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::CreateChild { spec } => match spec {
                ChildResourceSpec::Disk(disk) => {
                    format!("mode={} bootable={}", disk.mode, disk.bootable)
                }
                ChildResourceSpec::NetworkAdapter(adapter) => format!(
                    "mac={} mtu={}",
                    adapter.mac.as_deref().unwrap_or("auto"),
                    adapter.mtu.map_or_else(|| String::from("default"), |m| m.to_string())
                ),
            },
            Self::UpdateChildField { change, .. } => match change {
                ChildFieldChange::Mode(mode) => format!("mode -> {mode}"),
                ChildFieldChange::Bootable(bootable) => format!("bootable -> {bootable}"),
                ChildFieldChange::OtherConfig(map) => format!("other_config -> {} keys", map.len()),
            },
            Self::DeleteChild { child_ref, .. } => child_ref.clone(),
            Self::PlugChild { .. } => String::from("hot-plug into running VM"),
            Self::SetScalarField { field } => field.value_string(),
            Self::SetMapField { patch, .. } => match patch {
                MapPatch::Upsert { entries } => entries
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(", "),
                MapPatch::Overlay { managed, .. } => format!("{} owned keys", managed.len()),
            },
            Self::SetCdrom { iso } => iso.clone().unwrap_or_default(),
        }
    }

    /// Returns true for operations that create, update or delete a child.
    #[must_use]
    pub const fn touches_child(&self) -> bool {
        matches!(
            self,
            Self::CreateChild { .. } | Self::UpdateChildField { .. } | Self::DeleteChild { .. }
        )
    }
}

impl ScalarField {
    /// XenAPI field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NameLabel(_) => "name_label",
            Self::NameDescription(_) => "name_description",
            Self::VcpusAtStartup(_) => "VCPUs_at_startup",
            Self::VcpusMax(_) => "VCPUs_max",
            Self::MemoryLimits(_) => "memory_limits",
        }
    }

    fn value_string(&self) -> String {
        match self {
            Self::NameLabel(value) | Self::NameDescription(value) => format!("{value:?}"),
            Self::VcpusAtStartup(count) | Self::VcpusMax(count) => count.to_string(),
            Self::MemoryLimits(limits) => format!(
                "static {}..{}, dynamic {}..{}",
                limits.static_min, limits.static_max, limits.dynamic_min, limits.dynamic_max
            ),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.verb(), self.target())?;
        let detail = self.detail();
        if !detail.is_empty() {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}
