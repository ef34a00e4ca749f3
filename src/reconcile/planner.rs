//! Ordered mutation planning.
//!
//! The planner turns a child diff plus the scalar and map differences of the
//! parent into a flat operation list. Order matters: later operations rely on
//! the side effects of earlier ones, so the list is executed strictly in
//! sequence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::PlanError;
use crate::model::{
    BOOT_PARAM_FIRMWARE, BOOT_PARAM_ORDER, ChildKind, MapField, MapPatch, Operation,
    PLATFORM_CORES_PER_SOCKET, PLATFORM_SECUREBOOT, ParentState, ScalarField,
};

use super::constraints::{check_topology, validate_children, validate_parent};
use super::diff::{ChildDiff, SetReconciler};
use super::gate::LiveAttachGate;
use super::overlay::AttributeOverlayTracker;

/// An ordered list of mutations that converges a VM.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationPlan {
    /// Operations in execution order.
    pub operations: Vec<Operation>,
}

/// Builds mutation plans.
#[derive(Debug, Clone, Default)]
pub struct OrderedMutationPlanner {
    reconciler: SetReconciler,
    tracker: AttributeOverlayTracker,
    gate: LiveAttachGate,
}

impl OrderedMutationPlanner {
    /// Creates a planner using the default ownership sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans the operations converging `observed` to `desired`.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] if the input is invalid or cannot be reached
    /// without replacing a child.
    pub fn plan(
        &self,
        desired: &ParentState,
        observed: &ParentState,
    ) -> Result<MutationPlan, PlanError> {
        validate_parent(desired)?;
        validate_children(&desired.children)?;
        check_topology(desired.vcpus.max, desired.cores_per_socket, observed.cores_per_socket)?;

        let diff = self.reconciler.diff(&desired.children, &observed.children)?;
        let plug = self.gate.should_plug(observed.power_state);

        let mut operations = Vec::new();
        Self::plan_names(desired, observed, &mut operations);
        self.plan_other_config(desired, observed, &mut operations);
        Self::plan_children(&diff, ChildKind::Disk, plug, &mut operations);
        Self::plan_cdrom(desired, observed, &mut operations);
        Self::plan_children(&diff, ChildKind::NetworkAdapter, plug, &mut operations);
        Self::plan_memory(desired, observed, &mut operations);
        Self::plan_vcpus(desired, observed, &mut operations);
        Self::plan_topology(desired, observed, &mut operations);
        Self::plan_boot(desired, observed, &mut operations);

        debug!("Planned {} operations", operations.len());
        Ok(MutationPlan { operations })
    }

    fn plan_names(desired: &ParentState, observed: &ParentState, ops: &mut Vec<Operation>) {
        if desired.name_label != observed.name_label {
            ops.push(Operation::SetScalarField {
                field: ScalarField::NameLabel(desired.name_label.clone()),
            });
        }
        if desired.name_description != observed.name_description {
            ops.push(Operation::SetScalarField {
                field: ScalarField::NameDescription(desired.name_description.clone()),
            });
        }
    }

    fn plan_other_config(
        &self,
        desired: &ParentState,
        observed: &ParentState,
        ops: &mut Vec<Operation>,
    ) {
        let managed = self.tracker.managed_view(&desired.other_config.raw);
        if let Some(patch) = self.tracker.changes(&managed, &observed.other_config.raw) {
            ops.push(Operation::SetMapField {
                field: MapField::OtherConfig,
                patch,
            });
        }
    }

    fn plan_children(diff: &ChildDiff, kind: ChildKind, plug: bool, ops: &mut Vec<Operation>) {
        for delete in diff.deletes_of(kind) {
            ops.push(Operation::DeleteChild {
                key: delete.key.clone(),
                child_ref: delete.child_ref.clone(),
            });
        }
        for spec in diff.creates_of(kind) {
            ops.push(Operation::CreateChild { spec: spec.clone() });
        }
        for update in diff.updates_of(kind) {
            for change in &update.changes {
                ops.push(Operation::UpdateChildField {
                    key: update.key.clone(),
                    child_ref: update.child_ref.clone(),
                    change: change.clone(),
                });
            }
        }
        if plug {
            for spec in diff.creates_of(kind) {
                ops.push(Operation::PlugChild { key: spec.key() });
            }
        }
    }

    // Follows the disks so the CD keeps the device slot after them.
    fn plan_cdrom(desired: &ParentState, observed: &ParentState, ops: &mut Vec<Operation>) {
        if let Some(iso) = &desired.cdrom
            && observed.cdrom.as_deref().unwrap_or_default() != iso.as_str()
        {
            ops.push(Operation::SetCdrom {
                iso: Some(iso.clone()).filter(|iso| !iso.is_empty()),
            });
        }
    }

    fn plan_memory(desired: &ParentState, observed: &ParentState, ops: &mut Vec<Operation>) {
        if desired.memory != observed.memory {
            ops.push(Operation::SetScalarField {
                field: ScalarField::MemoryLimits(desired.memory),
            });
        }
    }

    fn plan_vcpus(desired: &ParentState, observed: &ParentState, ops: &mut Vec<Operation>) {
        if desired.vcpus == observed.vcpus {
            return;
        }
        let at_startup = Operation::SetScalarField {
            field: ScalarField::VcpusAtStartup(desired.vcpus.at_startup),
        };
        let max = Operation::SetScalarField {
            field: ScalarField::VcpusMax(desired.vcpus.max),
        };
        // 0 < at_startup <= max must hold after every single write.
        if desired.vcpus.max < observed.vcpus.max {
            ops.extend([at_startup, max]);
        } else {
            ops.extend([max, at_startup]);
        }
    }

    fn plan_topology(desired: &ParentState, observed: &ParentState, ops: &mut Vec<Operation>) {
        if let Some(cores) = desired.cores_per_socket
            && observed.cores_per_socket != Some(cores)
        {
            ops.push(upsert(
                MapField::Platform,
                PLATFORM_CORES_PER_SOCKET,
                cores.to_string(),
            ));
        }
    }

    fn plan_boot(desired: &ParentState, observed: &ParentState, ops: &mut Vec<Operation>) {
        if let Some(mode) = desired.boot_mode
            && observed.boot_mode != Some(mode)
        {
            ops.push(upsert(MapField::Platform, PLATFORM_SECUREBOOT, mode.secure_boot()));
            ops.push(upsert(MapField::HvmBootParams, BOOT_PARAM_FIRMWARE, mode.firmware()));
        }

        if !desired.boot_order.is_empty() && desired.boot_order != observed.boot_order {
            ops.push(upsert(
                MapField::HvmBootParams,
                BOOT_PARAM_ORDER,
                desired.boot_order.clone(),
            ));
        }
    }
}

fn upsert(field: MapField, key: &str, value: impl Into<String>) -> Operation {
    Operation::SetMapField {
        field,
        patch: MapPatch::Upsert {
            entries: BTreeMap::from([(key.to_string(), value.into())]),
        },
    }
}

impl MutationPlan {
    /// Returns true if the plan has no operations.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the number of operations.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns the number of children created.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(|op| matches!(op, Operation::CreateChild { .. }))
    }

    /// Returns the number of children destroyed.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(|op| matches!(op, Operation::DeleteChild { .. }))
    }

    /// Returns the number of in-place writes (child fields and VM fields).
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(|op| {
            matches!(
                op,
                Operation::UpdateChildField { .. }
                    | Operation::SetScalarField { .. }
                    | Operation::SetMapField { .. }
                    | Operation::SetCdrom { .. }
            )
        })
    }

    /// Returns the number of hot-plugs.
    #[must_use]
    pub fn plug_count(&self) -> usize {
        self.count(|op| matches!(op, Operation::PlugChild { .. }))
    }

    fn count(&self, pred: impl Fn(&Operation) -> bool) -> usize {
        self.operations.iter().filter(|op| pred(op)).count()
    }
}

impl std::fmt::Display for MutationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.operations.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Mutation Plan ({} operations):", self.operations.len())?;
        for (i, operation) in self.operations.iter().enumerate() {
            writeln!(f, "  {i}. {operation}")?;
        }
        Ok(())
    }
}
