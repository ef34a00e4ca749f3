//! Folding executed operations into a cached snapshot.

use std::collections::BTreeMap;
use tracing::warn;

use crate::model::{
    ChildFieldChange, ChildKey, ChildResourceSpec, ExecutedOperation, MapField, Operation,
    OperationOutcome, OverlayMap, ParentState, ScalarField,
};

use super::overlay::apply_patch;

/// Returns the state the host is in after `executed` ran against `observed`.
///
/// Works on a partial prefix too, so a failed run can still update the cache.
#[must_use]
pub fn apply_locally(observed: &ParentState, executed: &[ExecutedOperation]) -> ParentState {
    let mut state = observed.clone();
    let mut derived_stale = false;

    for entry in executed {
        match (&entry.operation, &entry.outcome) {
            (Operation::CreateChild { spec }, OperationOutcome::Created { child_ref, device }) => {
                state.children.push(spec.attached(child_ref, device));
            }
            (Operation::CreateChild { spec }, outcome) => {
                warn!("Create of {} recorded without reference ({outcome:?})", spec.key());
            }
            (Operation::UpdateChildField { key, change, .. }, _) => {
                if let Some(child) = find_child(&mut state.children, key) {
                    apply_change(child, change);
                }
            }
            (Operation::DeleteChild { key, .. }, _) => {
                state.children.retain(|child| child.key() != *key);
            }
            (Operation::PlugChild { .. }, _) => {}
            (Operation::SetCdrom { iso }, _) => state.cdrom = Some(iso.clone().unwrap_or_default()),
            (Operation::SetScalarField { field }, _) => apply_scalar(&mut state, field),
            (Operation::SetMapField { field, patch }, outcome) => {
                let current = map_value(&state, *field);
                let value = match outcome {
                    OperationOutcome::MapWritten { value } => value.clone(),
                    _ => apply_patch(patch, &current),
                };
                set_map_value(&mut state, *field, value);
                derived_stale |= matches!(field, MapField::Platform | MapField::HvmBootParams);
            }
        }
    }

    if derived_stale {
        state.refresh_derived();
    }
    state
}

fn find_child<'a>(
    children: &'a mut [ChildResourceSpec],
    key: &ChildKey,
) -> Option<&'a mut ChildResourceSpec> {
    children.iter_mut().find(|child| child.key() == *key)
}

pub(crate) fn apply_change(child: &mut ChildResourceSpec, change: &ChildFieldChange) {
    match (child, change) {
        (ChildResourceSpec::Disk(disk), ChildFieldChange::Mode(mode)) => disk.mode = *mode,
        (ChildResourceSpec::Disk(disk), ChildFieldChange::Bootable(bootable)) => {
            disk.bootable = *bootable;
        }
        (ChildResourceSpec::NetworkAdapter(adapter), ChildFieldChange::OtherConfig(map)) => {
            adapter.other_config.clone_from(map);
        }
        (child, change) => warn!("Ignoring {change:?} for {}", child.key()),
    }
}

pub(crate) fn apply_scalar(state: &mut ParentState, field: &ScalarField) {
    match field {
        ScalarField::NameLabel(value) => state.name_label.clone_from(value),
        ScalarField::NameDescription(value) => state.name_description.clone_from(value),
        ScalarField::VcpusAtStartup(count) => state.vcpus.at_startup = *count,
        ScalarField::VcpusMax(count) => state.vcpus.max = *count,
        ScalarField::MemoryLimits(limits) => state.memory = *limits,
    }
}

fn map_value(state: &ParentState, field: MapField) -> BTreeMap<String, String> {
    match field {
        MapField::Platform => state.platform.clone(),
        MapField::HvmBootParams => state.hvm_boot_params.clone(),
        MapField::OtherConfig => state.other_config.raw.clone(),
    }
}

fn set_map_value(
    state: &mut ParentState,
    field: MapField,
    value: BTreeMap<String, String>,
) {
    match field {
        MapField::Platform => state.platform = value,
        MapField::HvmBootParams => state.hvm_boot_params = value,
        MapField::OtherConfig => state.other_config = OverlayMap::from_raw(value),
    }
}
