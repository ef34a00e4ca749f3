//! Pure predicates guarding a plan.
//!
//! Everything here runs before the first remote call, except the slot check
//! which the executor applies to the slot list it just fetched.

use crate::error::{ExecutionError, PlanError};
use crate::model::{AdapterSpec, ChildKey, ChildResourceSpec, ParentState};

/// Smallest MTU accepted for a network adapter.
pub const MIN_MTU: u32 = 68;

/// Largest MTU accepted for a network adapter.
pub const MAX_MTU: u32 = 65535;

/// Fails if an immutable adapter field would have to change.
///
/// Fields the desired side leaves unset are inherited and never conflict.
///
/// # Errors
///
/// Returns `ImmutableFieldChanged` for the first differing field.
pub fn check_immutable(
    key: &ChildKey,
    observed: &AdapterSpec,
    desired: &AdapterSpec,
) -> Result<(), PlanError> {
    if let Some(want) = &desired.mac {
        let matches = observed
            .mac
            .as_deref()
            .is_some_and(|have| have.eq_ignore_ascii_case(want));
        if !matches {
            return Err(PlanError::ImmutableFieldChanged {
                key: key.clone(),
                field: "mac",
                observed: observed.mac.clone().unwrap_or_default(),
                desired: want.clone(),
            });
        }
    }

    if let Some(want) = desired.mtu
        && observed.mtu != Some(want)
    {
        return Err(PlanError::ImmutableFieldChanged {
            key: key.clone(),
            field: "mtu",
            observed: observed.mtu.map(|m| m.to_string()).unwrap_or_default(),
            desired: want.to_string(),
        });
    }

    Ok(())
}

/// Fails if `vcpus` is not a multiple of the effective cores-per-socket.
///
/// The desired topology wins over the observed one. Without either there is
/// nothing to check.
///
/// # Errors
///
/// Returns `TopologyConstraintViolation` when the count does not divide.
pub fn check_topology(
    vcpus: u32,
    desired_cores_per_socket: Option<u32>,
    observed_cores_per_socket: Option<u32>,
) -> Result<(), PlanError> {
    let Some(cores_per_socket) = desired_cores_per_socket.or(observed_cores_per_socket) else {
        return Ok(());
    };
    if cores_per_socket == 0 || vcpus % cores_per_socket != 0 {
        return Err(PlanError::TopologyConstraintViolation {
            vcpus,
            cores_per_socket,
        });
    }
    Ok(())
}

/// Picks the first free slot the host offers.
///
/// # Errors
///
/// Returns `SlotExhausted` if the list is empty.
pub fn check_slot_available<'a>(
    key: &ChildKey,
    slots: &'a [String],
    index: usize,
    completed: usize,
) -> Result<&'a str, ExecutionError> {
    slots
        .first()
        .map(String::as_str)
        .ok_or_else(|| ExecutionError::SlotExhausted {
            key: key.clone(),
            index,
            completed,
        })
}

/// Validates the scalar fields of the desired state.
///
/// # Errors
///
/// Returns a `Validation` error for the first malformed field.
pub fn validate_parent(desired: &ParentState) -> Result<(), PlanError> {
    if desired.name_label.trim().is_empty() {
        return Err(PlanError::validation("name_label", "must not be empty"));
    }

    let vcpus = desired.vcpus;
    if vcpus.at_startup == 0 || vcpus.max == 0 {
        return Err(PlanError::validation("vcpus", "must be greater than 0"));
    }
    if vcpus.at_startup > vcpus.max {
        return Err(PlanError::validation(
            "vcpus",
            format!(
                "at_startup ({}) exceeds max ({})",
                vcpus.at_startup, vcpus.max
            ),
        ));
    }

    if desired.cores_per_socket == Some(0) {
        return Err(PlanError::validation(
            "cores_per_socket",
            "must be greater than 0",
        ));
    }

    let memory = desired.memory;
    if memory.static_max == 0 {
        return Err(PlanError::validation("memory", "static_max must be greater than 0"));
    }
    if !memory.is_ordered() {
        return Err(PlanError::validation(
            "memory",
            format!(
                "bounds must satisfy static_min <= dynamic_min <= dynamic_max <= static_max \
                 (got {} / {} / {} / {})",
                memory.static_min, memory.dynamic_min, memory.dynamic_max, memory.static_max
            ),
        ));
    }

    if let Some(key) = desired.other_config.malformed_owned_keys().first() {
        return Err(PlanError::validation(
            "other_config",
            format!("key {key:?} must be non-empty, without commas or surrounding whitespace"),
        ));
    }

    Ok(())
}

/// Validates the desired children.
///
/// # Errors
///
/// Returns a `Validation` error for an empty backing UUID or an MTU out of range.
pub fn validate_children(children: &[ChildResourceSpec]) -> Result<(), PlanError> {
    for child in children {
        if child.backing_uuid().trim().is_empty() {
            return Err(PlanError::validation(
                child.kind().to_string(),
                "backing UUID must not be empty",
            ));
        }
        if let ChildResourceSpec::NetworkAdapter(adapter) = child
            && let Some(mtu) = adapter.mtu
            && !(MIN_MTU..=MAX_MTU).contains(&mtu)
        {
            return Err(PlanError::validation(
                "mtu",
                format!(
                    "{mtu} on network {} is outside {MIN_MTU}..={MAX_MTU}",
                    adapter.network_uuid
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChildKind, MemoryLimits, OverlayMap, VcpuCount};
    use std::collections::BTreeMap;

    fn adapter(mac: Option<&str>, mtu: Option<u32>) -> AdapterSpec {
        AdapterSpec {
            network_uuid: String::from("net-1"),
            mac: mac.map(String::from),
            mtu,
            other_config: BTreeMap::new(),
            device: None,
            vif_ref: None,
        }
    }

    fn key() -> ChildKey {
        ChildKey {
            kind: ChildKind::NetworkAdapter,
            backing_uuid: String::from("net-1"),
        }
    }

    fn parent() -> ParentState {
        ParentState {
            name_label: String::from("web-1"),
            vcpus: VcpuCount::uniform(2),
            memory: MemoryLimits::fixed(1 << 30),
            ..ParentState::default()
        }
    }

    #[test]
    fn test_mac_change_rejected() {
        let observed = adapter(Some("aa:bb:cc:dd:ee:ff"), Some(1500));
        let err = check_immutable(&key(), &observed, &adapter(Some("aa:bb:cc:dd:ee:00"), None))
            .unwrap_err();
        assert!(matches!(err, PlanError::ImmutableFieldChanged { field: "mac", .. }));
    }

    #[test]
    fn test_mac_compare_ignores_case() {
        let observed = adapter(Some("AA:BB:CC:DD:EE:FF"), Some(1500));
        let desired = adapter(Some("aa:bb:cc:dd:ee:ff"), None);
        assert!(check_immutable(&key(), &observed, &desired).is_ok());
    }

    #[test]
    fn test_unset_fields_inherit() {
        let observed = adapter(Some("aa:bb:cc:dd:ee:ff"), Some(9000));
        assert!(check_immutable(&key(), &observed, &adapter(None, None)).is_ok());
    }

    #[test]
    fn test_mtu_change_rejected() {
        let observed = adapter(None, Some(1500));
        let err = check_immutable(&key(), &observed, &adapter(None, Some(9000))).unwrap_err();
        assert_eq!(
            err,
            PlanError::ImmutableFieldChanged {
                key: key(),
                field: "mtu",
                observed: String::from("1500"),
                desired: String::from("9000"),
            }
        );
    }

    #[test]
    fn test_topology() {
        assert!(check_topology(4, Some(2), None).is_ok());
        assert!(check_topology(6, None, Some(3)).is_ok());
        assert!(check_topology(3, None, None).is_ok());
        assert_eq!(
            check_topology(6, Some(4), Some(3)),
            Err(PlanError::TopologyConstraintViolation {
                vcpus: 6,
                cores_per_socket: 4,
            })
        );
    }

    #[test]
    fn test_slot_exhausted() {
        let slots: Vec<String> = vec![];
        let err = check_slot_available(&key(), &slots, 4, 4).unwrap_err();
        assert!(matches!(err, ExecutionError::SlotExhausted { index: 4, .. }));

        let slots = vec![String::from("1"), String::from("3")];
        assert_eq!(check_slot_available(&key(), &slots, 0, 0).unwrap(), "1");
    }

    #[test]
    fn test_validate_parent() {
        assert!(validate_parent(&parent()).is_ok());

        let mut state = parent();
        state.vcpus = VcpuCount { at_startup: 4, max: 2 };
        assert!(matches!(validate_parent(&state), Err(PlanError::Validation { .. })));

        let mut state = parent();
        state.memory.dynamic_min = state.memory.static_max + 1;
        assert!(validate_parent(&state).is_err());

        let mut state = parent();
        state.cores_per_socket = Some(0);
        assert!(validate_parent(&state).is_err());
    }

    #[test]
    fn test_malformed_owned_key_rejected() {
        for key in ["x,y", " a", ""] {
            let mut state = parent();
            state.other_config =
                OverlayMap::managed(BTreeMap::from([(String::from(key), String::from("1"))]));
            assert!(
                matches!(
                    validate_parent(&state),
                    Err(PlanError::Validation { ref field, .. }) if field == "other_config"
                ),
                "{key:?}"
            );
        }

        let mut state = parent();
        state.other_config =
            OverlayMap::managed(BTreeMap::from([(String::from("role"), String::from("web"))]));
        assert!(validate_parent(&state).is_ok());
    }

    #[test]
    fn test_validate_children_mtu_range() {
        let children = vec![ChildResourceSpec::NetworkAdapter(adapter(None, Some(67)))];
        assert!(validate_children(&children).is_err());
        let children = vec![ChildResourceSpec::NetworkAdapter(adapter(None, Some(65535)))];
        assert!(validate_children(&children).is_ok());
    }
}
