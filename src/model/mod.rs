//! Data model shared by the reconciliation core and its collaborators.
//!
//! Desired and observed snapshots use the same types, so reconciling a state
//! against itself is well defined.

mod child;
mod operation;
mod overlay;
mod parent;

pub use child::{
    AdapterSpec, ChildKey, ChildKind, ChildResourceSpec, DEFAULT_MTU, DiskMode, DiskSpec,
};
pub use operation::{
    ChildFieldChange, ExecutedOperation, MapField, MapPatch, Operation, OperationOutcome,
    ScalarField,
};
pub use overlay::{
    OWNED_KEYS_SENTINEL, OverlayMap, TEMPLATE_NAME_KEY, decode_owned_keys, encode_owned_keys,
    is_well_formed_key,
};
pub use parent::{
    BOOT_PARAM_FIRMWARE, BOOT_PARAM_ORDER, BootMode, MemoryLimits, PLATFORM_CORES_PER_SOCKET,
    PLATFORM_SECUREBOOT, ParentState, PowerState, VcpuCount,
};
