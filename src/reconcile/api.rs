//! The remote resource-management boundary.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::XenApiError;
use crate::model::{
    ChildFieldChange, ChildKind, ChildResourceSpec, MapField, ParentState, PowerState, ScalarField,
};

/// Result of a single remote call.
pub type ApiResult<T> = std::result::Result<T, XenApiError>;

/// Remote calls the executor needs.
///
/// VMs and children are addressed by opaque reference strings.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Reads a full snapshot of the VM and its children.
    async fn get_record(&self, vm: &str) -> ApiResult<ParentState>;

    /// Reads the VM power state.
    async fn power_state(&self, vm: &str) -> ApiResult<PowerState>;

    /// Lists the device slots still free for a child kind, lowest first.
    async fn allowed_slots(&self, vm: &str, kind: ChildKind) -> ApiResult<Vec<String>>;

    /// Creates a child in `slot` and returns its reference.
    async fn create_child(
        &self,
        vm: &str,
        spec: &ChildResourceSpec,
        slot: &str,
    ) -> ApiResult<String>;

    /// Destroys a child.
    async fn destroy_child(&self, kind: ChildKind, child: &str) -> ApiResult<()>;

    /// Writes one mutable field of a child.
    async fn set_child_field(
        &self,
        kind: ChildKind,
        child: &str,
        change: &ChildFieldChange,
    ) -> ApiResult<()>;

    /// Hot-plugs a child into its running VM.
    async fn plug_child(&self, kind: ChildKind, child: &str) -> ApiResult<()>;

    /// Writes a scalar VM field.
    async fn set_scalar_field(&self, vm: &str, field: &ScalarField) -> ApiResult<()>;

    /// Inserts the ISO with this name label into the CD drive, or ejects it
    /// when `iso` is `None`. A missing drive is created first.
    async fn set_cdrom(&self, vm: &str, iso: Option<&str>) -> ApiResult<()>;

    /// Reads a map VM field.
    async fn get_map_field(&self, vm: &str, field: MapField) -> ApiResult<BTreeMap<String, String>>;

    /// Replaces a map VM field.
    async fn set_map_field(
        &self,
        vm: &str,
        field: MapField,
        value: &BTreeMap<String, String>,
    ) -> ApiResult<()>;
}
