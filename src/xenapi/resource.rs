//! [`ResourceApi`] over a live XenAPI session.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::error::XenApiError;
use crate::model::{
    ChildFieldChange, ChildKind, ChildResourceSpec, DEFAULT_MTU, MapField, ParentState, PowerState,
    ScalarField,
};
use crate::reconcile::{ApiResult, ResourceApi};

use super::client::XenSession;
use super::observer::VmObserver;
use super::types::{NULL_REF, VbdType};

impl XenSession {
    /// Returns the first CD drive of the VM.
    async fn cd_drive(&self, vm: &str) -> ApiResult<Option<String>> {
        let vbds: Vec<String> = self.call("VM.get_VBDs", &[json!(vm)]).await?;
        for vbd_ref in vbds {
            let vbd_type: VbdType = self.call("VBD.get_type", &[json!(vbd_ref)]).await?;
            if vbd_type == VbdType::Cd {
                return Ok(Some(vbd_ref));
            }
        }
        Ok(None)
    }

    /// Creates an empty CD drive in the first free VBD slot.
    async fn create_cd_drive(&self, vm: &str) -> ApiResult<String> {
        let slots = self.allowed_slots(vm, ChildKind::Disk).await?;
        let slot = slots
            .first()
            .ok_or_else(|| XenApiError::not_found("free VBD slot", vm))?;
        let record = json!({
            "VM": vm,
            "VDI": NULL_REF,
            "userdevice": slot,
            "bootable": false,
            "mode": "RO",
            "type": "CD",
            "empty": true,
            "unpluggable": true,
            "other_config": {},
            "qos_algorithm_type": "",
            "qos_algorithm_params": {}
        });
        self.call("VBD.create", &[record]).await
    }

    async fn iso_by_name(&self, name_label: &str) -> ApiResult<String> {
        let vdis: Vec<String> = self
            .call("VDI.get_by_name_label", &[json!(name_label)])
            .await?;
        vdis.into_iter()
            .next()
            .ok_or_else(|| XenApiError::not_found("ISO", name_label))
    }
}

#[async_trait]
impl ResourceApi for XenSession {
    async fn get_record(&self, vm: &str) -> ApiResult<ParentState> {
        VmObserver::new(self).observe(vm).await
    }

    async fn power_state(&self, vm: &str) -> ApiResult<PowerState> {
        self.call("VM.get_power_state", &[json!(vm)]).await
    }

    async fn allowed_slots(&self, vm: &str, kind: ChildKind) -> ApiResult<Vec<String>> {
        let method = format!("VM.get_allowed_{}_devices", kind.xenapi_class());
        self.call(&method, &[json!(vm)]).await
    }

    async fn create_child(
        &self,
        vm: &str,
        spec: &ChildResourceSpec,
        slot: &str,
    ) -> ApiResult<String> {
        match spec {
            ChildResourceSpec::Disk(disk) => {
                let vdi_ref: String = self.call("VDI.get_by_uuid", &[json!(disk.vdi_uuid)]).await?;
                let record = json!({
                    "VM": vm,
                    "VDI": vdi_ref,
                    "userdevice": slot,
                    "bootable": disk.bootable,
                    "mode": disk.mode,
                    "type": "Disk",
                    "empty": false,
                    "unpluggable": true,
                    "other_config": {},
                    "qos_algorithm_type": "",
                    "qos_algorithm_params": {}
                });
                self.call("VBD.create", &[record]).await
            }
            ChildResourceSpec::NetworkAdapter(adapter) => {
                let network_ref: String = self
                    .call("network.get_by_uuid", &[json!(adapter.network_uuid)])
                    .await?;
                // An empty MAC asks the host to generate one.
                let record = json!({
                    "VM": vm,
                    "network": network_ref,
                    "device": slot,
                    "MAC": adapter.mac.clone().unwrap_or_default(),
                    "MTU": adapter.mtu.unwrap_or(DEFAULT_MTU),
                    "other_config": adapter.other_config,
                    "locking_mode": "network_default",
                    "qos_algorithm_type": "",
                    "qos_algorithm_params": {}
                });
                self.call("VIF.create", &[record]).await
            }
        }
    }

    async fn destroy_child(&self, kind: ChildKind, child: &str) -> ApiResult<()> {
        self.call_void(&format!("{}.destroy", kind.xenapi_class()), &[json!(child)])
            .await
    }

    async fn set_child_field(
        &self,
        kind: ChildKind,
        child: &str,
        change: &ChildFieldChange,
    ) -> ApiResult<()> {
        let (expected, method, value): (ChildKind, &str, Value) = match change {
            ChildFieldChange::Mode(mode) => (ChildKind::Disk, "VBD.set_mode", json!(mode)),
            ChildFieldChange::Bootable(bootable) => {
                (ChildKind::Disk, "VBD.set_bootable", json!(bootable))
            }
            ChildFieldChange::OtherConfig(map) => {
                (ChildKind::NetworkAdapter, "VIF.set_other_config", json!(map))
            }
        };
        if kind != expected {
            return Err(XenApiError::Api {
                method: method.to_string(),
                code: String::from("FIELD_TYPE_ERROR"),
                params: vec![kind.xenapi_class().to_string()],
            });
        }
        self.call_void(method, &[json!(child), value]).await
    }

    async fn plug_child(&self, kind: ChildKind, child: &str) -> ApiResult<()> {
        self.call_void(&format!("{}.plug", kind.xenapi_class()), &[json!(child)])
            .await
    }

    async fn set_scalar_field(&self, vm: &str, field: &ScalarField) -> ApiResult<()> {
        match field {
            ScalarField::NameLabel(value) => {
                self.call_void("VM.set_name_label", &[json!(vm), json!(value)])
                    .await
            }
            ScalarField::NameDescription(value) => {
                self.call_void("VM.set_name_description", &[json!(vm), json!(value)])
                    .await
            }
            ScalarField::VcpusAtStartup(count) => {
                self.call_void("VM.set_VCPUs_at_startup", &[json!(vm), json!(count)])
                    .await
            }
            ScalarField::VcpusMax(count) => {
                self.call_void("VM.set_VCPUs_max", &[json!(vm), json!(count)])
                    .await
            }
            ScalarField::MemoryLimits(limits) => {
                self.call_void(
                    "VM.set_memory_limits",
                    &[
                        json!(vm),
                        json!(limits.static_min),
                        json!(limits.static_max),
                        json!(limits.dynamic_min),
                        json!(limits.dynamic_max),
                    ],
                )
                .await
            }
        }
    }

    async fn set_cdrom(&self, vm: &str, iso: Option<&str>) -> ApiResult<()> {
        let (vbd_ref, empty) = match self.cd_drive(vm).await? {
            Some(vbd_ref) => {
                let empty: bool = self.call("VBD.get_empty", &[json!(vbd_ref)]).await?;
                (vbd_ref, empty)
            }
            None if iso.is_none() => return Ok(()),
            None => (self.create_cd_drive(vm).await?, true),
        };

        if !empty {
            self.call_void("VBD.eject", &[json!(vbd_ref)]).await?;
        }
        if let Some(iso) = iso {
            let vdi_ref = self.iso_by_name(iso).await?;
            self.call_void("VBD.insert", &[json!(vbd_ref), json!(vdi_ref)])
                .await?;
        }
        Ok(())
    }

    async fn get_map_field(
        &self,
        vm: &str,
        field: MapField,
    ) -> ApiResult<BTreeMap<String, String>> {
        self.call(&format!("VM.get_{}", field.xenapi_name()), &[json!(vm)])
            .await
    }

    async fn set_map_field(
        &self,
        vm: &str,
        field: MapField,
        value: &BTreeMap<String, String>,
    ) -> ApiResult<()> {
        self.call_void(&format!("VM.set_{}", field.xenapi_name()), &[json!(vm), json!(value)])
            .await
    }
}
