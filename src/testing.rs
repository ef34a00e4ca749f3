//! In-memory XenAPI host for tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::XenApiError;
use crate::model::{
    ChildFieldChange, ChildKind, ChildResourceSpec, MapField, OverlayMap, ParentState, PowerState,
    ScalarField,
};
use crate::reconcile::{apply_change, apply_scalar};
use crate::reconcile::{ApiResult, ResourceApi};
use crate::reconciler::VmLifecycle;

/// A single fake VM that enforces the host-side invariants xenvm relies on.
#[derive(Debug)]
pub struct FakeXenApi {
    inner: Mutex<FakeHost>,
}

#[derive(Debug)]
struct FakeHost {
    vm: ParentState,
    exists: bool,
    template: ParentState,
    slot_limits: HashMap<ChildKind, usize>,
    calls: Vec<String>,
    fail_on: Option<String>,
    plugged: Vec<String>,
    isos: Vec<String>,
    next_ref: usize,
}

impl FakeXenApi {
    /// Reference of the fake VM.
    pub const VM_REF: &'static str = "OpaqueRef:vm-0";
    /// UUID of the fake VM.
    pub const VM_UUID: &'static str = "5b0d6c8e-0000-4000-8000-00000000f00d";

    /// A host with an existing VM.
    pub fn new(vm: ParentState) -> Self {
        Self {
            inner: Mutex::new(FakeHost {
                template: vm.clone(),
                vm,
                exists: true,
                slot_limits: HashMap::from([(ChildKind::Disk, 16), (ChildKind::NetworkAdapter, 7)]),
                calls: Vec::new(),
                fail_on: None,
                plugged: Vec::new(),
                isos: Vec::new(),
                next_ref: 1,
            }),
        }
    }

    /// A host with no VM yet. `VM.clone` copies `template`.
    pub fn without_vm(template: ParentState) -> Self {
        let host = Self::new(template);
        host.host().exists = false;
        host
    }

    /// Renames the existing VM.
    pub fn named(self, name_label: &str) -> Self {
        self.host().vm.name_label = name_label.to_string();
        self
    }

    /// Limits the number of device slots for a kind.
    pub fn with_slot_limit(self, kind: ChildKind, limit: usize) -> Self {
        self.host().slot_limits.insert(kind, limit);
        self
    }

    /// Adds an ISO to the host's library.
    pub fn with_iso(self, name_label: &str) -> Self {
        self.host().isos.push(name_label.to_string());
        self
    }

    /// Makes every call to `method` fail.
    pub fn failing_on(self, method: &str) -> Self {
        self.host().fail_on = Some(method.to_string());
        self
    }

    /// Current VM record, without logging a call.
    pub fn get_record_now(&self) -> ParentState {
        self.host().vm.clone()
    }

    /// Mutating calls received so far.
    pub fn calls(&self) -> Vec<String> {
        self.host().calls.clone()
    }

    /// References of plugged children.
    pub fn plugged(&self) -> Vec<String> {
        self.host().plugged.clone()
    }

    /// Simulates another writer touching `other_config`.
    pub fn insert_other_config(&self, key: &str, value: &str) {
        self.host()
            .vm
            .other_config
            .raw
            .insert(key.to_string(), value.to_string());
    }

    fn host(&self) -> MutexGuard<'_, FakeHost> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Logs a mutating call and applies failure injection.
    fn mutate(&self, method: &str) -> ApiResult<MutexGuard<'_, FakeHost>> {
        let mut host = self.host();
        host.calls.push(method.to_string());
        if host.fail_on.as_deref() == Some(method) {
            return Err(api_error(method, "INTERNAL_ERROR", "injected failure"));
        }
        Ok(host)
    }

    fn read(&self, method: &str) -> ApiResult<MutexGuard<'_, FakeHost>> {
        let host = self.host();
        if host.fail_on.as_deref() == Some(method) {
            return Err(api_error(method, "INTERNAL_ERROR", "injected failure"));
        }
        Ok(host)
    }
}

fn api_error(method: &str, code: &str, param: &str) -> XenApiError {
    XenApiError::Api {
        method: method.to_string(),
        code: code.to_string(),
        params: vec![param.to_string()],
    }
}

impl FakeHost {
    fn child_mut(&mut self, method: &str, child: &str) -> ApiResult<&mut ChildResourceSpec> {
        self.vm
            .children
            .iter_mut()
            .find(|spec| spec.reference() == Some(child))
            .ok_or_else(|| api_error(method, "HANDLE_INVALID", child))
    }
}

#[async_trait]
impl ResourceApi for FakeXenApi {
    async fn get_record(&self, _vm: &str) -> ApiResult<ParentState> {
        Ok(self.read("VM.get_record")?.vm.clone())
    }

    async fn power_state(&self, _vm: &str) -> ApiResult<PowerState> {
        Ok(self.read("VM.get_power_state")?.vm.power_state)
    }

    async fn allowed_slots(&self, _vm: &str, kind: ChildKind) -> ApiResult<Vec<String>> {
        let method = format!("VM.get_allowed_{}_devices", kind.xenapi_class());
        let host = self.read(&method)?;
        let limit = host.slot_limits.get(&kind).copied().unwrap_or_default();
        let used: Vec<&str> = host
            .vm
            .children
            .iter()
            .filter(|spec| spec.kind() == kind)
            .filter_map(ChildResourceSpec::device)
            .collect();
        Ok((0..limit)
            .map(|slot| slot.to_string())
            .filter(|slot| !used.contains(&slot.as_str()))
            .collect())
    }

    async fn create_child(
        &self,
        _vm: &str,
        spec: &ChildResourceSpec,
        slot: &str,
    ) -> ApiResult<String> {
        let class = spec.kind().xenapi_class();
        let method = format!("{class}.create");
        let mut host = self.mutate(&method)?;
        let child_ref = format!("OpaqueRef:{}-{}", class.to_lowercase(), host.next_ref);
        let mut child = spec.attached(&child_ref, slot);
        if let ChildResourceSpec::NetworkAdapter(adapter) = &mut child
            && adapter.mac.is_none()
        {
            adapter.mac = Some(format!("02:00:00:00:00:{:02x}", host.next_ref));
        }
        host.next_ref += 1;
        host.vm.children.push(child);
        Ok(child_ref)
    }

    async fn destroy_child(&self, kind: ChildKind, child: &str) -> ApiResult<()> {
        let method = format!("{}.destroy", kind.xenapi_class());
        let mut host = self.mutate(&method)?;
        let before = host.vm.children.len();
        host.vm.children.retain(|spec| spec.reference() != Some(child));
        if host.vm.children.len() == before {
            return Err(api_error(&method, "HANDLE_INVALID", child));
        }
        Ok(())
    }

    async fn set_child_field(
        &self,
        kind: ChildKind,
        child: &str,
        change: &ChildFieldChange,
    ) -> ApiResult<()> {
        let method = format!("{}.set_field", kind.xenapi_class());
        let mut host = self.mutate(&method)?;
        apply_change(host.child_mut(&method, child)?, change);
        Ok(())
    }

    async fn plug_child(&self, kind: ChildKind, child: &str) -> ApiResult<()> {
        let method = format!("{}.plug", kind.xenapi_class());
        let mut host = self.mutate(&method)?;
        if host.vm.power_state != PowerState::Running {
            return Err(api_error(&method, "VM_BAD_POWER_STATE", "halted"));
        }
        host.child_mut(&method, child)?;
        host.plugged.push(child.to_string());
        Ok(())
    }

    async fn set_scalar_field(&self, _vm: &str, field: &ScalarField) -> ApiResult<()> {
        let method = match field {
            ScalarField::MemoryLimits(_) => String::from("VM.set_memory_limits"),
            other => format!("VM.set_{}", other.name()),
        };
        let mut host = self.mutate(&method)?;
        let mut next = host.vm.clone();
        apply_scalar(&mut next, field);
        if next.vcpus.at_startup == 0 || next.vcpus.at_startup > next.vcpus.max {
            return Err(api_error(&method, "VALUE_NOT_SUPPORTED", "VCPUs_at_startup"));
        }
        if !next.memory.is_ordered() {
            return Err(api_error(&method, "MEMORY_CONSTRAINT_VIOLATION", "memory"));
        }
        host.vm = next;
        Ok(())
    }

    async fn set_cdrom(&self, _vm: &str, iso: Option<&str>) -> ApiResult<()> {
        let Some(iso) = iso else {
            self.mutate("VBD.eject")?.vm.cdrom = Some(String::new());
            return Ok(());
        };
        let mut host = self.mutate("VBD.insert")?;
        if !host.isos.iter().any(|name| name == iso) {
            return Err(XenApiError::not_found("ISO", iso));
        }
        host.vm.cdrom = Some(iso.to_string());
        Ok(())
    }

    async fn get_map_field(
        &self,
        _vm: &str,
        field: MapField,
    ) -> ApiResult<BTreeMap<String, String>> {
        let host = self.read(&format!("VM.get_{}", field.xenapi_name()))?;
        Ok(match field {
            MapField::Platform => host.vm.platform.clone(),
            MapField::HvmBootParams => host.vm.hvm_boot_params.clone(),
            MapField::OtherConfig => host.vm.other_config.raw.clone(),
        })
    }

    async fn set_map_field(
        &self,
        _vm: &str,
        field: MapField,
        value: &BTreeMap<String, String>,
    ) -> ApiResult<()> {
        let mut host = self.mutate(&format!("VM.set_{}", field.xenapi_name()))?;
        match field {
            MapField::Platform => host.vm.platform.clone_from(value),
            MapField::HvmBootParams => host.vm.hvm_boot_params.clone_from(value),
            MapField::OtherConfig => host.vm.other_config = OverlayMap::from_raw(value.clone()),
        }
        host.vm.refresh_derived();
        Ok(())
    }
}

#[async_trait]
impl VmLifecycle for FakeXenApi {
    async fn find_by_name_label(&self, name_label: &str) -> ApiResult<Option<String>> {
        let host = self.read("VM.get_by_name_label")?;
        Ok((host.exists && host.vm.name_label == name_label).then(|| Self::VM_REF.to_string()))
    }

    async fn find_by_uuid(&self, uuid: &str) -> ApiResult<Option<String>> {
        let host = self.read("VM.get_by_uuid")?;
        Ok((host.exists && uuid == Self::VM_UUID).then(|| Self::VM_REF.to_string()))
    }

    async fn vm_uuid(&self, _vm_ref: &str) -> ApiResult<String> {
        drop(self.read("VM.get_uuid")?);
        Ok(Self::VM_UUID.to_string())
    }

    async fn clone_from_template(
        &self,
        template_name: &str,
        name_label: &str,
    ) -> ApiResult<String> {
        let mut host = self.mutate("VM.clone")?;
        if !host.template.name_label.contains(template_name) {
            return Err(XenApiError::not_found("VM template", template_name));
        }
        host.vm = ParentState {
            name_label: name_label.to_string(),
            ..host.template.clone()
        };
        host.exists = true;
        Ok(Self::VM_REF.to_string())
    }

    async fn destroy_vm(&self, _vm_ref: &str) -> ApiResult<()> {
        let mut host = self.mutate("VM.destroy")?;
        if !host.exists {
            return Err(api_error("VM.destroy", "HANDLE_INVALID", Self::VM_REF));
        }
        host.exists = false;
        host.vm.children.clear();
        Ok(())
    }
}
