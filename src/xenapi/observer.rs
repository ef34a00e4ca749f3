//! Builds observed snapshots from XenAPI records.

use tracing::{debug, trace};

use crate::error::XenApiError;
use crate::model::{
    AdapterSpec, ChildResourceSpec, DiskSpec, MemoryLimits, OverlayMap, ParentState, VcpuCount,
};

use super::client::XenSession;
use super::types::{NULL_REF, VbdRecord, VbdType, VifRecord, VmRecord};

/// Reads the current state of a VM.
#[derive(Debug)]
pub struct VmObserver<'a> {
    session: &'a XenSession,
}

impl<'a> VmObserver<'a> {
    /// Creates an observer on a session.
    #[must_use]
    pub const fn new(session: &'a XenSession) -> Self {
        Self { session }
    }

    /// Reads the raw VM record.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn record(&self, vm_ref: &str) -> Result<VmRecord, XenApiError> {
        self.session.call("VM.get_record", &[vm_ref.into()]).await
    }

    /// Builds a snapshot of the VM and its disks and network adapters.
    ///
    /// Empty disk VBDs are skipped. The first CD drive fills
    /// [`ParentState::cdrom`] instead of becoming a child.
    ///
    /// # Errors
    ///
    /// Returns an error if any record cannot be read.
    pub async fn observe(&self, vm_ref: &str) -> Result<ParentState, XenApiError> {
        let record = self.record(vm_ref).await?;
        debug!("Observing VM {} ({})", record.name_label, record.uuid);

        let mut children = Vec::with_capacity(record.vbds.len() + record.vifs.len());
        let mut cdrom = None;

        for vbd_ref in &record.vbds {
            let vbd: VbdRecord = self
                .session
                .call("VBD.get_record", &[vbd_ref.as_str().into()])
                .await?;
            if vbd.vbd_type == VbdType::Cd && cdrom.is_none() {
                cdrom = Some(self.inserted_iso(&vbd).await?);
                continue;
            }
            if vbd.vbd_type != VbdType::Disk || vbd.empty || vbd.vdi == NULL_REF {
                trace!("Skipping {vbd_ref} ({:?}, empty: {})", vbd.vbd_type, vbd.empty);
                continue;
            }
            let vdi_uuid: String = self
                .session
                .call("VDI.get_uuid", &[vbd.vdi.as_str().into()])
                .await?;
            children.push(ChildResourceSpec::Disk(DiskSpec {
                vdi_uuid,
                mode: vbd.mode,
                bootable: vbd.bootable,
                device: Some(vbd.userdevice),
                vbd_ref: Some(vbd_ref.clone()),
            }));
        }

        for vif_ref in &record.vifs {
            let vif: VifRecord = self
                .session
                .call("VIF.get_record", &[vif_ref.as_str().into()])
                .await?;
            let network_uuid: String = self
                .session
                .call("network.get_uuid", &[vif.network.as_str().into()])
                .await?;
            children.push(ChildResourceSpec::NetworkAdapter(AdapterSpec {
                network_uuid,
                mac: Some(vif.mac).filter(|mac| !mac.is_empty()),
                mtu: Some(narrow(vif.mtu, "MTU")?),
                other_config: vif.other_config,
                device: Some(vif.device),
                vif_ref: Some(vif_ref.clone()),
            }));
        }

        let mut state = ParentState {
            name_label: record.name_label,
            name_description: record.name_description,
            power_state: record.power_state,
            vcpus: VcpuCount {
                at_startup: narrow(record.vcpus_at_startup, "VCPUs_at_startup")?,
                max: narrow(record.vcpus_max, "VCPUs_max")?,
            },
            cores_per_socket: None,
            memory: MemoryLimits {
                static_min: record.memory_static_min,
                static_max: record.memory_static_max,
                dynamic_min: record.memory_dynamic_min,
                dynamic_max: record.memory_dynamic_max,
            },
            boot_mode: None,
            boot_order: String::new(),
            platform: record.platform,
            hvm_boot_params: record.hvm_boot_params,
            other_config: OverlayMap::from_raw(record.other_config),
            cdrom,
            children,
        };
        state.refresh_derived();
        Ok(state)
    }

    async fn inserted_iso(&self, vbd: &VbdRecord) -> Result<String, XenApiError> {
        if vbd.empty || vbd.vdi == NULL_REF {
            return Ok(String::new());
        }
        self.session.call("VDI.get_name_label", &[vbd.vdi.as_str().into()]).await
    }
}

fn narrow(value: u64, field: &str) -> Result<u32, XenApiError> {
    u32::try_from(value).map_err(|_| XenApiError::InvalidResponse {
        message: format!("{field} value {value} is out of range"),
    })
}
