//! Configuration types for `xenvm.yaml`.
//!
//! This module defines the structs that map to `xenvm.yaml`. A config fully
//! describes one VM; [`VmDeployConfig::desired_state`] turns it into the
//! snapshot the reconciler converges to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{
    AdapterSpec, BootMode, ChildResourceSpec, DiskMode, DiskSpec, MemoryLimits, OverlayMap,
    ParentState, TEMPLATE_NAME_KEY, VcpuCount,
};

/// Default path of the local state cache.
pub const DEFAULT_STATE_PATH: &str = ".xenvm/state.json";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmDeployConfig {
    /// The VM to manage.
    pub vm: VmConfig,
    /// State cache configuration.
    #[serde(default)]
    pub state: StateConfig,
}

/// Desired shape of the VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmConfig {
    /// Display name, also used to find the VM on the host.
    pub name_label: String,
    /// Description.
    #[serde(default)]
    pub name_description: String,
    /// Template the VM is cloned from on first apply (substring match).
    pub template_name: String,
    /// vCPU count, used for both `VCPUs_at_startup` and `VCPUs_max`.
    pub vcpus: u32,
    /// Cores per socket. Unset inherits the template topology.
    #[serde(default)]
    pub cores_per_socket: Option<u32>,
    /// Memory bounds.
    pub memory: MemoryConfig,
    /// Boot firmware. Unset inherits the template value.
    #[serde(default)]
    pub boot_mode: Option<BootMode>,
    /// Boot order such as `cdn`. Unset inherits the template value.
    #[serde(default)]
    pub boot_order: Option<String>,
    /// Name label of the ISO to insert into the CD drive. An empty string
    /// ejects it; unset leaves the drive alone.
    #[serde(default)]
    pub cdrom: Option<String>,
    /// `other_config` entries owned by xenvm.
    #[serde(default)]
    pub other_config: BTreeMap<String, String>,
    /// Disks to attach.
    #[serde(default)]
    pub hard_drives: Vec<HardDriveConfig>,
    /// Network adapters to attach.
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceConfig>,
}

/// Memory bounds. Bounds left unset take the value of `static_max`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Static upper bound.
    pub static_max: ByteSize,
    /// Static lower bound.
    #[serde(default)]
    pub static_min: Option<ByteSize>,
    /// Dynamic lower bound.
    #[serde(default)]
    pub dynamic_min: Option<ByteSize>,
    /// Dynamic upper bound.
    #[serde(default)]
    pub dynamic_max: Option<ByteSize>,
}

/// A disk attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardDriveConfig {
    /// UUID of the VDI to attach.
    pub vdi_uuid: String,
    /// Attach mode (`RO` or `RW`).
    #[serde(default)]
    pub mode: DiskMode,
    /// Whether the disk is bootable.
    #[serde(default)]
    pub bootable: bool,
}

/// A network adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInterfaceConfig {
    /// UUID of the network.
    pub network_uuid: String,
    /// MAC address. Unset lets the host generate one.
    #[serde(default)]
    pub mac: Option<String>,
    /// MTU. Unset uses the host default.
    #[serde(default)]
    pub mtu: Option<u32>,
    /// Adapter-level `other_config`.
    #[serde(default)]
    pub other_config: BTreeMap<String, String>,
}

/// State cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Path of the local state file.
    #[serde(default)]
    pub path: Option<String>,
}

/// A size in bytes, written as a number or with a binary suffix
/// (`512MiB`, `4GiB`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "ByteSizeRepr", into = "u64")]
pub struct ByteSize(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteSizeRepr {
    Bytes(u64),
    Text(String),
}

impl TryFrom<ByteSizeRepr> for ByteSize {
    type Error = String;

    fn try_from(repr: ByteSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            ByteSizeRepr::Bytes(bytes) => Ok(Self(bytes)),
            ByteSizeRepr::Text(text) => Self::parse(&text),
        }
    }
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}

impl ByteSize {
    /// Parses a size such as `"4GiB"`, `"512 MiB"` or `"1073741824"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the number or the suffix is invalid.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);

        let value = number
            .parse::<u64>()
            .map_err(|_| format!("Invalid size: {s}. Expected e.g. 4GiB or 536870912"))?;

        let multiplier: u64 = match suffix.trim() {
            "" | "B" => 1,
            "KiB" => 1 << 10,
            "MiB" => 1 << 20,
            "GiB" => 1 << 30,
            "TiB" => 1 << 40,
            other => {
                return Err(format!(
                    "Invalid size unit: {other}. Expected: B, KiB, MiB, GiB, or TiB"
                ));
            }
        };

        value
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| format!("Size overflows: {s}"))
    }
}

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const UNITS: [(&str, u64); 4] =
            [("TiB", 1 << 40), ("GiB", 1 << 30), ("MiB", 1 << 20), ("KiB", 1 << 10)];
        for (unit, size) in UNITS {
            if self.0 >= size && self.0 % size == 0 {
                return write!(f, "{}{unit}", self.0 / size);
            }
        }
        write!(f, "{}B", self.0)
    }
}

impl MemoryConfig {
    /// Resolves unset bounds to `static_max`.
    #[must_use]
    pub fn limits(&self) -> MemoryLimits {
        let max = self.static_max.0;
        MemoryLimits {
            static_min: self.static_min.map_or(max, u64::from),
            static_max: max,
            dynamic_min: self.dynamic_min.map_or(max, u64::from),
            dynamic_max: self.dynamic_max.map_or(max, u64::from),
        }
    }
}

impl VmDeployConfig {
    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &str {
        self.state.path.as_deref().unwrap_or(DEFAULT_STATE_PATH)
    }

    /// Builds the desired snapshot of the VM.
    #[must_use]
    pub fn desired_state(&self) -> ParentState {
        let vm = &self.vm;

        let disks = vm.hard_drives.iter().map(|drive| {
            ChildResourceSpec::Disk(DiskSpec {
                vdi_uuid: drive.vdi_uuid.clone(),
                mode: drive.mode,
                bootable: drive.bootable,
                device: None,
                vbd_ref: None,
            })
        });
        let adapters = vm.network_interfaces.iter().map(|nic| {
            ChildResourceSpec::NetworkAdapter(AdapterSpec {
                network_uuid: nic.network_uuid.clone(),
                mac: nic.mac.clone(),
                mtu: nic.mtu,
                other_config: nic.other_config.clone(),
                device: None,
                vif_ref: None,
            })
        });

        let mut other_config = vm.other_config.clone();
        other_config.insert(String::from(TEMPLATE_NAME_KEY), vm.template_name.clone());

        ParentState {
            name_label: vm.name_label.clone(),
            name_description: vm.name_description.clone(),
            power_state: crate::model::PowerState::default(),
            vcpus: VcpuCount::uniform(vm.vcpus),
            cores_per_socket: vm.cores_per_socket,
            memory: vm.memory.limits(),
            boot_mode: vm.boot_mode,
            boot_order: vm.boot_order.clone().unwrap_or_default(),
            platform: BTreeMap::new(),
            hvm_boot_params: BTreeMap::new(),
            other_config: OverlayMap::managed(other_config),
            cdrom: vm.cdrom.clone(),
            children: disks.chain(adapters).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OWNED_KEYS_SENTINEL;

    #[test]
    fn test_byte_size_parse() {
        assert_eq!(ByteSize::parse("4GiB"), Ok(ByteSize(4 << 30)));
        assert_eq!(ByteSize::parse("512 MiB"), Ok(ByteSize(512 << 20)));
        assert_eq!(ByteSize::parse("1024"), Ok(ByteSize(1024)));
        assert!(ByteSize::parse("4GB").is_err());
        assert!(ByteSize::parse("GiB").is_err());
    }

    #[test]
    fn test_byte_size_display() {
        assert_eq!(ByteSize(4 << 30).to_string(), "4GiB");
        assert_eq!(ByteSize(1536 << 20).to_string(), "1536MiB");
        assert_eq!(ByteSize(1000).to_string(), "1000B");
    }

    #[test]
    fn test_memory_defaults_to_static_max() {
        let memory = MemoryConfig {
            static_max: ByteSize(4 << 30),
            static_min: Some(ByteSize(1 << 30)),
            dynamic_min: None,
            dynamic_max: None,
        };
        let limits = memory.limits();
        assert_eq!(limits.static_min, 1 << 30);
        assert_eq!(limits.dynamic_min, 4 << 30);
        assert_eq!(limits.dynamic_max, 4 << 30);
    }

    #[test]
    fn test_desired_state_owns_other_config() {
        let yaml = r"
vm:
  name_label: web-1
  template_name: Ubuntu
  vcpus: 2
  memory:
    static_max: 2GiB
  other_config:
    role: web
  hard_drives:
    - vdi_uuid: 8f2e1c9a-0000-4000-8000-000000000001
      bootable: true
  network_interfaces:
    - network_uuid: 8f2e1c9a-0000-4000-8000-0000000000aa
";
        let config: VmDeployConfig = serde_yaml::from_str(yaml).unwrap();
        let desired = config.desired_state();

        assert_eq!(desired.vcpus, VcpuCount::uniform(2));
        assert_eq!(desired.children.len(), 2);
        assert_eq!(
            desired.other_config.raw.get(OWNED_KEYS_SENTINEL).map(String::as_str),
            Some("role,xenvm_template_name,")
        );
        assert_eq!(
            desired.other_config.raw.get(TEMPLATE_NAME_KEY).map(String::as_str),
            Some("Ubuntu")
        );
        assert_eq!(desired.cdrom, None);
        assert_eq!(config.state_path(), DEFAULT_STATE_PATH);
    }

    #[test]
    fn test_cdrom_eject_is_distinct_from_unset() {
        let yaml = r#"
vm:
  name_label: web-1
  template_name: Ubuntu
  vcpus: 1
  memory:
    static_max: 1GiB
  cdrom: ""
"#;
        let config: VmDeployConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.desired_state().cdrom.as_deref(), Some(""));
    }
}
