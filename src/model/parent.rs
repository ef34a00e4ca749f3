//! The parent VM snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::child::ChildResourceSpec;
use super::overlay::OverlayMap;

/// Platform key holding the CPU topology.
pub const PLATFORM_CORES_PER_SOCKET: &str = "cores-per-socket";

/// Platform key toggling UEFI secure boot.
pub const PLATFORM_SECUREBOOT: &str = "secureboot";

/// HVM boot parameter selecting the firmware.
pub const BOOT_PARAM_FIRMWARE: &str = "firmware";

/// HVM boot parameter holding the boot order.
pub const BOOT_PARAM_ORDER: &str = "order";

/// VM power state as reported by XenAPI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PowerState {
    /// Not running.
    #[default]
    Halted,
    /// Running.
    Running,
    /// Suspended to disk.
    Suspended,
    /// Paused in memory.
    Paused,
}

/// Firmware and secure boot selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    /// Legacy BIOS.
    Bios,
    /// UEFI without secure boot.
    Uefi,
    /// UEFI with secure boot.
    #[serde(rename = "uefi_security")]
    UefiSecure,
}

/// vCPU counts. XenAPI requires `0 < at_startup <= max` at all times.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VcpuCount {
    /// vCPUs online at boot.
    pub at_startup: u32,
    /// Maximum vCPUs.
    pub max: u32,
}

/// Memory limits in bytes.
///
/// A valid set satisfies `static_min <= dynamic_min <= dynamic_max <= static_max`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MemoryLimits {
    /// Static lower bound.
    pub static_min: u64,
    /// Static upper bound.
    pub static_max: u64,
    /// Dynamic lower bound.
    pub dynamic_min: u64,
    /// Dynamic upper bound.
    pub dynamic_max: u64,
}

/// A snapshot of a VM, used for both the desired and the observed side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentState {
    /// Display name.
    pub name_label: String,
    /// Description.
    #[serde(default)]
    pub name_description: String,
    /// Power state.
    #[serde(default)]
    pub power_state: PowerState,
    /// vCPU counts.
    pub vcpus: VcpuCount,
    /// Cores per socket. `None` inherits the current topology.
    #[serde(default)]
    pub cores_per_socket: Option<u32>,
    /// Memory limits.
    pub memory: MemoryLimits,
    /// Boot mode. `None` inherits the template value.
    #[serde(default)]
    pub boot_mode: Option<BootMode>,
    /// Boot order such as `"cdn"`. Empty inherits the template value.
    #[serde(default)]
    pub boot_order: String,
    /// Raw platform map.
    #[serde(default)]
    pub platform: BTreeMap<String, String>,
    /// Raw HVM boot parameter map.
    #[serde(default)]
    pub hvm_boot_params: BTreeMap<String, String>,
    /// `other_config`, partially owned by xenvm.
    #[serde(default)]
    pub other_config: OverlayMap,
    /// Name of the ISO in the CD drive. `Some("")` is an empty drive; `None`
    /// inherits on the desired side and means no drive on the observed side.
    #[serde(default)]
    pub cdrom: Option<String>,
    /// Disks and network adapters.
    #[serde(default)]
    pub children: Vec<ChildResourceSpec>,
}

impl VcpuCount {
    /// Same count at startup and as maximum.
    #[must_use]
    pub const fn uniform(count: u32) -> Self {
        Self {
            at_startup: count,
            max: count,
        }
    }
}

impl MemoryLimits {
    /// All four bounds set to the same value.
    #[must_use]
    pub const fn fixed(bytes: u64) -> Self {
        Self {
            static_min: bytes,
            static_max: bytes,
            dynamic_min: bytes,
            dynamic_max: bytes,
        }
    }

    /// Returns true if the bounds are correctly ordered.
    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        self.static_min <= self.dynamic_min
            && self.dynamic_min <= self.dynamic_max
            && self.dynamic_max <= self.static_max
    }
}

impl BootMode {
    /// Value of the `firmware` boot parameter.
    #[must_use]
    pub const fn firmware(self) -> &'static str {
        match self {
            Self::Bios => "bios",
            Self::Uefi | Self::UefiSecure => "uefi",
        }
    }

    /// Value of the `secureboot` platform key.
    #[must_use]
    pub const fn secure_boot(self) -> &'static str {
        match self {
            Self::UefiSecure => "true",
            Self::Bios | Self::Uefi => "false",
        }
    }

    /// Derives the boot mode from the raw `firmware` and `secureboot` values.
    #[must_use]
    pub fn from_params(firmware: Option<&str>, secureboot: Option<&str>) -> Option<Self> {
        match (firmware?, secureboot) {
            ("uefi", Some("true")) => Some(Self::UefiSecure),
            ("uefi", _) => Some(Self::Uefi),
            ("bios", _) => Some(Self::Bios),
            _ => None,
        }
    }
}

impl ParentState {
    /// Recomputes topology, boot mode and boot order from the raw maps.
    pub fn refresh_derived(&mut self) {
        self.cores_per_socket = self
            .platform
            .get(PLATFORM_CORES_PER_SOCKET)
            .and_then(|value| value.parse().ok());
        self.boot_mode = BootMode::from_params(
            self.hvm_boot_params.get(BOOT_PARAM_FIRMWARE).map(String::as_str),
            self.platform.get(PLATFORM_SECUREBOOT).map(String::as_str),
        );
        self.boot_order = self
            .hvm_boot_params
            .get(BOOT_PARAM_ORDER)
            .cloned()
            .unwrap_or_default();
    }

    /// Returns the ISO in the CD drive, if one is inserted.
    #[must_use]
    pub fn inserted_iso(&self) -> Option<&str> {
        self.cdrom.as_deref().filter(|iso| !iso.is_empty())
    }

    /// Returns true if the VM is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.power_state, PowerState::Running)
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Halted => "halted",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for BootMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Bios => "bios",
            Self::Uefi => "uefi",
            Self::UefiSecure => "uefi_security",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BootMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bios" => Ok(Self::Bios),
            "uefi" => Ok(Self::Uefi),
            "uefi_security" => Ok(Self::UefiSecure),
            other => Err(format!(
                "Invalid boot mode: {other}. Expected: bios, uefi, or uefi_security"
            )),
        }
    }
}
