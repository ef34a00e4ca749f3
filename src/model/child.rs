//! Child devices of a VM: disks (VBDs) and network adapters (VIFs).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// MTU the host applies when none is requested.
pub const DEFAULT_MTU: u32 = 1500;

/// Kind of child device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChildKind {
    /// A virtual block device backed by a VDI.
    Disk,
    /// A virtual network interface backed by a network.
    NetworkAdapter,
}

/// Natural key of a child: its kind plus the UUID of its backing object.
///
/// Keys sort disks before adapters, then by UUID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildKey {
    /// Kind of child.
    pub kind: ChildKind,
    /// VDI UUID for disks, network UUID for adapters.
    pub backing_uuid: String,
}

/// Mode a disk is attached with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DiskMode {
    /// Read-only.
    #[serde(rename = "RO")]
    ReadOnly,
    /// Read-write.
    #[default]
    #[serde(rename = "RW")]
    ReadWrite,
}

/// A disk attached to a VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskSpec {
    /// UUID of the backing VDI.
    pub vdi_uuid: String,
    /// Attach mode.
    #[serde(default)]
    pub mode: DiskMode,
    /// Whether the disk is bootable.
    #[serde(default)]
    pub bootable: bool,
    /// Device slot (`userdevice`) assigned at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// VBD reference on the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vbd_ref: Option<String>,
}

/// A network adapter attached to a VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdapterSpec {
    /// UUID of the backing network.
    pub network_uuid: String,
    /// MAC address. `None` on the desired side lets the host generate one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// MTU in octets. `None` on the desired side means the host default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    /// Per-adapter attribute map, replaced as a whole.
    #[serde(default)]
    pub other_config: BTreeMap<String, String>,
    /// Device slot assigned at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// VIF reference on the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vif_ref: Option<String>,
}

/// A child device, desired or observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChildResourceSpec {
    /// A disk.
    Disk(DiskSpec),
    /// A network adapter.
    NetworkAdapter(AdapterSpec),
}

impl ChildKind {
    /// XenAPI class name for this kind.
    #[must_use]
    pub const fn xenapi_class(self) -> &'static str {
        match self {
            Self::Disk => "VBD",
            Self::NetworkAdapter => "VIF",
        }
    }
}

impl ChildResourceSpec {
    /// Returns the kind of this child.
    #[must_use]
    pub const fn kind(&self) -> ChildKind {
        match self {
            Self::Disk(_) => ChildKind::Disk,
            Self::NetworkAdapter(_) => ChildKind::NetworkAdapter,
        }
    }

    /// Returns the UUID of the backing object.
    #[must_use]
    pub fn backing_uuid(&self) -> &str {
        match self {
            Self::Disk(disk) => &disk.vdi_uuid,
            Self::NetworkAdapter(adapter) => &adapter.network_uuid,
        }
    }

    /// Returns the natural key of this child.
    #[must_use]
    pub fn key(&self) -> ChildKey {
        ChildKey {
            kind: self.kind(),
            backing_uuid: self.backing_uuid().to_string(),
        }
    }

    /// Returns the host reference, if this child exists on the host.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Disk(disk) => disk.vbd_ref.as_deref(),
            Self::NetworkAdapter(adapter) => adapter.vif_ref.as_deref(),
        }
    }

    /// Returns the assigned device slot.
    #[must_use]
    pub fn device(&self) -> Option<&str> {
        match self {
            Self::Disk(disk) => disk.device.as_deref(),
            Self::NetworkAdapter(adapter) => adapter.device.as_deref(),
        }
    }

    /// Returns a copy bound to a host reference and device slot.
    #[must_use]
    pub fn attached(&self, reference: &str, device: &str) -> Self {
        let mut child = self.clone();
        match &mut child {
            Self::Disk(disk) => {
                disk.vbd_ref = Some(reference.to_string());
                disk.device = Some(device.to_string());
            }
            Self::NetworkAdapter(adapter) => {
                adapter.vif_ref = Some(reference.to_string());
                adapter.device = Some(device.to_string());
                adapter.mtu.get_or_insert(DEFAULT_MTU);
            }
        }
        child
    }
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disk => "disk",
            Self::NetworkAdapter => "network adapter",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ChildKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.backing_uuid)
    }
}

impl std::fmt::Display for DiskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ReadOnly => "RO",
            Self::ReadWrite => "RW",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DiskMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RO" => Ok(Self::ReadOnly),
            "RW" => Ok(Self::ReadWrite),
            other => Err(format!("Invalid disk mode: {other}. Expected: RO or RW")),
        }
    }
}
