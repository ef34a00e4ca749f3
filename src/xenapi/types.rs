//! XenAPI JSON-RPC wire types.
//!
//! Only the record fields xenvm reads are modelled; everything else in a
//! record is ignored on deserialization.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::model::{DiskMode, PowerState};

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a [serde_json::Value],
    pub id: u64,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// A XenAPI failure. `message` holds the error code, `data` its parameters.
#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// Subset of a `VM` record.
#[derive(Debug, Clone, Deserialize)]
pub struct VmRecord {
    /// VM UUID.
    pub uuid: String,
    /// Display name.
    pub name_label: String,
    /// Description.
    #[serde(default)]
    pub name_description: String,
    /// Power state.
    pub power_state: PowerState,
    /// Whether this VM is a template.
    #[serde(default)]
    pub is_a_template: bool,
    /// vCPUs online at boot.
    #[serde(rename = "VCPUs_at_startup", deserialize_with = "flexible_u64")]
    pub vcpus_at_startup: u64,
    /// Maximum vCPUs.
    #[serde(rename = "VCPUs_max", deserialize_with = "flexible_u64")]
    pub vcpus_max: u64,
    /// Static lower memory bound in bytes.
    #[serde(deserialize_with = "flexible_u64")]
    pub memory_static_min: u64,
    /// Static upper memory bound in bytes.
    #[serde(deserialize_with = "flexible_u64")]
    pub memory_static_max: u64,
    /// Dynamic lower memory bound in bytes.
    #[serde(deserialize_with = "flexible_u64")]
    pub memory_dynamic_min: u64,
    /// Dynamic upper memory bound in bytes.
    #[serde(deserialize_with = "flexible_u64")]
    pub memory_dynamic_max: u64,
    /// Platform flags.
    #[serde(default)]
    pub platform: BTreeMap<String, String>,
    /// HVM boot parameters.
    #[serde(rename = "HVM_boot_params", default)]
    pub hvm_boot_params: BTreeMap<String, String>,
    /// Free-form configuration shared by every client.
    #[serde(default)]
    pub other_config: BTreeMap<String, String>,
    /// Attached VBD references.
    #[serde(rename = "VBDs", default)]
    pub vbds: Vec<String>,
    /// Attached VIF references.
    #[serde(rename = "VIFs", default)]
    pub vifs: Vec<String>,
}

/// VBD type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VbdType {
    /// A hard disk.
    Disk,
    /// A CD drive.
    #[serde(rename = "CD")]
    Cd,
    /// A floppy drive.
    Floppy,
}

/// Subset of a `VBD` record.
#[derive(Debug, Clone, Deserialize)]
pub struct VbdRecord {
    /// Backing VDI reference (`OpaqueRef:NULL` when empty).
    #[serde(rename = "VDI")]
    pub vdi: String,
    /// Device slot.
    #[serde(default)]
    pub userdevice: String,
    /// Attach mode.
    pub mode: DiskMode,
    /// Device type.
    #[serde(rename = "type")]
    pub vbd_type: VbdType,
    /// Whether the disk is bootable.
    #[serde(default)]
    pub bootable: bool,
    /// Whether the drive is empty.
    #[serde(default)]
    pub empty: bool,
}

/// Subset of a `VIF` record.
#[derive(Debug, Clone, Deserialize)]
pub struct VifRecord {
    /// Backing network reference.
    pub network: String,
    /// Device slot.
    #[serde(default)]
    pub device: String,
    /// MAC address.
    #[serde(rename = "MAC", default)]
    pub mac: String,
    /// MTU in octets.
    #[serde(rename = "MTU", deserialize_with = "flexible_u64")]
    pub mtu: u64,
    /// Adapter-level configuration.
    #[serde(default)]
    pub other_config: BTreeMap<String, String>,
}

/// Reference value of an unset object field.
pub const NULL_REF: &str = "OpaqueRef:NULL";

/// Accepts integers encoded either as JSON numbers or as decimal strings.
///
/// XenAPI serializes `int` fields as strings on some host versions.
fn flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Number(u64),
        Text(String),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Number(n) => Ok(n),
        Flexible::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
