//! Configuration hashing for change detection.
//!
//! The hash is recorded with every apply so `xenvm status` can tell whether
//! the config changed since the last successful run.

use sha2::{Digest, Sha256};

use super::spec::{HardDriveConfig, NetworkInterfaceConfig, VmDeployConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of everything that shapes the VM.
    ///
    /// Disks and adapters are hashed in natural-key order, so reordering them
    /// in the file does not change the hash. The state path is not included.
    #[must_use]
    pub fn hash_config(&self, config: &VmDeployConfig) -> String {
        let vm = &config.vm;
        let mut hasher = Sha256::new();

        update_str(&mut hasher, &vm.name_label);
        update_str(&mut hasher, &vm.name_description);
        update_str(&mut hasher, &vm.template_name);
        hasher.update(vm.vcpus.to_be_bytes());
        hasher.update(vm.cores_per_socket.unwrap_or(0).to_be_bytes());

        let memory = vm.memory.limits();
        let bounds = [
            memory.static_min,
            memory.static_max,
            memory.dynamic_min,
            memory.dynamic_max,
        ];
        for bound in bounds {
            hasher.update(bound.to_be_bytes());
        }

        update_str(&mut hasher, vm.boot_mode.map_or("", |mode| mode.firmware()));
        update_str(&mut hasher, vm.boot_mode.map_or("", |mode| mode.secure_boot()));
        update_str(&mut hasher, vm.boot_order.as_deref().unwrap_or(""));
        match &vm.cdrom {
            Some(iso) => {
                hasher.update([1]);
                update_str(&mut hasher, iso);
            }
            None => hasher.update([0]),
        }

        // BTreeMap iterates in key order
        for (key, value) in &vm.other_config {
            update_str(&mut hasher, key);
            update_str(&mut hasher, value);
        }

        let mut drives: Vec<_> = vm.hard_drives.iter().collect();
        drives.sort_by(|a, b| a.vdi_uuid.cmp(&b.vdi_uuid));
        for drive in drives {
            hasher.update(self.hash_hard_drive(drive).as_bytes());
        }

        let mut nics: Vec<_> = vm.network_interfaces.iter().collect();
        nics.sort_by(|a, b| a.network_uuid.cmp(&b.network_uuid));
        for nic in nics {
            hasher.update(self.hash_network_interface(nic).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single disk.
    #[must_use]
    pub fn hash_hard_drive(&self, drive: &HardDriveConfig) -> String {
        let mut hasher = Sha256::new();
        update_str(&mut hasher, &drive.vdi_uuid);
        update_str(&mut hasher, &format!("{:?}", drive.mode));
        hasher.update([u8::from(drive.bootable)]);
        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single network adapter.
    #[must_use]
    pub fn hash_network_interface(&self, nic: &NetworkInterfaceConfig) -> String {
        let mut hasher = Sha256::new();
        update_str(&mut hasher, &nic.network_uuid);
        update_str(&mut hasher, &nic.mac.as_deref().unwrap_or("").to_ascii_lowercase());
        hasher.update(nic.mtu.unwrap_or(0).to_be_bytes());
        for (key, value) in &nic.other_config {
            update_str(&mut hasher, key);
            update_str(&mut hasher, value);
        }
        hex::encode(hasher.finalize())
    }

    /// Returns the first 12 characters of a hash, for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..12).unwrap_or(hash)
    }
}

/// Length-prefixed so adjacent fields cannot run together.
fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}
