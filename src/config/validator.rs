//! Configuration validation for VM specs.
//!
//! The validator collects every problem in a config instead of stopping at the
//! first, so `xenvm validate` can report them together. Planning repeats the
//! checks it depends on, so a config that skips validation is still safe.

use crate::error::{ConfigError, Result, XenVmError};
use crate::model::{OWNED_KEYS_SENTINEL, TEMPLATE_NAME_KEY, is_well_formed_key};
use crate::reconcile::{MAX_MTU, MIN_MTU};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{HardDriveConfig, MemoryConfig, NetworkInterfaceConfig, VmConfig, VmDeployConfig};

/// vCPU count above which a warning is emitted.
const VCPU_WARNING_THRESHOLD: u32 = 16;

/// Characters XenAPI accepts in a boot order (disk, CD, network).
const BOOT_ORDER_DEVICES: &[char] = &['c', 'd', 'n'];

/// Validator for VM configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing every error found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &VmDeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(XenVmError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Runs every check and returns all findings.
    #[must_use]
    pub fn check(&self, config: &VmDeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_vm(&config.vm, &mut result);
        Self::validate_memory(&config.vm.memory, &mut result);
        Self::validate_hard_drives(&config.vm.hard_drives, &mut result);
        Self::validate_network_interfaces(&config.vm.network_interfaces, &mut result);

        result
    }

    fn validate_vm(vm: &VmConfig, result: &mut ValidationResult) {
        if vm.name_label.trim().is_empty() {
            result.error("vm.name_label", "Name label cannot be empty");
        }

        if vm.template_name.trim().is_empty() {
            result.error("vm.template_name", "Template name cannot be empty");
        }

        if vm.vcpus == 0 {
            result.error("vm.vcpus", "vCPU count must be at least 1");
        } else if vm.vcpus > VCPU_WARNING_THRESHOLD {
            result.warnings.push(format!(
                "vm.vcpus: {} vCPUs is more than most guests can use",
                vm.vcpus
            ));
        }

        match vm.cores_per_socket {
            Some(0) => result.error("vm.cores_per_socket", "Cores per socket must be at least 1"),
            Some(cores) if vm.vcpus > 0 && vm.vcpus % cores != 0 => result.error(
                "vm.cores_per_socket",
                format!("{} vCPUs cannot be split into sockets of {cores} cores", vm.vcpus),
            ),
            _ => {}
        }

        if let Some(order) = &vm.boot_order
            && let Some(bad) = order.chars().find(|c| !BOOT_ORDER_DEVICES.contains(c))
        {
            result.error(
                "vm.boot_order",
                format!("Unknown boot device '{bad}'. Expected a combination of c, d and n"),
            );
        }

        for reserved in [OWNED_KEYS_SENTINEL, TEMPLATE_NAME_KEY] {
            if vm.other_config.contains_key(reserved) {
                result.error(
                    "vm.other_config",
                    format!("'{reserved}' is reserved for xenvm bookkeeping"),
                );
            }
        }
        if let Some(key) = vm.other_config.keys().find(|key| !is_well_formed_key(key)) {
            result.error(
                "vm.other_config",
                format!("Key '{key}' must be non-empty, without commas or surrounding whitespace"),
            );
        }
    }

    fn validate_memory(memory: &MemoryConfig, result: &mut ValidationResult) {
        let limits = memory.limits();

        if limits.static_max == 0 {
            result.error("vm.memory.static_max", "Static maximum must be greater than zero");
            return;
        }

        if !limits.is_ordered() {
            result.error(
                "vm.memory",
                format!(
                    "Memory bounds must satisfy \
                     static_min <= dynamic_min <= dynamic_max <= static_max \
                     (got {} <= {} <= {} <= {})",
                    limits.static_min, limits.dynamic_min, limits.dynamic_max, limits.static_max
                ),
            );
        }
    }

    fn validate_hard_drives(drives: &[HardDriveConfig], result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, drive) in drives.iter().enumerate() {
            let field = format!("vm.hard_drives[{i}].vdi_uuid");
            if uuid::Uuid::parse_str(&drive.vdi_uuid).is_err() {
                result.error(&field, format!("'{}' is not a valid UUID", drive.vdi_uuid));
            } else if !seen.insert(drive.vdi_uuid.to_ascii_lowercase()) {
                result.error(&field, format!("VDI {} is attached more than once", drive.vdi_uuid));
            }
        }

        if !drives.is_empty() && !drives.iter().any(|drive| drive.bootable) {
            result
                .warnings
                .push(String::from("vm.hard_drives: no disk is bootable"));
        }
    }

    fn validate_network_interfaces(nics: &[NetworkInterfaceConfig], result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, nic) in nics.iter().enumerate() {
            let prefix = format!("vm.network_interfaces[{i}]");

            if uuid::Uuid::parse_str(&nic.network_uuid).is_err() {
                result.error(
                    format!("{prefix}.network_uuid"),
                    format!("'{}' is not a valid UUID", nic.network_uuid),
                );
            } else if !seen.insert(nic.network_uuid.to_ascii_lowercase()) {
                result.error(
                    format!("{prefix}.network_uuid"),
                    format!("Network {} is attached more than once", nic.network_uuid),
                );
            }

            if let Some(mac) = &nic.mac
                && !is_valid_mac(mac)
            {
                result.error(
                    format!("{prefix}.mac"),
                    format!("'{mac}' is not a MAC address (expected xx:xx:xx:xx:xx:xx)"),
                );
            }

            if let Some(mtu) = nic.mtu
                && !(MIN_MTU..=MAX_MTU).contains(&mtu)
            {
                result.error(
                    format!("{prefix}.mtu"),
                    format!("MTU {mtu} is outside {MIN_MTU}..={MAX_MTU}"),
                );
            }
        }
    }
}

/// Checks for six colon-separated hex octets.
fn is_valid_mac(mac: &str) -> bool {
    let octets: Vec<&str> = mac.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
