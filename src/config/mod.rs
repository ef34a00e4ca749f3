//! Configuration module for xenvm.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `xenvm.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, ConnectionConfig, DEFAULT_CONFIG_FILES, ENV_XENSERVER_PASSWORD, ENV_XENSERVER_URL,
    ENV_XENSERVER_USERNAME, find_config_file,
};
pub use spec::{
    ByteSize, DEFAULT_STATE_PATH, HardDriveConfig, MemoryConfig, NetworkInterfaceConfig,
    StateConfig, VmConfig, VmDeployConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
