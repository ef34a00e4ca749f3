//! Configuration parser for loading VM configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, XenVmError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::VmDeployConfig;

/// Environment variable holding the XenAPI endpoint.
pub const ENV_XENSERVER_URL: &str = "XENSERVER_URL";
/// Environment variable holding the XenAPI user name.
pub const ENV_XENSERVER_USERNAME: &str = "XENSERVER_USERNAME";
/// Environment variable holding the XenAPI password.
pub const ENV_XENSERVER_PASSWORD: &str = "XENSERVER_PASSWORD";

/// Configuration parser for loading VM configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to find `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<VmDeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(XenVmError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            XenVmError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<VmDeployConfig> {
        let config: VmDeployConfig = serde_yaml::from_str(content).map_err(|e| {
            XenVmError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed configuration for VM: {}", config.vm.name_label);
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// `XENVM_VM_NAME_LABEL` replaces `vm.name_label` and `XENVM_STATE_PATH`
    /// replaces `state.path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<VmDeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    fn apply_env_overrides(config: &mut VmDeployConfig, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name_label) = lookup("XENVM_VM_NAME_LABEL") {
            debug!("Overriding vm.name_label from environment");
            config.vm.name_label = name_label;
        }

        if let Some(path) = lookup("XENVM_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                XenVmError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Connection settings for a XenServer / XCP-ng host.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Host URL, e.g. `https://xen.example.com`.
    pub url: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ConnectionConfig {
    /// Builds connection settings, naming the variable behind the first
    /// missing value.
    ///
    /// # Errors
    ///
    /// Returns `MissingEnvVar` if a value is absent or empty.
    pub fn resolve(
        url: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            url: required(url, ENV_XENSERVER_URL)?,
            username: required(username, ENV_XENSERVER_USERNAME)?,
            password: required(password, ENV_XENSERVER_PASSWORD)?,
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        XenVmError::Config(ConfigError::MissingEnvVar {
            name: name.to_string(),
        })
    })
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["xenvm.yaml", "xenvm.yml", "vm.yaml", "vm.yml"];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(XenVmError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
