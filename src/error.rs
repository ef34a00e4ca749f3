//! Error types for the xenvm reconciliation system.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation: configuration, state caching, the XenAPI transport,
//! planning, and plan execution.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::ChildKey;

/// The main error type for xenvm.
#[derive(Debug, Error)]
pub enum XenVmError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// XenAPI transport or remote errors.
    #[error("XenAPI error: {0}")]
    XenApi(#[from] XenApiError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// The state file could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Errors raised by the XenAPI JSON-RPC transport or returned by the host.
#[derive(Debug, Error)]
pub enum XenApiError {
    /// Login was rejected.
    #[error("XenAPI authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The HTTP request returned a non-success status.
    #[error("XenAPI request failed: {status} - {message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The host answered with a XenAPI failure.
    #[error("XenAPI call {method} failed: {code} {params:?}")]
    Api {
        /// Method that was called.
        method: String,
        /// XenAPI error code (e.g. `HANDLE_INVALID`).
        code: String,
        /// Additional error parameters.
        params: Vec<String>,
    },

    /// The object could not be found.
    #[error("{class} not found: {id}")]
    NotFound {
        /// XenAPI class (VM, VDI, network, ...).
        class: String,
        /// Name label, UUID or reference that was looked up.
        id: String,
    },

    /// Network-level failure.
    #[error("Network error: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("Invalid response from XenAPI: {message}")]
    InvalidResponse {
        /// Description of the decoding failure.
        message: String,
    },
}

/// Planning errors.
///
/// All of these are raised before any remote call is issued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Malformed input.
    #[error("Invalid {field}: {message}")]
    Validation {
        /// Field that is malformed.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Two children on the same side share a natural key.
    #[error("Duplicate {side} child for {key}")]
    IdentityCollision {
        /// Which side of the diff (`desired` or `observed`).
        side: &'static str,
        /// The duplicated key.
        key: ChildKey,
    },

    /// An immutable field differs between desired and observed state.
    #[error("{field} of {key} cannot be changed in place (observed {observed}, desired {desired})")]
    ImmutableFieldChanged {
        /// Child whose field changed.
        key: ChildKey,
        /// Field name.
        field: &'static str,
        /// Observed value.
        observed: String,
        /// Desired value.
        desired: String,
    },

    /// The vCPU count does not fit the cores-per-socket topology.
    #[error("{vcpus} vCPUs could not fit a {cores_per_socket} cores-per-socket topology")]
    TopologyConstraintViolation {
        /// Requested vCPU count.
        vcpus: u32,
        /// Effective cores per socket.
        cores_per_socket: u32,
    },
}

/// Execution errors.
///
/// Each variant records how many planned operations had already succeeded.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The host reported no free device slot for a new child.
    #[error("No free device slot for {key} (operation {index}, {completed} operations completed)")]
    SlotExhausted {
        /// Child that could not be created.
        key: ChildKey,
        /// Index of the failed operation in the plan.
        index: usize,
        /// Number of operations that succeeded before it.
        completed: usize,
    },

    /// A remote call failed.
    #[error(
        "Operation {index} ({operation}) failed after {completed} completed operations: {source}"
    )]
    RemoteOperationFailed {
        /// Index of the failed operation in the plan.
        index: usize,
        /// Human-readable description of the operation.
        operation: String,
        /// Number of operations that succeeded before it.
        completed: usize,
        /// Underlying XenAPI error.
        #[source]
        source: XenApiError,
    },

    /// A plug referenced a child this run never created.
    #[error("Operation {index} references {key}, which was not created in this run")]
    UnresolvedChild {
        /// Child key.
        key: ChildKey,
        /// Index of the failed operation in the plan.
        index: usize,
    },
}

/// Result type alias for xenvm operations.
pub type Result<T> = std::result::Result<T, XenVmError>;

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl XenApiError {
    /// Creates an HTTP request error.
    #[must_use]
    pub fn request_failed(status: u16, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(class: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            class: class.into(),
            id: id.into(),
        }
    }
}

impl PlanError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ExecutionError {
    /// Returns the index of the operation that failed.
    #[must_use]
    pub const fn failed_index(&self) -> usize {
        match self {
            Self::SlotExhausted { index, .. }
            | Self::RemoteOperationFailed { index, .. }
            | Self::UnresolvedChild { index, .. } => *index,
        }
    }
}
