// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![warn(dead_code)]                   // Unused code
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

#![warn(unused_imports)]              // Unused imports
#![warn(unused_variables)]            // Unused variables
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::too_many_arguments)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # xenvm
//!
//! Declarative, idempotent reconciliation of a XenServer / XCP-ng virtual
//! machine and its attached disks and network adapters.
//!
//! ## Overview
//!
//! A VM is described in YAML. Each run reads the VM as it exists on the host,
//! computes the ordered set of XenAPI mutations that make it match the
//! description, and executes them. Running twice in a row is a no-op.
//!
//! 1. **Desired state**: parsed from `xenvm.yaml` into a [`model::ParentState`]
//! 2. **Observed state**: read through the XenAPI session
//! 3. **Plan**: [`reconcile::reconcile`] diffs the two without side effects
//! 4. **Execute**: [`reconcile::PlanExecutor`] runs the plan and stops at the
//!    first failure, reporting how far it got
//!
//! Disks and adapters are matched by the UUID of their backing VDI or
//! network, never by position. Only `other_config` keys that xenvm wrote are
//! ever changed or removed.
//!
//! ## Modules
//!
//! - [`model`]: parent, child and operation types
//! - [`reconcile`]: diffing, planning, constraints and execution
//! - [`config`]: YAML parsing, validation and hashing
//! - [`xenapi`]: JSON-RPC client and the [`reconcile::ResourceApi`] impl
//! - [`reconciler`]: the plan / apply / status / destroy workflow
//! - [`state`]: local state cache and lock
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```yaml
//! vm:
//!   name_label: web-1
//!   template_name: "Debian Bookworm 12"
//!   vcpus: 4
//!   cores_per_socket: 2
//!   memory:
//!     static_max: 4GiB
//!   boot_mode: uefi
//!   hard_drives:
//!     - vdi_uuid: 7c1f9b52-3f0e-4b6d-9a51-0f1c2d3e4a5b
//!       bootable: true
//!   network_interfaces:
//!     - network_uuid: 1d2e3f40-5a6b-4c7d-8e9f-a0b1c2d3e4f5
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod reconciler;
pub mod state;
pub mod xenapi;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, VmDeployConfig};
pub use error::{Result, XenVmError};
pub use model::{ChildResourceSpec, Operation, ParentState};
pub use reconcile::{MutationPlan, OrderedMutationPlanner, PlanExecutor, ResourceApi, reconcile};
pub use reconciler::{Reconciler, VmLifecycle};
pub use state::{LocalStateStore, StateStore, VmStateRecord};
pub use xenapi::{XenApiClient, XenSession};
