//! XenAPI integration.
//!
//! This module provides the JSON-RPC client, the session value every remote
//! call goes through, and the observer and provisioner built on top of it.

mod client;
mod observer;
mod provisioner;
mod resource;
mod types;

pub use client::{XenApiClient, XenSession};
pub use observer::VmObserver;
pub use provisioner::VmProvisioner;
pub use types::{NULL_REF, VbdRecord, VbdType, VifRecord, VmRecord};
