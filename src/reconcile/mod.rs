//! Reconciliation core.
//!
//! Given a desired and an observed [`ParentState`], [`reconcile`] produces an
//! ordered [`MutationPlan`] without touching the host. [`PlanExecutor`] runs a
//! plan against a [`ResourceApi`], and [`apply_locally`] folds what was
//! executed back into the observed snapshot.

mod api;
mod apply;
mod constraints;
mod diff;
mod executor;
mod gate;
mod keyer;
mod overlay;
mod planner;

pub use api::{ApiResult, ResourceApi};
pub use apply::apply_locally;
pub use constraints::{
    MAX_MTU, MIN_MTU, check_immutable, check_slot_available, check_topology, validate_children,
    validate_parent,
};
pub use diff::{ChildDelete, ChildDiff, ChildUpdate, SetReconciler};
pub use executor::{ExecutionReport, PlanExecutor};
pub use gate::LiveAttachGate;
pub use keyer::{IdentityKeyer, Side};
pub use overlay::{AttributeOverlayTracker, apply_patch};
pub use planner::{MutationPlan, OrderedMutationPlanner};

#[cfg(test)]
pub(crate) use apply::{apply_change, apply_scalar};

use crate::error::PlanError;
use crate::model::ParentState;

/// Plans the mutations converging `observed` to `desired`.
///
/// # Errors
///
/// Returns a [`PlanError`] before any remote call if the input is invalid
/// or the change needs a replacement the core does not perform.
pub fn reconcile(desired: &ParentState, observed: &ParentState) -> Result<MutationPlan, PlanError> {
    OrderedMutationPlanner::new().plan(desired, observed)
}
