//! Sequential plan execution.
//!
//! Operations run one at a time, in plan order. The first failure stops the
//! run; everything that already succeeded is reported so the caller can fold
//! it into its cache. Nothing is retried or rolled back.

use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::error::{ExecutionError, XenApiError};
use crate::model::{ChildKey, ExecutedOperation, Operation, OperationOutcome};

use super::api::ResourceApi;
use super::constraints::check_slot_available;
use super::overlay::apply_patch;
use super::planner::MutationPlan;

/// Runs a plan against one VM.
pub struct PlanExecutor<'a> {
    api: &'a dyn ResourceApi,
    vm_ref: &'a str,
}

/// What a run achieved.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Operations that succeeded, in order.
    pub executed: Vec<ExecutedOperation>,
    /// The failure that stopped the run, if any.
    pub failure: Option<ExecutionError>,
}

impl ExecutionReport {
    /// Returns true if every planned operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Number of operations that succeeded.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.executed.len()
    }
}

impl<'a> PlanExecutor<'a> {
    /// Creates an executor for the VM at `vm_ref`.
    #[must_use]
    pub const fn new(api: &'a dyn ResourceApi, vm_ref: &'a str) -> Self {
        Self { api, vm_ref }
    }

    /// Executes a plan.
    pub async fn execute(&self, plan: &MutationPlan) -> ExecutionReport {
        info!("Executing mutation plan with {} operations", plan.len());

        let mut created: HashMap<ChildKey, String> = HashMap::new();
        let mut executed = Vec::with_capacity(plan.len());

        for (index, operation) in plan.operations.iter().enumerate() {
            debug!("[{index}] {operation}");
            match self.step(index, executed.len(), operation, &mut created).await {
                Ok(outcome) => executed.push(ExecutedOperation {
                    operation: operation.clone(),
                    outcome,
                }),
                Err(failure) => {
                    error!("Operation {index} failed: {failure}");
                    return ExecutionReport {
                        executed,
                        failure: Some(failure),
                    };
                }
            }
        }

        info!("Executed {} operations", executed.len());
        ExecutionReport {
            executed,
            failure: None,
        }
    }

    async fn step(
        &self,
        index: usize,
        completed: usize,
        operation: &Operation,
        created: &mut HashMap<ChildKey, String>,
    ) -> Result<OperationOutcome, ExecutionError> {
        let fail = |source: XenApiError| ExecutionError::RemoteOperationFailed {
            index,
            operation: operation.to_string(),
            completed,
            source,
        };

        match operation {
            Operation::CreateChild { spec } => {
                let key = spec.key();
                let slots = self
                    .api
                    .allowed_slots(self.vm_ref, key.kind)
                    .await
                    .map_err(fail)?;
                let slot = check_slot_available(&key, &slots, index, completed)?;
                let child_ref = self
                    .api
                    .create_child(self.vm_ref, spec, slot)
                    .await
                    .map_err(fail)?;
                debug!("Created {key} as {child_ref} in slot {slot}");
                let device = slot.to_string();
                created.insert(key, child_ref.clone());
                Ok(OperationOutcome::Created { child_ref, device })
            }
            Operation::UpdateChildField {
                key,
                child_ref,
                change,
            } => {
                self.api
                    .set_child_field(key.kind, child_ref, change)
                    .await
                    .map_err(fail)?;
                Ok(OperationOutcome::Done)
            }
            Operation::DeleteChild { key, child_ref } => {
                self.api
                    .destroy_child(key.kind, child_ref)
                    .await
                    .map_err(fail)?;
                Ok(OperationOutcome::Done)
            }
            Operation::PlugChild { key } => {
                let child_ref = created
                    .get(key)
                    .ok_or_else(|| ExecutionError::UnresolvedChild {
                        key: key.clone(),
                        index,
                    })?;
                self.api
                    .plug_child(key.kind, child_ref)
                    .await
                    .map_err(fail)?;
                Ok(OperationOutcome::Done)
            }
            Operation::SetScalarField { field } => {
                self.api
                    .set_scalar_field(self.vm_ref, field)
                    .await
                    .map_err(fail)?;
                Ok(OperationOutcome::Done)
            }
            Operation::SetCdrom { iso } => {
                self.api
                    .set_cdrom(self.vm_ref, iso.as_deref())
                    .await
                    .map_err(fail)?;
                Ok(OperationOutcome::Done)
            }
            Operation::SetMapField { field, patch } => {
                // Re-read so writes by other parties since planning survive.
                let current = self
                    .api
                    .get_map_field(self.vm_ref, *field)
                    .await
                    .map_err(fail)?;
                let value = apply_patch(patch, &current);
                self.api
                    .set_map_field(self.vm_ref, *field, &value)
                    .await
                    .map_err(fail)?;
                Ok(OperationOutcome::MapWritten { value })
            }
        }
    }
}

impl std::fmt::Debug for PlanExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("vm_ref", &self.vm_ref)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AdapterSpec, ChildKind, ChildResourceSpec, DiskMode, DiskSpec, MapField, MapPatch,
        MemoryLimits, OverlayMap, ParentState, PowerState, VcpuCount, OWNED_KEYS_SENTINEL,
    };
    use crate::reconcile::{OrderedMutationPlanner, apply_locally};
    use crate::testing::FakeXenApi;
    use std::collections::BTreeMap;

    fn base() -> ParentState {
        ParentState {
            name_label: String::from("app-1"),
            vcpus: VcpuCount::uniform(2),
            memory: MemoryLimits::fixed(2 << 30),
            ..ParentState::default()
        }
    }

    fn disk(uuid: &str) -> ChildResourceSpec {
        ChildResourceSpec::Disk(DiskSpec {
            vdi_uuid: uuid.to_string(),
            mode: DiskMode::ReadWrite,
            bootable: false,
            device: None,
            vbd_ref: None,
        })
    }

    fn adapter(uuid: &str) -> ChildResourceSpec {
        ChildResourceSpec::NetworkAdapter(AdapterSpec {
            network_uuid: uuid.to_string(),
            mac: None,
            mtu: None,
            other_config: BTreeMap::new(),
            device: None,
            vif_ref: None,
        })
    }

    #[tokio::test]
    async fn test_execute_converges_fake_host() {
        let api = FakeXenApi::new(base());
        let mut desired = base();
        desired.vcpus = VcpuCount::uniform(4);
        desired.children = vec![disk("vdi-1"), adapter("net-1")];

        let observed = api.get_record_now();
        let plan = OrderedMutationPlanner::new().plan(&desired, &observed).unwrap();
        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;

        assert!(report.is_success(), "{:?}", report.failure);
        assert_eq!(report.completed(), plan.len());

        let refreshed = api.get_record_now();
        assert!(OrderedMutationPlanner::new().plan(&desired, &refreshed).unwrap().is_empty());

        let cached = apply_locally(&observed, &report.executed);
        assert!(OrderedMutationPlanner::new().plan(&desired, &cached).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vcpu_ordering_respects_host_invariant() {
        let mut start = base();
        start.vcpus = VcpuCount::uniform(8);
        let api = FakeXenApi::new(start);
        let desired = base();

        let plan = OrderedMutationPlanner::new()
            .plan(&desired, &api.get_record_now())
            .unwrap();
        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;

        assert!(report.is_success(), "{:?}", report.failure);
        assert_eq!(api.get_record_now().vcpus, VcpuCount::uniform(2));
        assert_eq!(api.calls(), vec!["VM.set_VCPUs_at_startup", "VM.set_VCPUs_max"]);
    }

    #[tokio::test]
    async fn test_plug_only_when_running() {
        let mut start = base();
        start.power_state = PowerState::Running;
        let api = FakeXenApi::new(start);
        let mut desired = base();
        desired.children = vec![disk("vdi-1")];

        let plan = OrderedMutationPlanner::new()
            .plan(&desired, &api.get_record_now())
            .unwrap();
        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;

        assert!(report.is_success());
        assert_eq!(api.plugged().len(), 1);
    }

    #[tokio::test]
    async fn test_slot_exhausted_reports_partial_progress() {
        let api = FakeXenApi::new(base()).with_slot_limit(ChildKind::Disk, 1);
        let mut desired = base();
        desired.name_label = String::from("app-2");
        desired.children = vec![disk("vdi-1"), disk("vdi-2")];

        let plan = OrderedMutationPlanner::new()
            .plan(&desired, &api.get_record_now())
            .unwrap();
        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;

        assert_eq!(report.completed(), 2);
        assert!(matches!(
            report.failure,
            Some(ExecutionError::SlotExhausted {
                index: 2,
                completed: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_remote_failure_stops_run() {
        let api = FakeXenApi::new(base()).failing_on("VBD.create");
        let mut desired = base();
        desired.name_label = String::from("app-2");
        desired.children = vec![disk("vdi-1")];

        let plan = OrderedMutationPlanner::new()
            .plan(&desired, &api.get_record_now())
            .unwrap();
        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;

        assert_eq!(report.completed(), 1);
        let failure = report.failure.unwrap();
        assert_eq!(failure.failed_index(), 1);
        assert!(matches!(failure, ExecutionError::RemoteOperationFailed { .. }));
    }

    #[tokio::test]
    async fn test_map_patch_uses_current_remote_value() {
        let mut start = base();
        start.other_config = OverlayMap::from_raw(BTreeMap::from([
            (String::from("a"), String::from("1")),
            (OWNED_KEYS_SENTINEL.to_string(), String::from("a,")),
        ]));
        let api = FakeXenApi::new(start);
        let plan = MutationPlan {
            operations: vec![Operation::SetMapField {
                field: MapField::OtherConfig,
                patch: MapPatch::Overlay {
                    managed: BTreeMap::new(),
                    sentinel: OWNED_KEYS_SENTINEL.to_string(),
                },
            }],
        };
        // Written by someone else after planning.
        api.insert_other_config("external", "z");

        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;

        assert!(report.is_success());
        assert_eq!(
            api.get_record_now().other_config.raw,
            BTreeMap::from([
                (String::from("external"), String::from("z")),
                (OWNED_KEYS_SENTINEL.to_string(), String::new()),
            ])
        );
    }

    #[tokio::test]
    async fn test_cdrom_insert_and_eject() {
        let api = FakeXenApi::new(base()).with_iso("tools.iso");
        let mut desired = base();
        desired.cdrom = Some(String::from("tools.iso"));

        let observed = api.get_record_now();
        let plan = OrderedMutationPlanner::new().plan(&desired, &observed).unwrap();
        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;

        assert!(report.is_success(), "{:?}", report.failure);
        assert_eq!(api.get_record_now().inserted_iso(), Some("tools.iso"));
        let cached = apply_locally(&observed, &report.executed);
        assert!(OrderedMutationPlanner::new().plan(&desired, &cached).unwrap().is_empty());

        desired.cdrom = Some(String::new());
        let plan = OrderedMutationPlanner::new()
            .plan(&desired, &api.get_record_now())
            .unwrap();
        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;

        assert!(report.is_success());
        assert_eq!(api.calls(), vec!["VBD.insert", "VBD.eject"]);
        assert_eq!(api.get_record_now().inserted_iso(), None);
    }

    #[tokio::test]
    async fn test_unknown_iso_fails() {
        let api = FakeXenApi::new(base());
        let plan = MutationPlan {
            operations: vec![Operation::SetCdrom {
                iso: Some(String::from("missing.iso")),
            }],
        };

        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;
        assert!(matches!(
            report.failure,
            Some(ExecutionError::RemoteOperationFailed { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_plug_of_unknown_child_is_unresolved() {
        let api = FakeXenApi::new(base());
        let plan = MutationPlan {
            operations: vec![Operation::PlugChild {
                key: disk("vdi-9").key(),
            }],
        };

        let report = PlanExecutor::new(&api, FakeXenApi::VM_REF).execute(&plan).await;
        assert!(matches!(
            report.failure,
            Some(ExecutionError::UnresolvedChild { index: 0, .. })
        ));
    }
}
