//! Reconciler driving one VM to its configured shape.
//!
//! This module ties the pieces together: it finds (or clones) the VM,
//! observes it, plans with the reconciliation core, executes the plan and
//! folds the outcome into the local state cache.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, VmDeployConfig};
use crate::error::{ExecutionError, Result, XenApiError};
use crate::model::{ExecutedOperation, ParentState, PowerState};
use crate::reconcile::{
    MutationPlan, OrderedMutationPlanner, PlanExecutor, ResourceApi, apply_locally,
};
use crate::state::{
    ApplyHistoryEntry, ApplyOperation, LockInfo, StateStore, VmStateRecord, generate_holder_id,
};

/// VM lifecycle calls the reconciler needs beyond [`ResourceApi`].
#[async_trait]
pub trait VmLifecycle: Send + Sync {
    /// Finds a non-template VM by exact name label.
    async fn find_by_name_label(
        &self,
        name_label: &str,
    ) -> std::result::Result<Option<String>, XenApiError>;

    /// Resolves a VM UUID, or `None` if it no longer exists.
    async fn find_by_uuid(&self, uuid: &str) -> std::result::Result<Option<String>, XenApiError>;

    /// Returns the UUID of a VM.
    async fn vm_uuid(&self, vm_ref: &str) -> std::result::Result<String, XenApiError>;

    /// Clones the template matching `template_name` into a new VM.
    async fn clone_from_template(
        &self,
        template_name: &str,
        name_label: &str,
    ) -> std::result::Result<String, XenApiError>;

    /// Destroys a VM and its VBDs and VIFs.
    async fn destroy_vm(&self, vm_ref: &str) -> std::result::Result<(), XenApiError>;
}

/// Reconciler for one configured VM.
pub struct Reconciler<'a, S: StateStore, H: ResourceApi + VmLifecycle> {
    /// Configuration.
    config: &'a VmDeployConfig,
    /// State store.
    state_store: &'a S,
    /// Host connection.
    host: &'a H,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Planner.
    planner: OrderedMutationPlanner,
}

/// Result of `plan`.
#[derive(Debug, Serialize)]
pub struct PlanReport {
    /// Name label of the VM.
    pub name_label: String,
    /// Reference of the existing VM, or `None` if it will be cloned.
    pub vm_ref: Option<String>,
    /// Template the VM would be cloned from.
    pub template_name: String,
    /// Operations against the existing VM. Empty when it will be cloned,
    /// since the clone has to exist before it can be observed.
    pub plan: MutationPlan,
}

/// Result of `apply`.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    /// Reference of the VM.
    pub vm_ref: String,
    /// UUID of the VM.
    pub vm_uuid: String,
    /// Whether the VM was cloned during this run.
    pub created_vm: bool,
    /// The plan that was executed.
    pub plan: MutationPlan,
    /// Operations that succeeded.
    pub executed: Vec<ExecutedOperation>,
    /// Index of the failing operation, if the run stopped early.
    pub failed_index: Option<usize>,
    /// Error message of the failing operation.
    pub error: Option<String>,
    /// The failure itself.
    #[serde(skip)]
    pub failure: Option<ExecutionError>,
}

/// Result of `status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Name label of the VM.
    pub name_label: String,
    /// Reference of the VM, if it exists.
    pub vm_ref: Option<String>,
    /// UUID of the VM, if it exists.
    pub vm_uuid: Option<String>,
    /// Power state, if the VM exists.
    pub power_state: Option<PowerState>,
    /// Current observed snapshot.
    pub observed: Option<ParentState>,
    /// Number of operations an apply would run now.
    pub pending_operations: usize,
    /// Whether the config changed since the last successful apply.
    pub config_changed: bool,
    /// Current hash of the config.
    pub config_hash: String,
    /// Most recent history entry.
    pub last_run: Option<ApplyHistoryEntry>,
    /// Current lock, if any.
    pub lock: Option<LockInfo>,
}

/// Result of `destroy`.
#[derive(Debug, Serialize)]
pub struct DestroyReport {
    /// Name label of the VM.
    pub name_label: String,
    /// Reference of the destroyed VM, or `None` if nothing existed.
    pub vm_ref: Option<String>,
}

impl<'a, S: StateStore, H: ResourceApi + VmLifecycle> Reconciler<'a, S, H> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(config: &'a VmDeployConfig, state_store: &'a S, host: &'a H) -> Self {
        Self {
            config,
            state_store,
            host,
            hasher: ConfigHasher::new(),
            planner: OrderedMutationPlanner::new(),
        }
    }

    async fn load_record(&self) -> Result<VmStateRecord> {
        Ok(self
            .state_store
            .load()
            .await?
            .unwrap_or_else(|| VmStateRecord::new(&self.config.vm.name_label)))
    }

    /// Finds the managed VM: by cached UUID first, then by name label.
    async fn locate(&self, record: &VmStateRecord) -> Result<Option<String>> {
        if let Some(uuid) = &record.vm_uuid {
            if let Some(vm_ref) = self.host.find_by_uuid(uuid).await? {
                debug!("Found VM {uuid} from state cache");
                return Ok(Some(vm_ref));
            }
            warn!("Cached VM {uuid} no longer exists, searching by name");
        }
        Ok(self.host.find_by_name_label(&self.config.vm.name_label).await?)
    }

    async fn locked<T>(&self, operation: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
        let lock = self
            .state_store
            .acquire_lock(&generate_holder_id(), operation)
            .await?;
        let result = work.await;
        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            error!("Failed to release state lock: {e}");
        }
        result
    }

    /// Computes what `apply` would do, without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be read or planning fails.
    pub async fn plan(&self) -> Result<PlanReport> {
        let record = self.load_record().await?;
        let vm_ref = self.locate(&record).await?;

        let plan = match &vm_ref {
            Some(vm_ref) => {
                let observed = self.host.get_record(vm_ref).await?;
                self.planner.plan(&self.config.desired_state(), &observed)?
            }
            None => {
                info!(
                    "VM {} does not exist and will be cloned from {}",
                    self.config.vm.name_label, self.config.vm.template_name
                );
                MutationPlan::default()
            }
        };

        Ok(PlanReport {
            name_label: self.config.vm.name_label.clone(),
            vm_ref,
            template_name: self.config.vm.template_name.clone(),
            plan,
        })
    }

    /// Converges the VM, creating it from its template if needed.
    ///
    /// A failing operation does not make this return `Err`: the report
    /// carries the failure and the state cache records the partial run.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held, the host cannot be read,
    /// planning fails, or the state cannot be saved.
    pub async fn apply(&self) -> Result<ApplyReport> {
        self.locked("apply", self.apply_unlocked()).await
    }

    async fn apply_unlocked(&self) -> Result<ApplyReport> {
        let vm = &self.config.vm;
        info!("Applying configuration for VM {}", vm.name_label);

        let config_hash = self.hasher.hash_config(self.config);
        let mut record = self.load_record().await?;

        let (vm_ref, created_vm) = match self.locate(&record).await? {
            Some(vm_ref) => (vm_ref, false),
            None => (
                self.host
                    .clone_from_template(&vm.template_name, &vm.name_label)
                    .await?,
                true,
            ),
        };
        let vm_uuid = self.host.vm_uuid(&vm_ref).await?;
        record.set_vm(&vm_uuid, &vm_ref);

        let observed = self.host.get_record(&vm_ref).await?;
        let plan = match self.planner.plan(&self.config.desired_state(), &observed) {
            Ok(plan) => plan,
            Err(e) => {
                // A fresh clone is still worth remembering
                if created_vm {
                    record.set_observed(observed);
                    self.state_store.save(&record).await?;
                }
                return Err(e.into());
            }
        };
        info!("{plan}");

        let execution = PlanExecutor::new(self.host, &vm_ref).execute(&plan).await;
        if execution.is_success() {
            info!("Applied {} operations to VM {}", execution.completed(), vm.name_label);
        } else {
            warn!(
                "Apply stopped after {}/{} operations on VM {}",
                execution.completed(),
                plan.len(),
                vm.name_label
            );
        }

        let operation = if created_vm {
            ApplyOperation::Create
        } else {
            ApplyOperation::Reconcile
        };
        let entry = match &execution.failure {
            None => ApplyHistoryEntry::succeeded(operation, &config_hash, plan.len()),
            Some(failure) => ApplyHistoryEntry::failed(
                operation,
                &config_hash,
                plan.len(),
                failure.failed_index(),
                &failure.to_string(),
            ),
        };
        record.set_observed(apply_locally(&observed, &execution.executed));
        record.add_history(entry);
        self.state_store.save(&record).await?;

        Ok(ApplyReport {
            vm_ref,
            vm_uuid,
            created_vm,
            plan,
            failed_index: execution.failure.as_ref().map(ExecutionError::failed_index),
            error: execution.failure.as_ref().map(ToString::to_string),
            executed: execution.executed,
            failure: execution.failure,
        })
    }

    /// Reports the VM, pending changes and cached history.
    ///
    /// # Errors
    ///
    /// Returns an error if the state or the host cannot be read.
    pub async fn status(&self) -> Result<StatusReport> {
        let record = self.load_record().await?;
        let config_hash = self.hasher.hash_config(self.config);
        let vm_ref = self.locate(&record).await?;

        let (vm_uuid, power_state, observed, pending_operations) = match &vm_ref {
            Some(vm_ref) => {
                let power_state = self.host.power_state(vm_ref).await?;
                let observed = self.host.get_record(vm_ref).await?;
                let pending = self
                    .planner
                    .plan(&self.config.desired_state(), &observed)
                    .map_or_else(
                        |e| {
                            warn!("Current configuration cannot be planned: {e}");
                            0
                        },
                        |plan| plan.len(),
                    );
                (
                    Some(self.host.vm_uuid(vm_ref).await?),
                    Some(power_state),
                    Some(observed),
                    pending,
                )
            }
            None => (None, None, None, 0),
        };

        Ok(StatusReport {
            name_label: self.config.vm.name_label.clone(),
            power_state,
            vm_ref,
            vm_uuid,
            observed,
            pending_operations,
            config_changed: record.is_drifted(&config_hash),
            config_hash,
            last_run: record.last_run().cloned(),
            lock: self.state_store.get_lock_info().await?,
        })
    }

    /// Destroys the VM together with its VBDs and VIFs. VDIs are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held or a host call fails.
    pub async fn destroy(&self) -> Result<DestroyReport> {
        self.locked("destroy", self.destroy_unlocked()).await
    }

    async fn destroy_unlocked(&self) -> Result<DestroyReport> {
        let mut record = self.load_record().await?;
        let vm_ref = self.locate(&record).await?;

        let Some(vm_ref) = vm_ref else {
            info!("VM {} does not exist, nothing to destroy", self.config.vm.name_label);
            return Ok(DestroyReport {
                name_label: self.config.vm.name_label.clone(),
                vm_ref: None,
            });
        };

        self.host.destroy_vm(&vm_ref).await?;

        let config_hash = self.hasher.hash_config(self.config);
        record.clear_vm();
        record.add_history(ApplyHistoryEntry::succeeded(ApplyOperation::Destroy, &config_hash, 0));
        self.state_store.save(&record).await?;

        Ok(DestroyReport {
            name_label: self.config.vm.name_label.clone(),
            vm_ref: Some(vm_ref),
        })
    }
}

impl ApplyReport {
    /// Returns true if every planned operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.is_success() { "successful" } else { "failed" };
        writeln!(f, "Apply {status}:")?;
        writeln!(f, "  VM: {} ({})", self.vm_uuid, self.vm_ref)?;
        if self.created_vm {
            writeln!(f, "  Cloned from template")?;
        }
        writeln!(f, "  Completed: {}/{}", self.executed.len(), self.plan.len())?;
        if let Some(error) = &self.error {
            writeln!(f, "  Error: {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::{PlanError, StateError, XenVmError};
    use crate::model::{MemoryLimits, TEMPLATE_NAME_KEY, VcpuCount};
    use crate::state::LocalStateStore;
    use crate::testing::FakeXenApi;
    use tempfile::TempDir;

    const YAML: &str = r"
vm:
  name_label: web-1
  template_name: Debian
  vcpus: 4
  memory:
    static_max: 2GiB
  other_config:
    role: web
  hard_drives:
    - vdi_uuid: 3c4a1f6e-8b2d-4e9a-a1c3-5d7f9b1e3a01
      bootable: true
  network_interfaces:
    - network_uuid: 7e2b9d4c-1a3f-4b5e-8c6d-0f1e2d3c4b5a
";

    fn template() -> ParentState {
        ParentState {
            name_label: String::from("Debian Bookworm 12"),
            vcpus: VcpuCount::uniform(1),
            memory: MemoryLimits::fixed(1 << 30),
            ..ParentState::default()
        }
    }

    fn setup() -> (VmDeployConfig, LocalStateStore, TempDir) {
        let config = ConfigParser::new().parse_yaml(YAML, None).unwrap();
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_state_path(dir.path().join("state.json"));
        (config, store, dir)
    }

    #[tokio::test]
    async fn test_apply_clones_then_converges() {
        let (config, store, _dir) = setup();
        let host = FakeXenApi::without_vm(template());
        let reconciler = Reconciler::new(&config, &store, &host);

        let plan = reconciler.plan().await.unwrap();
        assert_eq!(plan.vm_ref, None);
        assert!(plan.plan.is_empty());

        let report = reconciler.apply().await.unwrap();
        assert!(report.is_success(), "{:?}", report.error);
        assert!(report.created_vm);
        assert!(host.calls().contains(&String::from("VM.clone")));

        let replan = reconciler.plan().await.unwrap();
        assert_eq!(replan.vm_ref.as_deref(), Some(FakeXenApi::VM_REF));
        assert!(replan.plan.is_empty(), "{}", replan.plan);

        let record = store.load().await.unwrap().unwrap();
        assert_eq!(record.vm_uuid.as_deref(), Some(FakeXenApi::VM_UUID));
        assert_eq!(record.last_run().unwrap().operation, ApplyOperation::Create);
        assert!(store.get_lock_info().await.unwrap().is_none());

        // The cached snapshot also re-plans to empty
        let cached = record.observed.unwrap();
        assert!(
            OrderedMutationPlanner::new()
                .plan(&config.desired_state(), &cached)
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_apply_records_template_and_inserts_iso() {
        let (mut config, store, _dir) = setup();
        config.vm.cdrom = Some(String::from("debian-12.iso"));
        let host = FakeXenApi::without_vm(template()).with_iso("debian-12.iso");
        let reconciler = Reconciler::new(&config, &store, &host);

        let report = reconciler.apply().await.unwrap();
        assert!(report.is_success(), "{:?}", report.error);

        let vm = host.get_record_now();
        assert_eq!(vm.inserted_iso(), Some("debian-12.iso"));
        assert_eq!(
            vm.other_config.raw.get(TEMPLATE_NAME_KEY).map(String::as_str),
            Some("Debian")
        );
        assert!(reconciler.plan().await.unwrap().plan.is_empty());
    }

    #[tokio::test]
    async fn test_second_apply_is_noop() {
        let (config, store, _dir) = setup();
        let host = FakeXenApi::without_vm(template());
        let reconciler = Reconciler::new(&config, &store, &host);

        reconciler.apply().await.unwrap();
        let calls_after_first = host.calls().len();

        let report = reconciler.apply().await.unwrap();
        assert!(!report.created_vm);
        assert!(report.plan.is_empty());
        assert_eq!(host.calls().len(), calls_after_first);

        let status = reconciler.status().await.unwrap();
        assert_eq!(status.pending_operations, 0);
        assert!(!status.config_changed);
        assert_eq!(status.power_state, Some(PowerState::Halted));
    }

    #[tokio::test]
    async fn test_failed_apply_records_partial_run() {
        let (config, store, _dir) = setup();
        let host = FakeXenApi::without_vm(template()).failing_on("VIF.create");
        let reconciler = Reconciler::new(&config, &store, &host);

        let report = reconciler.apply().await.unwrap();
        assert!(!report.is_success());
        let failed_index = report.failed_index.unwrap();
        assert_eq!(report.executed.len(), failed_index);

        let record = store.load().await.unwrap().unwrap();
        let last = record.last_run().unwrap();
        assert_eq!(last.failed_index, Some(failed_index));
        assert!(record.config_hash.is_empty());

        let status = reconciler.status().await.unwrap();
        assert!(status.config_changed);
        assert!(status.pending_operations > 0);
    }

    #[tokio::test]
    async fn test_planning_error_leaves_host_untouched() {
        let (mut config, store, _dir) = setup();
        config.vm.cores_per_socket = Some(3);
        let host = FakeXenApi::new(template()).named("web-1");
        let reconciler = Reconciler::new(&config, &store, &host);

        let err = reconciler.apply().await.unwrap_err();
        assert!(matches!(
            err,
            XenVmError::Plan(PlanError::TopologyConstraintViolation { .. })
        ));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_refuses_when_locked() {
        let (config, store, _dir) = setup();
        let host = FakeXenApi::without_vm(template());
        store.acquire_lock("someone-else", "apply").await.unwrap();

        let err = Reconciler::new(&config, &store, &host).apply().await.unwrap_err();
        assert!(matches!(err, XenVmError::State(StateError::LockedByOther { .. })));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_forgets_vm() {
        let (config, store, _dir) = setup();
        let host = FakeXenApi::without_vm(template());
        let reconciler = Reconciler::new(&config, &store, &host);
        reconciler.apply().await.unwrap();

        let report = reconciler.destroy().await.unwrap();
        assert_eq!(report.vm_ref.as_deref(), Some(FakeXenApi::VM_REF));

        let record = store.load().await.unwrap().unwrap();
        assert_eq!(record.vm_uuid, None);
        assert_eq!(record.history.len(), 2);

        let again = reconciler.destroy().await.unwrap();
        assert_eq!(again.vm_ref, None);
    }
}
