//! Clone-and-customize workflow.
//!
//! [`Provisioner::provision`] runs one [`ProvisioningSpec`] through a fixed
//! sequence of stages:
//!
//! ```text
//! Resolving → Cloning → AwaitingClone
//!           → Reconfiguring(memory) → Awaiting(memory)
//!           → Reconfiguring(disk)   → Awaiting(disk)
//!           → Reconfiguring(nic)    → Awaiting(nic)
//!           → Done
//! ```
//!
//! Hardware steps the request leaves out are skipped. At most one task is
//! in flight at a time and the first failure ends the run; changes already
//! applied by earlier tasks stay in place.

use crate::client::ControlPlane;
use crate::devices;
use crate::error::{VsphereError, VsphereResult};
use crate::inventory::{folder_inventory_path, vm_inventory_path, InventoryResolver};
use crate::task::TaskPoller;
use crate::types::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Stages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reconfiguration steps, in the order they run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReconfigStep {
    Memory,
    Disk,
    Nic,
}

impl ReconfigStep {
    pub const ALL: [ReconfigStep; 3] = [Self::Memory, Self::Disk, Self::Nic];

    /// Whether the request asks for this step.
    pub fn requested_by(self, spec: &ProvisioningSpec) -> bool {
        match self {
            Self::Memory => spec.memory_mb.is_some(),
            Self::Disk => spec.disk.is_some(),
            Self::Nic => spec.nic.is_some(),
        }
    }
}

impl fmt::Display for ReconfigStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Nic => "nic",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProvisionStage {
    Resolving,
    Cloning,
    AwaitingClone,
    Reconfiguring(ReconfigStep),
    Awaiting(ReconfigStep),
    Done,
    Failed,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolving => write!(f, "resolving"),
            Self::Cloning => write!(f, "cloning"),
            Self::AwaitingClone => write!(f, "awaiting clone"),
            Self::Reconfiguring(step) => write!(f, "reconfiguring {step}"),
            Self::Awaiting(step) => write!(f, "awaiting {step}"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageTransition {
    pub stage: ProvisionStage,
    pub at: DateTime<Utc>,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningReport {
    pub vm: InventoryRef,
    pub transitions: Vec<StageTransition>,
    /// Task ids in submission order (clone first)
    pub task_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProvisioningReport {
    pub fn stages(&self) -> Vec<ProvisionStage> {
        self.transitions.iter().map(|t| t.stage).collect()
    }
}

/// Why and where a run stopped.
#[derive(Debug, Clone)]
pub struct ProvisionFailure {
    /// Last stage entered before the failure
    pub stage: ProvisionStage,
    pub error: VsphereError,
    /// The new VM, if the clone got that far
    pub vm: Option<InventoryRef>,
    pub task_ids: Vec<String>,
}

impl fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Provisioning failed while {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for ProvisionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Bookkeeping for one run.
struct RunLog {
    started_at: DateTime<Utc>,
    stage: ProvisionStage,
    transitions: Vec<StageTransition>,
    task_ids: Vec<String>,
    vm: Option<InventoryRef>,
}

impl RunLog {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            stage: ProvisionStage::Resolving,
            transitions: Vec::new(),
            task_ids: Vec::new(),
            vm: None,
        }
    }

    fn enter(&mut self, stage: ProvisionStage) {
        log::debug!("Provisioning stage: {stage}");
        self.stage = stage;
        self.transitions.push(StageTransition { stage, at: Utc::now() });
    }

    fn finish(mut self, vm: InventoryRef) -> ProvisioningReport {
        self.enter(ProvisionStage::Done);
        ProvisioningReport {
            vm,
            transitions: self.transitions,
            task_ids: self.task_ids,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    fn fail(mut self, error: VsphereError) -> ProvisionFailure {
        let stage = self.stage;
        self.enter(ProvisionStage::Failed);
        log::error!("Provisioning failed while {stage}: {error}");
        ProvisionFailure { stage, error, vm: self.vm, task_ids: self.task_ids }
    }
}

/// Placement targets resolved before anything is submitted.
#[derive(Debug, Clone)]
struct Placement {
    datacenter: InventoryRef,
    folder: InventoryRef,
    /// `<dc>/vm[/<folder>]`, normalized
    folder_path: String,
    template: InventoryRef,
    datastore: InventoryRef,
    pool: InventoryRef,
    network: Option<InventoryRef>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Provisioner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Provisioner<'a> {
    client: &'a dyn ControlPlane,
    poll: PollConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(client: &'a dyn ControlPlane, poll: PollConfig) -> Self {
        Self { client, poll }
    }

    /// Clone `spec.template` into a new VM and apply the requested memory,
    /// disk and NIC changes.
    ///
    /// Placement fallbacks when a name is `None`:
    /// - datacenter, cluster: first one enumerated
    /// - folder: the datacenter's root VM folder (`<dc>/vm`); a given folder
    ///   is a path below it, e.g. `Team/Sims`
    /// - datastore: the template's first datastore
    /// - resource pool: the cluster's root pool
    ///
    /// Datastore, cluster and network names are looked up inside the
    /// resolved datacenter. Every lookup happens before the clone is
    /// submitted, so a resolution error leaves the inventory untouched.
    /// Nothing is submitted once `cancel` has fired.
    pub async fn provision(
        &self,
        spec: &ProvisioningSpec,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningReport, ProvisionFailure> {
        let mut run = RunLog::start();
        run.enter(ProvisionStage::Resolving);
        log::info!("Provisioning VM '{}' from template '{}'", spec.vm_name, spec.template);

        match self.drive(spec, cancel, &mut run).await {
            Ok(vm) => {
                log::info!("VM '{}' provisioned ({})", vm.name, vm.id);
                Ok(run.finish(vm))
            }
            Err(e) => Err(run.fail(e)),
        }
    }

    async fn drive(
        &self,
        spec: &ProvisioningSpec,
        cancel: &CancellationToken,
        run: &mut RunLog,
    ) -> VsphereResult<InventoryRef> {
        validate(spec)?;
        let resolver = InventoryResolver::new(self.client);
        let poller = TaskPoller::new(self.client, self.poll.clone());
        let placement = self.resolve_placement(&resolver, spec).await?;

        // ── Clone ──
        run.enter(ProvisionStage::Cloning);
        let clone = CloneSpec {
            template: placement.template.clone(),
            folder: placement.folder.clone(),
            name: spec.vm_name.clone(),
            location: RelocateSpec {
                datastore: placement.datastore.clone(),
                pool: placement.pool.clone(),
            },
            power_on: spec.power_on,
        };
        ensure_not_cancelled(cancel)?;
        let deadline = poller.deadline_from_now();
        let handle = self.client.submit_clone(&clone).await?;
        run.task_ids.push(handle.id.clone());
        log::info!(
            "Cloning '{}' to '{}' on datastore '{}' (task {})",
            clone.template.name,
            clone.name,
            clone.location.datastore.name,
            handle.id
        );

        run.enter(ProvisionStage::AwaitingClone);
        let cloned = poller.wait_for_task(&handle, deadline, cancel).await?;
        run.vm = cloned.clone();

        // ── Reconfigure ──
        let vm_path = vm_inventory_path(&placement.folder_path, &spec.vm_name);
        let mut located: Option<InventoryRef> = None;

        for step in ReconfigStep::ALL {
            if !step.requested_by(spec) {
                continue;
            }
            run.enter(ProvisionStage::Reconfiguring(step));

            let vm = match located.take() {
                Some(vm) => vm,
                None => {
                    let vm = resolver.resolve_by_path(&vm_path).await?;
                    log::debug!("Located '{}' at {}", vm.id, vm_path);
                    run.vm = Some(vm.clone());
                    vm
                }
            };

            let current = self.client.list_devices(&vm).await?;
            let patch = plan_step(step, spec, &current, &placement)?;

            ensure_not_cancelled(cancel)?;
            let deadline = poller.deadline_from_now();
            let handle = self.client.submit_reconfigure(&vm, &patch).await?;
            run.task_ids.push(handle.id.clone());
            log::info!("Reconfiguring {} of '{}' (task {})", step, vm.name, handle.id);

            run.enter(ProvisionStage::Awaiting(step));
            poller.wait_for_task(&handle, deadline, cancel).await?;
            located = Some(vm);
        }

        match located.or(cloned) {
            Some(vm) => Ok(vm),
            None => resolver.resolve_by_path(&vm_path).await,
        }
    }

    async fn resolve_placement(
        &self,
        resolver: &InventoryResolver<'_>,
        spec: &ProvisioningSpec,
    ) -> VsphereResult<Placement> {
        let datacenter = resolver
            .resolve_opt(InventoryKind::Datacenter, spec.datacenter.as_deref())
            .await?;

        // Addressed by path so the post-clone lookup uses the same string.
        let folder_path = folder_inventory_path(&datacenter.name, spec.folder.as_deref());
        let folder = resolver.resolve_by_path(&folder_path).await?;

        let template = resolver
            .resolve(InventoryKind::VirtualMachine, &spec.template)
            .await?;

        let datastore = match spec.datastore.as_deref().filter(|d| !d.is_empty()) {
            Some(name) => {
                resolver
                    .resolve_in(InventoryKind::Datastore, name, Some(&datacenter))
                    .await?
            }
            None => resolver.resolve_in(InventoryKind::Datastore, "", Some(&template)).await?,
        };

        let cluster = resolver
            .resolve_in(
                InventoryKind::Cluster,
                spec.cluster.as_deref().unwrap_or_default(),
                Some(&datacenter),
            )
            .await?;
        let pool = resolver
            .resolve_in(
                InventoryKind::ResourcePool,
                spec.resource_pool.as_deref().unwrap_or_default(),
                Some(&cluster),
            )
            .await?;

        let network = match &spec.nic {
            Some(nic) => Some(
                resolver
                    .resolve_in(InventoryKind::Network, &nic.network, Some(&datacenter))
                    .await?,
            ),
            None => None,
        };

        log::debug!(
            "Placement: datacenter '{}', folder '{}', datastore '{}', cluster '{}', pool '{}'",
            datacenter.name,
            folder.name,
            datastore.name,
            cluster.name,
            pool.name
        );

        Ok(Placement { datacenter, folder, folder_path, template, datastore, pool, network })
    }

    /// Connect, disconnect or delete "Network adapter `nic_number`" on the
    /// VM at `vm_path` and wait for the change to finish.
    pub async fn set_nic_state(
        &self,
        vm_path: &str,
        nic_number: u32,
        state: NicState,
        cancel: &CancellationToken,
    ) -> VsphereResult<TaskHandle> {
        let resolver = InventoryResolver::new(self.client);
        let poller = TaskPoller::new(self.client, self.poll.clone());

        let vm = resolver.resolve_by_path(vm_path).await?;
        let current = self.client.list_devices(&vm).await?;
        let change = devices::plan_nic_edit(&current, nic_number, state)?;

        ensure_not_cancelled(cancel)?;
        let deadline = poller.deadline_from_now();
        let handle = self
            .client
            .submit_reconfigure(&vm, &ConfigPatch::with_device_change(change))
            .await?;
        log::info!(
            "Setting network adapter {} of '{}' to {:?} (task {})",
            nic_number,
            vm.name,
            state,
            handle.id
        );
        poller.wait_for_task(&handle, deadline, cancel).await?;
        Ok(handle)
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> VsphereResult<()> {
    if cancel.is_cancelled() {
        return Err(VsphereError::cancelled("Cancelled before the next task was submitted"));
    }
    Ok(())
}

fn validate(spec: &ProvisioningSpec) -> VsphereResult<()> {
    if spec.template.trim().is_empty() {
        return Err(VsphereError::invalid_spec("Template name must not be empty"));
    }
    if spec.vm_name.trim().is_empty() {
        return Err(VsphereError::invalid_spec("VM name must not be empty"));
    }
    if spec.memory_mb == Some(0) {
        return Err(VsphereError::invalid_spec("Memory size must be greater than 0 MB"));
    }
    if spec.disk.as_ref().is_some_and(|d| d.size_gb == 0) {
        return Err(VsphereError::invalid_spec("Disk size must be greater than 0 GB"));
    }
    if spec.disk.as_ref().is_some_and(|d| d.size_gb.checked_mul(devices::KB_PER_GB).is_none()) {
        return Err(VsphereError::invalid_spec("Disk size is too large"));
    }
    Ok(())
}

fn plan_step(
    step: ReconfigStep,
    spec: &ProvisioningSpec,
    current: &[VirtualDevice],
    placement: &Placement,
) -> VsphereResult<ConfigPatch> {
    let missing = || VsphereError::invalid_spec(format!("No {step} change requested"));
    match step {
        ReconfigStep::Memory => spec
            .memory_mb
            .map(devices::plan_memory_resize)
            .ok_or_else(missing),
        ReconfigStep::Disk => {
            let disk = spec.disk.as_ref().ok_or_else(missing)?;
            let change = devices::plan_disk_add(current, disk.size_gb, disk.provisioning)?;
            Ok(ConfigPatch::with_device_change(change))
        }
        ReconfigStep::Nic => {
            let nic = spec.nic.as_ref().ok_or_else(missing)?;
            let network = placement.network.as_ref().ok_or_else(missing)?;
            let change = devices::plan_nic_add(network, &nic.mac_address, nic.adapter);
            Ok(ConfigPatch::with_device_change(change))
        }
    }
}
