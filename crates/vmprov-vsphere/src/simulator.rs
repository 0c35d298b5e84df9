//! In-memory control plane.
//!
//! Models just enough of a vCenter inventory (datacenters, VM folders,
//! clusters with their root resource pool, datastores, networks, VMs with
//! device lists) and task lifecycle to drive the provisioning core without
//! a server. Used by the unit tests and for offline dry runs.

use crate::client::ControlPlane;
use crate::error::{VsphereError, VsphereResult};
use crate::inventory::normalize_path;
use crate::types::*;

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Task scripting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a task ends once its non-terminal polls are used up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Error(String),
    /// Stays `running` forever
    Never,
}

/// Scripted behaviour of one submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBehavior {
    /// Number of polls answered with `queued` / `running` before the outcome
    pub pending_polls: usize,
    pub outcome: TaskOutcome,
}

impl Default for TaskBehavior {
    fn default() -> Self {
        Self { pending_polls: 1, outcome: TaskOutcome::Success }
    }
}

/// A mutating call received by the simulator, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Clone { task_id: String, spec: CloneSpec },
    Reconfigure { task_id: String, vm: InventoryRef, patch: ConfigPatch },
}

impl Submission {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Clone { task_id, .. } | Self::Reconfigure { task_id, .. } => task_id,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Internal state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct Node {
    obj: InventoryRef,
    parent: Option<String>,
    /// `None` for objects not (yet) visible through the search index
    path: Option<String>,
    /// Datastore ids (VMs only)
    datastores: Vec<String>,
    devices: Vec<VirtualDevice>,
    memory_mb: u64,
}

#[derive(Debug)]
enum Effect {
    Clone(CloneSpec),
    Reconfigure(InventoryRef, ConfigPatch),
}

#[derive(Debug)]
struct TaskRecord {
    pending: VecDeque<TaskState>,
    outcome: TaskOutcome,
    effect: Option<Effect>,
    finished: Option<TaskInfo>,
    polls: usize,
}

#[derive(Debug, Default)]
struct SimState {
    nodes: Vec<Node>,
    next_id: u64,
    tasks: HashMap<String, TaskRecord>,
    behaviors: HashMap<usize, TaskBehavior>,
    submissions: Vec<Submission>,
    /// Unfinished tasks at the moment each submission arrived
    outstanding: Vec<usize>,
    stale_reads: bool,
}

impl SimState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.obj.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.obj.id == id)
    }

    fn path_of(&self, id: &str) -> String {
        self.node(id).and_then(|n| n.path.clone()).unwrap_or_default()
    }

    fn insert(
        &mut self,
        prefix: &str,
        name: &str,
        kind: InventoryKind,
        parent: Option<&str>,
        path: String,
    ) -> InventoryRef {
        let id = self.next_id(prefix);
        let obj = InventoryRef::new(id, name, kind);
        self.nodes.push(Node {
            obj: obj.clone(),
            parent: parent.map(str::to_string),
            path: Some(path),
            datastores: Vec::new(),
            devices: Vec::new(),
            memory_mb: 0,
        });
        obj
    }

    fn is_descendant(&self, id: &str, ancestor: &str) -> bool {
        let mut cur = self.node(id).and_then(|n| n.parent.clone());
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.node(&p).and_then(|n| n.parent.clone());
        }
        false
    }

    fn vm_folder_of(&self, datacenter_id: &str) -> Option<String> {
        self.nodes
            .iter()
            .find(|n| {
                n.obj.kind == InventoryKind::Folder
                    && n.parent.as_deref() == Some(datacenter_id)
                    && n.obj.name == "vm"
            })
            .map(|n| n.obj.id.clone())
    }

    fn apply(&mut self, effect: Effect) -> VsphereResult<Option<InventoryRef>> {
        match effect {
            Effect::Clone(spec) => {
                let template = self
                    .node(&spec.template.id)
                    .cloned()
                    .ok_or_else(|| VsphereError::not_found("Template vanished"))?;
                let folder_path = self.path_of(&spec.folder.id);
                let path = (!self.stale_reads).then(|| format!("{folder_path}/{}", spec.name));
                let id = self.next_id("vm-");
                let obj = InventoryRef::new(id, spec.name.clone(), InventoryKind::VirtualMachine);
                self.nodes.push(Node {
                    obj: obj.clone(),
                    parent: Some(spec.folder.id.clone()),
                    path,
                    datastores: vec![spec.location.datastore.id.clone()],
                    devices: template.devices.clone(),
                    memory_mb: template.memory_mb,
                });
                Ok(Some(obj))
            }
            Effect::Reconfigure(vm, patch) => {
                let node = self
                    .node_mut(&vm.id)
                    .ok_or_else(|| VsphereError::not_found(format!("VM '{}' vanished", vm.name)))?;
                if let Some(mb) = patch.memory_mb {
                    node.memory_mb = mb;
                }
                for change in patch.device_change {
                    apply_device_change(&vm.name, &mut node.devices, change)?;
                }
                Ok(None)
            }
        }
    }
}

fn apply_device_change(
    vm_name: &str,
    devices: &mut Vec<VirtualDevice>,
    change: DeviceChangeSpec,
) -> VsphereResult<()> {
    let mut device = change.device;
    match change.operation {
        DeviceOperation::Add => {
            device.key = devices.iter().map(|d| d.key).max().unwrap_or(0) + 1;
            let ordinal = |pred: fn(&VirtualDevice) -> bool| {
                devices.iter().filter(|d| pred(d)).count() + 1
            };
            match &mut device.kind {
                DeviceKind::Disk { backing, .. } => {
                    let n = ordinal(|d| matches!(d.kind, DeviceKind::Disk { .. }));
                    device.label = format!("Hard disk {n}");
                    if backing.file_name.is_empty() {
                        backing.file_name = format!("[datastore] {vm_name}/{vm_name}_{}.vmdk", n - 1);
                    }
                }
                DeviceKind::Ethernet { .. } => {
                    let n = ordinal(VirtualDevice::is_ethernet);
                    device.label = format!("Network adapter {n}");
                }
                DeviceKind::ScsiController { .. }
                | DeviceKind::Cdrom { .. }
                | DeviceKind::Other { .. } => {}
            }
            devices.push(device);
        }
        DeviceOperation::Edit => {
            let slot = devices
                .iter_mut()
                .find(|d| d.key == device.key)
                .ok_or_else(|| VsphereError::device_not_found(format!("No device with key {}", device.key)))?;
            *slot = device;
        }
        DeviceOperation::Remove => {
            let before = devices.len();
            devices.retain(|d| d.key != device.key);
            if devices.len() == before {
                return Err(VsphereError::device_not_found(format!(
                    "No device with key {}",
                    device.key
                )));
            }
        }
    }
    Ok(())
}

/// Devices every simulated VM starts with: one SCSI controller, one disk,
/// an empty CD-ROM and one E1000 adapter.
fn default_devices(vm_name: &str, datastore: Option<&str>) -> Vec<VirtualDevice> {
    let ds = datastore.unwrap_or("datastore1");
    vec![
        VirtualDevice {
            key: 1000,
            label: "SCSI controller 0".into(),
            summary: "LSI Logic".into(),
            unit_number: Some(3),
            controller_key: Some(100),
            connectable: None,
            kind: DeviceKind::ScsiController { bus_number: 0 },
        },
        VirtualDevice {
            key: 2000,
            label: "Hard disk 1".into(),
            summary: "16,777,216 KB".into(),
            unit_number: Some(0),
            controller_key: Some(1000),
            connectable: None,
            kind: DeviceKind::Disk {
                backing: DiskBacking {
                    file_name: format!("[{ds}] {vm_name}/{vm_name}.vmdk"),
                    disk_mode: "persistent".into(),
                    thin_provisioned: false,
                },
                capacity_kb: 16 * 1024 * 1024,
            },
        },
        VirtualDevice {
            key: 3002,
            label: "CD/DVD drive 1".into(),
            summary: "Remote device".into(),
            unit_number: Some(0),
            controller_key: Some(201),
            connectable: None,
            kind: DeviceKind::Cdrom { iso_file: None },
        },
        VirtualDevice {
            key: 4000,
            label: "Network adapter 1".into(),
            summary: "VM Network".into(),
            unit_number: Some(7),
            controller_key: Some(100),
            connectable: Some(ConnectInfo {
                start_connected: true,
                allow_guest_control: true,
                connected: true,
                status: "ok".into(),
            }),
            kind: DeviceKind::Ethernet {
                adapter: NicAdapterType::E1000,
                mac_address: Some("00:50:56:aa:bb:01".into()),
                address_type: MacAddressType::Generated,
                backing: NetworkBacking {
                    network: None,
                    device_name: "VM Network".into(),
                    use_auto_detect: false,
                },
                wake_on_lan_enabled: true,
            },
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Public simulator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully in-memory control plane useful for unit tests and dry runs.
#[derive(Debug, Default)]
pub struct SimulatedControlPlane {
    state: Mutex<SimState>,
    poll_latency: Mutex<Option<Duration>>,
}

impl SimulatedControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Inventory building ──────────────────────────────────────────

    /// Add a datacenter together with its root VM folder.
    pub fn add_datacenter(&self, name: &str) -> InventoryRef {
        let mut st = self.state();
        let dc = st.insert("datacenter-", name, InventoryKind::Datacenter, None, name.to_string());
        st.insert("group-v", "vm", InventoryKind::Folder, Some(dc.id.as_str()), format!("{name}/vm"));
        dc
    }

    /// Add a VM folder directly below the datacenter's root VM folder.
    pub fn add_folder(&self, datacenter: &InventoryRef, name: &str) -> InventoryRef {
        let mut st = self.state();
        let parent = st.vm_folder_of(&datacenter.id).unwrap_or_else(|| datacenter.id.clone());
        let path = format!("{}/{name}", st.path_of(&parent));
        st.insert("group-v", name, InventoryKind::Folder, Some(parent.as_str()), path)
    }

    /// Add a VM folder inside `parent`.
    pub fn add_subfolder(&self, parent: &InventoryRef, name: &str) -> InventoryRef {
        let mut st = self.state();
        let path = format!("{}/{name}", st.path_of(&parent.id));
        st.insert("group-v", name, InventoryKind::Folder, Some(parent.id.as_str()), path)
    }

    /// Add a cluster together with its root resource pool ("Resources").
    pub fn add_cluster(&self, datacenter: &InventoryRef, name: &str) -> InventoryRef {
        let mut st = self.state();
        let path = format!("{}/host/{name}", st.path_of(&datacenter.id));
        let cluster = st.insert("domain-c", name, InventoryKind::Cluster, Some(datacenter.id.as_str()), path);
        let pool_path = format!("{}/host/{name}/Resources", st.path_of(&datacenter.id));
        st.insert("resgroup-", "Resources", InventoryKind::ResourcePool, Some(cluster.id.as_str()), pool_path);
        cluster
    }

    /// Add a child pool below the cluster's root pool.
    pub fn add_resource_pool(&self, cluster: &InventoryRef, name: &str) -> InventoryRef {
        let mut st = self.state();
        let root = st
            .nodes
            .iter()
            .find(|n| {
                n.obj.kind == InventoryKind::ResourcePool
                    && n.parent.as_deref() == Some(cluster.id.as_str())
            })
            .map(|n| n.obj.id.clone())
            .unwrap_or_else(|| cluster.id.clone());
        let path = format!("{}/{name}", st.path_of(&root));
        st.insert("resgroup-", name, InventoryKind::ResourcePool, Some(root.as_str()), path)
    }

    pub fn add_datastore(&self, datacenter: &InventoryRef, name: &str) -> InventoryRef {
        let mut st = self.state();
        let path = format!("{}/datastore/{name}", st.path_of(&datacenter.id));
        st.insert("datastore-", name, InventoryKind::Datastore, Some(datacenter.id.as_str()), path)
    }

    pub fn add_network(&self, datacenter: &InventoryRef, name: &str) -> InventoryRef {
        let mut st = self.state();
        let path = format!("{}/network/{name}", st.path_of(&datacenter.id));
        st.insert("network-", name, InventoryKind::Network, Some(datacenter.id.as_str()), path)
    }

    /// Add a VM (or template) in `folder`, or the datacenter's root VM
    /// folder when `folder` is `None`. `datastores` are matched by name.
    pub fn add_vm(
        &self,
        datacenter: &InventoryRef,
        folder: Option<&InventoryRef>,
        name: &str,
        datastores: &[&str],
    ) -> InventoryRef {
        let mut st = self.state();
        let parent = match folder {
            Some(f) => f.id.clone(),
            None => st.vm_folder_of(&datacenter.id).unwrap_or_else(|| datacenter.id.clone()),
        };
        let path = format!("{}/{name}", st.path_of(&parent));
        let vm = st.insert("vm-", name, InventoryKind::VirtualMachine, Some(parent.as_str()), path);
        let ds_ids: Vec<String> = datastores
            .iter()
            .filter_map(|ds| {
                st.nodes
                    .iter()
                    .find(|n| n.obj.kind == InventoryKind::Datastore && n.obj.name == *ds)
                    .map(|n| n.obj.id.clone())
            })
            .collect();
        if let Some(node) = st.node_mut(&vm.id) {
            node.devices = default_devices(name, datastores.first().copied());
            node.datastores = ds_ids;
            node.memory_mb = 4096;
        }
        vm
    }

    /// Replace a VM's device list.
    pub fn set_devices(&self, vm: &InventoryRef, devices: Vec<VirtualDevice>) {
        if let Some(node) = self.state().node_mut(&vm.id) {
            node.devices = devices;
        }
    }

    // ── Behaviour knobs ─────────────────────────────────────────────

    /// Script the `index`-th submitted task (0-based, clone included).
    pub fn set_task_behavior(&self, index: usize, behavior: TaskBehavior) {
        self.state().behaviors.insert(index, behavior);
    }

    /// Make the `index`-th submitted task fail with `message`.
    pub fn fail_task(&self, index: usize, message: &str) {
        self.set_task_behavior(
            index,
            TaskBehavior { pending_polls: 1, outcome: TaskOutcome::Error(message.to_string()) },
        );
    }

    /// When set, cloned VMs never become visible to path lookups.
    pub fn set_stale_reads(&self, stale: bool) {
        self.state().stale_reads = stale;
    }

    /// Delay every `poll_task` answer.
    pub fn set_poll_latency(&self, latency: Duration) {
        *self.poll_latency.lock().unwrap_or_else(|e| e.into_inner()) = Some(latency);
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    /// For each submission, how many earlier tasks had not yet been polled
    /// to a terminal state when it arrived.
    pub fn outstanding_at_submit(&self) -> Vec<usize> {
        self.state().outstanding.clone()
    }

    pub fn poll_count(&self, handle: &TaskHandle) -> usize {
        self.state().tasks.get(&handle.id).map(|t| t.polls).unwrap_or(0)
    }

    pub fn devices_of(&self, vm: &InventoryRef) -> Vec<VirtualDevice> {
        self.state().node(&vm.id).map(|n| n.devices.clone()).unwrap_or_default()
    }

    pub fn memory_of(&self, vm: &InventoryRef) -> Option<u64> {
        self.state().node(&vm.id).map(|n| n.memory_mb)
    }

    fn submit(&self, description: String, effect: Effect, submission: impl FnOnce(String) -> Submission) -> TaskHandle {
        let mut st = self.state();
        let index = st.submissions.len();
        let outstanding = st.tasks.values().filter(|t| t.finished.is_none()).count();
        st.outstanding.push(outstanding);
        let behavior = st.behaviors.get(&index).cloned().unwrap_or_default();
        let id = format!("task-{}", uuid::Uuid::new_v4().simple());

        let mut pending = VecDeque::with_capacity(behavior.pending_polls);
        for i in 0..behavior.pending_polls {
            pending.push_back(if i == 0 { TaskState::Queued } else { TaskState::Running });
        }
        st.tasks.insert(
            id.clone(),
            TaskRecord {
                pending,
                outcome: behavior.outcome,
                effect: Some(effect),
                finished: None,
                polls: 0,
            },
        );
        st.submissions.push(submission(id.clone()));
        TaskHandle { id, description }
    }
}

#[async_trait::async_trait]
impl ControlPlane for SimulatedControlPlane {
    async fn submit_clone(&self, spec: &CloneSpec) -> VsphereResult<TaskHandle> {
        if self.state().node(&spec.template.id).is_none() {
            return Err(VsphereError::not_found(format!("Template '{}' not found", spec.template.name)));
        }
        let s = spec.clone();
        Ok(self.submit(
            format!("Clone virtual machine '{}'", spec.name),
            Effect::Clone(spec.clone()),
            move |task_id| Submission::Clone { task_id, spec: s },
        ))
    }

    async fn submit_reconfigure(
        &self,
        vm: &InventoryRef,
        patch: &ConfigPatch,
    ) -> VsphereResult<TaskHandle> {
        if self.state().node(&vm.id).is_none() {
            return Err(VsphereError::not_found(format!("VM '{}' not found", vm.name)));
        }
        let (v, p) = (vm.clone(), patch.clone());
        Ok(self.submit(
            format!("Reconfigure virtual machine '{}'", vm.name),
            Effect::Reconfigure(vm.clone(), patch.clone()),
            move |task_id| Submission::Reconfigure { task_id, vm: v, patch: p },
        ))
    }

    async fn list_devices(&self, vm: &InventoryRef) -> VsphereResult<Vec<VirtualDevice>> {
        self.state()
            .node(&vm.id)
            .map(|n| n.devices.clone())
            .ok_or_else(|| VsphereError::not_found(format!("VM '{}' not found", vm.name)))
    }

    async fn enumerate(
        &self,
        kind: InventoryKind,
        scope: Option<&InventoryRef>,
    ) -> VsphereResult<Vec<InventoryRef>> {
        let st = self.state();
        let Some(scope) = scope else {
            return Ok(st.nodes.iter().filter(|n| n.obj.kind == kind).map(|n| n.obj.clone()).collect());
        };

        if scope.kind == InventoryKind::VirtualMachine && kind == InventoryKind::Datastore {
            let vm = st
                .node(&scope.id)
                .ok_or_else(|| VsphereError::not_found(format!("VM '{}' not found", scope.name)))?;
            return Ok(vm
                .datastores
                .iter()
                .filter_map(|id| st.node(id).map(|n| n.obj.clone()))
                .collect());
        }

        // Datastores and networks hang off the datacenter, so a datacenter
        // scope reaches them through the parent chain too.
        Ok(st
            .nodes
            .iter()
            .filter(|n| n.obj.kind == kind && st.is_descendant(&n.obj.id, &scope.id))
            .map(|n| n.obj.clone())
            .collect())
    }

    async fn resolve_path(&self, path: &str) -> VsphereResult<Vec<InventoryRef>> {
        let path = normalize_path(path);
        Ok(self
            .state()
            .nodes
            .iter()
            .filter(|n| n.path.as_deref() == Some(path.as_str()))
            .map(|n| n.obj.clone())
            .collect())
    }

    async fn poll_task(&self, handle: &TaskHandle) -> VsphereResult<TaskInfo> {
        let latency = *self.poll_latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut st = self.state();
        let record = st
            .tasks
            .get_mut(&handle.id)
            .ok_or_else(|| VsphereError::not_found(format!("Task '{}' not found", handle.id)))?;
        record.polls += 1;

        if let Some(info) = &record.finished {
            return Ok(info.clone());
        }
        if let Some(state) = record.pending.pop_front() {
            return Ok(TaskInfo { state, result: None, error: None, progress: Some(0) });
        }

        let info = match record.outcome.clone() {
            TaskOutcome::Never => {
                return Ok(TaskInfo {
                    state: TaskState::Running,
                    result: None,
                    error: None,
                    progress: Some(50),
                })
            }
            TaskOutcome::Error(msg) => TaskInfo {
                state: TaskState::Error,
                result: None,
                error: Some(msg),
                progress: None,
            },
            TaskOutcome::Success => {
                let effect = record.effect.take();
                let applied = match effect {
                    Some(effect) => st.apply(effect),
                    None => Ok(None),
                };
                match applied {
                    Ok(result) => TaskInfo {
                        state: TaskState::Success,
                        result,
                        error: None,
                        progress: Some(100),
                    },
                    // A change the inventory cannot take fails the task.
                    Err(e) => TaskInfo {
                        state: TaskState::Error,
                        result: None,
                        error: Some(e.message),
                        progress: None,
                    },
                }
            }
        };

        if let Some(record) = st.tasks.get_mut(&handle.id) {
            record.finished = Some(info.clone());
        }
        Ok(info)
    }
}
