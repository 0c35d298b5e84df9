//! Shared types for vSphere provisioning.

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Polling config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Longest per-task time box; larger timeouts are clamped to it.
pub const MAX_TASK_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Longest delay between two polls of the same task.
pub const MAX_POLL_INTERVAL_MS: u64 = 60 * 60 * 1_000;

/// Task polling behaviour (backoff + per-task time box).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    /// Delay before the second poll
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    /// Upper bound for the backoff delay
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    /// Multiplier applied to the delay after every non-terminal poll
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    /// Deadline for a single task, counted from its submission
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

fn default_initial_interval() -> u64 { 500 }
fn default_max_interval() -> u64 { 5_000 }
fn default_backoff_factor() -> u32 { 2 }
fn default_task_timeout() -> u64 { 1_800 }

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            backoff_factor: default_backoff_factor(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Inventory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum InventoryKind {
    Datacenter,
    Folder,
    Datastore,
    Cluster,
    ResourcePool,
    Network,
    VirtualMachine,
}

impl InventoryKind {
    pub const ALL: [InventoryKind; 7] = [
        InventoryKind::Datacenter,
        InventoryKind::Folder,
        InventoryKind::Datastore,
        InventoryKind::Cluster,
        InventoryKind::ResourcePool,
        InventoryKind::Network,
        InventoryKind::VirtualMachine,
    ];
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Datacenter => "datacenter",
            Self::Folder => "folder",
            Self::Datastore => "datastore",
            Self::Cluster => "cluster",
            Self::ResourcePool => "resource pool",
            Self::Network => "network",
            Self::VirtualMachine => "virtual machine",
        };
        f.write_str(s)
    }
}

/// A resolved inventory object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRef {
    /// vSphere managed-object ID (e.g. "vm-42", "datastore-11")
    pub id: String,
    pub name: String,
    pub kind: InventoryKind,
}

impl InventoryRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: InventoryKind) -> Self {
        Self { id: id.into(), name: name.into(), kind }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    /// Only `success` and `error` end a task.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Handle to one in-flight vCenter task (e.g. "task-1207").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskHandle {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// Point-in-time snapshot of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub state: TaskState,
    /// Set on `success` when the task produces an object (clone → new VM)
    #[serde(default)]
    pub result: Option<InventoryRef>,
    /// Remote fault message, set on `error`
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: Option<u8>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Virtual devices
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectInfo {
    pub start_connected: bool,
    pub allow_guest_control: bool,
    pub connected: bool,
    /// "ok" | "recoverableError" | "unrecoverableError" | "untried"
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiskBacking {
    /// Datastore path, e.g. "[ds1] web01/web01_1.vmdk". Empty on create.
    #[serde(default)]
    pub file_name: String,
    pub disk_mode: String,
    #[serde(default)]
    pub thin_provisioned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBacking {
    #[serde(default)]
    pub network: Option<InventoryRef>,
    pub device_name: String,
    #[serde(default)]
    pub use_auto_detect: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NicAdapterType {
    #[default]
    E1000,
    E1000e,
    Vmxnet3,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MacAddressType {
    Assigned,
    Generated,
    Manual,
}

/// Kind-specific part of a virtual device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceKind {
    #[serde(rename_all = "camelCase")]
    Disk {
        backing: DiskBacking,
        capacity_kb: u64,
    },
    #[serde(rename_all = "camelCase")]
    Ethernet {
        adapter: NicAdapterType,
        #[serde(default)]
        mac_address: Option<String>,
        address_type: MacAddressType,
        backing: NetworkBacking,
        #[serde(default)]
        wake_on_lan_enabled: bool,
    },
    #[serde(rename_all = "camelCase")]
    ScsiController { bus_number: u32 },
    #[serde(rename_all = "camelCase")]
    Cdrom {
        #[serde(default)]
        iso_file: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Other { type_name: String },
}

/// One device from a VM's hardware list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDevice {
    pub key: i32,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub unit_number: Option<u32>,
    #[serde(default)]
    pub controller_key: Option<i32>,
    #[serde(default)]
    pub connectable: Option<ConnectInfo>,
    pub kind: DeviceKind,
}

impl VirtualDevice {
    /// Backing file, for devices whose storage lives on a datastore.
    pub fn backing_file(&self) -> Option<&str> {
        match &self.kind {
            DeviceKind::Disk { backing, .. } => Some(backing.file_name.as_str()),
            DeviceKind::Cdrom { iso_file } => iso_file.as_deref(),
            DeviceKind::Ethernet { .. }
            | DeviceKind::ScsiController { .. }
            | DeviceKind::Other { .. } => None,
        }
    }

    pub fn is_ethernet(&self) -> bool {
        matches!(self.kind, DeviceKind::Ethernet { .. })
    }

    pub fn is_scsi_controller(&self) -> bool {
        matches!(self.kind, DeviceKind::ScsiController { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Reconfiguration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceOperation {
    Add,
    Edit,
    Remove,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Create,
    Destroy,
    Replace,
}

/// Add / edit / remove request for a single device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceChangeSpec {
    pub operation: DeviceOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_operation: Option<FileOperation>,
    pub device: VirtualDevice,
}

/// VM configuration patch (subset of vSphere `VirtualMachineConfigSpec`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_change: Vec<DeviceChangeSpec>,
}

impl ConfigPatch {
    pub fn with_device_change(change: DeviceChangeSpec) -> Self {
        Self { memory_mb: None, device_change: vec![change] }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Clone
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelocateSpec {
    pub datastore: InventoryRef,
    pub pool: InventoryRef,
}

/// Clone request for `VirtualMachine.CloneVM_Task`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloneSpec {
    pub template: InventoryRef,
    pub folder: InventoryRef,
    pub name: String,
    pub location: RelocateSpec,
    #[serde(default)]
    pub power_on: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Provisioning request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiskProvisioning {
    Thin,
    #[default]
    Thick,
}

/// Desired connection state for an existing NIC.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NicState {
    Connect,
    Disconnect,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiskRequest {
    pub size_gb: u64,
    #[serde(default)]
    pub provisioning: DiskProvisioning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NicRequest {
    /// Network (port group) name
    pub network: String,
    /// Written to the adapter as given, e.g. "de:ed:04:04:04:04"
    pub mac_address: String,
    #[serde(default)]
    pub adapter: NicAdapterType,
}

/// Everything needed to clone and reconfigure one VM.
///
/// Placement names left as `None` fall back as described on
/// [`crate::provision::Provisioner::provision`]. Hardware fields left as
/// `None` skip the matching reconfiguration step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningSpec {
    /// Source template / VM name
    pub template: String,
    /// Name of the VM to create
    pub vm_name: String,
    #[serde(default)]
    pub datacenter: Option<String>,
    /// Folder path below `<datacenter>/vm`, e.g. "Simulators" or "Team/Sims"
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub datastore: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub resource_pool: Option<String>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub disk: Option<DiskRequest>,
    #[serde(default)]
    pub nic: Option<NicRequest>,
    #[serde(default)]
    pub power_on: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_task_state_is_not_terminal() {
        let info: TaskInfo = serde_json::from_str(r#"{"state":"paused"}"#).unwrap();
        assert_eq!(info.state, TaskState::Unknown);
        assert!(!info.state.is_terminal());
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Error.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
    }

    #[test]
    fn backing_file_by_kind() {
        let disk = VirtualDevice {
            key: 2000,
            label: "Hard disk 1".into(),
            summary: String::new(),
            unit_number: Some(0),
            controller_key: Some(1000),
            connectable: None,
            kind: DeviceKind::Disk {
                backing: DiskBacking {
                    file_name: "[ds1] web01/web01.vmdk".into(),
                    disk_mode: "persistent".into(),
                    thin_provisioned: false,
                },
                capacity_kb: 1024,
            },
        };
        assert_eq!(disk.backing_file(), Some("[ds1] web01/web01.vmdk"));

        let empty_cdrom = VirtualDevice {
            kind: DeviceKind::Cdrom { iso_file: None },
            ..disk.clone()
        };
        assert_eq!(empty_cdrom.backing_file(), None);

        let controller = VirtualDevice {
            kind: DeviceKind::ScsiController { bus_number: 0 },
            ..disk
        };
        assert!(controller.is_scsi_controller());
        assert_eq!(controller.backing_file(), None);
    }

    #[test]
    fn provisioning_spec_defaults() {
        let spec: ProvisioningSpec = serde_json::from_str(
            r#"{
                "template": "ubuntu-22.04",
                "vmName": "web01",
                "disk": { "sizeGb": 200 },
                "nic": { "network": "VM Network", "macAddress": "de:ed:04:04:04:04" }
            }"#,
        )
        .unwrap();
        assert_eq!(spec.datacenter, None);
        assert_eq!(spec.disk.unwrap().provisioning, DiskProvisioning::Thick);
        assert_eq!(spec.nic.unwrap().adapter, NicAdapterType::E1000);
        assert!(!spec.power_on);
    }

    #[test]
    fn config_patch_skips_empty_fields() {
        let patch = ConfigPatch { memory_mb: Some(8192), device_change: vec![] };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"memoryMb":8192}"#);
    }
}
